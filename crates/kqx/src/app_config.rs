//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." - every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment: `KQX_*` environment variables (nested keys split on `__`, so
//! `KQX_SESSION__PAGE_SIZE=100`) layered under an optional TOML file. The file wins.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::auth::{DataLakeCredential, Region, StaticCredentialProvider};
use crate::parallel::ParallelConfig;
use crate::session::SessionConfig;
use crate::transport::HttpTransportConfig;

/// 📦 Everything the CLI needs to know, in one struct.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub transport: HttpTransportConfig,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🔑 One data lake identity with a fixed token. Give either `endpoint` or `region`.
#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    #[serde(default = "default_data_lake_id")]
    pub data_lake_id: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<Region>,
    pub token: String,
}

fn default_data_lake_id() -> String {
    "default".to_string()
}

impl CredentialsConfig {
    /// 🌍 The explicit endpoint if set, else the region's host.
    pub fn resolved_endpoint(&self) -> anyhow::Result<String> {
        match (&self.endpoint, self.region) {
            (Some(endpoint), _) => Ok(endpoint.clone()),
            (None, Some(region)) => Ok(region.fqdn().to_string()),
            (None, None) => anyhow::bail!(
                "💀 credentials need either an 'endpoint' or a 'region' (americas, europe)"
            ),
        }
    }

    pub fn to_credential(&self) -> anyhow::Result<DataLakeCredential> {
        let endpoint = self.resolved_endpoint()?;
        Ok(DataLakeCredential::new(
            self.data_lake_id.clone(),
            Arc::new(StaticCredentialProvider::new(endpoint, self.token.clone())),
        ))
    }
}

/// 🧵 Fan-out width and row channel bound for the parallel driver.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_queue_capacity", alias = "channel_size")]
    pub queue_capacity: usize,
}

fn default_parallelism() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    1024
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl From<RuntimeConfig> for ParallelConfig {
    fn from(runtime: RuntimeConfig) -> Self {
        ParallelConfig {
            parallelism: runtime.parallelism,
            queue_capacity: runtime.queue_capacity,
        }
    }
}

/// 🚀 Load the config from `KQX_*` env vars, plus the TOML file if one was given.
///
/// 📐 No file means env vars only. No silent fallback to some default file name.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("KQX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (KQX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (KQX_*). \
                 No file was provided, this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
