//! 🔒 Auth: who are we, which data lake do we talk to, and with what bearer token.
//!
//! A [`CredentialProvider`] answers one question: "give me an endpoint and a token".
//! The `force` flag says whether a fresh answer is mandatory (first contact) or merely
//! welcome (a refresh on a later request). Providers that have nothing new to say on a
//! non-forced call return `None` and the cached token keeps serving.
//!
//! 🧠 Knowledge graph:
//! - [`DataLakeCredential`] is a provider plus the data lake id it belongs to. The id is the
//!   cache key in [`credential_context::CredentialContext`].
//! - Plain closures `Fn(bool) -> Option<Credential>` are providers too, via [`FnProvider`].

pub mod credential_context;
pub mod static_provider;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

pub use credential_context::CredentialContext;
pub use static_provider::StaticCredentialProvider;

/// 🌍 FQDN of the US query gateway.
pub const US_FQDN: &str = "cortex-prd1-api.us.cdl.paloaltonetworks.com";
/// 🌍 FQDN of the EU query gateway.
pub const EU_FQDN: &str = "api.nl.cdl.paloaltonetworks.com";

/// 🌍 Deployment region, for callers who would rather not memorize hostnames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Americas,
    Europe,
}

impl Region {
    pub fn fqdn(self) -> &'static str {
        match self {
            Region::Americas => US_FQDN,
            Region::Europe => EU_FQDN,
        }
    }
}

/// 🎫 Where to send requests and what bearer token to send with them.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub endpoint: String,
    pub token: String,
}

impl Credential {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }
}

// 🔒 tokens stay out of logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// 🔑 Supplies credentials on demand.
///
/// `force = true` means the caller has nothing cached and needs an answer. `force = false`
/// is an opportunistic refresh: return `Some` only if the token actually changed.
#[async_trait]
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    async fn provide(&self, force: bool) -> Option<Credential>;
}

/// 🎭 Adapter that lets a plain closure act as a [`CredentialProvider`].
pub struct FnProvider<F>(pub F);

impl<F> fmt::Debug for FnProvider<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnProvider")
    }
}

#[async_trait]
impl<F> CredentialProvider for FnProvider<F>
where
    F: Fn(bool) -> Option<Credential> + Send + Sync,
{
    async fn provide(&self, force: bool) -> Option<Credential> {
        (self.0)(force)
    }
}

/// 🏷️ A provider bound to the data lake it speaks for.
#[derive(Debug, Clone)]
pub struct DataLakeCredential {
    pub data_lake_id: String,
    pub provider: Arc<dyn CredentialProvider>,
}

impl DataLakeCredential {
    pub fn new(data_lake_id: impl Into<String>, provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            data_lake_id: data_lake_id.into(),
            provider,
        }
    }

    /// 🎭 Shortcut for closure-backed providers.
    pub fn from_fn<F>(data_lake_id: impl Into<String>, provider: F) -> Self
    where
        F: Fn(bool) -> Option<Credential> + Send + Sync + 'static,
    {
        Self::new(data_lake_id, Arc::new(FnProvider(provider)))
    }
}
