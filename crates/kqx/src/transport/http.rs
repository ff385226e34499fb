//! 📡 HttpTransport: reqwest, a bearer token, and a prayer that the gateway is up.
//!
//! Resolves the endpoint and token through the shared [`CredentialContext`] on every
//! request, then builds `{scheme}://{endpoint}{path}/{resource_id}?{query}` with the resource
//! id percent-encoded as a single segment. The response body is parsed
//! leniently: empty, `null` or not-JSON all become `None`, and the status code decides the rest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::{ApiRequest, ApiResponse, Method, Transport};
use crate::auth::CredentialContext;
use crate::error::{QueryError, Result};

/// 🔧 Knobs for the HTTP client.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpTransportConfig {
    /// `https` in production. Tests point this at a plain-HTTP mock server.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_scheme() -> String {
    "https".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("kqx/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// 📡 The real transport. Clones share the connection pool and the credential cache.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
    credentials: Arc<CredentialContext>,
}

impl HttpTransport {
    /// 🚀 Build the reqwest client (10s connect, 30s request by default).
    pub fn new(config: HttpTransportConfig, credentials: Arc<CredentialContext>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| {
                QueryError::Configuration(format!("the HTTP client refused to be born: {err}"))
            })?;
        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    pub fn credentials(&self) -> &Arc<CredentialContext> {
        &self.credentials
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let credential = self.credentials.resolve(request.credential.as_ref()).await?;

        let base = format!(
            "{}://{}{}",
            self.config.scheme, credential.endpoint, request.path
        );
        let mut url = Url::parse(&base)
            .map_err(|err| QueryError::Configuration(format!("invalid request url '{base}': {err}")))?;
        if let Some(resource_id) = &request.resource_id {
            url.path_segments_mut()
                .map_err(|()| {
                    QueryError::Configuration(format!("request url '{base}' cannot take a path segment"))
                })?
                .push(resource_id);
        }
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        debug!("📡 {} {}", request.method, url.path());

        let mut builder = self
            .client
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", credential.token));
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| QueryError::Transport(format!("error sending request: {err}")))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| QueryError::Transport(format!("error reading response body: {err}")))?;
        trace!("📥 HTTP {status}, {} bytes", bytes.len());

        // 🧩 lenient on purpose: the status code decides, the body is evidence
        let body = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .filter(|value| !value.is_null());
        Ok(ApiResponse::new(status, body))
    }
}
