//! 🔌 Transport: the only thing in this crate that actually talks to the outside world.
//!
//! 🚰 A [`Transport`] takes an [`ApiRequest`] (method, path, optional resource id, query,
//! optional JSON body, optional credential override) and hands back an [`ApiResponse`] (status plus a leniently
//! parsed JSON body). Everything above it is plain logic that can be tested against the
//! in-memory fake in [`in_mem`].
//!
//! 🧠 Knowledge graph:
//! - [`http::HttpTransport`] is the real one: reqwest, bearer token from the
//!   [`crate::auth::CredentialContext`], `{scheme}://{endpoint}{path}/{resource_id}`.
//! - A resource id is never glued into `path` by hand. Job ids are caller-chosen strings, and
//!   a `/`, `?` or `#` in one must stay inside its own segment.
//! - [`in_mem::InMemoryQueryService`] is the fake: it answers the query API out of RAM.
//! - Status codes are not judged here. `ApiResponse::into_success` is where a 4xx/5xx turns
//!   into a `QueryError::Api`.
//!
//! 🦆 The duck has no transport. The duck walks.

pub mod http;
pub mod in_mem;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::DataLakeCredential;
use crate::error::{QueryError, Result};

pub use http::{HttpTransport, HttpTransportConfig};
pub use in_mem::InMemoryQueryService;

/// 🛣️ The three verbs the query API needs. No PATCH, no PUT, no drama.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        })
    }
}

/// 📤 One request, before it knows which host it will land on.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path including the leading slash, e.g. `/query/v2/jobs`.
    pub path: String,
    /// One trailing path segment (a job id), escaped by the transport.
    pub resource_id: Option<String>,
    pub query: Vec<(String, String)>,
    /// `None` means "use the transport's default credential".
    pub credential: Option<DataLakeCredential>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            resource_id: None,
            query: Vec::new(),
            credential: None,
            body: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_credential(mut self, credential: Option<DataLakeCredential>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// 📥 Status plus body. `body` is `None` when the service sent nothing, `null`, or not-JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    /// ✅ The body of a 2xx/3xx, or `QueryError::Api` carrying the raw body for anything >= 400.
    pub fn into_success(self) -> Result<Option<Value>> {
        if self.status >= 400 {
            return Err(QueryError::Api {
                status: self.status,
                body: self.body,
            });
        }
        Ok(self.body)
    }
}

/// 🔌 Sends requests to the query service. Implementations must be shareable across tasks.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}
