//! 🚪 QueryClient: the front door. Hands out sessions and low-level services.
//!
//! One client wraps one [`Transport`]. Sessions opened without an explicit identity use the
//! transport's default credential; [`QueryClient::session_for`] targets any other data lake
//! through the same transport (and, for HTTP, the same credential cache).
//!
//! Every session gets a child of the client's root cancellation token, so
//! [`QueryClient::shutdown`] stops all in-flight initialization and page fetches at once.
//! Cursors dropped half-read detach on tasks tracked by the client;
//! [`QueryClient::wait_for_cleanup`] waits for their job deletes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::auth::{CredentialContext, DataLakeCredential};
use crate::error::{QueryError, Result};
use crate::query_service::QueryService;
use crate::session::{self, QuerySession, SessionConfig};
use crate::transport::{HttpTransport, HttpTransportConfig, Transport};

#[derive(Debug, Clone)]
pub struct QueryClient {
    transport: Arc<dyn Transport>,
    root_token: CancellationToken,
    cleanup: TaskTracker,
}

impl QueryClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            root_token: CancellationToken::new(),
            cleanup: TaskTracker::new(),
        }
    }

    /// 📡 A client over HTTP with `default_credential` as the fallback identity.
    pub fn http(
        config: HttpTransportConfig,
        default_credential: Option<DataLakeCredential>,
    ) -> Result<Self> {
        let context = Arc::new(CredentialContext::new(default_credential));
        Ok(Self::new(Arc::new(HttpTransport::new(config, context)?)))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// 🧾 Low-level API bound to the default identity.
    pub fn service(&self) -> QueryService {
        QueryService::new(self.transport.clone(), None)
    }

    /// 🧾 Low-level API bound to `credential`.
    pub fn service_for(&self, credential: DataLakeCredential) -> QueryService {
        QueryService::new(self.transport.clone(), Some(credential))
    }

    /// 🎬 A lazy session for `sql` on the default identity.
    pub fn session(&self, sql: impl Into<String>, config: SessionConfig) -> Result<QuerySession> {
        self.open(sql, config, self.service())
    }

    /// 🎬 A lazy session for `sql` on another data lake.
    pub fn session_for(
        &self,
        credential: DataLakeCredential,
        sql: impl Into<String>,
        config: SessionConfig,
    ) -> Result<QuerySession> {
        self.open(sql, config, self.service_for(credential))
    }

    fn open(
        &self,
        sql: impl Into<String>,
        config: SessionConfig,
        service: QueryService,
    ) -> Result<QuerySession> {
        if self.root_token.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        QuerySession::tracked(
            sql,
            config,
            service,
            self.root_token.child_token(),
            self.cleanup.clone(),
        )
    }

    /// 🛑 Cancel every session this client opened. New sessions are refused afterwards.
    pub fn shutdown(&self) {
        self.root_token.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root_token.is_cancelled()
    }

    /// 🧹 Wait for the detaches of every cursor dropped before it was done, across all
    /// sessions of this client. Call it before the runtime goes away.
    pub async fn wait_for_cleanup(&self) {
        session::wait_for(&self.cleanup).await;
    }

    /// 🛑 [`Self::shutdown`], then wait for the pending cleanup.
    pub async fn close(&self) {
        self.shutdown();
        self.wait_for_cleanup().await;
    }
}
