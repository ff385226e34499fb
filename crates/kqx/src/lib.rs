//! 🚀 kqx: a client for job-based query services.
//!
//! 🎬 *[narrator voice]* "You send a query. The service says 'I'll get back to you.' It
//! never does. You have to go ask. Again. And again. Then it hands you page one of forty."
//!
//! This crate does the asking. Submit a query as a remote job, poll it to completion, then
//! read the result pages as one stream of rows, from one cursor or from many parallel ones
//! that split the pages among themselves. The remote job is deleted when the last consumer
//! is done with it.
//!
//! 🧠 Knowledge graph:
//! - [`client::QueryClient`] hands out [`session::QuerySession`]s and low-level
//!   [`query_service::QueryService`]s.
//! - A session starts its job lazily and exactly once ([`job_driver`], [`page_source`]).
//! - [`cursors`] read rows; [`parallel`] fans a split cursor out over tokio tasks;
//!   [`blocking`] does all of it from plain threads.
//! - [`transport`] is the only thing that touches the network; [`auth`] caches tokens.
//!
//! ```no_run
//! # async fn demo() -> kqx::Result<()> {
//! use std::sync::Arc;
//! use kqx::{DataLakeCredential, HttpTransportConfig, QueryClient, SessionConfig};
//! use kqx::auth::{Region, StaticCredentialProvider};
//!
//! let lake = DataLakeCredential::new(
//!     "my-lake",
//!     Arc::new(StaticCredentialProvider::new(Region::Americas.fqdn(), "token")),
//! );
//! let client = QueryClient::http(HttpTransportConfig::default(), Some(lake))?;
//! let session = client.session("SELECT * FROM `lake.firewall.traffic` LIMIT 10", SessionConfig::default())?;
//! let mut cursor = session.cursor().await;
//! while let Some(row) = cursor.next_row().await? {
//!     println!("{row}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod app_config;
pub mod auth;
pub mod blocking;
pub mod client;
pub mod cursors;
pub mod error;
pub mod job_driver;
pub mod page_source;
pub mod parallel;
pub mod query_service;
pub mod session;
pub mod transport;

pub use api::{JobState, Priority, QueryParams, ResultFormat};
pub use auth::{Credential, CredentialProvider, DataLakeCredential};
pub use client::QueryClient;
pub use cursors::{SequentialCursor, SplitCursor};
pub use error::{QueryError, Result};
pub use parallel::{ParallelConfig, ParallelReport, collect_parallel, fan_out};
pub use session::{ConsumerLease, QuerySession, SessionConfig};
pub use transport::{HttpTransportConfig, InMemoryQueryService, Transport};
