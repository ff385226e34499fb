//! 💀 Errors: the many ways a query job can break your heart.
//!
//! 🎬 COLD OPEN - INT. ON-CALL ROTATION - 3:47 AM
//!
//! The job said RUNNING. Then it said RUNNING again. Then it said RUNNING eight more times,
//! and the poll budget ran out, and somewhere a `JobTimeout` was born. This module is its
//! birth certificate. And its siblings' birth certificates. It's a big family.
//!
//! 🧠 Knowledge graph:
//! - `QueryError` is `Clone` on purpose: a failed session initialization is cached and handed
//!   to every waiter, so the same error has to be copyable to all of them.
//! - `Api` keeps the raw response body. Decoding it into [`ApiErrorItem`]s happens only when
//!   somebody asks via [`QueryError::api_errors`].
//! - `SessionFailed` wraps the cached initialization failure. [`QueryError::root`] peels it.
//!
//! 🦆 The duck is not an error. The duck is a constant.

use serde_json::Value;
use thiserror::Error;

use crate::api::{ApiErrorItem, JobState};

/// 📦 Every way a query can fail, typed so callers can `match` instead of grepping strings.
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    /// 🔒 No usable credential. Fatal. Not retried. Check your config and your life choices.
    #[error("💀 configuration error: {0}")]
    Configuration(String),

    /// 🚫 The caller handed us something we cannot send (missing params, empty ids, ...).
    #[error("💀 validation error: {0}")]
    Validation(String),

    /// 🚫 Precondition violation caught before any request leaves the building.
    #[error("💀 invalid argument: {0}")]
    InvalidArgument(String),

    /// 📡 The query service answered, and the answer was no. Body kept raw for lazy decoding.
    #[error("💀 query service rejected the request with HTTP {status}")]
    Api { status: u16, body: Option<Value> },

    /// ⏱️ Polled until the budget ran dry and the job was still in flight.
    #[error("💀 job {job_id} still {last_state} after {attempts} attempts")]
    JobTimeout {
        job_id: String,
        last_state: JobState,
        attempts: u32,
    },

    /// 💀 The job reached a terminal state that is not DONE.
    #[error("💀 job {job_id} failed with state {state}")]
    JobFailed { job_id: String, state: JobState },

    /// 🧩 The response had the wrong shape. A contract violation, never retried.
    #[error("💀 malformed response: {0}")]
    Parse(String),

    /// 🌩️ The wire itself failed (connect, TLS, read). Retrying is the transport's business.
    #[error("💀 transport error: {0}")]
    Transport(String),

    /// 🛑 Somebody pulled the cancellation cord.
    #[error("🛑 operation cancelled")]
    Cancelled,

    /// 🪦 The session failed to initialize earlier; this is that same failure, re-served.
    #[error("💀 query session failed to initialize: {0}")]
    SessionFailed(Box<QueryError>),
}

/// 🎯 The library-wide `Result`. One alias to rule them all.
pub type Result<T> = std::result::Result<T, QueryError>;

impl QueryError {
    /// 🧅 Peel every `SessionFailed` layer and return the error underneath.
    pub fn root(&self) -> &QueryError {
        let mut current = self;
        while let QueryError::SessionFailed(inner) = current {
            current = inner;
        }
        current
    }

    /// 📡 HTTP status of an `Api` error (looking through `SessionFailed` wrappers).
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            QueryError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 🔍 Decode the raw body of an `Api` error into its error items.
    ///
    /// Returns `None` for anything that is not an `Api` error. The service sends either an array
    /// of error objects or one lone object; the lone object is promoted to a one-item list.
    /// Any other shape is a `Parse` error.
    pub fn api_errors(&self) -> Option<Result<Vec<ApiErrorItem>>> {
        match self.root() {
            QueryError::Api { body, .. } => Some(ApiErrorItem::parse_list(body.as_ref())),
            _ => None,
        }
    }

    /// 🪦 Wrap as a cached session failure, without double-wrapping.
    pub(crate) fn into_session_failure(self) -> QueryError {
        match self {
            already @ QueryError::SessionFailed(_) => already,
            other => QueryError::SessionFailed(Box::new(other)),
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Parse(err.to_string())
    }
}
