//! 📜 SequentialCursor: one row at a time, front to back, following the page cursors.
//!
//! Starts the session on the first pull, serves page 0 out of the session's cached first
//! page, then follows `pageCursor` until the service says there is nothing left. At the end,
//! or at the first error, the lease goes back to the session exactly once and the cursor
//! stays finished.

use std::collections::VecDeque;

use futures::Stream;
use serde_json::Value;

use crate::error::{QueryError, Result};
use crate::page_source::PageSelector;
use crate::session::{ConsumerLease, QuerySession};

#[derive(Debug)]
pub struct SequentialCursor {
    session: QuerySession,
    lease: Option<ConsumerLease>,
    job_id: Option<String>,
    rows: VecDeque<Value>,
    next_cursor: Option<String>,
    error: Option<QueryError>,
}

impl SequentialCursor {
    pub(crate) fn new(session: QuerySession, lease: ConsumerLease) -> Self {
        Self {
            session,
            lease: Some(lease),
            job_id: None,
            rows: VecDeque::new(),
            next_cursor: None,
            error: None,
        }
    }

    pub fn session(&self) -> &QuerySession {
        &self.session
    }

    /// The error that ended this cursor, if one did.
    pub fn error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.lease.is_none()
    }

    /// ➡️ The next row, `Ok(None)` at the end. After an error every call returns `Ok(None)`.
    pub async fn next_row(&mut self) -> Result<Option<Value>> {
        if self.is_finished() {
            return Ok(None);
        }
        match self.preload().await {
            Ok(true) => Ok(self.rows.pop_front()),
            Ok(false) => {
                self.finish().await;
                Ok(None)
            }
            Err(err) => {
                self.fail(&err).await;
                Err(err)
            }
        }
    }

    /// 👀 Whether another row is available. Errors read as "no"; see [`Self::error`].
    pub async fn has_next(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        match self.preload().await {
            Ok(true) => true,
            Ok(false) => {
                self.finish().await;
                false
            }
            Err(err) => {
                self.fail(&err).await;
                false
            }
        }
    }

    /// 🛑 Stop early and give the lease back now instead of leaving it to `Drop`.
    /// The remaining rows are discarded; the last consumer out deletes the job.
    pub async fn close(&mut self) {
        self.finish().await;
    }

    /// 🌊 The remaining rows as a stream. An error is yielded once, then the stream ends.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> + Send {
        futures::stream::unfold(self, |mut cursor| async move {
            match cursor.next_row().await {
                Ok(Some(row)) => Some((Ok(row), cursor)),
                Ok(None) => None,
                Err(err) => Some((Err(err), cursor)),
            }
        })
    }

    async fn preload(&mut self) -> Result<bool> {
        if self.job_id.is_none() {
            let job = self.session.ready().await?;
            self.rows = job.first_page.rows.iter().cloned().collect();
            self.next_cursor = job.first_page.next_cursor.clone();
            self.job_id = Some(job.job_id.clone());
        }
        while self.rows.is_empty() {
            let (Some(job_id), Some(cursor)) = (self.job_id.as_deref(), self.next_cursor.take())
            else {
                return Ok(false);
            };
            let page = self
                .session
                .fetch_page(job_id, &PageSelector::Cursor(cursor))
                .await?;
            self.rows = page.rows.into();
            self.next_cursor = page.next_cursor;
        }
        Ok(true)
    }

    async fn fail(&mut self, err: &QueryError) {
        self.session.record_error(err);
        self.error = Some(err.clone());
        self.finish().await;
    }

    async fn finish(&mut self) {
        self.rows.clear();
        if let Some(lease) = self.lease.take() {
            lease.release().await;
        }
    }
}
