//! 🧱 Blocking: the same client, for code that lives on plain threads.
//!
//! [`BlockingQueryClient`] owns a multi-thread tokio runtime and runs every async operation
//! to completion with `block_on`. Sessions, row iterators and split cursors keep a handle to
//! that runtime, so they can be moved to `std::thread` workers and used there directly.
//!
//! ⚠️ Do not call into this module from inside an async task: `block_on` on a runtime thread
//! panics. That's what the async API is for.
//!
//! 🧹 Row iterators and split cursors dropped half-read give their lease back synchronously
//! in `Drop`, and the client waits for any pending job deletes before it lets go of the
//! runtime. Abandoning a query early never leaves its remote job behind.

use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::api::{
    JobListFilter, QueryJob, QueryJobDetail, QueryJobResult, QueryParams, ResultsRequest,
};
use crate::client::QueryClient;
use crate::cursors::{SequentialCursor, SplitCursor};
use crate::error::{QueryError, Result};
use crate::session::{QuerySession, SessionConfig};

/// 🧱 Synchronous facade over a [`QueryClient`].
#[derive(Debug)]
pub struct BlockingQueryClient {
    runtime: Arc<Runtime>,
    client: QueryClient,
}

impl BlockingQueryClient {
    pub fn new(client: QueryClient) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("kqx-blocking")
            .build()
            .map_err(|err| QueryError::Configuration(format!("failed to start runtime: {err}")))?;
        Ok(Self {
            runtime: Arc::new(runtime),
            client,
        })
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    pub fn create_job(&self, job_id: Option<&str>, params: &QueryParams) -> Result<QueryJob> {
        self.runtime
            .block_on(self.client.service().create_job(job_id, Some(params)))
    }

    pub fn get_job_status(&self, job_id: &str) -> Result<QueryJobDetail> {
        self.runtime
            .block_on(self.client.service().get_job_status(job_id))
    }

    pub fn delete_job(&self, job_id: &str) -> Result<QueryJobDetail> {
        self.runtime.block_on(self.client.service().delete_job(job_id))
    }

    pub fn list_jobs(&self, filter: &JobListFilter) -> Result<Vec<QueryJobDetail>> {
        self.runtime.block_on(self.client.service().list_jobs(filter))
    }

    pub fn get_job_results(&self, request: &ResultsRequest) -> Result<QueryJobResult> {
        self.runtime
            .block_on(self.client.service().get_job_results(request))
    }

    pub fn session(&self, sql: impl Into<String>, config: SessionConfig) -> Result<BlockingSession> {
        Ok(BlockingSession {
            runtime: self.runtime.clone(),
            session: self.client.session(sql, config)?,
        })
    }

    /// 📜 Shortcut: open a session and iterate its rows.
    pub fn rows(&self, sql: impl Into<String>, config: SessionConfig) -> Result<BlockingRows> {
        Ok(self.session(sql, config)?.rows())
    }
}

impl Drop for BlockingQueryClient {
    fn drop(&mut self) {
        // 🧹 the runtime may die with us; let the queued goodbyes finish first
        if Handle::try_current().is_err() {
            self.runtime.block_on(self.client.wait_for_cleanup());
        }
    }
}

/// 🎬 A [`QuerySession`] driven synchronously.
#[derive(Debug, Clone)]
pub struct BlockingSession {
    runtime: Arc<Runtime>,
    session: QuerySession,
}

impl BlockingSession {
    pub fn inner(&self) -> &QuerySession {
        &self.session
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        self.runtime.block_on(self.session.ensure_initialized())
    }

    pub fn size(&self) -> Result<Option<u64>> {
        self.runtime.block_on(self.session.size())
    }

    pub fn job_id(&self) -> Result<String> {
        self.runtime.block_on(self.session.job_id())
    }

    pub fn last_error(&self) -> Option<QueryError> {
        self.session.last_error()
    }

    pub fn close(&self) {
        self.runtime.block_on(self.session.close());
    }

    pub fn rows(&self) -> BlockingRows {
        BlockingRows {
            cursor: self.runtime.block_on(self.session.cursor()),
            runtime: self.runtime.clone(),
        }
    }

    pub fn split_cursor(&self) -> BlockingSplitCursor {
        BlockingSplitCursor {
            cursor: self.runtime.block_on(self.session.split_cursor()),
            runtime: self.runtime.clone(),
        }
    }
}

/// 📜 Rows as a plain `Iterator`. An error ends the iteration; read it from [`Self::error`].
#[derive(Debug)]
pub struct BlockingRows {
    cursor: SequentialCursor,
    runtime: Arc<Runtime>,
}

impl BlockingRows {
    pub fn error(&self) -> Option<&QueryError> {
        self.cursor.error()
    }
}

impl Drop for BlockingRows {
    fn drop(&mut self) {
        if !self.cursor.is_finished() && Handle::try_current().is_err() {
            self.runtime.block_on(self.cursor.close());
        }
    }
}

impl Iterator for BlockingRows {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.runtime.block_on(self.cursor.next_row()).ok().flatten()
    }
}

/// 🍴 A [`SplitCursor`] for `std::thread` fork/join code.
#[derive(Debug)]
pub struct BlockingSplitCursor {
    cursor: SplitCursor,
    runtime: Arc<Runtime>,
}

impl BlockingSplitCursor {
    pub fn try_advance<F: FnOnce(Value)>(&mut self, action: F) -> bool {
        self.runtime.block_on(self.cursor.try_advance(action))
    }

    pub fn try_split(&mut self) -> Option<BlockingSplitCursor> {
        let sibling = self.runtime.block_on(self.cursor.try_split())?;
        Some(BlockingSplitCursor {
            cursor: sibling,
            runtime: self.runtime.clone(),
        })
    }

    pub fn estimate_size(&self) -> u64 {
        self.cursor.estimate_size()
    }

    pub fn error(&self) -> Option<&QueryError> {
        self.cursor.error()
    }
}

impl Drop for BlockingSplitCursor {
    fn drop(&mut self) {
        if !self.cursor.is_finished() && Handle::try_current().is_err() {
            self.runtime.block_on(self.cursor.close());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::JobState;
    use crate::transport::InMemoryQueryService;
    use std::collections::BTreeSet;
    use std::thread;
    use std::time::Duration;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            page_size: 100,
            poll_delay_ms: 1,
            ..SessionConfig::default()
        }
    }

    fn blocking_over(fake: &InMemoryQueryService) -> BlockingQueryClient {
        BlockingQueryClient::new(QueryClient::new(Arc::new(fake.clone()))).expect("runtime")
    }

    #[test]
    fn the_one_where_rows_iterate_without_an_await_in_sight() {
        let fake = InMemoryQueryService::new(345);
        let client = blocking_over(&fake);
        let rows: Vec<Value> = client.rows("SELECT 1", fast_config()).expect("session").collect();
        assert_eq!(rows.len(), 345);
        assert_eq!(fake.calls().deletes, 1);
    }

    #[test]
    fn the_one_where_the_iterator_stops_and_keeps_the_receipt() {
        let fake = InMemoryQueryService::new(345).with_failing_page(2);
        let client = blocking_over(&fake);
        let mut rows = client.rows("SELECT 1", fast_config()).expect("session");
        let count = rows.by_ref().count();
        assert_eq!(count, 200);
        assert_eq!(rows.error().and_then(QueryError::status), Some(500));
    }

    #[test]
    fn the_one_where_threads_split_the_work() {
        let fake = InMemoryQueryService::new(1015);
        let client = blocking_over(&fake);
        let session = client.session("SELECT 1", fast_config()).expect("session");
        let mut root = session.split_cursor();
        let mut sibling = root.try_split().expect("splits");

        let worker = thread::spawn(move || {
            let mut seen = Vec::new();
            while sibling.try_advance(|row| seen.push(row["row"].as_u64().expect("index"))) {}
            seen
        });
        let mut seen = Vec::new();
        while root.try_advance(|row| seen.push(row["row"].as_u64().expect("index"))) {}
        seen.extend(worker.join().expect("worker thread"));

        let unique: BTreeSet<u64> = seen.iter().copied().collect();
        assert_eq!(seen.len(), 1015);
        assert_eq!(unique.len(), 1015);
        assert_eq!(fake.calls().deletes, 1);
    }

    #[test]
    fn the_one_where_walking_away_early_still_deletes_every_job() {
        let fake = InMemoryQueryService::new(1_000).with_latency(Duration::from_millis(5));
        let client = blocking_over(&fake);
        for _ in 0..10 {
            let mut rows = client.rows("SELECT 1", fast_config()).expect("session");
            assert!(rows.next().is_some());
            drop(rows);
        }
        let session = client.session("SELECT 1", fast_config()).expect("session");
        let mut root = session.split_cursor();
        let sibling = root.try_split().expect("splits");
        drop(sibling);
        drop(root);
        drop(session);
        drop(client);

        assert_eq!(fake.calls().creates, 11);
        assert_eq!(fake.calls().deletes, 11);
    }

    #[test]
    fn the_one_where_the_low_level_api_blocks_too() {
        let fake = InMemoryQueryService::new(3);
        let client = blocking_over(&fake);
        let params = QueryParams::new("SELECT 1").expect("valid");
        let job = client.create_job(Some("b1"), &params).expect("created");
        assert_eq!(client.get_job_status(&job.job_id).expect("status").state, JobState::Done);
        let page = client
            .get_job_results(&ResultsRequest::new("b1"))
            .expect("results");
        assert_eq!(page.rows_in_job, Some(3));
        assert_eq!(client.list_jobs(&JobListFilter::new("t")).expect("list").len(), 1);
        client.delete_job("b1").expect("deleted");
        assert!(client.list_jobs(&JobListFilter::new("t")).expect("list").is_empty());
    }
}
