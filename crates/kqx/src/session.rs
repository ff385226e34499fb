//! 🎬 QuerySession: one query, one remote job, many consumers, one cleanup.
//!
//! 🎬 COLD OPEN - INT. SERVER ROOM - THE MOMENT SIXTEEN WORKERS HIT `next()` AT ONCE
//!
//! Sixteen workers. One query. Nobody has created the job yet. If every one of them does
//! it, the service ends up with sixteen identical jobs, and fifteen of them never get
//! deleted. So the session keeps a tiny state machine behind a mutex:
//!
//! ```text
//!   Uninitialized ──(first caller: create, poll, load page 0)──▶ Ready(job)
//!         │                                                     │
//!         └───────────────(any step fails)──────────▶ Failed(error)
//! ```
//!
//! Whoever gets the lock first does the work; everyone else waits on the same lock and
//! reads the outcome. A failure is cached and handed to every later caller. No retries.
//!
//! 🧠 Knowledge graph:
//! - Consumers (cursors) hold a [`ConsumerLease`]. Attaching bumps the live count, releasing
//!   drops it, and the release that takes the count to zero deletes the remote job. The count
//!   and the delete share one lock so the delete happens exactly once.
//! - Lock order is always consumers, then init. Never the other way round.
//! - `close()` deletes the job right away and shuts the session for good.
//! - Every session has its own child `CancellationToken`; initialization and page fetches
//!   observe it, deletion does not.
//! - A lease dropped without `release()` detaches on a task of the session's `TaskTracker`.
//!   The client waits on that tracker, so a late delete is not lost when the runtime winds down.

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::{Priority, QueryParams};
use crate::cursors::{SequentialCursor, SplitCursor};
use crate::error::{QueryError, Result};
use crate::job_driver::{JobDriver, PollPolicy};
use crate::page_source::{FetchedPage, PageLayout, PageSelector, PageSource};
use crate::query_service::QueryService;

/// 🔧 Per-session knobs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default)]
    pub dialect: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

fn default_page_size() -> u32 {
    400
}
fn default_poll_delay_ms() -> u64 {
    200
}
fn default_max_poll_attempts() -> u32 {
    10
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            poll_delay_ms: default_poll_delay_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            dialect: None,
            priority: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(QueryError::Validation("page_size must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            delay: Duration::from_millis(self.poll_delay_ms),
            max_attempts: self.max_poll_attempts,
        }
    }
}

/// ✅ What a successful initialization leaves behind.
#[derive(Debug)]
pub(crate) struct InitializedJob {
    pub(crate) job_id: String,
    pub(crate) first_page: FetchedPage,
    /// `None` when the service did not report `rowsInJob`.
    pub(crate) layout: Option<PageLayout>,
}

#[derive(Debug)]
enum InitPhase {
    Uninitialized,
    Ready(Arc<InitializedJob>),
    /// `job_id` is set when the job was created before the failure, so it still gets deleted.
    Failed {
        error: QueryError,
        job_id: Option<String>,
    },
}

#[derive(Debug)]
struct SessionInner {
    params: QueryParams,
    config: SessionConfig,
    driver: JobDriver,
    pages: PageSource,
    init: Mutex<InitPhase>,
    consumers: Mutex<usize>,
    last_error: StdMutex<Option<QueryError>>,
    cancel: CancellationToken,
    cleanup: TaskTracker,
}

/// 🎬 A lazily-started query. Cheap to clone; clones share the same job.
#[derive(Debug, Clone)]
pub struct QuerySession {
    inner: Arc<SessionInner>,
}

impl QuerySession {
    /// 🚀 A session for `sql`. Nothing is sent until the first row, size or job id is asked for.
    pub fn new(
        sql: impl Into<String>,
        config: SessionConfig,
        service: QueryService,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Self::tracked(sql, config, service, cancel, TaskTracker::new())
    }

    /// Same as [`Self::new`], with dropped-lease detaches spawned on `cleanup`.
    pub(crate) fn tracked(
        sql: impl Into<String>,
        config: SessionConfig,
        service: QueryService,
        cancel: CancellationToken,
        cleanup: TaskTracker,
    ) -> Result<Self> {
        config.validate()?;
        let mut params = QueryParams::new(sql)?.with_default_page_size(config.page_size);
        if let Some(dialect) = &config.dialect {
            params = params.with_dialect(dialect.clone());
        }
        if let Some(priority) = config.priority {
            params = params.with_priority(priority);
        }
        let driver = JobDriver::new(service.clone(), config.poll_policy());
        let pages = PageSource::new(service, config.page_size);
        Ok(Self {
            inner: Arc::new(SessionInner {
                params,
                config,
                driver,
                pages,
                init: Mutex::new(InitPhase::Uninitialized),
                consumers: Mutex::new(0),
                last_error: StdMutex::new(None),
                cancel,
                cleanup,
            }),
        })
    }

    pub fn sql(&self) -> &str {
        &self.inner.params.query
    }

    pub fn page_size(&self) -> u32 {
        self.inner.config.page_size
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// 🧹 Wait until every detach started by a dropped lease has finished.
    pub async fn wait_for_cleanup(&self) {
        wait_for(&self.inner.cleanup).await;
    }

    /// 💀 The most recent error any consumer of this session ran into.
    pub fn last_error(&self) -> Option<QueryError> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_error(&self, error: &QueryError) {
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
    }

    /// 🔒 Create, poll and load the first page, exactly once for all concurrent callers.
    pub async fn ensure_initialized(&self) -> Result<()> {
        self.ready().await.map(|_| ())
    }

    /// 🔢 Total rows in the job, if the service reported it. Starts the job if needed.
    pub async fn size(&self) -> Result<Option<u64>> {
        Ok(self.ready().await?.layout.map(|layout| layout.rows_in_job))
    }

    /// 🎫 The remote job id. Starts the job if needed.
    pub async fn job_id(&self) -> Result<String> {
        Ok(self.ready().await?.job_id.clone())
    }

    /// 👥 How many consumers are attached right now.
    pub async fn live_consumers(&self) -> usize {
        *self.inner.consumers.lock().await
    }

    /// 📜 A forward-only cursor over every row.
    pub async fn cursor(&self) -> SequentialCursor {
        SequentialCursor::new(self.clone(), self.attach().await)
    }

    /// 🍴 A cursor that can split its remaining pages off into siblings.
    pub async fn split_cursor(&self) -> SplitCursor {
        SplitCursor::root(self.clone(), self.attach().await)
    }

    /// 🗑️ Delete the remote job now and shut the session.
    ///
    /// Cursors still running stop with `Cancelled`. Later releases find no job to delete,
    /// so the delete still happens once.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let _consumers = self.inner.consumers.lock().await;
        let job_id = {
            let mut phase = self.inner.init.lock().await;
            let job_id = take_job_id(&mut phase);
            *phase = InitPhase::Failed {
                error: QueryError::Cancelled.into_session_failure(),
                job_id: None,
            };
            job_id
        };
        if let Some(job_id) = job_id {
            self.inner.driver.delete(&job_id).await;
        }
    }

    pub(crate) async fn ready(&self) -> Result<Arc<InitializedJob>> {
        let mut phase = self.inner.init.lock().await;
        match &*phase {
            InitPhase::Ready(job) => return Ok(job.clone()),
            InitPhase::Failed { error, .. } => return Err(error.clone()),
            InitPhase::Uninitialized => {}
        }

        let mut created = None;
        match self.initialize(&mut created).await {
            Ok(job) => {
                *phase = InitPhase::Ready(job.clone());
                Ok(job)
            }
            Err(err) => {
                let error = err.into_session_failure();
                self.record_error(&error);
                *phase = InitPhase::Failed {
                    error: error.clone(),
                    job_id: created,
                };
                Err(error)
            }
        }
    }

    async fn initialize(&self, created: &mut Option<String>) -> Result<Arc<InitializedJob>> {
        let inner = &self.inner;
        let job = inner
            .driver
            .create(Some(&Uuid::new_v4().to_string()), &inner.params)
            .await?;
        *created = Some(job.job_id.clone());
        inner.driver.poll_until_done(&job.job_id, &inner.cancel).await?;
        let first_page = inner
            .pages
            .fetch(&job.job_id, &PageSelector::First, &inner.cancel)
            .await?;
        let layout = first_page
            .rows_in_job
            .map(|rows| PageLayout::new(rows, u64::from(inner.config.page_size)));
        info!(job_id = %job.job_id, rows_in_job = ?layout.map(|l| l.rows_in_job), "✅ Query job ready");
        Ok(Arc::new(InitializedJob {
            job_id: job.job_id,
            first_page,
            layout,
        }))
    }

    pub(crate) async fn fetch_page(&self, job_id: &str, selector: &PageSelector) -> Result<FetchedPage> {
        self.inner.pages.fetch(job_id, selector, &self.inner.cancel).await
    }

    pub(crate) async fn attach(&self) -> ConsumerLease {
        let mut consumers = self.inner.consumers.lock().await;
        *consumers += 1;
        debug!(live = *consumers, "👥 Consumer attached");
        ConsumerLease {
            session: self.clone(),
            released: false,
            runtime: Handle::current(),
        }
    }

    async fn detach(&self) {
        let mut consumers = self.inner.consumers.lock().await;
        *consumers = consumers.saturating_sub(1);
        debug!(live = *consumers, "👥 Consumer detached");
        if *consumers > 0 {
            return;
        }
        let job_id = take_job_id(&mut *self.inner.init.lock().await);
        if let Some(job_id) = job_id {
            // 🔒 still holding the consumer lock: a concurrent attach waits for the delete
            self.inner.driver.delete(&job_id).await;
        }
    }
}

/// Close, wait, reopen: `TaskTracker::wait` only returns once the tracker is closed.
pub(crate) async fn wait_for(tracker: &TaskTracker) {
    tracker.close();
    tracker.wait().await;
    tracker.reopen();
}

/// Take the job id out of the phase. A ready session goes back to uninitialized.
fn take_job_id(phase: &mut InitPhase) -> Option<String> {
    match phase {
        InitPhase::Ready(job) => {
            let job_id = job.job_id.clone();
            *phase = InitPhase::Uninitialized;
            Some(job_id)
        }
        InitPhase::Failed { job_id, .. } => job_id.take(),
        InitPhase::Uninitialized => None,
    }
}

/// 🎟️ One consumer's claim on a session.
///
/// Release it with [`ConsumerLease::release`]. A lease dropped without being released is
/// released by a tracked task on the runtime that handed it out; see
/// [`QuerySession::wait_for_cleanup`].
pub struct ConsumerLease {
    session: QuerySession,
    released: bool,
    runtime: Handle,
}

impl ConsumerLease {
    pub fn session(&self) -> &QuerySession {
        &self.session
    }

    pub async fn release(mut self) {
        self.released = true;
        self.session.detach().await;
    }
}

impl fmt::Debug for ConsumerLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerLease")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for ConsumerLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let session = self.session.clone();
        self.session
            .inner
            .cleanup
            .spawn_on(async move { session.detach().await }, &self.runtime);
    }
}
