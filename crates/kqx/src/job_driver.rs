//! ⏳ JobDriver: submit a job, then ask "are we there yet?" a bounded number of times.
//!
//! 🎬 COLD OPEN - INT. BACK SEAT OF A MINIVAN - HOUR THREE
//!
//! "Are we there yet?" "RUNNING." "Are we there yet?" "RUNNING." "Are we there yet?" "DONE."
//! That's the happy path. The unhappy ones: the answer is `FAILED` (stop asking, it's over),
//! or the answer is still `RUNNING` when the question budget runs out (`JobTimeout`).
//!
//! 🧠 Knowledge graph:
//! - Fixed delay, no backoff. Jobs finish in hundreds of milliseconds to seconds, and a
//!   predictable upper bound on waiting matters more than request volume.
//! - `max_attempts` counts the waits between status checks. With 3 attempts there are 4 checks
//!   in total: the initial one plus one after each wait. A job that turns `DONE` on the last
//!   check succeeds.
//! - Every wait observes the cancellation token. Deleting never does.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{JobState, QueryJob, QueryParams};
use crate::error::{QueryError, Result};
use crate::query_service::QueryService;

/// ⏱️ How long to wait between status checks, and how many waits before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(200),
            max_attempts: 10,
        }
    }
}

/// 🚗 Drives one remote job from submission to a terminal state.
#[derive(Debug, Clone)]
pub struct JobDriver {
    service: QueryService,
    policy: PollPolicy,
}

impl JobDriver {
    pub fn new(service: QueryService, policy: PollPolicy) -> Self {
        Self { service, policy }
    }

    pub fn service(&self) -> &QueryService {
        &self.service
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// 🚀 Create the job. A 409 here means the id is already taken.
    pub async fn create(&self, job_id: Option<&str>, params: &QueryParams) -> Result<QueryJob> {
        let job = self.service.create_job(job_id, Some(params)).await?;
        info!(job_id = %job.job_id, "🚀 Query job created");
        Ok(job)
    }

    /// 🔄 Poll until the job leaves `PENDING`/`RUNNING`.
    ///
    /// ✅ `Ok(Done)` when it finishes. 💀 `JobFailed` for any other terminal state, without
    /// spending the remaining attempts. 💀 `JobTimeout` when still in flight after
    /// `max_attempts` waits. 🛑 `Cancelled` if the token fires during a wait.
    pub async fn poll_until_done(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JobState> {
        let mut attempts = 0u32;
        let mut state = self.check(job_id, attempts, cancel).await?;

        while state.is_in_flight() {
            if attempts >= self.policy.max_attempts {
                warn!(job_id, %state, attempts, "⏱️ Poll budget exhausted, job still in flight");
                return Err(QueryError::JobTimeout {
                    job_id: job_id.to_string(),
                    last_state: state,
                    attempts,
                });
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QueryError::Cancelled),
                _ = tokio::time::sleep(self.policy.delay) => {}
            }
            attempts += 1;
            state = self.check(job_id, attempts, cancel).await?;
        }

        if state != JobState::Done {
            warn!(job_id, %state, "💀 Query job ended without results");
            return Err(QueryError::JobFailed {
                job_id: job_id.to_string(),
                state,
            });
        }
        Ok(state)
    }

    async fn check(&self, job_id: &str, attempt: u32, cancel: &CancellationToken) -> Result<JobState> {
        let detail = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            detail = self.service.get_job_status(job_id) => detail?,
        };
        debug!(job_id, attempt, state = %detail.state, "🔄 Polled job status");
        Ok(detail.state)
    }

    /// 🗑️ Delete the job, best effort. Failures are logged and swallowed: whoever ends up
    /// here is cleaning up and has nobody to hand an error to.
    pub async fn delete(&self, job_id: &str) {
        match self.service.delete_job(job_id).await {
            Ok(_) => info!(job_id, "🗑️ Query job deleted"),
            Err(err) => warn!(job_id, error = %err, "⚠️ Failed to delete query job"),
        }
    }
}
