//! 🍴 SplitCursor: a cursor that can hand half of its remaining pages to a sibling.
//!
//! 🎬 COLD OPEN - INT. PIZZA PARLOR - ELEVEN SLICES, FOUR HUNGRY WORKERS
//!
//! The job has 1015 rows in pages of 100: ten full pages and one page of 15. The root cursor
//! owns all eleven (`[0, 10]`, remainder 15). Split it and the new cursor takes `[6, 10]`
//! plus the remainder, while the original keeps `[0, 5]` with remainder 0. Split again and
//! again; no page ever belongs to two live cursors, and the 15 extra rows always travel with
//! whoever owns the last page.
//!
//! 🧠 Knowledge graph:
//! - Pages are addressed by number here, not by cursor, because a sibling has to be able to
//!   jump straight into the middle.
//! - A split fetches the midpoint page *before* touching any range. If that fetch fails the
//!   split is declined and both ranges stay exactly as they were.
//! - Every accepted split attaches one more consumer to the session. Every cursor releases
//!   its own lease when it runs dry or fails.
//! - Without `rowsInJob` there is no page count to divide, so the cursor just follows the page
//!   cursors like a sequential one and never splits.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{QueryError, Result};
use crate::page_source::PageSelector;
use crate::session::{ConsumerLease, QuerySession};

/// 📐 The pages a split cursor owns: `current..=end`, with `remainder` extra rows on the
/// last page of the original range (zero unless this cursor owns that page).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: u64,
    pub current: u64,
    pub end: u64,
    pub remainder: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Coverage {
    /// Session not started yet (root cursor only).
    Pending,
    Ranged(PageRange),
    /// Row count unknown: follow page cursors, never split.
    Chained { next_cursor: Option<String> },
}

#[derive(Debug)]
pub struct SplitCursor {
    session: QuerySession,
    lease: Option<ConsumerLease>,
    job_id: Option<String>,
    coverage: Coverage,
    rows: VecDeque<Value>,
    error: Option<QueryError>,
}

impl SplitCursor {
    pub(crate) fn root(session: QuerySession, lease: ConsumerLease) -> Self {
        Self {
            session,
            lease: Some(lease),
            job_id: None,
            coverage: Coverage::Pending,
            rows: VecDeque::new(),
            error: None,
        }
    }

    pub fn session(&self) -> &QuerySession {
        &self.session
    }

    /// The page range this cursor owns, once known.
    pub fn range(&self) -> Option<PageRange> {
        match self.coverage {
            Coverage::Ranged(range) => Some(range),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.lease.is_none()
    }

    /// 📏 Rows left, roughly: `remainder + page_size * (end - current)`.
    ///
    /// `u64::MAX` while the size is unknown (not started, failed, or no `rowsInJob`), 0 once
    /// the cursor has run dry.
    pub fn estimate_size(&self) -> u64 {
        if self.error.is_some() {
            return u64::MAX;
        }
        if self.is_finished() {
            return 0;
        }
        match self.coverage {
            Coverage::Ranged(range) => range.remainder.saturating_add(
                u64::from(self.session.page_size()).saturating_mul(range.end - range.current),
            ),
            Coverage::Pending | Coverage::Chained { .. } => u64::MAX,
        }
    }

    /// ➡️ The next row of this cursor's range, `Ok(None)` when it is exhausted.
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
                self.session.record_error(&err);
                self.error = Some(err.clone());
                self.finish().await;
                Err(err)
            }
        }
    }

    /// 🛑 Stop early and give the lease back now instead of leaving it to `Drop`.
    /// The remaining rows are discarded; the last consumer out deletes the job.
    pub async fn close(&mut self) {
        self.finish().await;
    }

    /// 🎯 Feed the next row to `action`. `false` at the end of the range or after an error.
    pub async fn try_advance<F: FnOnce(Value)>(&mut self, action: F) -> bool {
        match self.next_row().await {
            Ok(Some(row)) => {
                action(row);
                true
            }
            Ok(None) | Err(_) => false,
        }
    }

    /// 🍴 Split off the upper half of the remaining pages into a new cursor.
    ///
    /// `None` when there is at most one page left, when the size is unknown, or when
    /// starting the session or fetching the midpoint page fails. A declined split leaves this
    /// cursor untouched.
    pub async fn try_split(&mut self) -> Option<SplitCursor> {
        if self.is_finished() {
            return None;
        }
        if self.coverage == Coverage::Pending {
            if let Err(err) = self.start().await {
                warn!(error = %err, "🍴 Split declined, session failed to start");
                self.session.record_error(&err);
                return None;
            }
        }
        let Coverage::Ranged(range) = self.coverage else {
            return None;
        };
        if range.end <= range.current {
            return None;
        }
        let job_id = self.job_id.clone()?;
        let split = range.current + 1 + ((range.end - range.current) >> 1);

        let page = match self
            .session
            .fetch_page(&job_id, &PageSelector::Number(split))
            .await
        {
            Ok(page) => page,
            Err(err) => {
                warn!(job_id = %job_id, split, error = %err, "🍴 Split declined, midpoint page failed");
                self.session.record_error(&err);
                return None;
            }
        };

        let lease = self.session.attach().await;
        let sibling = SplitCursor {
            session: self.session.clone(),
            lease: Some(lease),
            job_id: Some(job_id),
            coverage: Coverage::Ranged(PageRange {
                start: split,
                current: split,
                end: range.end,
                remainder: range.remainder,
            }),
            rows: page.rows.into(),
            error: None,
        };
        self.coverage = Coverage::Ranged(PageRange {
            end: split - 1,
            remainder: 0,
            ..range
        });
        debug!(
            kept = ?(range.current, split - 1),
            handed_off = ?(split, range.end),
            "🍴 Split accepted"
        );
        Some(sibling)
    }

    async fn start(&mut self) -> Result<()> {
        let job = self.session.ready().await?;
        self.rows = job.first_page.rows.iter().cloned().collect();
        self.coverage = match job.layout {
            Some(layout) => Coverage::Ranged(PageRange {
                start: 0,
                current: 0,
                end: layout.last_page,
                remainder: layout.remainder,
            }),
            None => Coverage::Chained {
                next_cursor: job.first_page.next_cursor.clone(),
            },
        };
        self.job_id = Some(job.job_id.clone());
        Ok(())
    }

    async fn preload(&mut self) -> Result<bool> {
        if self.coverage == Coverage::Pending {
            self.start().await?;
        }
        while self.rows.is_empty() {
            let Some(job_id) = self.job_id.as_deref() else {
                return Ok(false);
            };
            let page = match &mut self.coverage {
                Coverage::Ranged(range) => {
                    if range.current >= range.end {
                        return Ok(false);
                    }
                    range.current += 1;
                    self.session
                        .fetch_page(job_id, &PageSelector::Number(range.current))
                        .await?
                }
                Coverage::Chained { next_cursor } => {
                    let Some(cursor) = next_cursor.take() else {
                        return Ok(false);
                    };
                    let page = self
                        .session
                        .fetch_page(job_id, &PageSelector::Cursor(cursor))
                        .await?;
                    next_cursor.clone_from(&page.next_cursor);
                    page
                }
                Coverage::Pending => return Ok(false),
            };
            self.rows = page.rows.into();
        }
        Ok(true)
    }

    async fn finish(&mut self) {
        self.rows.clear();
        if let Some(lease) = self.lease.take() {
            lease.release().await;
        }
    }
}
