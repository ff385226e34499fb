//! 🧵 Parallel: fork a split cursor into workers and fan their rows into one channel.
//!
//! 🎬 *[a root cursor stands alone. it owns eleven pages. it cannot read them all in time.]*
//! 🎬 *[it splits. and splits again. four cursors walk into four tokio tasks.]*
//!
//! The driver halves the fork budget at every split: a budget of 4 gives two splits at the
//! second level and four leaf cursors, each drained on its own task into a bounded
//! `async-channel`. A leaf that fails records its error in the [`ParallelReport`] and stops;
//! its siblings keep going. When the receiver goes away the workers stop sending and their
//! leases are released on drop.

use async_channel::{Receiver, Sender};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cursors::SplitCursor;
use crate::error::QueryError;

/// 🔧 How wide to fork and how many rows may wait in the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelConfig {
    pub parallelism: usize,
    pub queue_capacity: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            queue_capacity: 1024,
        }
    }
}

/// 📊 What the workers did: rows sent, leaf cursors drained, errors met.
#[derive(Debug, Default, Clone)]
pub struct ParallelReport {
    pub rows: u64,
    pub cursors: usize,
    pub failures: Vec<QueryError>,
}

impl ParallelReport {
    fn merge(&mut self, other: ParallelReport) {
        self.rows += other.rows;
        self.cursors += other.cursors;
        self.failures.extend(other.failures);
    }
}

/// 🚀 Start draining `root` in parallel. Rows arrive on the receiver in no particular order;
/// the join handle resolves once every worker is done.
pub fn fan_out(
    root: SplitCursor,
    config: ParallelConfig,
) -> (Receiver<Value>, JoinHandle<ParallelReport>) {
    let (tx, rx) = async_channel::bounded(config.queue_capacity.max(1));
    let handle = tokio::spawn(fork(root, config.parallelism.max(1), tx));
    (rx, handle)
}

/// 📦 [`fan_out`] and gather everything into a `Vec`.
pub async fn collect_parallel(
    root: SplitCursor,
    config: ParallelConfig,
) -> (Vec<Value>, ParallelReport) {
    let (rx, handle) = fan_out(root, config);
    let mut rows = Vec::new();
    while let Ok(row) = rx.recv().await {
        rows.push(row);
    }
    (rows, join_report(handle.await))
}

fn join_report(joined: Result<ParallelReport, tokio::task::JoinError>) -> ParallelReport {
    match joined {
        Ok(report) => report,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => ParallelReport::default(),
    }
}

fn fork(
    mut cursor: SplitCursor,
    budget: usize,
    tx: Sender<Value>,
) -> BoxFuture<'static, ParallelReport> {
    async move {
        if budget > 1 {
            if let Some(sibling) = cursor.try_split().await {
                let sibling_budget = budget / 2;
                let sibling_task = tokio::spawn(fork(sibling, sibling_budget, tx.clone()));
                let mut report = fork(cursor, budget - sibling_budget, tx).await;
                report.merge(join_report(sibling_task.await));
                return report;
            }
        }
        drain(cursor, tx).await
    }
    .boxed()
}

async fn drain(mut cursor: SplitCursor, tx: Sender<Value>) -> ParallelReport {
    let mut report = ParallelReport {
        cursors: 1,
        ..ParallelReport::default()
    };
    debug!(range = ?cursor.range(), "🧵 Worker draining cursor");
    loop {
        match cursor.next_row().await {
            Ok(Some(row)) => {
                if tx.send(row).await.is_err() {
                    debug!("🧵 Row receiver gone, worker stopping");
                    break;
                }
                report.rows += 1;
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "💀 Worker cursor failed, siblings carry on");
                report.failures.push(err);
                break;
            }
        }
    }
    report
}
