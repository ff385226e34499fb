//! 🚀 kqx-cli: the front desk of kqx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple SELECT. Forty pages later..."
//! 📦 Thin wrapper: parse args, set up logging, load config, then let the library do the
//! polling, paging and splitting. Rows go to stdout (or `--output`) as NDJSON, one JSON
//! object per line. The progress bar goes to stderr so pipes stay clean. 🦆

mod progress;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{Table, presets::UTF8_BORDERS_ONLY};
use kqx::api::{JobListFilter, QueryJobDetail};
use kqx::app_config::{AppConfig, load_config};
use kqx::{JobState, ParallelConfig, QueryClient, QuerySession, SessionConfig, fan_out};
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::progress::RowProgress;

/// 🔄 Re-render the progress table every this many rows, not on every single one.
const PROGRESS_EVERY: u64 = 256;

#[derive(Debug, Parser)]
#[command(name = "kqx-cli", version, about = "🚀 Run queries as remote jobs and stream the rows")]
struct Cli {
    /// 🔧 TOML config file. Without it, only `KQX_*` environment variables are read.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a query and write its rows as NDJSON.
    Query {
        sql: String,
        /// Write rows here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Split the result pages over this many workers (1 = plain sequential read).
        #[arg(long, short)]
        parallel: Option<usize>,
    },
    /// Show one job's status.
    Status { job_id: String },
    /// Cancel and delete a job.
    Delete { job_id: String },
    /// List a tenant's jobs, newest first.
    Jobs {
        tenant_id: String,
        #[arg(long)]
        state: Option<StateArg>,
        #[arg(long)]
        max: Option<u32>,
    },
}

/// 🏷️ The job states a list can be filtered on, spelled the way people type them.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum StateArg {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl From<StateArg> for JobState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Pending => JobState::Pending,
            StateArg::Running => JobState::Running,
            StateArg::Done => JobState::Done,
            StateArg::Failed => JobState::Failed,
            StateArg::Cancelled => JobState::Cancelled,
        }
    }
}

/// 🚀 main(): init tracing, parse args, load config, run, and on failure print the
/// whole cause chain before exiting with 1.
#[tokio::main]
async fn main() {
    // 📡 logs go to stderr, filtered by RUST_LOG like civilized folk
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("Connection refused")
                || cause_str.contains("connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }
        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: the query service isn't reachable. Check `credentials.endpoint` / \
                 `credentials.region` and `transport.scheme` in your config. ☕"
            );
        }
        // 🗑️ Process exitus maximus.
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())
        .context("💀 kqx-cli couldn't load its config. Check the file and the KQX_* variables.")?;
    let client = build_client(&config)?;

    match cli.command {
        Command::Query {
            sql,
            output,
            parallel,
        } => {
            let mut parallel_config: ParallelConfig = config.runtime.into();
            if let Some(parallelism) = parallel {
                parallel_config.parallelism = parallelism;
            }
            run_query(
                &client,
                config.session.clone(),
                sql,
                output.as_deref(),
                parallel_config,
            )
            .await
        }
        Command::Status { job_id } => {
            let detail = client
                .service()
                .get_job_status(&job_id)
                .await
                .with_context(|| format!("💀 couldn't fetch the status of job '{job_id}'"))?;
            println!("{}", jobs_table(std::slice::from_ref(&detail)));
            Ok(())
        }
        Command::Delete { job_id } => {
            let detail = client
                .service()
                .delete_job(&job_id)
                .await
                .with_context(|| format!("💀 couldn't delete job '{job_id}'"))?;
            info!("🗑️ job {} deleted", detail.job_id);
            println!("{}", jobs_table(std::slice::from_ref(&detail)));
            Ok(())
        }
        Command::Jobs {
            tenant_id,
            state,
            max,
        } => {
            let filter = JobListFilter {
                state: state.map(JobState::from),
                max_jobs: max,
                ..JobListFilter::new(tenant_id)
            };
            let jobs = client
                .service()
                .list_jobs(&filter)
                .await
                .context("💀 couldn't list jobs")?;
            println!("{}", jobs_table(&jobs));
            Ok(())
        }
    }
}

fn build_client(config: &AppConfig) -> Result<QueryClient> {
    let credential = config
        .credentials
        .to_credential()
        .context("💀 the [credentials] section doesn't describe a usable data lake")?;
    QueryClient::http(config.transport.clone(), Some(credential))
        .context("💀 couldn't build the HTTP transport")
}

/// 🏃 Run one query end to end. Whatever goes wrong after the session exists, the remote job
/// is deleted before this returns.
async fn run_query(
    client: &QueryClient,
    session_config: SessionConfig,
    sql: String,
    output: Option<&Path>,
    parallel: ParallelConfig,
) -> Result<()> {
    let session = client
        .session(sql, session_config)
        .context("💀 the query was rejected before it left the building")?;
    let outcome = stream_rows(&session, output, parallel).await;
    if outcome.is_err() {
        // 🧹 one exit for every failure: the job goes down with the ship
        session.close().await;
    }
    client.wait_for_cleanup().await;
    outcome
}

/// 🚰 Start the job, then pour rows into the sink until the cursor runs dry.
async fn stream_rows(
    session: &QuerySession,
    output: Option<&Path>,
    parallel: ParallelConfig,
) -> Result<()> {
    let (total, job_id) = tokio::try_join!(session.size(), session.job_id())
        .context("💀 the query job never produced results")?;
    info!(
        "✅ job {} done, {} rows to read",
        job_id,
        total.map_or_else(|| "an unknown number of".to_string(), |t| t.to_string())
    );

    let mut sink = open_sink(output).await?;
    let mut progress = RowProgress::new(job_id, total.unwrap_or(0));

    let outcome = if parallel.parallelism > 1 {
        drain_parallel(session, parallel, &mut sink, &mut progress).await
    } else {
        drain_sequential(session, &mut sink, &mut progress).await
    };
    progress.finish();
    sink.flush().await.context("💀 couldn't flush the output")?;
    outcome?;

    info!("🏁 {} rows written", progress.rows());
    Ok(())
}

async fn open_sink(output: Option<&Path>) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    Ok(match output {
        Some(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("💀 couldn't create output file '{}'", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(tokio::io::stdout())),
    })
}

async fn write_row(sink: &mut (dyn AsyncWrite + Unpin + Send), row: &Value) -> Result<()> {
    let mut line = serde_json::to_vec(row)?;
    line.push(b'\n');
    sink.write_all(&line)
        .await
        .context("💀 couldn't write a row")?;
    Ok(())
}

async fn drain_sequential(
    session: &QuerySession,
    sink: &mut Box<dyn AsyncWrite + Unpin + Send>,
    progress: &mut RowProgress,
) -> Result<()> {
    let mut cursor = session.cursor().await;
    let mut pending = 0u64;
    while let Some(row) = cursor.next_row().await.context("💀 reading rows failed")? {
        write_row(sink.as_mut(), &row).await?;
        pending += 1;
        if pending == PROGRESS_EVERY {
            progress.update(pending);
            pending = 0;
        }
    }
    progress.update(pending);
    Ok(())
}

async fn drain_parallel(
    session: &QuerySession,
    config: ParallelConfig,
    sink: &mut Box<dyn AsyncWrite + Unpin + Send>,
    progress: &mut RowProgress,
) -> Result<()> {
    let (rows, workers) = fan_out(session.split_cursor().await, config);
    let mut pending = 0u64;
    while let Ok(row) = rows.recv().await {
        write_row(sink.as_mut(), &row).await?;
        pending += 1;
        if pending == PROGRESS_EVERY {
            progress.update(pending);
            pending = 0;
        }
    }
    progress.update(pending);

    let report = workers.await.context("💀 a worker task went missing")?;
    info!("🍴 {} cursors read {} rows", report.cursors, report.rows);
    match report.failures.into_iter().next() {
        Some(failure) => Err(failure).context("💀 a worker failed while reading its pages"),
        None => Ok(()),
    }
}

/// 📋 One row per job: id, state, completion, submit time, rows-per-second-ish stats.
fn jobs_table(jobs: &[QueryJobDetail]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["job id", "state", "progress", "submitted", "run time (ms)"]);
    for job in jobs {
        table.add_row(vec![
            job.job_id.clone(),
            job.state.to_string(),
            job.progress
                .map_or_else(|| "-".to_string(), |p| format!("{}%", p.completion_pct)),
            job.submit_time.to_string(),
            job.statistics
                .and_then(|s| s.run_time_ms)
                .map_or_else(|| "-".to_string(), |ms| ms.to_string()),
        ]);
    }
    table
}
