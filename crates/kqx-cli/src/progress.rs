//! 📊 progress.rs: "Are we there yet?" - every query, every time, forever.
//!
//! 🚀 Rows read so far, rows per second over a 5-second window, percent of `rowsInJob`,
//! elapsed and remaining time. Rendered as a comfy-table message on top of an indicatif bar,
//! on stderr, so stdout stays clean for the NDJSON.
//!
//! ⚠️ Watching this progress bar will not make it go faster. Science says no. 🦆

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

/// 🔢 "1000000 rows" → "1,000,000 rows". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Row counter with a progress bar. `total_rows` of 0 means "the service didn't say".
pub(crate) struct RowProgress {
    job_label: String,
    total_rows: u64,
    rows: u64,
    progress_bar: ProgressBar,
    /// 🔄 (timestamp, rows) samples inside the rate window
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for RowProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("RowProgress")
            .field("job_label", &self.job_label)
            .field("total_rows", &self.total_rows)
            .field("rows", &self.rows)
            .finish()
    }
}

impl RowProgress {
    pub(crate) fn new(job_label: String, total_rows: u64) -> Self {
        let progress_bar = ProgressBar::new(total_rows);
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(style);

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64));

        Self {
            job_label,
            total_rows,
            rows: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    pub(crate) fn update(&mut self, rows_read: u64) {
        self.rows += rows_read;
        let rows_per_sec = self.rows_per_sec();
        self.render(rows_per_sec);
        self.progress_bar.set_position(self.rows);
    }

    pub(crate) fn rows(&self) -> u64 {
        self.rows
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    /// 📈 Rows per second over the last 5 seconds, so one slow page doesn't look like doom.
    fn rows_per_sec(&mut self) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.rows));

        match self.rate_samples.front() {
            Some(&(oldest_time, oldest_rows)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 {
                    self.rows.saturating_sub(oldest_rows) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn percent(&self) -> f64 {
        if self.total_rows > 0 {
            (self.rows as f64 / self.total_rows as f64) * 100.0
        } else {
            0.0
        }
    }

    fn render(&self, rows_per_sec: f64) {
        let percent = self.percent();
        let elapsed = self.start_time.elapsed();
        let remaining = if percent > 0.0 {
            // 🔮 linear extrapolation: assumes the remaining pages look like the ones so far
            let total_estimated = elapsed.as_secs_f64() / (percent / 100.0);
            let remaining_secs = total_estimated - elapsed.as_secs_f64();
            if remaining_secs > 0.0 {
                format_duration(Duration::from_secs_f64(remaining_secs))
            } else {
                "--:--".to_string()
            }
        } else {
            "--:--".to_string()
        };
        let total = if self.total_rows > 0 {
            format_number(self.total_rows)
        } else {
            "?".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Rows/s", format_number(rows_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} / {} Rows", format_number(self.rows), total))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}%", percent)).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(""),
            Cell::new(format!("{} remaining", remaining)).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("job: {}\n{}", self.job_label, table));
    }
}
