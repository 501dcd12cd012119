//! End-of-run reporting
//!
//! With --stats, a styled summary table goes to stderr after the walk so it
//! never mixes with matched paths on stdout.

use console::style;
use humansize::{format_size, BINARY};
use std::time::{Duration, Instant};

/// Counters accumulated while walking
#[derive(Debug)]
pub struct WalkTotals {
    /// Directories visited pre-order
    pub dirs: u64,
    /// Non-directories visited
    pub files: u64,
    /// Bytes of stat'd files
    pub bytes: u64,
    /// Errors reported
    pub errors: u64,
    /// When the walk started
    pub started: Instant,
}

impl WalkTotals {
    pub fn new() -> WalkTotals {
        WalkTotals {
            dirs: 0,
            files: 0,
            bytes: 0,
            errors: 0,
            started: Instant::now(),
        }
    }

    /// Wall-clock time since the walk started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for WalkTotals {
    fn default() -> Self {
        Self::new()
    }
}

/// Print the summary table to stderr.
pub fn print_summary(totals: &WalkTotals) {
    let duration = totals.elapsed();
    let duration_secs = duration.as_secs_f64();
    let visited = totals.dirs + totals.files;
    let rate = if duration_secs > 0.0 {
        visited as f64 / duration_secs
    } else {
        0.0
    };

    eprintln!();
    eprintln!("{}", style("Search Complete").green().bold());
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!(
        "  {} {}",
        style("Directories:").bold(),
        format_number(totals.dirs)
    );
    eprintln!("  {} {}", style("Files:").bold(), format_number(totals.files));
    eprintln!(
        "  {} {}",
        style("Total Size:").bold(),
        format_size(totals.bytes, BINARY)
    );
    eprintln!(
        "  {} {} ({:.0} entries/sec)",
        style("Duration:").bold(),
        format_elapsed(duration),
        rate
    );
    if totals.errors > 0 {
        eprintln!(
            "  {} {}",
            style("Errors:").yellow().bold(),
            format_number(totals.errors)
        );
    }
    eprintln!();
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Format a duration as "1.2s" or "2m 3s"
pub fn format_elapsed(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
