//! Configuration types for bfind
//!
//! This module defines:
//! - The thin clap surface (--help/--version plus harness flags; everything
//!   else is find syntax, captured raw and handed to the expression parser)
//! - The validated runtime configuration shared by the walker and evaluator

use crate::walk::{TimeSpec, WalkOptions};
use clap::Parser;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Breadth-first, find-compatible file tree search
#[derive(Parser, Debug, Clone)]
#[command(
    name = "bfind",
    version,
    about = "Breadth-first, find-compatible file tree search",
    long_about = "Searches file trees level by level, so shallow matches appear first.\n\n\
                  Takes the usual find syntax: paths, then an expression of tests and\n\
                  actions combined with -and/-or/-not and parentheses.",
    after_help = "EXAMPLES:\n    \
        bfind src -name '*.rs'\n    \
        bfind / -xdev -size +1G -print\n    \
        bfind . -type d -empty -delete\n    \
        bfind /var/log -mtime +30 -printf '%s %p\\n'"
)]
pub struct CliArgs {
    /// Paths and expression, in find syntax
    #[arg(
        value_name = "PATHS-AND-EXPRESSION",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub args: Vec<String>,

    /// Print a walk summary to stderr at the end
    #[arg(long)]
    pub stats: bool,

    /// Verbose logging (warnings and traversal diagnostics)
    #[arg(long)]
    pub verbose: bool,
}

/// Which -D debug channels are enabled
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugFlags {
    /// Log optimizer rewrites
    pub opt: bool,
    /// Collect and dump per-node evaluation statistics
    pub rates: bool,
    /// Trace stat calls
    pub stat: bool,
    /// Dump the parsed expression tree before walking
    pub tree: bool,
}

/// Validated runtime configuration for one search
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Starting paths, in command-line order
    pub roots: Vec<PathBuf>,
    /// Traversal options handed to the walker
    pub walk: WalkOptions,
    /// Don't evaluate entries shallower than this
    pub mindepth: usize,
    /// Don't evaluate or descend past this depth
    pub maxdepth: usize,
    /// Optimization level 0-4
    pub optlevel: u8,
    /// Debug channels
    pub debug: DebugFlags,
    /// Suppress ENOENT for files that raced away mid-walk
    pub ignore_races: bool,
    /// Reject paths unsafe for xargs (-X)
    pub xargs_safe: bool,
    /// Files opened by -fprint family, counted against the fd budget
    pub open_files: usize,
    /// Print the summary table when done
    pub show_stats: bool,
    /// The reference "now" for time tests, adjusted by -daystart
    pub now: TimeSpec,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            roots: Vec::new(),
            walk: WalkOptions::default(),
            mindepth: 0,
            maxdepth: usize::MAX,
            optlevel: 3,
            debug: DebugFlags::default(),
            ignore_races: false,
            xargs_safe: false,
            open_files: 0,
            show_stats: false,
            now: current_time(),
        }
    }
}

impl SearchConfig {
    /// Derive the walker's fd budget from the process limits and the sinks
    /// already opened, then apply it.
    pub fn finalize_fd_budget(&mut self) {
        self.walk.open_fd_budget = infer_fd_budget(self.open_files);
    }
}

/// The current wall-clock time as a [`TimeSpec`].
pub fn current_time() -> TimeSpec {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => TimeSpec {
            sec: elapsed.as_secs() as i64,
            nsec: i64::from(elapsed.subsec_nanos()),
        },
        Err(_) => TimeSpec::default(),
    }
}

/// Infer how many descriptors the traversal may keep open: the NOFILE limit
/// minus descriptors already in use, minus one spare for the -empty test.
pub fn infer_fd_budget(open_files: usize) -> usize {
    let mut limit = 4096usize;
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) } == 0
        && rl.rlim_cur != libc::RLIM_INFINITY
    {
        limit = rl.rlim_cur as usize;
    }

    // stdin/stdout/stderr plus anything -fprint opened
    let mut in_use = 3 + open_files;

    // Prefer an exact count of inherited descriptors when procfs is around
    if let Ok(entries) = std::fs::read_dir("/proc/self/fd") {
        // The read_dir handle itself shows up in the listing
        in_use = entries.count().saturating_sub(1);
    }

    let reserved = in_use + 1;
    if limit > reserved {
        limit - reserved
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_captures_raw_expression() {
        let cli = CliArgs::parse_from(["bfind", "/tmp", "-name", "*.rs", "-print"]);
        assert_eq!(cli.args, vec!["/tmp", "-name", "*.rs", "-print"]);
        assert!(!cli.stats);
    }

    #[test]
    fn test_cli_hyphen_leading_expression() {
        let cli = CliArgs::parse_from(["bfind", "-L", "/tmp", "-type", "f"]);
        assert_eq!(cli.args, vec!["-L", "/tmp", "-type", "f"]);
    }

    #[test]
    fn test_cli_harness_flags_before_expression() {
        let cli = CliArgs::parse_from(["bfind", "--stats", "/tmp"]);
        assert!(cli.stats);
        assert_eq!(cli.args, vec!["/tmp"]);
    }

    #[test]
    fn test_fd_budget_is_sane() {
        let budget = infer_fd_budget(0);
        assert!(budget >= 1);
        let with_sinks = infer_fd_budget(2);
        assert!(with_sinks <= budget);
    }

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert_eq!(config.optlevel, 3);
        assert_eq!(config.maxdepth, usize::MAX);
        assert!(config.walk.recover);
    }
}
