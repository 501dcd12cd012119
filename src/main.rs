//! bfind - Breadth-first file tree search
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use bfind::config::CliArgs;
use bfind::error::BfindError;
use bfind::eval::Evaluator;
use bfind::expr::parse::parse_command;
use bfind::summary::print_summary;
use bfind::walk::{walk, Visit};
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("bfind: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    // Allow the find spellings of -help/-version anywhere up front
    if args.args.iter().any(|a| a == "-help") {
        CliArgs::command().print_long_help()?;
        return Ok(ExitCode::SUCCESS);
    }
    if args.args.iter().any(|a| a == "-version") {
        println!("bfind {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let (mut config, expr) = match parse_command(&args.args, None) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("bfind: {e}");
            return Ok(ExitCode::from(2));
        }
    };
    config.show_stats = args.stats;
    config.finalize_fd_budget();

    // First interrupt requests a clean stop through the same flag -quit
    // uses; the second one forces the exit
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupt_count = Arc::new(AtomicU32::new(0));
    {
        let interrupted = Arc::clone(&interrupted);
        let interrupt_count = Arc::clone(&interrupt_count);
        ctrlc::set_handler(move || {
            let count = interrupt_count.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                eprintln!("\nInterrupt received, finishing up...");
                interrupted.store(true, Ordering::SeqCst);
            } else {
                eprintln!("\nForced exit!");
                std::process::exit(130);
            }
        })
        .context("Failed to set signal handler")?;
    }

    // A fully pure expression optimizes to -false at -O4; nothing would be
    // evaluated or printed, so skip the traversal outright
    if config.optlevel >= 4 && expr.is_false() {
        return Ok(ExitCode::SUCCESS);
    }

    let mut evaluator = Evaluator::new(&config, &expr, interrupted);

    for root in &config.roots {
        if evaluator.should_quit() {
            break;
        }

        if let Err(e) = walk(root, &config.walk, &mut |visit: &mut Visit| {
            evaluator.visit(visit)
        }) {
            evaluator.record_failure();
            eprintln!("bfind: {}", BfindError::from(e));
        }
    }

    let show_stats = config.show_stats;
    let totals = std::mem::take(evaluator.totals_mut());
    let ret = evaluator.finish();

    if show_stats {
        print_summary(&totals);
    }

    Ok(if ret == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bfind=debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bfind=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
