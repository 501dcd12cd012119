//! bfind - Breadth-first file tree search
//!
//! A find-compatible search tool that visits files level by level, so
//! shallow matches print before deep ones. Takes the usual find syntax
//! (paths, then an expression of tests and actions) and evaluates the
//! expression at every visited file.
//!
//! # Architecture
//!
//! ```text
//!  command line
//!       │
//!       ▼
//! ┌──────────────┐     ┌─────────────────────────────┐
//! │  expr::parse │────▶│  Expr tree (optimized O0-4) │
//! └──────────────┘     └──────────────┬──────────────┘
//!                                     │
//!  ┌──────────────────────────────────┼────────────────┐
//!  │ walk                             ▼                │
//!  │ ┌──────────┐  frontier   ┌──────────────┐         │
//!  │ │ DirCache │◀──────────▶ │    Walker    │──visit──▶ eval::Evaluator
//!  │ │ (fd heap)│    FIFO     │  (BFS loop)  │◀──flow──  │
//!  │ └──────────┘             └──────────────┘           │
//!  └────────────────────────────────────────────────────┘
//!                                     │
//!                                     ▼
//!                            fmt::printf / sinks ──▶ stdout / files
//! ```
//!
//! The walker keeps a bounded min-heap of open directory descriptors so
//! that almost every syscall is a short openat/fstatat relative to a
//! nearby ancestor instead of a full-path resolution. Directories are
//! expanded in discovery order, giving a strict breadth-first visit
//! sequence; post-order callbacks fire while the ancestor chain is
//! garbage collected.
//!
//! # Example
//!
//! ```bash
//! # Shallow matches first
//! bfind / -name 'config*'
//!
//! # Everything modified in the last day, sizes included
//! bfind ~ -mtime -1 -printf '%s %p\n'
//! ```

pub mod config;
pub mod error;
pub mod eval;
pub mod expr;
pub mod fmt;
pub mod fstype;
pub mod sink;
pub mod summary;
pub mod userdb;
pub mod walk;

pub use config::{CliArgs, SearchConfig};
pub use error::{BfindError, ParseError, Result, WalkError};
pub use eval::Evaluator;
pub use expr::parse::parse_command;
pub use expr::Expr;
pub use sink::Sink;
pub use walk::{walk, FileKind, Flow, Visit, VisitPhase, WalkOptions};
