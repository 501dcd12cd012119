//! Breadth-first filesystem traversal
//!
//! The walker visits every file under a set of starting paths level by
//! level, so shallow matches surface before deep ones. A bounded cache of
//! open directory descriptors keeps most syscalls relative (openat/fstatat
//! against a nearby ancestor) instead of re-resolving full paths.

mod cache;
pub mod entry;
mod frontier;
mod walker;

pub(crate) use cache::DirStream;
pub use entry::{FileKind, FileStat, TimeSpec, Visit, VisitPhase};
pub use walker::{walk, Flow, WalkOptions};
