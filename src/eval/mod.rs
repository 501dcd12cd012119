//! Expression evaluation
//!
//! The evaluator is the walker's callback: for every visited file it walks
//! the expression tree with short-circuit semantics, stats lazily on first
//! need, runs actions, and translates -prune/-quit into traversal flow.
//! Errors during evaluation are reported once per file and make the failing
//! test false; they never abort the walk.

pub mod exec;

use crate::config::SearchConfig;
use crate::error::WalkResult;
use crate::expr::{Action, Expr, ExprKind, ModeCmp, Test};
use crate::fmt::ls::render_ls;
use crate::fmt::printf;
use crate::summary::WalkTotals;
use crate::userdb;
use crate::walk::{DirStream, FileKind, Flow, Visit, VisitPhase};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Drives the expression over every visit and tracks run-wide state
pub struct Evaluator<'c> {
    config: &'c SearchConfig,
    expr: &'c Expr,
    quit: bool,
    ret: i32,
    totals: WalkTotals,
    interrupted: Arc<AtomicBool>,
}

/// Per-file evaluation state
struct EvalCtx<'a, 'v, 'w> {
    visit: &'a mut Visit<'w>,
    config: &'v SearchConfig,
    flow: Flow,
    quit: bool,
    ret: i32,
}

impl<'c> Evaluator<'c> {
    /// Build an evaluator over a parsed expression.
    pub fn new(config: &'c SearchConfig, expr: &'c Expr, interrupted: Arc<AtomicBool>) -> Self {
        Evaluator {
            config,
            expr,
            quit: false,
            ret: 0,
            totals: WalkTotals::new(),
            interrupted,
        }
    }

    /// The walker callback.
    pub fn visit(&mut self, visit: &mut Visit) -> WalkResult<Flow> {
        if self.interrupted.load(Ordering::SeqCst) {
            self.quit = true;
            return Ok(Flow::Stop);
        }

        if visit.phase() == VisitPhase::Pre {
            if visit.is_error() {
                self.totals.errors += 1;
            } else if visit.kind() == FileKind::Dir {
                self.totals.dirs += 1;
            } else {
                self.totals.files += 1;
                if let Some(st) = visit.stat() {
                    self.totals.bytes += st.size().max(0) as u64;
                }
            }
        }

        if let Some(errno) = visit.error() {
            if !self.should_ignore(errno, visit.depth()) {
                self.ret = 1;
                report_path_error(visit, io::Error::from_raw_os_error(errno));
            }
            return Ok(Flow::SkipSubtree);
        }

        if self.config.xargs_safe
            && visit
                .path_bytes()
                .iter()
                .any(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\'' | b'"' | b'\\'))
        {
            self.ret = 1;
            eprintln!(
                "bfind: '{}': path is not safe for xargs",
                visit.path().display()
            );
            return Ok(Flow::SkipSubtree);
        }

        let mut flow = Flow::Continue;
        if visit.depth() >= self.config.maxdepth {
            flow = Flow::SkipSubtree;
        }

        // In -depth mode directories are evaluated on their post-order
        // visit, once their subtree is done
        let expected_phase = if self.config.walk.post_order
            && visit.kind() == FileKind::Dir
            && visit.depth() < self.config.maxdepth
        {
            VisitPhase::Post
        } else {
            VisitPhase::Pre
        };

        if visit.phase() == expected_phase
            && visit.depth() >= self.config.mindepth
            && visit.depth() <= self.config.maxdepth
        {
            let mut ctx = EvalCtx {
                visit: &mut *visit,
                config: self.config,
                flow,
                quit: false,
                ret: self.ret,
            };
            eval(self.expr, &mut ctx);
            flow = ctx.flow;
            self.ret = ctx.ret;
            if ctx.quit {
                self.quit = true;
            }
        }

        if self.config.debug.stat {
            if let Some(st) = visit.stat() {
                debug!(
                    path = %visit.path().display(),
                    dev = st.dev(),
                    ino = st.ino(),
                    "stat"
                );
            }
        }

        Ok(flow)
    }

    fn should_ignore(&self, errno: i32, depth: usize) -> bool {
        self.config.ignore_races && errno == libc::ENOENT && depth > 0
    }

    /// Whether -quit (or an interrupt) ended the run.
    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Record an external failure (e.g. an aborted walk) in the exit code.
    pub fn record_failure(&mut self) {
        self.ret = 1;
    }

    /// Walk-wide counters.
    pub fn totals(&self) -> &WalkTotals {
        &self.totals
    }

    /// Mutable access to the counters, so callers can take them before
    /// [`Evaluator::finish`] consumes the evaluator.
    pub fn totals_mut(&mut self) -> &mut WalkTotals {
        &mut self.totals
    }

    /// Flush pending work and produce the process exit code.
    pub fn finish(mut self) -> i32 {
        self.expr.finish_execs(&mut self.ret);

        if self.config.debug.rates {
            let mut err = io::stderr().lock();
            let _ = self.expr.dump_rates(&mut err);
            let _ = io::Write::write_all(&mut err, b"\n");
        }

        self.ret
    }
}

/// Evaluate one node, with optional rate profiling.
fn eval(expr: &Expr, ctx: &mut EvalCtx) -> bool {
    let start = ctx.config.debug.rates.then(Instant::now);
    let result = eval_kind(expr, ctx);
    expr.stats().record(result, start.map(|s| s.elapsed()));
    result
}

fn eval_kind(expr: &Expr, ctx: &mut EvalCtx) -> bool {
    match expr.kind() {
        ExprKind::True => true,
        ExprKind::False => false,
        ExprKind::Not(rhs) => !eval(rhs, ctx),
        ExprKind::And(lhs, rhs) => {
            if !eval(lhs, ctx) {
                return false;
            }
            if ctx.quit {
                return false;
            }
            eval(rhs, ctx)
        }
        ExprKind::Or(lhs, rhs) => {
            if eval(lhs, ctx) {
                return true;
            }
            if ctx.quit {
                return false;
            }
            eval(rhs, ctx)
        }
        ExprKind::Comma(lhs, rhs) => {
            eval(lhs, ctx);
            if ctx.quit {
                return false;
            }
            eval(rhs, ctx)
        }
        ExprKind::Test(test) => eval_test(test, ctx),
        ExprKind::Act(action) => eval_action(action, ctx),
    }
}

/// Report an evaluation error for the current file and record the failure.
fn eval_error(ctx: &mut EvalCtx, err: &io::Error) {
    let ignore = ctx.config.ignore_races
        && err.raw_os_error() == Some(libc::ENOENT)
        && ctx.visit.depth() > 0;
    if !ignore {
        report_path_error(ctx.visit, io::Error::new(err.kind(), err.to_string()));
        ctx.ret = 1;
    }
}

fn report_path_error(visit: &Visit, err: io::Error) {
    eprintln!("bfind: '{}': {}", visit.path().display(), err);
}

/// Stat on demand; a failure reports once and fails the test.
fn fill_stat<'a, 'v, 'w>(
    ctx: &'a mut EvalCtx<'_, 'v, 'w>,
) -> Option<crate::walk::FileStat> {
    if ctx.visit.stat().is_none() {
        if let Err(err) = ctx.visit.fill_stat() {
            eval_error(ctx, &err);
            return None;
        }
    }
    ctx.visit.stat().copied()
}

fn eval_test(test: &Test, ctx: &mut EvalCtx) -> bool {
    match test {
        Test::Name { pattern } => {
            let mut name = ctx.visit.name_bytes();
            if ctx.visit.depth() == 0 {
                // Trailing slashes on a root path are not part of the name
                if let Some(pos) = name.iter().position(|&b| b == b'/') {
                    if pos > 0 {
                        name = &name[..pos];
                    }
                }
            }
            pattern.is_match(bytes_as_path(name))
        }
        Test::Path { pattern } => pattern.is_match(bytes_as_path(ctx.visit.path_bytes())),
        Test::LinkName { pattern } => {
            if ctx.visit.kind() != FileKind::Link {
                return false;
            }
            let Some(st) = fill_stat(ctx) else {
                return false;
            };
            let rel = match ctx.visit.rel_cstring() {
                Ok(rel) => rel,
                Err(err) => {
                    eval_error(ctx, &err);
                    return false;
                }
            };
            match crate::walk::entry::readlinkat(ctx.visit.at_fd(), &rel, st.size()) {
                Ok(target) => pattern.is_match(bytes_as_path(&target)),
                Err(err) => {
                    eval_error(ctx, &err);
                    false
                }
            }
        }
        Test::Regex { regex } => regex.is_match(ctx.visit.path_bytes()),
        Test::Type { mask } => ctx.visit.kind().bit() & mask != 0,
        Test::XType { mask } => eval_xtype(*mask, ctx),
        Test::Perm {
            cmp,
            file_mode,
            dir_mode,
        } => {
            let Some(st) = fill_stat(ctx) else {
                return false;
            };
            let mode = st.mode();
            let target = if ctx.visit.kind() == FileKind::Dir {
                *dir_mode
            } else {
                *file_mode
            };
            match cmp {
                ModeCmp::Exact => (mode & 0o7777) == target,
                ModeCmp::All => (mode & target) == target,
                ModeCmp::Any => ((mode & target) == 0) == (target == 0),
            }
        }
        Test::Size { cmp, n, unit } => {
            let Some(st) = fill_stat(ctx) else {
                return false;
            };
            let scale = unit.scale();
            let size = (st.size() + scale - 1) / scale;
            cmp.matches(size, *n)
        }
        Test::Links { cmp, n } => match fill_stat(ctx) {
            Some(st) => cmp.matches(st.nlink() as i64, *n),
            None => false,
        },
        Test::Inode { cmp, n } => match fill_stat(ctx) {
            Some(st) => cmp.matches(st.ino() as i64, *n),
            None => false,
        },
        Test::Depth { cmp, n } => cmp.matches(ctx.visit.depth() as i64, *n),
        Test::Uid { cmp, n } => match fill_stat(ctx) {
            Some(st) => cmp.matches(i64::from(st.uid()), *n),
            None => false,
        },
        Test::Gid { cmp, n } => match fill_stat(ctx) {
            Some(st) => cmp.matches(i64::from(st.gid()), *n),
            None => false,
        },
        Test::NoUser => match fill_stat(ctx) {
            Some(st) => !userdb::user_exists(st.uid()),
            None => false,
        },
        Test::NoGroup => match fill_stat(ctx) {
            Some(st) => !userdb::group_exists(st.gid()),
            None => false,
        },
        Test::Access { mode } => {
            let Ok(rel) = ctx.visit.rel_cstring() else {
                return false;
            };
            unsafe { libc::faccessat(ctx.visit.at_fd(), rel.as_ptr(), *mode, 0) == 0 }
        }
        Test::Empty => eval_empty(ctx),
        Test::Hidden => {
            let offset = ctx.visit.name_offset();
            offset > 0 && ctx.visit.path_bytes().get(offset) == Some(&b'.')
        }
        Test::Sparse => {
            let Some(st) = fill_stat(ctx) else {
                return false;
            };
            let expected = (st.size() + 511) / 512;
            st.blocks() < expected
        }
        Test::Time {
            field,
            unit,
            cmp,
            n,
            reference,
        } => {
            let Some(st) = fill_stat(ctx) else {
                return false;
            };
            let diff = reference.seconds_since(field.of(&st)) / unit.seconds();
            cmp.matches(diff, *n)
        }
        Test::Newer { field, reference } => {
            let Some(st) = fill_stat(ctx) else {
                return false;
            };
            field.of(&st) > *reference
        }
        Test::Used { cmp, n } => {
            let Some(st) = fill_stat(ctx) else {
                return false;
            };
            let days = st.atime().seconds_since(st.ctime()) / (60 * 60 * 24);
            cmp.matches(days, *n)
        }
        Test::SameFile { dev, ino } => match fill_stat(ctx) {
            Some(st) => st.dev() == *dev && st.ino() == *ino,
            None => false,
        },
    }
}

/// -xtype: evaluate the type with symlink following inverted relative to
/// the traversal mode.
fn eval_xtype(mask: u32, ctx: &mut EvalCtx) -> bool {
    let follow = ctx.config.walk.follow_all
        || (ctx.visit.depth() == 0 && ctx.config.walk.follow_roots);
    let is_link = ctx.visit.kind() == FileKind::Link;

    if follow == is_link {
        return ctx.visit.kind().bit() & mask != 0;
    }

    let rel = match ctx.visit.rel_cstring() {
        Ok(rel) => rel,
        Err(err) => {
            eval_error(ctx, &err);
            return false;
        }
    };

    // The opposite of everything else: follow when the walk does not
    match crate::walk::entry::fstatat(ctx.visit.at_fd(), &rel, !follow) {
        Ok(st) => st.kind().bit() & mask != 0,
        Err(err) if !follow && err.raw_os_error() == Some(libc::ENOENT) => {
            // Broken symlink
            ctx.visit.kind().bit() & mask != 0
        }
        Err(err) => {
            eval_error(ctx, &err);
            false
        }
    }
}

/// -empty: a directory with no non-dot entries, or a zero-byte regular file.
fn eval_empty(ctx: &mut EvalCtx) -> bool {
    match ctx.visit.kind() {
        FileKind::Dir => {
            let rel = match ctx.visit.rel_cstring() {
                Ok(rel) => rel,
                Err(err) => {
                    eval_error(ctx, &err);
                    return false;
                }
            };
            let mut stream = match DirStream::open_at(ctx.visit.at_fd(), &rel) {
                Ok(stream) => stream,
                Err(err) => {
                    eval_error(ctx, &err);
                    return false;
                }
            };

            loop {
                match stream.read() {
                    Ok(Some((name, _))) => {
                        if name != "." && name != ".." {
                            return false;
                        }
                    }
                    Ok(None) => return true,
                    Err(err) => {
                        eval_error(ctx, &err);
                        return true;
                    }
                }
            }
        }
        FileKind::Regular => match fill_stat(ctx) {
            Some(st) => st.size() == 0,
            None => false,
        },
        // Sizes of special files are kernel-synthesized; never call them
        // empty
        _ => false,
    }
}

fn eval_action(action: &Action, ctx: &mut EvalCtx) -> bool {
    match action {
        Action::Print { sink } => {
            let mut buf = Vec::with_capacity(ctx.visit.path_bytes().len() + 1);
            buf.extend_from_slice(ctx.visit.path_bytes());
            buf.push(b'\n');
            if let Err(err) = sink.write_all(&buf) {
                eval_error(ctx, &err);
            }
            true
        }
        Action::Print0 { sink } => {
            let mut buf = Vec::with_capacity(ctx.visit.path_bytes().len() + 1);
            buf.extend_from_slice(ctx.visit.path_bytes());
            buf.push(b'\0');
            if let Err(err) = sink.write_all(&buf) {
                eval_error(ctx, &err);
            }
            true
        }
        Action::Printf { program, sink } => {
            if program.needs_stat() && fill_stat(ctx).is_none() {
                return true;
            }
            let result = sink.with(|out| printf::render(program, ctx.visit, out));
            if let Err(err) = result {
                eval_error(ctx, &err);
            }
            true
        }
        Action::Ls { sink, now } => {
            if fill_stat(ctx).is_none() {
                return true;
            }
            let result = sink.with(|out| render_ls(ctx.visit, *now, out));
            if let Err(err) = result {
                eval_error(ctx, &err);
            }
            true
        }
        Action::Delete => {
            // Never try to delete the starting point "."
            if ctx.visit.path_bytes() == b"." {
                return true;
            }
            let rel = match ctx.visit.rel_cstring() {
                Ok(rel) => rel,
                Err(err) => {
                    eval_error(ctx, &err);
                    return false;
                }
            };
            let flags = if ctx.visit.kind() == FileKind::Dir {
                libc::AT_REMOVEDIR
            } else {
                0
            };
            if unsafe { libc::unlinkat(ctx.visit.at_fd(), rel.as_ptr(), flags) } != 0 {
                let err = io::Error::last_os_error();
                eval_error(ctx, &err);
                return false;
            }
            true
        }
        Action::Exec { spec } => {
            let path = ctx.visit.path().to_path_buf();
            match spec.borrow_mut().run(&path) {
                Ok(passed) => passed,
                Err(err) => {
                    eval_error(ctx, &err);
                    false
                }
            }
        }
        Action::Prune => {
            ctx.flow = Flow::SkipSubtree;
            true
        }
        Action::Quit => {
            ctx.flow = Flow::Stop;
            ctx.quit = true;
            true
        }
        Action::NoHidden => {
            let offset = ctx.visit.name_offset();
            let hidden = offset > 0 && ctx.visit.path_bytes().get(offset) == Some(&b'.');
            if hidden {
                ctx.flow = Flow::SkipSubtree;
                false
            } else {
                true
            }
        }
    }
}

fn bytes_as_path(bytes: &[u8]) -> &std::path::Path {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    std::path::Path::new(OsStr::from_bytes(bytes))
}
