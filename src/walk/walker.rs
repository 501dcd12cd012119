//! Breadth-first traversal engine
//!
//! The walk visits every file under a starting path level by level. The
//! current directory is listed through the fd cache, each entry is handed to
//! the callback, and subdirectories join the frontier queue. When a directory
//! is popped off the frontier, the previous directory's ancestor chain is
//! garbage collected; with post-order enabled that is where the post-order
//! callbacks fire.
//!
//! The path is kept in a single growable buffer. Moving between directories
//! only rewrites the suffix that differs from the previous position.

use super::cache::{DirCache, EntryId};
use super::entry::{basename_offset, FileKind, FileStat, Visit, VisitPhase};
use super::frontier::Frontier;
use crate::error::{WalkError, WalkResult};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::trace;

/// What the callback wants the walker to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep going
    Continue,
    /// Skip the remaining children of the current directory
    SkipSiblings,
    /// Do not descend into this entry
    SkipSubtree,
    /// Terminate the walk cleanly
    Stop,
}

/// Traversal options
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symlinks given as root paths (-H)
    pub follow_roots: bool,
    /// Follow all symlinks (-L)
    pub follow_all: bool,
    /// Detect filesystem cycles while following links
    pub detect_cycles: bool,
    /// Stay on the starting path's filesystem (-xdev)
    pub same_filesystem: bool,
    /// Fire post-order callbacks (-depth)
    pub post_order: bool,
    /// Stat every entry up front instead of on demand
    pub stat_all: bool,
    /// Report per-directory errors through the callback instead of aborting
    pub recover: bool,
    /// How many descriptors the traversal may keep open
    pub open_fd_budget: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions {
            follow_roots: false,
            follow_all: false,
            detect_cycles: false,
            same_filesystem: false,
            post_order: false,
            stat_all: false,
            recover: true,
            open_fd_budget: 256,
        }
    }
}

/// Where the path buffer currently points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    /// At the directory being expanded
    Current,
    /// At a child of the current directory
    Child,
    /// Unwinding the ancestor chain
    Gc,
}

enum DirOutcome {
    /// A stop was requested; terminate cleanly
    Done,
    /// Move on to the next frontier entry
    Next,
}

struct WalkState<'a> {
    opts: &'a WalkOptions,
    root: &'a Path,
    cache: DirCache,
    frontier: Frontier,
    current: Option<EntryId>,
    last: Option<EntryId>,
    status: Status,
    path: Vec<u8>,
}

/// Walk one root path breadth-first, invoking `cb` for every entry.
///
/// The callback decides what happens next through its [`Flow`] return; an
/// `Err` aborts the walk immediately with all resources released.
pub fn walk<F>(root: &Path, opts: &WalkOptions, cb: &mut F) -> WalkResult<()>
where
    F: FnMut(&mut Visit) -> WalkResult<Flow>,
{
    if opts.open_fd_budget < 2 {
        return Err(WalkError::FdBudget);
    }

    let mut state = WalkState {
        opts,
        root,
        // One descriptor is reserved for the dup'd readdir stream.
        cache: DirCache::new(opts.open_fd_budget - 1),
        frontier: Frontier::new(),
        current: None,
        last: None,
        status: Status::Current,
        path: Vec::with_capacity(256),
    };

    let result = state.run(cb);

    // Unwind whatever is left so every cached descriptor is closed, without
    // firing further callbacks.
    while state.current.is_some() {
        let _ = state.pop(false, cb);
    }

    result
}

impl<'a> WalkState<'a> {
    fn run<F>(&mut self, cb: &mut F) -> WalkResult<()>
    where
        F: FnMut(&mut Visit) -> WalkResult<Flow>,
    {
        let root_bytes = self.root.as_os_str().as_bytes().to_vec();

        // The root itself is visited first.
        self.path_concat(&root_bytes);
        let (flow, kind, stat) = self.visit_and_handle(None, None, cb)?;
        match flow {
            Flow::SkipSubtree | Flow::Stop => return Ok(()),
            Flow::Continue | Flow::SkipSiblings => {}
        }
        if kind != FileKind::Dir {
            return Ok(());
        }

        let root_id = self.cache.add(None, &root_bytes);
        if let Some(sb) = stat {
            self.cache.set_dev_ino(root_id, sb.dev(), sb.ino());
        }
        self.current = Some(root_id);

        while self.current.is_some() {
            match self.process_current(cb)? {
                DirOutcome::Done => return Ok(()),
                DirOutcome::Next => {
                    if self.pop(true, cb)? == Flow::Stop {
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }

    /// Expand the current directory: list it, visit every child, and enqueue
    /// child directories onto the frontier.
    fn process_current<F>(&mut self, cb: &mut F) -> WalkResult<DirOutcome>
    where
        F: FnMut(&mut Visit) -> WalkResult<Flow>,
    {
        self.build_path();
        let cur = self.current.expect("no current directory");
        trace!(
            path = %String::from_utf8_lossy(&self.path),
            pending = self.frontier.len(),
            "expanding directory"
        );

        let mut stream = match self.cache.open(cur, &self.path) {
            Ok(stream) => stream,
            Err(err) => return self.dir_error(err, cb),
        };

        loop {
            let next = match stream.read() {
                Ok(next) => next,
                Err(err) => {
                    drop(stream);
                    return self.dir_error(err, cb);
                }
            };
            let Some((name, dkind)) = next else { break };
            let name = name.as_bytes().to_vec();
            if name == b"." || name == b".." {
                continue;
            }

            self.path_concat(&name);
            let (flow, kind, stat) = self.visit_and_handle(Some(dkind), None, cb)?;

            match flow {
                Flow::Continue => {}
                Flow::SkipSiblings => break,
                Flow::SkipSubtree => continue,
                Flow::Stop => return Ok(DirOutcome::Done),
            }

            if kind == FileKind::Dir {
                if self.opts.same_filesystem {
                    let cur_dev = self.cache.entry(cur).dev_ino.map(|(dev, _)| dev);
                    if let (Some(sb), Some(dev)) = (stat.as_ref(), cur_dev) {
                        if sb.dev() != dev {
                            continue;
                        }
                    }
                }

                let child = self.cache.add(Some(cur), &name);
                if let Some(sb) = stat.as_ref() {
                    self.cache.set_dev_ino(child, sb.dev(), sb.ino());
                }
                self.frontier.push(child);
            }
        }

        if let Err(err) = stream.close() {
            return self.dir_error(err, cb);
        }

        Ok(DirOutcome::Next)
    }

    /// Report a failed directory through the callback (or abort when
    /// recovery is off) and continue with the next frontier entry.
    fn dir_error<F>(&mut self, err: io::Error, cb: &mut F) -> WalkResult<DirOutcome>
    where
        F: FnMut(&mut Visit) -> WalkResult<Flow>,
    {
        let errno = err.raw_os_error().unwrap_or(libc::EIO);
        self.path_trim();
        let (flow, _, _) = self.visit_and_handle(None, Some(errno), cb)?;
        match flow {
            Flow::Stop => Ok(DirOutcome::Done),
            _ => Ok(DirOutcome::Next),
        }
    }

    /// Garbage collect the current chain and advance to the next frontier
    /// entry.
    fn pop<F>(&mut self, invoke: bool, cb: &mut F) -> WalkResult<Flow>
    where
        F: FnMut(&mut Visit) -> WalkResult<Flow>,
    {
        let flow = self.gc(invoke, cb);
        self.current = self.frontier.pop();
        self.status = Status::Current;
        flow
    }

    /// Walk up the current entry's ancestor chain dropping references. Every
    /// ancestor whose refcount reaches zero fires its post-order callback
    /// (when enabled) and is destroyed. This is the only place post-order
    /// visits happen.
    fn gc<F>(&mut self, mut invoke: bool, cb: &mut F) -> WalkResult<Flow>
    where
        F: FnMut(&mut Visit) -> WalkResult<Flow>,
    {
        let mut ret = Flow::Continue;
        let mut failure = None;

        if !self.opts.post_order {
            invoke = false;
        }

        let mut entry = self.current;
        if entry.is_some() && invoke {
            self.build_path();
        }

        self.status = Status::Gc;

        while let Some(id) = entry {
            if self.cache.decref(id) > 0 {
                self.last = Some(id);
                break;
            }

            if invoke {
                self.current = Some(id);
                self.path_trim();
                match self.visit_and_handle(None, None, cb) {
                    Ok((Flow::Stop, _, _)) => {
                        ret = Flow::Stop;
                        invoke = false;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        failure = Some(err);
                        invoke = false;
                    }
                }
            }

            let parent = self.cache.entry(id).parent;
            self.cache.release(id);
            entry = parent;
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(ret),
        }
    }

    /// Rebuild the path buffer up to the current entry, reusing the prefix
    /// shared with the previously visited entry.
    fn build_path(&mut self) {
        let cur = self.current.expect("no current directory");
        let (cur_depth, pathlen) = {
            let e = self.cache.entry(cur);
            (e.depth, e.name_offset + e.name.len())
        };
        self.path.resize(pathlen, 0);

        let mut last = self.last;
        while let Some(l) = last {
            if self.cache.entry(l).depth > cur_depth {
                last = self.cache.entry(l).parent;
            } else {
                break;
            }
        }

        // Build the changed segments backwards
        let mut entry = Some(cur);
        while entry != last {
            let id = entry.expect("ancestor chain diverged");
            let (offset, parent, depth) = {
                let e = self.cache.entry(id);
                (e.name_offset, e.parent, e.depth)
            };
            let name = &self.cache.entry(id).name;
            self.path[offset..offset + name.len()].copy_from_slice(name);

            if let Some(l) = last {
                if self.cache.entry(l).depth == depth {
                    last = self.cache.entry(l).parent;
                }
            }
            entry = parent;
        }

        self.last = Some(cur);
    }

    /// Append a child name after the current directory's prefix.
    fn path_concat(&mut self, name: &[u8]) {
        let name_offset = match self.current {
            Some(cur) => {
                let e = self.cache.entry(cur);
                e.name_offset + e.name.len()
            }
            None => 0,
        };
        self.status = Status::Child;
        self.path.truncate(name_offset);
        self.path.extend_from_slice(name);
    }

    /// Trim the path back to just the current directory.
    fn path_trim(&mut self) {
        let cur = self.current.expect("no current directory");
        let e = self.cache.entry(cur);

        let length = if e.depth == 0 {
            // Exactly the root string as given, trailing slashes included
            self.root.as_os_str().len()
        } else {
            let mut length = e.name_offset + e.name.len();
            if e.name.len() > 1 {
                // Trim the trailing slash
                length -= 1;
                self.last = e.parent;
            }
            length
        };
        self.path.truncate(length);

        if self.status == Status::Child {
            self.status = Status::Current;
        }
    }

    /// Build the metadata record for the position the path buffer points at,
    /// apply the stat policy and cycle detection, and invoke the callback.
    fn visit_and_handle<F>(
        &mut self,
        dkind: Option<FileKind>,
        forced_error: Option<i32>,
        cb: &mut F,
    ) -> WalkResult<(Flow, FileKind, Option<FileStat>)>
    where
        F: FnMut(&mut Visit) -> WalkResult<Flow>,
    {
        let child = self.status == Status::Child;

        let mut name_offset = 0;
        let mut depth = 0;
        let mut at_fd = libc::AT_FDCWD;
        let mut rel_offset = 0;

        if let Some(cur) = self.current {
            let e = self.cache.entry(cur);
            name_offset = e.name_offset;
            depth = e.depth;

            if child {
                name_offset += e.name.len();
                depth += 1;
                match e.raw_fd() {
                    Some(fd) => {
                        at_fd = fd;
                        rel_offset = name_offset;
                    }
                    None => {
                        let (fd, offset, _) = self.cache.resolve(cur);
                        at_fd = fd;
                        rel_offset = offset;
                    }
                }
            } else {
                let (fd, offset, _) = self.cache.resolve(cur);
                at_fd = fd;
                rel_offset = offset;
            }
        }

        if depth == 0 {
            // Root paths like "foo/bar" still need a basename offset
            name_offset = basename_offset(&self.path);
        }

        let kind = match dkind {
            Some(kind) => kind,
            None if !child => FileKind::Dir,
            None => FileKind::Unknown,
        };

        let follow = self.opts.follow_all || (depth == 0 && self.opts.follow_roots);

        let mut visit = Visit {
            path: &self.path,
            root: self.root,
            name_offset,
            depth,
            kind,
            phase: if self.status == Status::Gc {
                VisitPhase::Post
            } else {
                VisitPhase::Pre
            },
            at_fd,
            rel_offset,
            follow,
            stat: None,
            error: None,
        };

        let detect_cycles = self.opts.detect_cycles && child;
        let xdev = self.opts.same_filesystem;

        if self.opts.stat_all
            || visit.kind == FileKind::Unknown
            || (visit.kind == FileKind::Link && follow)
            || (visit.kind == FileKind::Dir && (detect_cycles || xdev))
        {
            match visit.fill_stat_for_walk() {
                Ok(_) => {
                    if visit.kind == FileKind::Dir && detect_cycles {
                        let sb = visit.stat.expect("stat just filled");
                        let fingerprint = (sb.dev(), sb.ino());
                        let mut link = self.current;
                        while let Some(id) = link {
                            let e = self.cache.entry(id);
                            if e.dev_ino == Some(fingerprint) {
                                visit.error = Some(libc::ELOOP);
                                break;
                            }
                            link = e.parent;
                        }
                    }
                }
                Err(err) => {
                    visit.error = Some(err.raw_os_error().unwrap_or(libc::EIO));
                }
            }
        }

        if let Some(errno) = forced_error {
            visit.error = Some(errno);
        }

        // Error records only reach the callback in recovery mode
        if let Some(errno) = visit.error {
            if !self.opts.recover {
                return Err(WalkError::path_errno(&self.path, errno));
            }
        }

        let flow = cb(&mut visit)?;
        Ok((flow, visit.kind, visit.stat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;

    fn collect(
        root: &Path,
        opts: &WalkOptions,
    ) -> Vec<(PathBuf, usize, VisitPhase, FileKind)> {
        let mut seen = Vec::new();
        walk(root, opts, &mut |visit: &mut Visit| {
            seen.push((
                visit.path().to_path_buf(),
                visit.depth(),
                visit.phase(),
                visit.kind(),
            ));
            Ok(Flow::Continue)
        })
        .expect("walk failed");
        seen
    }

    #[test]
    fn test_single_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("only");
        fs::write(&file, b"x").unwrap();

        let seen = collect(&file, &WalkOptions::default());
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, file);
        assert_eq!(seen[0].1, 0);
        assert_eq!(seen[0].2, VisitPhase::Pre);
    }

    #[test]
    fn test_breadth_first_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a");
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join("b").join("c"), b"").unwrap();

        let seen = collect(&root, &WalkOptions::default());
        let paths: Vec<_> = seen.iter().map(|(p, ..)| p.clone()).collect();
        assert_eq!(paths, vec![root.clone(), root.join("b"), root.join("b/c")]);

        // Strict BFS: depth is monotonically non-decreasing
        let depths: Vec<_> = seen.iter().map(|(_, d, ..)| *d).collect();
        assert!(depths.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_depths_before_deeper() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("x"), b"").unwrap();
        fs::write(root.join("y"), b"").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/z"), b"").unwrap();

        let seen = collect(&root, &WalkOptions::default());
        let index: HashMap<PathBuf, usize> = seen
            .iter()
            .enumerate()
            .map(|(i, (p, ..))| (p.clone(), i))
            .collect();

        // Every depth-1 entry is emitted before the depth-2 entry
        let z = index[&root.join("sub/z")];
        assert!(index[&root.join("x")] < z);
        assert!(index[&root.join("y")] < z);
        assert!(index[&root.join("sub")] < z);
    }

    #[test]
    fn test_post_order_after_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("top");
        fs::create_dir_all(root.join("mid")).unwrap();
        fs::write(root.join("mid/leaf"), b"").unwrap();

        let opts = WalkOptions {
            post_order: true,
            ..WalkOptions::default()
        };
        let seen = collect(&root, &opts);

        let post_top = seen
            .iter()
            .position(|(p, _, phase, _)| p == &root && *phase == VisitPhase::Post)
            .expect("post-order visit for the root");
        let post_mid = seen
            .iter()
            .position(|(p, _, phase, _)| p == &root.join("mid") && *phase == VisitPhase::Post)
            .expect("post-order visit for mid");
        let leaf = seen
            .iter()
            .position(|(p, ..)| p == &root.join("mid/leaf"))
            .unwrap();

        assert!(leaf < post_mid);
        assert!(post_mid < post_top);
        assert_eq!(post_top, seen.len() - 1);
    }

    #[test]
    fn test_empty_dir_post_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("empty");
        fs::create_dir(&root).unwrap();

        let opts = WalkOptions {
            post_order: true,
            ..WalkOptions::default()
        };
        let seen = collect(&root, &opts);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].2, VisitPhase::Pre);
        assert_eq!(seen[1].2, VisitPhase::Post);
    }

    #[test]
    fn test_skip_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir(root.join("skipme")).unwrap();
        fs::write(root.join("skipme/hidden"), b"").unwrap();
        fs::write(root.join("keep"), b"").unwrap();

        let mut seen = Vec::new();
        walk(&root, &WalkOptions::default(), &mut |visit: &mut Visit| {
            seen.push(visit.path().to_path_buf());
            if visit.path().file_name().is_some_and(|n| n == "skipme") {
                Ok(Flow::SkipSubtree)
            } else {
                Ok(Flow::Continue)
            }
        })
        .unwrap();

        assert!(seen.contains(&root.join("skipme")));
        assert!(!seen.iter().any(|p| p.ends_with("hidden")));
    }

    #[test]
    fn test_stop_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        for i in 0..10 {
            fs::write(root.join(format!("f{i}")), b"").unwrap();
        }

        let mut count = 0;
        walk(&root, &WalkOptions::default(), &mut |_visit: &mut Visit| {
            count += 1;
            if count == 3 {
                Ok(Flow::Stop)
            } else {
                Ok(Flow::Continue)
            }
        })
        .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_anchor_resolves_to_same_file() {
        use crate::walk::entry::fstatat;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir(root.join("d")).unwrap();
        fs::write(root.join("d/f"), b"data").unwrap();

        walk(&root, &WalkOptions::default(), &mut |visit: &mut Visit| {
            // anchor_fd + relative path must reach the same inode as the
            // full path
            let rel = visit.rel_cstring().unwrap();
            let by_anchor = fstatat(visit.at_fd(), &rel, false).unwrap();
            let by_path = fs::symlink_metadata(visit.path()).unwrap();
            use std::os::unix::fs::MetadataExt;
            assert_eq!(by_anchor.ino(), by_path.ino());
            assert_eq!(by_anchor.dev(), by_path.dev());
            Ok(Flow::Continue)
        })
        .unwrap();
    }

    #[test]
    fn test_symlink_loop_detected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir(&root).unwrap();
        symlink(&root, root.join("loop")).unwrap();

        let opts = WalkOptions {
            follow_all: true,
            detect_cycles: true,
            ..WalkOptions::default()
        };

        let mut loops = 0;
        walk(&root, &opts, &mut |visit: &mut Visit| {
            if visit.error() == Some(libc::ELOOP) {
                loops += 1;
                return Ok(Flow::SkipSubtree);
            }
            Ok(Flow::Continue)
        })
        .unwrap();
        assert_eq!(loops, 1);
    }

    #[test]
    fn test_unreadable_dir_recovers() {
        use std::os::unix::fs::PermissionsExt;

        if unsafe { libc::geteuid() } == 0 {
            // Permission bits do not stop root
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let locked = root.join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(root.join("after"), b"").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let mut errors = 0;
        let mut seen_after = false;
        walk(&root, &WalkOptions::default(), &mut |visit: &mut Visit| {
            if visit.is_error() {
                errors += 1;
            }
            if visit.path().ends_with("after") {
                seen_after = true;
            }
            Ok(Flow::Continue)
        })
        .unwrap();

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(errors, 1);
        assert!(seen_after);
    }

    #[test]
    fn test_tiny_fd_budget_still_walks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("a/b/c/d")).unwrap();
        fs::write(root.join("a/b/c/d/leaf"), b"").unwrap();

        let opts = WalkOptions {
            open_fd_budget: 2,
            ..WalkOptions::default()
        };
        let seen = collect(&root, &opts);
        assert!(seen.iter().any(|(p, ..)| p.ends_with("leaf")));
    }
}
