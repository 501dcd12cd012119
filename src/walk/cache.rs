//! Bounded cache of open directory file descriptors
//!
//! The walker revisits ancestor directories constantly: every child it opens
//! is opened relative to its parent. Keeping parents open turns each of those
//! opens into a short openat() instead of a full-path walk. Descriptors are a
//! limited resource, so the cache keeps a bounded min-heap of open entries
//! ordered by (depth descending, refcount ascending): the deepest,
//! least-referenced directory is closed first under pressure.
//!
//! Entries live in an index-addressed arena. Parent links are plain indices,
//! never owning references; an entry is freed only when its refcount reaches
//! zero during the walker's garbage collection.

use super::entry::{cstr, FileKind};
use std::ffi::{CStr, OsString};
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Handle to an entry in the cache arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryId(usize);

/// A single cached directory
#[derive(Debug)]
pub(crate) struct CacheEntry {
    /// Parent entry, if any. Non-owning back reference.
    pub parent: Option<EntryId>,
    /// Depth of this directory in the walk.
    pub depth: usize,
    /// The directory's name, with a trailing slash appended.
    pub name: Vec<u8>,
    /// Offset of the name within the full path.
    pub name_offset: usize,
    /// Number of live references (itself plus pending descendants).
    pub ref_count: usize,
    /// Position in the heap while the fd is open.
    heap_index: Option<usize>,
    /// The open directory descriptor, owned by the cache.
    fd: Option<OwnedFd>,
    /// Device and inode, captured for cycle detection when first stat'd.
    pub dev_ino: Option<(u64, u64)>,
}

impl CacheEntry {
    /// The raw fd while the entry is open.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(|fd| fd.as_raw_fd())
    }
}

/// The directory cache: an arena of entries plus a heap of the open ones
pub(crate) struct DirCache {
    arena: Vec<Option<CacheEntry>>,
    free: Vec<usize>,
    heap: Vec<EntryId>,
    capacity: usize,
}

impl DirCache {
    /// Create a cache that will keep at most `capacity` descriptors open.
    pub fn new(capacity: usize) -> DirCache {
        DirCache {
            arena: Vec::new(),
            free: Vec::new(),
            heap: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn entry(&self, id: EntryId) -> &CacheEntry {
        self.arena[id.0].as_ref().expect("stale cache entry id")
    }

    fn entry_mut(&mut self, id: EntryId) -> &mut CacheEntry {
        self.arena[id.0].as_mut().expect("stale cache entry id")
    }

    /// Allocate an entry for `name` under `parent`, taking a reference on the
    /// parent. A trailing slash is appended to the stored name so that path
    /// concatenation needs no separator logic.
    pub fn add(&mut self, parent: Option<EntryId>, name: &[u8]) -> EntryId {
        let mut stored = name.to_vec();
        if !stored.ends_with(b"/") {
            stored.push(b'/');
        }

        let (depth, name_offset) = match parent {
            Some(p) => {
                let pe = self.entry(p);
                (pe.depth + 1, pe.name_offset + pe.name.len())
            }
            None => (0, 0),
        };

        let entry = CacheEntry {
            parent,
            depth,
            name: stored,
            name_offset,
            ref_count: 1,
            heap_index: None,
            fd: None,
            dev_ino: None,
        };

        let id = match self.free.pop() {
            Some(slot) => {
                self.arena[slot] = Some(entry);
                EntryId(slot)
            }
            None => {
                self.arena.push(Some(entry));
                EntryId(self.arena.len() - 1)
            }
        };

        if let Some(p) = parent {
            self.incref(p);
        }

        id
    }

    /// Record the fingerprint used for cycle detection.
    pub fn set_dev_ino(&mut self, id: EntryId, dev: u64, ino: u64) {
        self.entry_mut(id).dev_ino = Some((dev, ino));
    }

    /// Take a reference. An open entry sinks toward the leaves of the heap.
    pub fn incref(&mut self, id: EntryId) {
        self.entry_mut(id).ref_count += 1;
        if self.entry(id).heap_index.is_some() {
            self.bubble_down(id);
        }
    }

    /// Drop a reference, returning the remaining count. An open entry rises
    /// toward the eviction end of the heap.
    pub fn decref(&mut self, id: EntryId) -> usize {
        let entry = self.entry_mut(id);
        entry.ref_count -= 1;
        let remaining = entry.ref_count;
        if self.entry(id).heap_index.is_some() {
            self.bubble_up(id);
        }
        remaining
    }

    /// Find the `(anchor fd, path offset, base entry)` for relative syscalls
    /// on `id`: the nearest open ancestor, or the working directory when no
    /// ancestor is open.
    pub fn resolve(&self, id: EntryId) -> (RawFd, usize, Option<EntryId>) {
        let mut base = self.entry(id).parent;
        while let Some(b) = base {
            if self.entry(b).fd.is_some() {
                break;
            }
            base = self.entry(b).parent;
        }

        match base {
            Some(b) => {
                let be = self.entry(b);
                (
                    be.raw_fd().unwrap(),
                    be.name_offset + be.name.len(),
                    Some(b),
                )
            }
            None => (libc::AT_FDCWD, 0, None),
        }
    }

    /// Open the directory for `id` and return a readdir stream over it.
    ///
    /// The cache keeps the opened fd for future openat() calls; the stream
    /// runs on a duplicate so it can be closed as soon as the directory has
    /// been listed. EMFILE is absorbed by evicting one entry, shrinking the
    /// capacity, and retrying once.
    pub fn open(&mut self, id: EntryId, full_path: &[u8]) -> io::Result<DirStream> {
        debug_assert!(self.entry(id).fd.is_none());

        if self.heap.len() >= self.capacity {
            let victim = self.heap[0];
            self.close_fd(victim);
        }

        let (at_fd, offset, base) = self.resolve(id);
        let rel = cstr(&full_path[offset..])?;

        let flags = libc::O_RDONLY | libc::O_CLOEXEC | libc::O_DIRECTORY;
        let mut fd = unsafe { libc::openat(at_fd, rel.as_ptr(), flags) };
        if fd < 0 && self.should_retry(base) {
            fd = unsafe { libc::openat(at_fd, rel.as_ptr(), flags) };
        }
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        self.entry_mut(id).fd = Some(unsafe { OwnedFd::from_raw_fd(fd) });
        self.heap_push(id);

        // The stream gets a duplicate so the DIR can be torn down eagerly
        // while the cached fd stays available for future openat() calls.
        let mut dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
        if dup < 0 && self.should_retry(Some(id)) {
            let fd = self.entry(id).raw_fd().unwrap();
            dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
        }
        if dup < 0 {
            return Err(io::Error::last_os_error());
        }

        DirStream::from_fd(dup)
    }

    /// Release an entry whose refcount has reached zero.
    pub fn release(&mut self, id: EntryId) {
        debug_assert_eq!(self.entry(id).ref_count, 0);
        if self.entry(id).heap_index.is_some() {
            self.close_fd(id);
        }
        self.arena[id.0] = None;
        self.free.push(id.0);
    }

    /// How many descriptors are currently open.
    #[cfg(test)]
    pub fn open_count(&self) -> usize {
        self.heap.len()
    }

    /// The current descriptor budget.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// On EMFILE with at least two open entries, evict one entry that is not
    /// `save`, shrink the capacity, and signal a single retry. The new
    /// capacity leaves room for the open being retried.
    fn should_retry(&mut self, save: Option<EntryId>) -> bool {
        let emfile = io::Error::last_os_error().raw_os_error() == Some(libc::EMFILE);
        if emfile && self.heap.len() > 1 {
            let mut victim = self.heap[0];
            if Some(victim) == save {
                victim = self.heap[1];
            }
            self.close_fd(victim);
            self.capacity = self.heap.len() + 1;
            true
        } else {
            false
        }
    }

    /// Close an entry's fd and remove it from the heap.
    fn close_fd(&mut self, id: EntryId) {
        let entry = self.entry_mut(id);
        entry.fd = None;
        let i = entry.heap_index.take().expect("closing a closed entry");

        let last = self.heap.pop().expect("heap underflow");
        if self.heap.len() > i {
            self.heap_place(last, i);
            self.bubble_down(last);
        }
    }

    /// True when `above` may stay above `below` in the heap.
    fn heap_ordered(&self, above: EntryId, below: EntryId) -> bool {
        let a = self.entry(above);
        let b = self.entry(below);
        match a.depth.cmp(&b.depth) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => a.ref_count <= b.ref_count,
        }
    }

    fn heap_place(&mut self, id: EntryId, i: usize) {
        self.heap[i] = id;
        self.entry_mut(id).heap_index = Some(i);
    }

    fn heap_push(&mut self, id: EntryId) {
        debug_assert!(self.heap.len() < self.capacity);
        self.heap.push(id);
        self.entry_mut(id).heap_index = Some(self.heap.len() - 1);
        self.bubble_up(id);
    }

    fn bubble_up(&mut self, id: EntryId) {
        let mut i = self.entry(id).heap_index.expect("entry not in heap");
        while i > 0 {
            let pi = (i - 1) / 2;
            let parent = self.heap[pi];
            if self.heap_ordered(parent, id) {
                break;
            }
            self.heap_place(parent, i);
            i = pi;
        }
        self.heap_place(id, i);
    }

    fn bubble_down(&mut self, id: EntryId) {
        let mut i = self.entry(id).heap_index.expect("entry not in heap");
        loop {
            let mut ci = 2 * i + 1;
            if ci >= self.heap.len() {
                break;
            }

            let mut child = self.heap[ci];
            let ri = ci + 1;
            if ri < self.heap.len() {
                let right = self.heap[ri];
                if !self.heap_ordered(child, right) {
                    ci = ri;
                    child = right;
                }
            }

            if self.heap_ordered(id, child) {
                break;
            }

            self.heap_place(child, i);
            i = ci;
        }
        self.heap_place(id, i);
    }
}

/// An open readdir stream
///
/// Owns a duplicated descriptor, independent of the cached one. Closed on
/// drop; [`DirStream::close`] surfaces the error for callers that care.
pub(crate) struct DirStream {
    dir: *mut libc::DIR,
}

impl DirStream {
    /// Wrap an owned descriptor in a DIR stream. Closes the fd on failure.
    pub fn from_fd(fd: RawFd) -> io::Result<DirStream> {
        let dir = unsafe { libc::fdopendir(fd) };
        if dir.is_null() {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            Err(err)
        } else {
            Ok(DirStream { dir })
        }
    }

    /// Open a directory relative to `at_fd` and stream it. Used by the
    /// `-empty` test, which inspects directories the walker has not opened.
    pub fn open_at(at_fd: RawFd, rel: &CStr) -> io::Result<DirStream> {
        let flags = libc::O_RDONLY | libc::O_CLOEXEC | libc::O_DIRECTORY;
        let fd = unsafe { libc::openat(at_fd, rel.as_ptr(), flags) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        DirStream::from_fd(fd)
    }

    /// The next entry, or `None` at the end of the stream. `.` and `..` are
    /// not filtered here.
    pub fn read(&mut self) -> io::Result<Option<(OsString, FileKind)>> {
        set_errno(0);
        let de = unsafe { libc::readdir(self.dir) };
        if de.is_null() {
            let errno = errno();
            return if errno != 0 {
                Err(io::Error::from_raw_os_error(errno))
            } else {
                Ok(None)
            };
        }

        let de = unsafe { &*de };
        let name = unsafe { CStr::from_ptr(de.d_name.as_ptr()) };
        let name = OsString::from_vec(name.to_bytes().to_vec());
        Ok(Some((name, FileKind::from_dirent_type(de.d_type))))
    }

    /// Close the stream, reporting any error from closedir().
    pub fn close(mut self) -> io::Result<()> {
        let dir = std::mem::replace(&mut self.dir, std::ptr::null_mut());
        std::mem::forget(self);
        if unsafe { libc::closedir(dir) } != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        if !self.dir.is_null() {
            unsafe { libc::closedir(self.dir) };
        }
    }
}

#[cfg(target_os = "linux")]
fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(not(target_os = "linux"))]
fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__error() }
}

fn errno() -> i32 {
    unsafe { *errno_location() }
}

fn set_errno(value: i32) {
    unsafe { *errno_location() = value };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_links_parent() {
        let mut cache = DirCache::new(8);
        let root = cache.add(None, b"root");
        let child = cache.add(Some(root), b"child");

        assert_eq!(cache.entry(root).ref_count, 2);
        assert_eq!(cache.entry(child).ref_count, 1);
        assert_eq!(cache.entry(child).depth, 1);
        assert_eq!(cache.entry(root).name, b"root/");
        assert_eq!(cache.entry(child).name_offset, 5);
    }

    #[test]
    fn test_release_returns_slot() {
        let mut cache = DirCache::new(8);
        let root = cache.add(None, b"root");
        let child = cache.add(Some(root), b"child");

        assert_eq!(cache.decref(child), 0);
        cache.release(child);
        assert_eq!(cache.decref(root), 1);

        let reused = cache.add(Some(root), b"other");
        assert_eq!(reused, child);
    }

    #[test]
    fn test_resolve_without_open_ancestor() {
        let mut cache = DirCache::new(8);
        let root = cache.add(None, b"root");
        let child = cache.add(Some(root), b"child");

        let (fd, offset, base) = cache.resolve(child);
        assert_eq!(fd, libc::AT_FDCWD);
        assert_eq!(offset, 0);
        assert!(base.is_none());
    }

    #[test]
    fn test_open_caches_fd_and_resolves() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut cache = DirCache::new(8);
        let root_bytes = dir.path().as_os_str().as_encoded_bytes().to_vec();
        let root = cache.add(None, &root_bytes);

        let mut full = root_bytes.clone();
        let mut stream = cache.open(root, &full).unwrap();
        assert!(cache.entry(root).raw_fd().is_some());
        assert_eq!(cache.open_count(), 1);

        let mut names = Vec::new();
        while let Some((name, _)) = stream.read().unwrap() {
            if name != "." && name != ".." {
                names.push(name);
            }
        }
        stream.close().unwrap();
        assert_eq!(names, vec![OsString::from("sub")]);

        // A child open should resolve through the cached root fd.
        let sub = cache.add(Some(root), b"sub");
        full.extend_from_slice(b"/sub");
        let (fd, offset, base) = cache.resolve(sub);
        assert_ne!(fd, libc::AT_FDCWD);
        assert_eq!(base, Some(root));
        assert_eq!(&full[offset..], b"sub");
    }

    #[test]
    fn test_capacity_evicts_shallowest() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = a.join("b");
        std::fs::create_dir_all(&b).unwrap();

        let mut cache = DirCache::new(1);
        let root_bytes = dir.path().as_os_str().as_encoded_bytes().to_vec();
        let root = cache.add(None, &root_bytes);
        cache.open(root, &root_bytes).unwrap().close().unwrap();
        assert!(cache.entry(root).raw_fd().is_some());

        let child = cache.add(Some(root), b"a");
        let mut full = root_bytes.clone();
        full.extend_from_slice(b"/a");
        cache.open(child, &full).unwrap().close().unwrap();

        // The root was evicted to stay within the budget of one.
        assert!(cache.entry(root).raw_fd().is_none());
        assert!(cache.entry(child).raw_fd().is_some());
        assert_eq!(cache.open_count(), 1);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn test_heap_prefers_deeper_entries() {
        let mut cache = DirCache::new(8);
        let root = cache.add(None, b"r");
        let child = cache.add(Some(root), b"c");

        // Fake open state through the heap directly.
        cache.entry_mut(root).fd = Some(unsafe {
            OwnedFd::from_raw_fd(libc::dup(0))
        });
        cache.heap_push(root);
        cache.entry_mut(child).fd = Some(unsafe {
            OwnedFd::from_raw_fd(libc::dup(0))
        });
        cache.heap_push(child);

        // The deeper entry wins the top of the heap.
        assert_eq!(cache.heap[0], child);

        // More references make an entry sink below its peers at equal depth.
        let sibling = cache.add(Some(root), b"s");
        cache.entry_mut(sibling).fd = Some(unsafe {
            OwnedFd::from_raw_fd(libc::dup(0))
        });
        cache.heap_push(sibling);
        cache.incref(child);
        assert_eq!(cache.heap[0], sibling);
    }
}
