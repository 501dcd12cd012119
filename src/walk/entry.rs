//! Per-file metadata records
//!
//! Every callback invocation receives a [`Visit`]: the full path, the depth,
//! the file kind as reported by readdir, and an `(anchor fd, relative path)`
//! pair that lets tests and actions issue short relative syscalls instead of
//! re-resolving the whole path. The stat result is filled lazily - most
//! expressions never need it.

use std::ffi::{CStr, CString, OsStr};
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

/// The kind of a visited file, as far as it is known without a stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Block device
    Block,
    /// Character device
    Char,
    /// Directory
    Dir,
    /// Solaris door
    Door,
    /// Named pipe
    Fifo,
    /// Regular file
    Regular,
    /// Symbolic link
    Link,
    /// Socket
    Socket,
    /// readdir did not report a type and no stat has happened yet
    Unknown,
}

impl FileKind {
    /// Classify a stat() st_mode.
    pub fn from_mode(mode: u32) -> FileKind {
        match mode & libc::S_IFMT {
            libc::S_IFBLK => FileKind::Block,
            libc::S_IFCHR => FileKind::Char,
            libc::S_IFDIR => FileKind::Dir,
            libc::S_IFIFO => FileKind::Fifo,
            libc::S_IFREG => FileKind::Regular,
            libc::S_IFLNK => FileKind::Link,
            libc::S_IFSOCK => FileKind::Socket,
            _ => FileKind::Unknown,
        }
    }

    /// Classify a readdir() d_type.
    pub fn from_dirent_type(d_type: u8) -> FileKind {
        match d_type {
            libc::DT_BLK => FileKind::Block,
            libc::DT_CHR => FileKind::Char,
            libc::DT_DIR => FileKind::Dir,
            libc::DT_FIFO => FileKind::Fifo,
            libc::DT_REG => FileKind::Regular,
            libc::DT_LNK => FileKind::Link,
            libc::DT_SOCK => FileKind::Socket,
            _ => FileKind::Unknown,
        }
    }

    /// The single-character spelling used by `%y` and `-type`.
    pub fn type_char(self) -> char {
        match self {
            FileKind::Block => 'b',
            FileKind::Char => 'c',
            FileKind::Dir => 'd',
            FileKind::Door => 'D',
            FileKind::Fifo => 'p',
            FileKind::Regular => 'f',
            FileKind::Link => 'l',
            FileKind::Socket => 's',
            FileKind::Unknown => 'U',
        }
    }

    /// Bit for type masks built by `-type bcd,...`.
    pub fn bit(self) -> u32 {
        match self {
            FileKind::Block => 1 << 0,
            FileKind::Char => 1 << 1,
            FileKind::Dir => 1 << 2,
            FileKind::Door => 1 << 3,
            FileKind::Fifo => 1 << 4,
            FileKind::Regular => 1 << 5,
            FileKind::Link => 1 << 6,
            FileKind::Socket => 1 << 7,
            FileKind::Unknown => 1 << 8,
        }
    }
}

/// Which callback phase a [`Visit`] represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitPhase {
    /// The entry is being discovered
    Pre,
    /// All descendants of this directory have been visited
    Post,
}

/// A (seconds, nanoseconds) timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TimeSpec {
    /// Whole seconds since the epoch
    pub sec: i64,
    /// Nanosecond remainder
    pub nsec: i64,
}

impl TimeSpec {
    /// Seconds between `self` and `earlier`, rounded toward minus infinity.
    pub fn seconds_since(self, earlier: TimeSpec) -> i64 {
        let mut diff = self.sec - earlier.sec;
        if self.nsec < earlier.nsec {
            diff -= 1;
        }
        diff
    }
}

/// A stat() result
#[derive(Clone, Copy)]
pub struct FileStat(libc::stat);

impl FileStat {
    /// Device number.
    pub fn dev(&self) -> u64 {
        self.0.st_dev as u64
    }

    /// Inode number.
    pub fn ino(&self) -> u64 {
        self.0.st_ino as u64
    }

    /// Full file mode, including the type bits.
    pub fn mode(&self) -> u32 {
        self.0.st_mode as u32
    }

    /// Hard link count.
    pub fn nlink(&self) -> u64 {
        self.0.st_nlink as u64
    }

    /// Owner uid.
    pub fn uid(&self) -> u32 {
        self.0.st_uid
    }

    /// Owner gid.
    pub fn gid(&self) -> u32 {
        self.0.st_gid
    }

    /// Size in bytes.
    pub fn size(&self) -> i64 {
        self.0.st_size as i64
    }

    /// Allocated 512-byte blocks.
    pub fn blocks(&self) -> i64 {
        self.0.st_blocks as i64
    }

    /// Last access time.
    pub fn atime(&self) -> TimeSpec {
        TimeSpec {
            sec: self.0.st_atime as i64,
            nsec: self.0.st_atime_nsec as i64,
        }
    }

    /// Last status change time.
    pub fn ctime(&self) -> TimeSpec {
        TimeSpec {
            sec: self.0.st_ctime as i64,
            nsec: self.0.st_ctime_nsec as i64,
        }
    }

    /// Last modification time.
    pub fn mtime(&self) -> TimeSpec {
        TimeSpec {
            sec: self.0.st_mtime as i64,
            nsec: self.0.st_mtime_nsec as i64,
        }
    }

    /// The kind derived from the mode bits.
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode())
    }
}

impl std::fmt::Debug for FileStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStat")
            .field("dev", &self.dev())
            .field("ino", &self.ino())
            .field("mode", &format_args!("{:o}", self.mode()))
            .field("size", &self.size())
            .finish()
    }
}

/// Metadata record handed to the traversal callback
///
/// The path borrows the walker's internal buffer; anything the callback wants
/// to keep past its return must be copied out.
#[derive(Debug)]
pub struct Visit<'w> {
    pub(crate) path: &'w [u8],
    pub(crate) root: &'w Path,
    pub(crate) name_offset: usize,
    pub(crate) depth: usize,
    pub(crate) kind: FileKind,
    pub(crate) phase: VisitPhase,
    pub(crate) at_fd: RawFd,
    pub(crate) rel_offset: usize,
    pub(crate) follow: bool,
    pub(crate) stat: Option<FileStat>,
    pub(crate) error: Option<i32>,
}

impl<'w> Visit<'w> {
    /// The full path from the starting directory.
    pub fn path(&self) -> &Path {
        Path::new(OsStr::from_bytes(self.path))
    }

    /// The full path as raw bytes.
    pub fn path_bytes(&self) -> &[u8] {
        self.path
    }

    /// The starting path this entry was found under.
    pub fn root(&self) -> &Path {
        self.root
    }

    /// Byte offset of the basename within the path.
    pub fn name_offset(&self) -> usize {
        self.name_offset
    }

    /// The basename as raw bytes. For a root path this may still carry
    /// trailing slashes; `-name` strips them during matching.
    pub fn name_bytes(&self) -> &[u8] {
        &self.path[self.name_offset..]
    }

    /// Depth below the starting path (the root itself is 0).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The kind known so far. Refined by the first stat.
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Pre- or post-order.
    pub fn phase(&self) -> VisitPhase {
        self.phase
    }

    /// Anchor descriptor for the *at() syscall family, or `AT_FDCWD`.
    pub fn at_fd(&self) -> RawFd {
        self.at_fd
    }

    /// The path suffix usable together with [`Visit::at_fd`].
    pub fn rel_bytes(&self) -> &[u8] {
        &self.path[self.rel_offset..]
    }

    /// The relative path as a C string, for raw syscalls.
    pub fn rel_cstring(&self) -> io::Result<CString> {
        cstr(self.rel_bytes())
    }

    /// Whether symlink resolution is in effect for this entry.
    pub fn follows_links(&self) -> bool {
        self.follow
    }

    /// The errno recorded for this entry, if visiting it failed.
    pub fn error(&self) -> Option<i32> {
        self.error
    }

    /// Whether this record reports a traversal error instead of a file.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The stat result, if one has been captured already.
    pub fn stat(&self) -> Option<&FileStat> {
        self.stat.as_ref()
    }

    /// Stat the entry if it has not been stat'd yet, caching the result.
    ///
    /// The kind is refined from the mode bits on success.
    pub fn fill_stat(&mut self) -> io::Result<&FileStat> {
        if self.stat.is_none() {
            let rel = self.rel_cstring()?;
            let sb = fstatat(self.at_fd, &rel, self.follow)?;
            self.kind = sb.kind();
            self.stat = Some(sb);
        }
        Ok(self.stat.as_ref().unwrap())
    }

    /// Stat for the walker's pre-visit: a dangling symlink under a follow
    /// mode is retried without following, so it surfaces as a broken link
    /// rather than an error.
    pub(crate) fn fill_stat_for_walk(&mut self) -> io::Result<&FileStat> {
        if self.stat.is_some() {
            return Ok(self.stat.as_ref().unwrap());
        }
        let rel = self.rel_cstring()?;
        match fstatat(self.at_fd, &rel, self.follow) {
            Ok(sb) => {
                self.kind = sb.kind();
                self.stat = Some(sb);
            }
            Err(err) if self.follow && err.raw_os_error() == Some(libc::ENOENT) => {
                self.follow = false;
                let sb = fstatat(self.at_fd, &rel, false)?;
                self.kind = sb.kind();
                self.stat = Some(sb);
            }
            Err(err) => return Err(err),
        }
        Ok(self.stat.as_ref().unwrap())
    }
}

/// Turn path bytes into a CString for the syscall layer.
pub(crate) fn cstr(bytes: &[u8]) -> io::Result<CString> {
    CString::new(bytes).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

/// fstatat() wrapper.
pub(crate) fn fstatat(at_fd: RawFd, rel: &CStr, follow: bool) -> io::Result<FileStat> {
    let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
    let mut sb = MaybeUninit::<libc::stat>::uninit();
    let ret = unsafe { libc::fstatat(at_fd, rel.as_ptr(), sb.as_mut_ptr(), flags) };
    if ret == 0 {
        Ok(FileStat(unsafe { sb.assume_init() }))
    } else {
        Err(io::Error::last_os_error())
    }
}

/// readlinkat() wrapper that sizes the buffer dynamically.
pub(crate) fn readlinkat(at_fd: RawFd, rel: &CStr, size_hint: i64) -> io::Result<Vec<u8>> {
    let mut capacity = if size_hint > 0 {
        size_hint as usize + 1
    } else {
        128
    };

    loop {
        let mut buf = vec![0u8; capacity];
        let len = unsafe {
            libc::readlinkat(
                at_fd,
                rel.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
            )
        };
        if len < 0 {
            return Err(io::Error::last_os_error());
        }
        let len = len as usize;
        if len < capacity {
            buf.truncate(len);
            return Ok(buf);
        }
        capacity *= 2;
    }
}

/// The offset of the basename in a path, ignoring trailing slashes the way
/// basename(1) does, without modifying the input.
pub(crate) fn basename_offset(path: &[u8]) -> usize {
    let mut end = path.len();
    while end > 1 && path[end - 1] == b'/' {
        end -= 1;
    }
    match path[..end].iter().rposition(|&b| b == b'/') {
        Some(pos) if end > pos + 1 => pos + 1,
        Some(_) => 0,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_mode() {
        assert_eq!(FileKind::from_mode(libc::S_IFDIR | 0o755), FileKind::Dir);
        assert_eq!(
            FileKind::from_mode(libc::S_IFREG | 0o644),
            FileKind::Regular
        );
        assert_eq!(FileKind::from_mode(libc::S_IFLNK | 0o777), FileKind::Link);
    }

    #[test]
    fn test_type_chars() {
        assert_eq!(FileKind::Regular.type_char(), 'f');
        assert_eq!(FileKind::Dir.type_char(), 'd');
        assert_eq!(FileKind::Unknown.type_char(), 'U');
    }

    #[test]
    fn test_timespec_diff() {
        let a = TimeSpec { sec: 100, nsec: 0 };
        let b = TimeSpec { sec: 40, nsec: 1 };
        assert_eq!(a.seconds_since(b), 59);
        let c = TimeSpec { sec: 40, nsec: 0 };
        assert_eq!(a.seconds_since(c), 60);
    }

    #[test]
    fn test_timespec_ordering() {
        let older = TimeSpec { sec: 10, nsec: 5 };
        let newer = TimeSpec { sec: 10, nsec: 6 };
        assert!(newer > older);
    }

    #[test]
    fn test_basename_offset() {
        assert_eq!(basename_offset(b"foo/bar"), 4);
        assert_eq!(basename_offset(b"foo"), 0);
        assert_eq!(basename_offset(b"/foo"), 1);
        assert_eq!(basename_offset(b"foo/bar/"), 4);
        assert_eq!(basename_offset(b"/"), 0);
    }
}
