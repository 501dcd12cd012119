//! Output sinks for print actions
//!
//! Each print-family action owns a sink: stdout, a file opened by -fprint,
//! or an in-memory buffer (used by tests and by library callers that want
//! to capture output). Files are line buffered; writes go straight through
//! without locking, per the single-threaded execution model.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::rc::Rc;

enum SinkKind {
    Stdout(io::Stdout),
    File(LineWriter<File>),
    Buffer(Vec<u8>),
}

/// A shared output handle
#[derive(Clone)]
pub struct Sink {
    inner: Rc<RefCell<SinkKind>>,
}

impl Sink {
    /// The process's standard output.
    pub fn stdout() -> Sink {
        Sink {
            inner: Rc::new(RefCell::new(SinkKind::Stdout(io::stdout()))),
        }
    }

    /// Create (or truncate) a file sink, line buffered.
    pub fn create(path: &Path) -> io::Result<Sink> {
        let file = File::create(path)?;
        Ok(Sink {
            inner: Rc::new(RefCell::new(SinkKind::File(LineWriter::new(file)))),
        })
    }

    /// An in-memory sink whose contents can be taken back out.
    pub fn buffer() -> Sink {
        Sink {
            inner: Rc::new(RefCell::new(SinkKind::Buffer(Vec::new()))),
        }
    }

    /// Write raw bytes.
    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        self.with(|w| w.write_all(bytes))
    }

    /// Flush buffered output.
    pub fn flush(&self) -> io::Result<()> {
        self.with(|w| w.flush())
    }

    /// Run a closure with the underlying writer.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn Write) -> io::Result<R>) -> io::Result<R> {
        let mut kind = self.inner.borrow_mut();
        match &mut *kind {
            SinkKind::Stdout(out) => f(out),
            SinkKind::File(file) => f(file),
            SinkKind::Buffer(buf) => f(buf),
        }
    }

    /// Take the contents of a buffer sink. Empty for other sink kinds.
    pub fn take_buffer(&self) -> Vec<u8> {
        let mut kind = self.inner.borrow_mut();
        match &mut *kind {
            SinkKind::Buffer(buf) => std::mem::take(buf),
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &*self.inner.borrow() {
            SinkKind::Stdout(_) => "stdout",
            SinkKind::File(_) => "file",
            SinkKind::Buffer(_) => "buffer",
        };
        write!(f, "Sink({kind})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_roundtrip() {
        let sink = Sink::buffer();
        sink.write_all(b"one\n").unwrap();
        sink.write_all(b"two\n").unwrap();
        assert_eq!(sink.take_buffer(), b"one\ntwo\n");
        assert_eq!(sink.take_buffer(), b"");
    }

    #[test]
    fn test_clones_share_state() {
        let sink = Sink::buffer();
        let other = sink.clone();
        other.write_all(b"shared").unwrap();
        assert_eq!(sink.take_buffer(), b"shared");
    }

    #[test]
    fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let sink = Sink::create(&path).unwrap();
        sink.write_all(b"hello\n").unwrap();
        sink.flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello\n");
    }
}
