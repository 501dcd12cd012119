//! Subprocess handling for -exec, -ok, and -exec ... +
//!
//! One-shot mode substitutes `{}` into the template and runs the command per
//! file. Batch mode collects paths until the argument budget fills, then
//! appends them all to a single invocation; pending paths are flushed when
//! the walk finishes.

use std::ffi::{OsStr, OsString};
use std::io::{self, BufRead, Write};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Rough ceiling on accumulated argument bytes per batched invocation.
/// Comfortably under any real ARG_MAX.
const BATCH_BYTE_LIMIT: usize = 2 * 1024 * 1024;

/// Compiled -exec template plus batching state
#[derive(Debug)]
pub struct ExecSpec {
    /// Command template; batch mode strips the trailing `{}`
    template: Vec<OsString>,
    batch: bool,
    confirm: bool,
    pending: Vec<OsString>,
    pending_bytes: usize,
}

impl ExecSpec {
    /// Build a spec from the words between -exec and its terminator.
    pub fn new(mut template: Vec<OsString>, batch: bool, confirm: bool) -> ExecSpec {
        if batch {
            // The terminating {} is replaced by the collected paths
            template.pop();
        }
        ExecSpec {
            template,
            batch,
            confirm,
            pending: Vec::new(),
            pending_bytes: 0,
        }
    }

    /// Handle one file. Returns the command's verdict for one-shot mode;
    /// batch mode always passes.
    pub fn run(&mut self, path: &Path) -> io::Result<bool> {
        if self.batch {
            let arg = path.as_os_str().to_os_string();
            self.pending_bytes += arg.len() + 1;
            self.pending.push(arg);
            if self.pending_bytes >= BATCH_BYTE_LIMIT {
                self.flush()?;
            }
            return Ok(true);
        }

        let argv: Vec<OsString> = self
            .template
            .iter()
            .map(|word| substitute(word, path.as_os_str()))
            .collect();

        if self.confirm && !self.prompt(&argv)? {
            return Ok(false);
        }

        let status = Command::new(&argv[0]).args(&argv[1..]).status()?;
        Ok(status.success())
    }

    /// Flush any pending batched paths.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.batch {
            self.flush()
        } else {
            Ok(())
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        debug!(
            command = %self.template[0].to_string_lossy(),
            args = self.pending.len(),
            "flushing batched exec"
        );

        let pending = std::mem::take(&mut self.pending);
        self.pending_bytes = 0;

        let status = Command::new(&self.template[0])
            .args(&self.template[1..])
            .args(pending)
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "{}: exited with {status}",
                self.template[0].to_string_lossy()
            )))
        }
    }

    fn prompt(&self, argv: &[OsString]) -> io::Result<bool> {
        let mut err = io::stderr().lock();
        write!(err, "< ")?;
        for (i, word) in argv.iter().enumerate() {
            if i > 0 {
                write!(err, " ")?;
            }
            err.write_all(word.as_bytes())?;
        }
        write!(err, " > ? ")?;
        err.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim_start().starts_with(['y', 'Y']))
    }
}

/// Replace every `{}` in a template word with the path.
fn substitute(word: &OsStr, path: &OsStr) -> OsString {
    let bytes = word.as_bytes();
    if !bytes.windows(2).any(|w| w == b"{}") {
        return word.to_os_string();
    }

    let mut out = Vec::with_capacity(bytes.len() + path.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"{}") {
            out.extend_from_slice(path.as_bytes());
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    OsString::from_vec(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute() {
        let out = substitute(OsStr::new("{}"), OsStr::new("/a/b"));
        assert_eq!(out, OsString::from("/a/b"));

        let out = substitute(OsStr::new("pre-{}-post"), OsStr::new("x"));
        assert_eq!(out, OsString::from("pre-x-post"));

        let out = substitute(OsStr::new("notemplate"), OsStr::new("x"));
        assert_eq!(out, OsString::from("notemplate"));
    }

    #[test]
    fn test_one_shot_exit_status() {
        let mut spec = ExecSpec::new(vec!["true".into()], false, false);
        assert!(spec.run(Path::new("/")).unwrap());

        let mut spec = ExecSpec::new(vec!["false".into()], false, false);
        assert!(!spec.run(Path::new("/")).unwrap());
    }

    #[test]
    fn test_batch_collects_until_finish() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let mut spec = ExecSpec::new(
            vec!["touch".into(), marker.clone().into(), "{}".into()],
            true,
            false,
        );

        spec.run(Path::new("/dev/null")).unwrap();
        assert!(!marker.exists());

        spec.finish().unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn test_missing_command_errors() {
        let mut spec = ExecSpec::new(vec!["bfind-no-such-command".into()], false, false);
        assert!(spec.run(Path::new("/")).is_err());
    }
}
