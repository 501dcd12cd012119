//! Error types for bfind
//!
//! This module defines the error hierarchy that covers:
//! - Command-line and expression parsing errors
//! - Traversal errors (open/readdir/stat on specific paths)
//! - Format-string compilation errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include the offending token or path
//! - Parse errors never reach the walk; walk errors never reach the parser

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the bfind application
#[derive(Error, Debug)]
pub enum BfindError {
    /// Command-line or expression parsing errors
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// Traversal errors
    #[error("{0}")]
    Walk(#[from] WalkError),

    /// I/O errors (output sinks, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors produced while parsing the command line into an expression tree
#[derive(Error, Debug)]
pub enum ParseError {
    /// Unknown predicate, with a fuzzy-matched suggestion
    #[error("unknown argument '{arg}'; did you mean '{suggestion}'?")]
    UnknownArgument { arg: String, suggestion: String },

    /// A predicate was missing its required argument
    #[error("{arg} needs {what}")]
    MissingArgument { arg: String, what: &'static str },

    /// Something that is neither a path, predicate, nor operator
    #[error("expected a predicate; found '{token}'")]
    UnexpectedToken { token: String },

    /// Expression ended in the middle of an operator
    #[error("expression terminated prematurely")]
    IncompleteExpression,

    /// Unbalanced parentheses
    #[error("expected a ')'")]
    UnmatchedParen,

    /// Invalid integer argument
    #[error("'{token}' is not a valid integer")]
    InvalidInteger { token: String },

    /// Invalid -O level
    #[error("invalid optimization level '{token}'")]
    InvalidOptLevel { token: String },

    /// Invalid -D flag
    #[error("unknown debug flag '{token}'")]
    InvalidDebugFlag { token: String },

    /// Invalid symbolic or octal mode for -perm
    #[error("'{token}' is not a valid mode")]
    InvalidMode { token: String },

    /// Invalid -type / -xtype letter
    #[error("{arg} {token}: {reason}")]
    InvalidType {
        arg: String,
        token: String,
        reason: &'static str,
    },

    /// Invalid -size suffix
    #[error("{arg} {token}: expected a size unit (one of bcwkMGTP)")]
    InvalidSizeUnit { arg: String, token: String },

    /// Glob pattern failed to compile
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        source: globset::Error,
    },

    /// Regex failed to compile
    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        source: Box<regex::Error>,
    },

    /// -printf/-fprintf format string errors
    #[error("'{format}': {reason}")]
    InvalidFormat { format: String, reason: String },

    /// -user with a name not in the user database
    #[error("'{name}' is not a user name or numeric id")]
    UnknownUser { name: String },

    /// -group with a name not in the group database
    #[error("'{name}' is not a group name or numeric id")]
    UnknownGroup { name: String },

    /// -newer/-samefile reference file could not be stat'd
    #[error("'{}': {source}", path.display())]
    Reference { path: PathBuf, source: io::Error },

    /// -fprint family output file could not be opened
    #[error("'{}': {source}", path.display())]
    Sink { path: PathBuf, source: io::Error },

    /// -exec missing its terminating ';' or '+'
    #[error("{arg}: expected a terminating ';' or '+'")]
    UnterminatedExec { arg: String },

    /// -exec ... + without a trailing {}
    #[error("{arg}: expected '{{}}' before '+'")]
    BatchWithoutPlaceholder { arg: String },
}

/// Errors that abort a traversal
#[derive(Error, Debug)]
pub enum WalkError {
    /// A path operation failed and recovery mode was off
    #[error("'{}': {source}", path.display())]
    Path { path: PathBuf, source: io::Error },

    /// Not enough file descriptors to traverse at all
    #[error("too many open files to start a traversal")]
    FdBudget,
}

impl WalkError {
    /// Build a path error from the walker's raw path bytes and an errno.
    pub(crate) fn path_errno(path: &[u8], errno: i32) -> Self {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        WalkError::Path {
            path: PathBuf::from(OsStr::from_bytes(path)),
            source: io::Error::from_raw_os_error(errno),
        }
    }

    /// The errno behind this error, if one applies.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            WalkError::Path { source, .. } => source.raw_os_error(),
            WalkError::FdBudget => Some(libc::EMFILE),
        }
    }
}

/// Result type alias for BfindError
pub type Result<T> = std::result::Result<T, BfindError>;

/// Result type alias for ParseError
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Result type alias for WalkError
pub type WalkResult<T> = std::result::Result<T, WalkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let parse_err = ParseError::InvalidInteger {
            token: "12x".into(),
        };
        let top: BfindError = parse_err.into();
        assert!(matches!(top, BfindError::Parse(_)));
    }

    #[test]
    fn test_path_errno() {
        let err = WalkError::path_errno(b"/some/dir", libc::EACCES);
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
        let msg = err.to_string();
        assert!(msg.contains("/some/dir"));
    }
}
