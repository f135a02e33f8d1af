//! Error taxonomy for the namespace core.
//!
//! Every operation that crosses a file-service boundary returns
//! [`Result<T>`], whose error variant always carries the operation name and
//! the path it was raised for, per the taxonomy fixed by the control-file
//! wire protocol (`not-exist`, `permission`, `invalid`, `not-supported`,
//! `depth-exceeded`, `cancelled`, `io`).

use std::io;

use thiserror::Error;

/// The seven kinds of failure a file service or composite may report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("not-exist")]
    NotExist,
    #[error("permission")]
    Permission,
    #[error("invalid")]
    Invalid,
    #[error("not-supported")]
    NotSupported,
    #[error("depth-exceeded")]
    DepthExceeded,
    #[error("cancelled")]
    Cancelled,
    /// Lower-level I/O failure, propagated verbatim from a backing store.
    /// Carries only a message: the underlying `io::Error` is not `Clone`,
    /// and `OpError` keeps the original as its `#[source]` instead.
    #[error("io: {0}")]
    Io(String),
}

impl CoreError {
    /// The wire token used on a `ctl` error line, per the control grammar.
    pub fn wire_token(&self) -> &'static str {
        match self {
            CoreError::NotExist => "not-exist",
            CoreError::Permission => "permission",
            CoreError::Invalid => "invalid",
            CoreError::NotSupported => "not-supported",
            CoreError::DepthExceeded => "depth-exceeded",
            CoreError::Cancelled => "cancelled",
            CoreError::Io(_) => "io",
        }
    }
}

impl From<io::Error> for CoreError {
    fn from(e: io::Error) -> Self {
        CoreError::Io(e.to_string())
    }
}

/// An error with diagnostic context: which operation was being performed and
/// against which path, so a caller several composites removed from the leaf
/// can still print something useful.
#[derive(Debug, Error)]
#[error("{op} {path}: {kind}")]
pub struct OpError {
    pub kind: CoreError,
    pub op: &'static str,
    pub path: String,
    #[source]
    source: Option<io::Error>,
}

impl OpError {
    pub fn new(kind: CoreError, op: &'static str, path: impl Into<String>) -> Self {
        OpError {
            kind,
            op,
            path: path.into(),
            source: None,
        }
    }

    pub fn not_exist(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(CoreError::NotExist, op, path)
    }

    pub fn invalid(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(CoreError::Invalid, op, path)
    }

    pub fn permission(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(CoreError::Permission, op, path)
    }

    pub fn not_supported(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(CoreError::NotSupported, op, path)
    }

    pub fn depth_exceeded(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(CoreError::DepthExceeded, op, path)
    }

    pub fn cancelled(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(CoreError::Cancelled, op, path)
    }

    pub fn io(op: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        OpError {
            kind: CoreError::Io(source.to_string()),
            op,
            path: path.into(),
            source: Some(source),
        }
    }

    pub fn kind(&self) -> &CoreError {
        &self.kind
    }

    /// First token of the wire-level error line, per the control grammar.
    pub fn wire_line(&self) -> String {
        format!("{} {} {}", self.kind.wire_token(), self.op, self.path)
    }
}

/// Convenience: turn a bare [`CoreError`] into a diagnostic-bearing one for
/// call sites that only know the error kind.
pub trait WithContext<T> {
    fn ctx(self, op: &'static str, path: impl Into<String>) -> Result<T>;
}

impl<T> WithContext<T> for std::result::Result<T, CoreError> {
    fn ctx(self, op: &'static str, path: impl Into<String>) -> Result<T> {
        self.map_err(|kind| OpError::new(kind, op, path))
    }
}

pub type Result<T> = std::result::Result<T, OpError>;
