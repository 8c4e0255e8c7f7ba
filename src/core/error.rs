//! Purpose: Crate-wide error value with a stable kind taxonomy.
//! Exports: `Error`, `ErrorKind`, `kind_label`.
//! Role: Single error type shared by resolution, transports, and the service.
//! Invariants: Kind labels are stable once published on the wire.
//! Invariants: Pagination problems never surface as errors (empty page instead).
use std::error::Error as StdError;
use std::fmt;

use crate::core::id::PointerId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Lookup,
    Invocation,
    Protocol,
    Timeout,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    pointer: Option<PointerId>,
    path: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            pointer: None,
            path: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn pointer(&self) -> Option<&PointerId> {
        self.pointer.as_ref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attaches the pointer id only if none is recorded yet, so the innermost
    /// failing pointer wins when errors bubble through nested arguments.
    pub fn with_pointer(mut self, pointer: &PointerId) -> Self {
        if self.pointer.is_none() {
            self.pointer = Some(pointer.clone());
        }
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {path})")?;
        }
        if let Some(pointer) = &self.pointer {
            write!(f, " (pointer: {pointer})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Internal => "internal",
        ErrorKind::Usage => "usage",
        ErrorKind::Lookup => "lookup",
        ErrorKind::Invocation => "invocation",
        ErrorKind::Protocol => "protocol",
        ErrorKind::Timeout => "timeout",
        ErrorKind::Io => "io",
    }
}

pub fn kind_from_label(label: &str) -> ErrorKind {
    match label {
        "usage" => ErrorKind::Usage,
        "lookup" => ErrorKind::Lookup,
        "invocation" => ErrorKind::Invocation,
        "protocol" => ErrorKind::Protocol,
        "timeout" => ErrorKind::Timeout,
        "io" => ErrorKind::Io,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, kind_from_label, kind_label};
    use crate::core::id::PointerId;

    #[test]
    fn kind_labels_are_stable() {
        let cases = [
            (ErrorKind::Internal, "internal"),
            (ErrorKind::Usage, "usage"),
            (ErrorKind::Lookup, "lookup"),
            (ErrorKind::Invocation, "invocation"),
            (ErrorKind::Protocol, "protocol"),
            (ErrorKind::Timeout, "timeout"),
            (ErrorKind::Io, "io"),
        ];

        for (kind, label) in cases {
            assert_eq!(kind_label(kind), label);
            assert_eq!(kind_from_label(label), kind);
        }
    }

    #[test]
    fn innermost_pointer_is_kept() {
        let inner = PointerId::from("inner");
        let outer = PointerId::from("outer");
        let err = Error::new(ErrorKind::Lookup)
            .with_pointer(&inner)
            .with_pointer(&outer);
        assert_eq!(err.pointer(), Some(&inner));
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::Lookup)
            .with_message("missing attribute `foo`")
            .with_path("a.foo");
        assert_eq!(err.to_string(), "Lookup: missing attribute `foo` (path: a.foo)");
    }
}
