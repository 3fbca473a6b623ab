//! Purpose: Native-core error model shared by the domain code and the C ABI.
//! Exports: `Error`, `ErrorKind`, `kind_code`, `kind_from_code`.
//! Role: Single error type for everything below the C ABI.
//! Invariants: Numeric kind codes are part of the ABI and never change meaning.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Internal,
    Usage,
    Encoding,
    Protocol,
    State,
    Fatal,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Internal => "Internal",
            ErrorKind::Usage => "Usage",
            ErrorKind::Encoding => "Encoding",
            ErrorKind::Protocol => "Protocol",
            ErrorKind::State => "State",
            ErrorKind::Fatal => "Fatal",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
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

pub fn kind_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Encoding => 3,
        ErrorKind::Protocol => 4,
        ErrorKind::State => 5,
        ErrorKind::Fatal => 6,
    }
}

/// Unknown codes decode as `Internal`.
pub fn kind_from_code(code: i32) -> ErrorKind {
    match code {
        2 => ErrorKind::Usage,
        3 => ErrorKind::Encoding,
        4 => ErrorKind::Protocol,
        5 => ErrorKind::State,
        6 => ErrorKind::Fatal,
        _ => ErrorKind::Internal,
    }
}
