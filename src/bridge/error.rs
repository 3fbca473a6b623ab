//! Purpose: Bridge-side error taxonomy and native error envelopes.
//! Exports: `BridgeError`, `BridgeErrorKind`, `ErrorEnvelope`, `to_exit_code`, `escalate_fatal`.
//! Role: Every failure a host sees is a `BridgeError`; kinds discriminate misuse from domain failure.
//! Invariants: Native envelopes are translated by kind, never passed through as success values.
//! Invariants: `FatalNativeCondition` is never downgraded to a recoverable kind.
use std::fmt;

use crate::core::error::ErrorKind;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BridgeErrorKind {
    Argument,
    Encoding,
    NativeFailure,
    Reinitialization,
    FatalNativeCondition,
}

impl BridgeErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            BridgeErrorKind::Argument => "ArgumentError",
            BridgeErrorKind::Encoding => "EncodingError",
            BridgeErrorKind::NativeFailure => "NativeFailure",
            BridgeErrorKind::Reinitialization => "ReinitializationError",
            BridgeErrorKind::FatalNativeCondition => "FatalNativeCondition",
        }
    }

    pub fn is_recoverable(self) -> bool {
        !matches!(self, BridgeErrorKind::FatalNativeCondition)
    }
}

/// A native-side failure as reported through `mym_error`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bridge_kind(&self) -> BridgeErrorKind {
        match self.kind {
            ErrorKind::Usage => BridgeErrorKind::Argument,
            ErrorKind::Encoding => BridgeErrorKind::Encoding,
            ErrorKind::Fatal => BridgeErrorKind::FatalNativeCondition,
            ErrorKind::Internal | ErrorKind::Protocol | ErrorKind::State => {
                BridgeErrorKind::NativeFailure
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BridgeError {
    kind: BridgeErrorKind,
    message: String,
    operation: Option<&'static str>,
    native: Option<ErrorEnvelope>,
}

impl BridgeError {
    pub fn new(kind: BridgeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            operation: None,
            native: None,
        }
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Argument, message)
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Encoding, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::FatalNativeCondition, message)
    }

    pub fn kind(&self) -> BridgeErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn operation(&self) -> Option<&'static str> {
        self.operation
    }

    pub fn native(&self) -> Option<&ErrorEnvelope> {
        self.native.as_ref()
    }

    pub fn is_fatal(&self) -> bool {
        !self.kind.is_recoverable()
    }

    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }
}

impl From<ErrorEnvelope> for BridgeError {
    fn from(envelope: ErrorEnvelope) -> Self {
        let message = if envelope.message.is_empty() {
            default_native_message(envelope.kind).to_string()
        } else {
            envelope.message.clone()
        };
        Self {
            kind: envelope.bridge_kind(),
            message,
            operation: None,
            native: Some(envelope),
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.label())?;
        if let Some(operation) = self.operation {
            write!(f, " in {operation}")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(native) = &self.native {
            write!(f, " (native kind: {})", native.kind.label())?;
        }
        Ok(())
    }
}

impl std::error::Error for BridgeError {}

fn default_native_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::Encoding => "encoding error",
        ErrorKind::Protocol => "protocol error",
        ErrorKind::State => "invalid state",
        ErrorKind::Fatal => "fatal native condition",
    }
}

pub fn to_exit_code(kind: BridgeErrorKind) -> i32 {
    match kind {
        BridgeErrorKind::Argument => 2,
        BridgeErrorKind::Encoding => 3,
        BridgeErrorKind::NativeFailure => 4,
        BridgeErrorKind::Reinitialization => 5,
        BridgeErrorKind::FatalNativeCondition => 70,
    }
}

/// Hosts route every error through here before raising it: recoverable
/// errors come back unchanged, fatal ones are reported and abort the process.
pub fn escalate_fatal(err: BridgeError) -> BridgeError {
    if err.is_fatal() {
        tracing::error!(kind = err.kind().label(), "aborting: {err}");
        eprintln!("mymodule: fatal native condition: {err}");
        std::process::abort();
    }
    err
}
