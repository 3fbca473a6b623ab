//! Purpose: Tagged values crossing the host/native boundary.
//! Exports: `ValueKind`, `MarshaledValue`.
//! Role: The only value shape the shim accepts from or hands to a host.
//! Invariants: Native pointers appear only inside `Handle` wrappers, never as integers.
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::bridge::error::BridgeError;
use crate::bridge::handle::NativeHandle;
use crate::bridge::marshal;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    Bytes,
    Text,
    Handle,
    Null,
    Error,
}

impl ValueKind {
    pub fn label(self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Bytes => "bytes",
            ValueKind::Text => "text",
            ValueKind::Handle => "handle",
            ValueKind::Null => "null",
            ValueKind::Error => "error",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug)]
pub enum MarshaledValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Text(String),
    Handle(Arc<NativeHandle>),
    Null,
    Error(BridgeError),
}

impl MarshaledValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            MarshaledValue::Int(_) => ValueKind::Int,
            MarshaledValue::Float(_) => ValueKind::Float,
            MarshaledValue::Bool(_) => ValueKind::Bool,
            MarshaledValue::Bytes(_) => ValueKind::Bytes,
            MarshaledValue::Text(_) => ValueKind::Text,
            MarshaledValue::Handle(_) => ValueKind::Handle,
            MarshaledValue::Null => ValueKind::Null,
            MarshaledValue::Error(_) => ValueKind::Error,
        }
    }

    /// For hosts whose strings are not guaranteed UTF-8.
    pub fn text_from_host(bytes: Vec<u8>) -> Result<Self, BridgeError> {
        marshal::text_from_bytes(bytes).map(MarshaledValue::Text)
    }

    /// Folds a call result into a single value, errors as the `Error` tag.
    pub fn from_result(result: Result<MarshaledValue, BridgeError>) -> Self {
        result.unwrap_or_else(MarshaledValue::Error)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MarshaledValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MarshaledValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MarshaledValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Arc<NativeHandle>> {
        match self {
            MarshaledValue::Handle(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn into_handle(self) -> Option<Arc<NativeHandle>> {
        match self {
            MarshaledValue::Handle(handle) => Some(handle),
            _ => None,
        }
    }
}

// Handles compare by identity.
impl PartialEq for MarshaledValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MarshaledValue::Int(a), MarshaledValue::Int(b)) => a == b,
            (MarshaledValue::Float(a), MarshaledValue::Float(b)) => a == b,
            (MarshaledValue::Bool(a), MarshaledValue::Bool(b)) => a == b,
            (MarshaledValue::Bytes(a), MarshaledValue::Bytes(b)) => a == b,
            (MarshaledValue::Text(a), MarshaledValue::Text(b)) => a == b,
            (MarshaledValue::Handle(a), MarshaledValue::Handle(b)) => Arc::ptr_eq(a, b),
            (MarshaledValue::Null, MarshaledValue::Null) => true,
            (MarshaledValue::Error(a), MarshaledValue::Error(b)) => a == b,
            _ => false,
        }
    }
}
