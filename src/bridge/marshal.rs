//! Purpose: Text and buffer conversion helpers shared by the shim and host adapters.
//! Exports: `NativeText`, `text_from_bytes`, `text_from_native`, `to_i64`.
//! Role: UTF-8 is the interchange encoding; everything textual passes through here.
//! Invariants: Invalid UTF-8 is an `EncodingError`; bytes are never substituted or truncated.
use crate::bridge::error::{BridgeError, BridgeErrorKind};

/// Borrowed (pointer, length) view of text handed to the native core.
/// Valid only until the native call returns.
#[derive(Debug)]
pub struct NativeText<'a> {
    bytes: &'a [u8],
}

impl<'a> NativeText<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub fn text_from_bytes(bytes: Vec<u8>) -> Result<String, BridgeError> {
    String::from_utf8(bytes).map_err(|err| {
        BridgeError::encoding(format!(
            "text is not valid UTF-8 (invalid byte at offset {})",
            err.utf8_error().valid_up_to()
        ))
    })
}

/// Converts a native output buffer into host text.
pub fn text_from_native(bytes: Vec<u8>) -> Result<String, BridgeError> {
    text_from_bytes(bytes).map_err(|err| {
        BridgeError::encoding(format!("native core returned {}", err.message()))
    })
}

pub fn to_i64(value: u64, what: &str) -> Result<i64, BridgeError> {
    i64::try_from(value).map_err(|_| {
        BridgeError::new(
            BridgeErrorKind::NativeFailure,
            format!("{what} {value} does not fit a host integer"),
        )
    })
}
