//! Purpose: RFC 6455 `Sec-WebSocket-Accept` computation and client key checks.
//! Exports: `sec_websocket_accept`, `accept_key`, `is_valid_key`, `ACCEPT_GUID`, `KEY_LEN`, `ACCEPT_LEN`.
//! Role: Pure domain logic behind the `accept`/`check_key` entry points.
//! Invariants: Accept values are always `ACCEPT_LEN` bytes of ASCII base64.
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::core::error::{Error, ErrorKind};

pub const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const KEY_LEN: usize = 24;
pub const ACCEPT_LEN: usize = 28;

const KEY_NONCE_LEN: usize = 16;

pub fn sec_websocket_accept(key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key);
    hasher.update(ACCEPT_GUID.as_bytes());
    encode_digest(&hasher.finalize())
}

pub(crate) fn encode_digest(digest: &[u8]) -> String {
    STANDARD.encode(digest)
}

/// A client key is 24 base64 characters carrying a 16-byte nonce.
pub fn is_valid_key(key: &[u8]) -> bool {
    if key.len() != KEY_LEN {
        return false;
    }
    matches!(STANDARD.decode(key), Ok(nonce) if nonce.len() == KEY_NONCE_LEN)
}

/// Lenient mode hashes any UTF-8 key; strict mode also requires `is_valid_key`.
pub fn accept_key(key: &[u8], strict: bool) -> Result<String, Error> {
    let text = std::str::from_utf8(key).map_err(|err| {
        Error::new(ErrorKind::Encoding)
            .with_message("key is not valid UTF-8")
            .with_source(err)
    })?;
    if strict && !is_valid_key(text.as_bytes()) {
        return Err(Error::new(ErrorKind::Protocol).with_message(format!(
            "invalid Sec-WebSocket-Key: expected {KEY_LEN} base64 characters encoding {KEY_NONCE_LEN} bytes"
        )));
    }
    Ok(sec_websocket_accept(text.as_bytes()))
}
