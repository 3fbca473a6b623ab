//! Purpose: Streaming accept computation for keys delivered in fragments.
//! Exports: `AcceptDigest`.
//! Role: Native-owned state behind `mym_digest` handles.
//! Invariants: `finish` equals `sec_websocket_accept` over every byte fed since creation or reset.
//! Invariants: Updates after `finish` fail with `State` until `reset`.
use sha1::{Digest, Sha1};
use std::fmt;

use crate::core::accept::{ACCEPT_GUID, encode_digest};
use crate::core::error::{Error, ErrorKind};

#[derive(Default)]
pub struct AcceptDigest {
    hasher: Sha1,
    total: u64,
    finished: Option<String>,
}

impl fmt::Debug for AcceptDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptDigest")
            .field("total", &self.total)
            .field("finished", &self.finished.is_some())
            .finish()
    }
}

impl AcceptDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn update(&mut self, bytes: &[u8]) -> Result<u64, Error> {
        if self.finished.is_some() {
            return Err(Error::new(ErrorKind::State)
                .with_message("digest already finished; reset before feeding more bytes"));
        }
        let total = self.total.checked_add(bytes.len() as u64).ok_or_else(|| {
            Error::new(ErrorKind::State).with_message("digest input length overflows u64")
        })?;
        self.hasher.update(bytes);
        self.total = total;
        Ok(total)
    }

    pub fn finish(&mut self) -> String {
        if let Some(accept) = &self.finished {
            return accept.clone();
        }
        let mut hasher = std::mem::take(&mut self.hasher);
        hasher.update(ACCEPT_GUID.as_bytes());
        let accept = encode_digest(&hasher.finalize());
        self.finished = Some(accept.clone());
        accept
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
