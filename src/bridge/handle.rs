//! Purpose: Host-side wrappers for native-owned objects.
//! Exports: `NativeHandle`, `HandleTable`.
//! Role: Non-owning reference plus release obligation; released on `close` or `Drop`.
//! Invariants: Native release runs at most once per handle; the slot is cleared under the lock first.
//! Invariants: Calls through one handle are serialized by the wrapper's lock.
//! Invariants: A raw handle is adopted by at most one live wrapper.
//! Invariants: A raw handle leaves the table before its native release, so address reuse is never aliasing.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bridge::error::BridgeError;
use crate::bridge::native::{NativeCore, RawHandle};

/// Tracks which raw handles currently have a live wrapper.
#[derive(Debug, Default)]
pub struct HandleTable {
    live: Mutex<HashMap<RawHandle, u64>>,
    next_id: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RawHandle, u64>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, raw: RawHandle) -> Result<u64, BridgeError> {
        let mut live = self.lock();
        if let Some(existing) = live.get(&raw) {
            return Err(BridgeError::fatal(format!(
                "native core returned handle {:#x} already owned by wrapper #{existing}",
                raw.0
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        live.insert(raw, id);
        Ok(id)
    }

    fn forget(&self, raw: RawHandle) {
        self.lock().remove(&raw);
    }
}

pub struct NativeHandle {
    id: u64,
    slot: Mutex<Option<RawHandle>>,
    core: Arc<dyn NativeCore>,
    table: Arc<HandleTable>,
}

impl NativeHandle {
    /// Takes over the release obligation for `raw`. If `raw` is already
    /// wrapped the native core is corrupt; the handle is left alone.
    pub fn adopt(
        raw: RawHandle,
        core: Arc<dyn NativeCore>,
        table: Arc<HandleTable>,
    ) -> Result<Arc<Self>, BridgeError> {
        let id = table.register(raw)?;
        tracing::trace!(id, "adopted native handle");
        Ok(Arc::new(Self {
            id,
            slot: Mutex::new(Some(raw)),
            core,
            table,
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn belongs_to(&self, table: &Arc<HandleTable>) -> bool {
        Arc::ptr_eq(&self.table, table)
    }

    pub fn is_released(&self) -> bool {
        self.lock_slot().is_none()
    }

    /// Runs `call` with the raw handle while holding the wrapper's lock.
    pub fn with<R>(
        &self,
        call: impl FnOnce(RawHandle) -> Result<R, BridgeError>,
    ) -> Result<R, BridgeError> {
        let slot = self.slot.lock().map_err(|_| {
            BridgeError::fatal(format!(
                "handle #{} lock poisoned by an interrupted native call",
                self.id
            ))
        })?;
        match *slot {
            Some(raw) => call(raw),
            None => Err(BridgeError::argument(format!(
                "handle #{} has been released",
                self.id
            ))),
        }
    }

    /// Returns `true` only for the call that performed the native release.
    pub fn release(&self) -> bool {
        let mut slot = self.lock_slot();
        let Some(raw) = slot.take() else {
            tracing::debug!(id = self.id, "handle already released");
            return false;
        };
        // Forget before freeing: once freed, the allocator may hand the same
        // address to a concurrent `digest_new`.
        self.table.forget(raw);
        self.core.release(raw);
        tracing::trace!(id = self.id, "released native handle");
        true
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<RawHandle>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}
