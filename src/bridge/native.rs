//! Purpose: The seam between the shim and the native core.
//! Exports: `NativeCore`, `RawHandle`, `AbiCore`.
//! Role: `AbiCore` reaches the core only through its C ABI, as an external shim would.
//! Invariants: Native output buffers are copied and released before returning.
//! Invariants: Native error envelopes are always taken and freed, even on unknown codes.
//! Notes: The native core is safe for concurrent calls on distinct handles; a single
//! handle is single-threaded only, so callers serialize per handle.
use std::ffi::{CStr, CString};
use std::ptr;

use crate::abi::{self, mym_buf, mym_digest, mym_error};
use crate::bridge::error::ErrorEnvelope;
use crate::core::error::{ErrorKind, kind_from_code};
use crate::core::runtime::{InitOutcome, Settings};

/// Opaque pointer-sized identifier of a native-owned object.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RawHandle(pub usize);

pub trait NativeCore: Send + Sync {
    fn abi_version(&self) -> u32;
    fn init(&self, settings: &Settings) -> Result<InitOutcome, ErrorEnvelope>;
    fn teardown(&self);

    fn accept(&self, key: &[u8]) -> Result<Vec<u8>, ErrorEnvelope>;
    fn check_key(&self, key: &[u8]) -> Result<bool, ErrorEnvelope>;

    fn digest_new(&self) -> Result<RawHandle, ErrorEnvelope>;
    fn digest_update(&self, handle: RawHandle, bytes: &[u8]) -> Result<u64, ErrorEnvelope>;
    fn digest_finish(&self, handle: RawHandle) -> Result<Vec<u8>, ErrorEnvelope>;
    fn digest_reset(&self, handle: RawHandle) -> Result<(), ErrorEnvelope>;

    /// Must be called at most once per handle.
    fn release(&self, handle: RawHandle);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AbiCore;

impl NativeCore for AbiCore {
    fn abi_version(&self) -> u32 {
        abi::mym_abi_version()
    }

    fn init(&self, settings: &Settings) -> Result<InitOutcome, ErrorEnvelope> {
        let filter = CString::new(settings.log_filter.as_str())
            .map_err(|_| ErrorEnvelope::new(ErrorKind::Usage, "log filter contains NUL"))?;
        let mut err = ptr::null_mut();
        let rc = abi::mym_core_init(filter.as_ptr(), u32::from(settings.strict_keys), &mut err);
        match rc {
            0 => Ok(InitOutcome::Fresh),
            1 => Ok(InitOutcome::Reused),
            _ => Err(take_error(err)),
        }
    }

    fn teardown(&self) {
        abi::mym_core_teardown();
    }

    fn accept(&self, key: &[u8]) -> Result<Vec<u8>, ErrorEnvelope> {
        let mut out = mym_buf::empty();
        let mut err = ptr::null_mut();
        let rc = abi::mym_accept(key.as_ptr(), key.len(), &mut out, &mut err);
        if rc != 0 {
            return Err(take_error(err));
        }
        Ok(copy_and_free_buf(out))
    }

    fn check_key(&self, key: &[u8]) -> Result<bool, ErrorEnvelope> {
        let mut valid = 0u32;
        let mut err = ptr::null_mut();
        let rc = abi::mym_check_key(key.as_ptr(), key.len(), &mut valid, &mut err);
        if rc != 0 {
            return Err(take_error(err));
        }
        Ok(valid != 0)
    }

    fn digest_new(&self) -> Result<RawHandle, ErrorEnvelope> {
        let mut out: *mut mym_digest = ptr::null_mut();
        let mut err = ptr::null_mut();
        let rc = abi::mym_digest_new(&mut out, &mut err);
        if rc != 0 {
            return Err(take_error(err));
        }
        if out.is_null() {
            return Err(ErrorEnvelope::new(
                ErrorKind::Fatal,
                "mym_digest_new succeeded without a handle",
            ));
        }
        Ok(RawHandle(out as usize))
    }

    fn digest_update(&self, handle: RawHandle, bytes: &[u8]) -> Result<u64, ErrorEnvelope> {
        let mut total = 0u64;
        let mut err = ptr::null_mut();
        let rc = abi::mym_digest_update(
            digest_ptr(handle),
            bytes.as_ptr(),
            bytes.len(),
            &mut total,
            &mut err,
        );
        if rc != 0 {
            return Err(take_error(err));
        }
        Ok(total)
    }

    fn digest_finish(&self, handle: RawHandle) -> Result<Vec<u8>, ErrorEnvelope> {
        let mut out = mym_buf::empty();
        let mut err = ptr::null_mut();
        let rc = abi::mym_digest_finish(digest_ptr(handle), &mut out, &mut err);
        if rc != 0 {
            return Err(take_error(err));
        }
        Ok(copy_and_free_buf(out))
    }

    fn digest_reset(&self, handle: RawHandle) -> Result<(), ErrorEnvelope> {
        let mut err = ptr::null_mut();
        let rc = abi::mym_digest_reset(digest_ptr(handle), &mut err);
        if rc != 0 {
            return Err(take_error(err));
        }
        Ok(())
    }

    fn release(&self, handle: RawHandle) {
        abi::mym_digest_free(digest_ptr(handle));
    }
}

fn digest_ptr(handle: RawHandle) -> *mut mym_digest {
    handle.0 as *mut mym_digest
}

fn copy_and_free_buf(mut buf: mym_buf) -> Vec<u8> {
    let data = if buf.data.is_null() || buf.len == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(buf.data, buf.len) }.to_vec()
    };
    abi::mym_buf_free(&mut buf);
    data
}

fn take_error(err: *mut mym_error) -> ErrorEnvelope {
    if err.is_null() {
        return ErrorEnvelope::new(ErrorKind::Internal, "native call failed without an error");
    }
    let owned = unsafe { &*err };
    let kind = kind_from_code(owned.kind);
    let message = if owned.message.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(owned.message) }
            .to_string_lossy()
            .to_string()
    };
    abi::mym_error_free(err);
    ErrorEnvelope::new(kind, message)
}
