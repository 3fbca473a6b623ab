//! Purpose: C ABI surface of the native core (libmymodule).
//! Exports: `mym_*` entry points, the legacy `rust_accept`, and buffer/error helpers.
//! Role: Stable ABI consumed by the C/C++ extension shim and by `bridge::AbiCore`.
//! Invariants: Opaque handles; every allocation has a matching `*_free`.
//! Invariants: Input buffers are borrowed for the call only and never retained.
//! Invariants: Panics never unwind across the ABI; they surface as `Fatal` errors.
//! Notes: Declarations for C callers live in `include/mymodule.h`.
#![allow(non_camel_case_types)]

use crate::core::accept::{ACCEPT_LEN, KEY_LEN, accept_key, is_valid_key, sec_websocket_accept};
use crate::core::digest::AcceptDigest;
use crate::core::error::{Error, ErrorKind, kind_code};
use crate::core::runtime::{self, InitOutcome, Settings};
use libc::{c_char, c_int};
use std::any::Any;
use std::ffi::{CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

pub const MYM_ABI_VERSION: u32 = 1;

#[repr(C)]
pub struct mym_digest {
    digest: AcceptDigest,
}

#[repr(C)]
pub struct mym_buf {
    pub data: *mut u8,
    pub len: usize,
}

impl mym_buf {
    pub const fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            len: 0,
        }
    }
}

#[repr(C)]
pub struct mym_error {
    pub kind: i32,
    pub message: *mut c_char,
}

#[unsafe(no_mangle)]
pub extern "C" fn mym_abi_version() -> u32 {
    MYM_ABI_VERSION
}

/// Returns 0 when freshly initialized, 1 when the same settings were already active.
#[unsafe(no_mangle)]
pub extern "C" fn mym_core_init(
    log_filter: *const c_char,
    strict_keys: u32,
    out_err: *mut *mut mym_error,
) -> c_int {
    guard(out_err, || {
        let mut settings = Settings {
            strict_keys: strict_keys != 0,
            ..Settings::default()
        };
        if !log_filter.is_null() {
            settings.log_filter = unsafe { CStr::from_ptr(log_filter) }
                .to_str()
                .map_err(|err| {
                    Error::new(ErrorKind::Encoding)
                        .with_message("log_filter is not valid UTF-8")
                        .with_source(err)
                })?
                .to_string();
        }
        match runtime::init(settings)? {
            InitOutcome::Fresh => Ok(0),
            InitOutcome::Reused => Ok(1),
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn mym_core_teardown() {
    let _ = panic::catch_unwind(runtime::teardown);
}

#[unsafe(no_mangle)]
pub extern "C" fn mym_accept(
    key: *const u8,
    key_len: usize,
    out_accept: *mut mym_buf,
    out_err: *mut *mut mym_error,
) -> c_int {
    guard(out_err, || {
        let key = borrow_bytes(key, key_len, "key")?;
        let accept = accept_key(key, runtime::settings().strict_keys)?;
        write_buf(out_accept, accept.into_bytes())?;
        Ok(0)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn mym_check_key(
    key: *const u8,
    key_len: usize,
    out_valid: *mut u32,
    out_err: *mut *mut mym_error,
) -> c_int {
    guard(out_err, || {
        let key = borrow_bytes(key, key_len, "key")?;
        if out_valid.is_null() {
            return Err(Error::new(ErrorKind::Usage).with_message("out_valid is null"));
        }
        unsafe {
            *out_valid = u32::from(is_valid_key(key));
        }
        Ok(0)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn mym_digest_new(
    out_digest: *mut *mut mym_digest,
    out_err: *mut *mut mym_error,
) -> c_int {
    guard(out_err, || {
        if out_digest.is_null() {
            return Err(Error::new(ErrorKind::Usage).with_message("out_digest is null"));
        }
        let handle = Box::new(mym_digest {
            digest: AcceptDigest::new(),
        });
        unsafe {
            *out_digest = Box::into_raw(handle);
        }
        Ok(0)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn mym_digest_update(
    digest: *mut mym_digest,
    bytes: *const u8,
    len: usize,
    out_total: *mut u64,
    out_err: *mut *mut mym_error,
) -> c_int {
    guard(out_err, || {
        let digest = borrow_digest(digest)?;
        let bytes = borrow_bytes(bytes, len, "bytes")?;
        let total = digest.digest.update(bytes)?;
        if !out_total.is_null() {
            unsafe {
                *out_total = total;
            }
        }
        Ok(0)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn mym_digest_finish(
    digest: *mut mym_digest,
    out_accept: *mut mym_buf,
    out_err: *mut *mut mym_error,
) -> c_int {
    guard(out_err, || {
        let digest = borrow_digest(digest)?;
        if out_accept.is_null() {
            return Err(Error::new(ErrorKind::Usage).with_message("out_accept is null"));
        }
        let accept = digest.digest.finish();
        write_buf(out_accept, accept.into_bytes())?;
        Ok(0)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn mym_digest_reset(digest: *mut mym_digest, out_err: *mut *mut mym_error) -> c_int {
    guard(out_err, || {
        borrow_digest(digest)?.digest.reset();
        Ok(0)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn mym_digest_free(digest: *mut mym_digest) {
    if digest.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(digest));
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn mym_buf_free(buf: *mut mym_buf) {
    if buf.is_null() {
        return;
    }
    unsafe {
        let buf = &mut *buf;
        if !buf.data.is_null() && buf.len != 0 {
            drop(Vec::from_raw_parts(buf.data, buf.len, buf.len));
        }
        buf.data = ptr::null_mut();
        buf.len = 0;
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn mym_error_free(err: *mut mym_error) {
    if err.is_null() {
        return;
    }
    unsafe {
        let err = Box::from_raw(err);
        if !err.message.is_null() {
            drop(CString::from_raw(err.message));
        }
    }
}

/// Fixed-width entry point linked by the C++ extension shim: reads exactly
/// `KEY_LEN` bytes from `key` and writes exactly `ACCEPT_LEN` bytes to `result`.
/// There is no error channel; null pointers leave `result` untouched.
#[unsafe(no_mangle)]
pub extern "C" fn rust_accept(key: *const u8, result: *mut u8) {
    if key.is_null() || result.is_null() {
        return;
    }
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        let source = unsafe { std::slice::from_raw_parts(key, KEY_LEN) };
        let accept = sec_websocket_accept(source);
        let dest = unsafe { std::slice::from_raw_parts_mut(result, ACCEPT_LEN) };
        dest.copy_from_slice(accept.as_bytes());
    }));
}

fn guard(out_err: *mut *mut mym_error, body: impl FnOnce() -> Result<c_int, Error>) -> c_int {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(code)) => code,
        Ok(Err(err)) => fail(out_err, err),
        Err(payload) => fail(
            out_err,
            Error::new(ErrorKind::Fatal)
                .with_message(format!("native panic: {}", panic_message(payload.as_ref()))),
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

fn borrow_digest<'a>(digest: *mut mym_digest) -> Result<&'a mut mym_digest, Error> {
    if digest.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message("digest is null"));
    }
    unsafe { Ok(&mut *digest) }
}

fn borrow_bytes<'a>(bytes: *const u8, len: usize, name: &str) -> Result<&'a [u8], Error> {
    if bytes.is_null() {
        if len == 0 {
            return Ok(&[]);
        }
        return Err(Error::new(ErrorKind::Usage).with_message(format!("{name} is null")));
    }
    Ok(unsafe { std::slice::from_raw_parts(bytes, len) })
}

fn write_buf(out: *mut mym_buf, bytes: Vec<u8>) -> Result<(), Error> {
    if out.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message("output buffer is null"));
    }
    unsafe {
        let buf = &mut *out;
        let mut data = bytes.into_boxed_slice();
        buf.len = data.len();
        buf.data = data.as_mut_ptr();
        std::mem::forget(data);
    }
    Ok(())
}

fn fail(out_err: *mut *mut mym_error, err: Error) -> c_int {
    tracing::debug!(kind = err.kind().label(), "native call failed: {err}");
    if out_err.is_null() {
        return -1;
    }
    let error = Box::new(mym_error {
        kind: kind_code(err.kind()),
        message: to_c_string(err.message().unwrap_or("")),
    });
    unsafe {
        *out_err = Box::into_raw(error);
    }
    -1
}

fn to_c_string(input: &str) -> *mut c_char {
    CString::new(input)
        .map(|s| s.into_raw())
        .unwrap_or(ptr::null_mut())
}
