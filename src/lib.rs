//! Purpose: Native core for `mymodule` plus the bridge that exposes it to host runtimes.
//! Exports: `core` (domain logic), `abi` (C ABI), `bridge` (shim and module registration).
//! Role: Built as rlib for the CLI and the Python extension, and as cdylib/staticlib for C callers.
//! Invariants: Only `abi` defines `extern "C"` symbols; their set matches `include/mymodule.h`.
pub mod abi;
pub mod bridge;
pub mod core;
