//! Purpose: Host-runtime bridge over the native core's C ABI.
//! Exports: Values, descriptors, handles, the shim, and module registration.
//! Role: Everything a host adapter (Python extension, CLI) needs; adapters add only value conversion.
//! Invariants: Host adapters never call `abi` directly; they go through `Module::call`.
pub mod config;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod marshal;
pub mod native;
pub mod registry;
pub mod shim;
pub mod value;

pub use config::ModuleConfig;
pub use descriptor::{CallDescriptor, Param};
pub use error::{BridgeError, BridgeErrorKind, ErrorEnvelope, escalate_fatal, to_exit_code};
pub use handle::{HandleTable, NativeHandle};
pub use native::{AbiCore, NativeCore, RawHandle};
pub use registry::{EXPORT_TABLE_VERSION, ExportTable, MODULE_NAME, Module, Registry};
pub use value::{MarshaledValue, ValueKind};
