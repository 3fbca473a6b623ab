//! Purpose: Present the shim as one named, versioned, loadable module.
//! Exports: `Registry`, `Module`, `ExportTable`, `MODULE_NAME`, `EXPORT_TABLE_VERSION`.
//! Role: Owns process-wide load/unload; hosts call `Registry::global().load(..)` from their init hook.
//! Invariants: The export table is built once per load and never mutated.
//! Invariants: A second load with an equal config returns the same `Module`; a different config
//! fails with `ReinitializationError` and leaves the loaded module untouched.
//! Invariants: Load and unload are serialized by the registry lock.
//! Notes: Unload runs the native teardown hook on a best-effort basis only, and only for the load
//! that initialized the native state.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};

use crate::abi::MYM_ABI_VERSION;
use crate::bridge::config::ModuleConfig;
use crate::bridge::descriptor::CallDescriptor;
use crate::bridge::error::{BridgeError, BridgeErrorKind};
use crate::bridge::native::NativeCore;
use crate::bridge::shim::{EXPORTS, Export, Shim};
use crate::bridge::value::MarshaledValue;
use crate::core::error::ErrorKind;
use crate::core::runtime::InitOutcome;

pub const MODULE_NAME: &str = "mymodule";
pub const EXPORT_TABLE_VERSION: u32 = 1;

pub struct ExportTable {
    version: u32,
    entries: BTreeMap<&'static str, &'static Export>,
}

impl ExportTable {
    fn build() -> Self {
        let entries = EXPORTS
            .iter()
            .map(|export| (export.descriptor.name, export))
            .collect();
        Self {
            version: EXPORT_TABLE_VERSION,
            entries,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&'static Export> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted by name.
    pub fn descriptors(&self) -> impl Iterator<Item = &'static CallDescriptor> + '_ {
        self.entries.values().copied().map(|export| &export.descriptor)
    }
}

pub struct Module {
    config: ModuleConfig,
    exports: ExportTable,
    shim: Shim,
    init: InitOutcome,
}

impl Module {
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    /// Whether native state was created by this load or found already initialized.
    pub fn init_outcome(&self) -> InitOutcome {
        self.init
    }

    pub fn live_handles(&self) -> usize {
        self.shim.live_handles()
    }

    pub fn call(&self, name: &str, args: &[MarshaledValue]) -> Result<MarshaledValue, BridgeError> {
        let export = self.exports.get(name).ok_or_else(|| {
            BridgeError::argument(format!("module `{MODULE_NAME}` has no function `{name}`"))
        })?;
        self.shim.call(export, args)
    }

    pub fn manifest(&self) -> Value {
        let functions: Vec<Value> = self
            .exports
            .descriptors()
            .map(|descriptor| json!(descriptor))
            .collect();
        json!({
            "module": MODULE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "export_table_version": self.exports.version(),
            "abi_version": self.shim.core().abi_version(),
            "functions": functions,
        })
    }
}

pub struct Registry {
    loaded: Mutex<Option<Arc<Module>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            loaded: Mutex::new(None),
        }
    }

    /// The registry host init hooks use.
    pub fn global() -> &'static Registry {
        static GLOBAL: Registry = Registry::new();
        &GLOBAL
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Module>>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// When a module is already loaded with an equal config it is returned
    /// as-is and `core` is ignored.
    pub fn load(
        &self,
        config: ModuleConfig,
        core: Arc<dyn NativeCore>,
    ) -> Result<Arc<Module>, BridgeError> {
        let mut loaded = self.lock();
        if let Some(module) = loaded.as_ref() {
            if module.config == config {
                tracing::debug!(module = MODULE_NAME, "module already loaded; reusing state");
                return Ok(module.clone());
            }
            tracing::warn!(module = MODULE_NAME, "refusing to reload with a different configuration");
            return Err(BridgeError::new(
                BridgeErrorKind::Reinitialization,
                format!(
                    "module `{MODULE_NAME}` is already loaded with a different configuration \
                     (strict_keys={}, log_filter={:?})",
                    module.config.strict_keys, module.config.log_filter
                ),
            ));
        }

        let abi_version = core.abi_version();
        if abi_version != MYM_ABI_VERSION {
            return Err(BridgeError::new(
                BridgeErrorKind::NativeFailure,
                format!(
                    "native core ABI version {abi_version} does not match bridge ABI version {MYM_ABI_VERSION}"
                ),
            ));
        }

        let init = core.init(&config.settings()).map_err(|envelope| {
            if envelope.kind == ErrorKind::State {
                BridgeError::new(BridgeErrorKind::Reinitialization, envelope.message)
            } else {
                BridgeError::from(envelope)
            }
        })?;

        let module = Arc::new(Module {
            exports: ExportTable::build(),
            shim: Shim::new(core),
            config,
            init,
        });
        tracing::debug!(
            module = MODULE_NAME,
            exports = module.exports.len(),
            ?init,
            "module loaded"
        );
        *loaded = Some(module.clone());
        Ok(module)
    }

    pub fn current(&self) -> Option<Arc<Module>> {
        self.lock().clone()
    }

    /// Handles already given out stay valid and are still released normally.
    /// Native teardown runs only when this registry's load created the native
    /// state; a load that found it already initialized leaves it to its owner.
    pub fn unload(&self) -> bool {
        let mut loaded = self.lock();
        let Some(module) = loaded.take() else {
            return false;
        };
        match module.init {
            InitOutcome::Fresh => module.shim.core().teardown(),
            InitOutcome::Reused => tracing::debug!(
                module = MODULE_NAME,
                "native state owned by another load; skipping teardown"
            ),
        }
        tracing::debug!(module = MODULE_NAME, "module unloaded");
        true
    }
}
