//! Purpose: Bridge contract coverage against a counting stub native core.
//! Exports: Integration tests only.
//! Role: Verify validation-before-invocation, release-once, load idempotence, and error translation.
//! Invariants: Each test builds its own `Registry` so global state is never shared between tests.
//! Notes: The stub mimics the real core's semantics closely enough to compare results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use mymodule::bridge::{
    BridgeErrorKind, ErrorEnvelope, MarshaledValue, ModuleConfig, NativeCore, RawHandle, Registry,
    ValueKind,
};
use mymodule::core::accept::sec_websocket_accept;
use mymodule::core::error::ErrorKind;
use mymodule::core::runtime::{InitOutcome, Settings};

#[derive(Default)]
struct CountingCore {
    inits: AtomicUsize,
    teardowns: AtomicUsize,
    native_calls: AtomicUsize,
    releases: Mutex<Vec<usize>>,
    next_handle: AtomicUsize,
    digests: Mutex<HashMap<usize, Vec<u8>>>,
    initialized: Mutex<Option<Settings>>,
    abi_version: Option<u32>,
    reuse_handle: bool,
    recycle_freed: bool,
    freed: Mutex<Vec<usize>>,
    on_release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    fail_accept: Option<ErrorKind>,
    bad_utf8_output: bool,
}

impl CountingCore {
    fn calls(&self) -> usize {
        self.native_calls.load(Ordering::SeqCst)
    }

    fn release_count(&self) -> usize {
        self.releases.lock().unwrap().len()
    }

    fn count(&self) {
        self.native_calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl NativeCore for CountingCore {
    fn abi_version(&self) -> u32 {
        self.abi_version.unwrap_or(mymodule::abi::MYM_ABI_VERSION)
    }

    fn init(&self, settings: &Settings) -> Result<InitOutcome, ErrorEnvelope> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        let mut initialized = self.initialized.lock().unwrap();
        match initialized.as_ref() {
            Some(current) if current == settings => Ok(InitOutcome::Reused),
            Some(_) => Err(ErrorEnvelope::new(ErrorKind::State, "different settings")),
            None => {
                *initialized = Some(settings.clone());
                Ok(InitOutcome::Fresh)
            }
        }
    }

    fn teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.initialized.lock().unwrap().take();
    }

    fn accept(&self, key: &[u8]) -> Result<Vec<u8>, ErrorEnvelope> {
        self.count();
        if let Some(kind) = self.fail_accept {
            return Err(ErrorEnvelope::new(kind, "stub failure"));
        }
        if self.bad_utf8_output {
            return Ok(vec![0xff, 0xfe]);
        }
        Ok(sec_websocket_accept(key).into_bytes())
    }

    fn check_key(&self, key: &[u8]) -> Result<bool, ErrorEnvelope> {
        self.count();
        Ok(key.len() == 24)
    }

    fn digest_new(&self) -> Result<RawHandle, ErrorEnvelope> {
        self.count();
        let recycled = if self.recycle_freed {
            self.freed.lock().unwrap().pop()
        } else {
            None
        };
        let raw = if self.reuse_handle {
            1
        } else if let Some(raw) = recycled {
            raw
        } else {
            self.next_handle.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.digests.lock().unwrap().insert(raw, Vec::new());
        Ok(RawHandle(raw))
    }

    fn digest_update(&self, handle: RawHandle, bytes: &[u8]) -> Result<u64, ErrorEnvelope> {
        self.count();
        let mut digests = self.digests.lock().unwrap();
        let buffer = digests
            .get_mut(&handle.0)
            .ok_or_else(|| ErrorEnvelope::new(ErrorKind::Usage, "unknown handle"))?;
        buffer.extend_from_slice(bytes);
        Ok(buffer.len() as u64)
    }

    fn digest_finish(&self, handle: RawHandle) -> Result<Vec<u8>, ErrorEnvelope> {
        self.count();
        let digests = self.digests.lock().unwrap();
        let buffer = digests
            .get(&handle.0)
            .ok_or_else(|| ErrorEnvelope::new(ErrorKind::Usage, "unknown handle"))?;
        Ok(sec_websocket_accept(buffer).into_bytes())
    }

    fn digest_reset(&self, handle: RawHandle) -> Result<(), ErrorEnvelope> {
        self.count();
        if let Some(buffer) = self.digests.lock().unwrap().get_mut(&handle.0) {
            buffer.clear();
        }
        Ok(())
    }

    fn release(&self, handle: RawHandle) {
        self.digests.lock().unwrap().remove(&handle.0);
        self.releases.lock().unwrap().push(handle.0);
        if self.recycle_freed {
            self.freed.lock().unwrap().push(handle.0);
        }
        let hook = self.on_release.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

fn text(value: &str) -> MarshaledValue {
    MarshaledValue::Text(value.to_string())
}

#[test]
fn invalid_arity_or_kind_never_reaches_native() {
    let core = Arc::new(CountingCore::default());
    let registry = Registry::new();
    let module = registry
        .load(ModuleConfig::default(), core.clone())
        .expect("load");

    let bad_calls: Vec<(&str, Vec<MarshaledValue>)> = vec![
        ("accept", vec![]),
        ("accept", vec![text("a"), text("b")]),
        ("accept", vec![MarshaledValue::Bytes(b"key".to_vec())]),
        ("accept", vec![MarshaledValue::Int(24)]),
        ("check_key", vec![MarshaledValue::Null]),
        ("digest_update", vec![MarshaledValue::Bytes(vec![1])]),
        ("digest_update", vec![text("not a handle"), MarshaledValue::Bytes(vec![1])]),
        ("digest_finish", vec![MarshaledValue::Float(1.0)]),
        ("digest_new", vec![MarshaledValue::Bool(true)]),
        ("no_such_function", vec![]),
    ];

    for (name, args) in bad_calls {
        let err = module.call(name, &args).unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::Argument, "{name}: {err}");
    }
    assert_eq!(core.calls(), 0);
}

#[test]
fn valid_calls_return_declared_kinds() {
    let core = Arc::new(CountingCore::default());
    let module = Registry::new()
        .load(ModuleConfig::default(), core.clone())
        .expect("load");

    let digest = module.call("digest_new", &[]).expect("digest_new");
    let cases: Vec<(&str, Vec<MarshaledValue>)> = vec![
        ("abi_version", vec![]),
        ("accept", vec![text("dGhlIHNhbXBsZSBub25jZQ==")]),
        ("check_key", vec![text("dGhlIHNhbXBsZSBub25jZQ==")]),
        ("digest_update", vec![digest.clone(), MarshaledValue::Bytes(b"abc".to_vec())]),
        ("digest_finish", vec![digest.clone()]),
        ("digest_reset", vec![digest.clone()]),
        ("close", vec![digest.clone()]),
    ];

    for (name, args) in cases {
        let declared = module
            .exports()
            .get(name)
            .expect("export")
            .descriptor
            .returns;
        let value = module.call(name, &args).expect(name);
        assert_eq!(value.kind(), declared, "{name}");
    }
    assert_eq!(digest.kind(), ValueKind::Handle);
}

#[test]
fn native_failures_translate_by_kind() {
    let cases = [
        (ErrorKind::Protocol, BridgeErrorKind::NativeFailure),
        (ErrorKind::State, BridgeErrorKind::NativeFailure),
        (ErrorKind::Encoding, BridgeErrorKind::Encoding),
        (ErrorKind::Usage, BridgeErrorKind::Argument),
        (ErrorKind::Fatal, BridgeErrorKind::FatalNativeCondition),
    ];
    for (native, bridge) in cases {
        let core = Arc::new(CountingCore {
            fail_accept: Some(native),
            ..CountingCore::default()
        });
        let module = Registry::new()
            .load(ModuleConfig::default(), core)
            .expect("load");
        let err = module.call("accept", &[text("key")]).unwrap_err();
        assert_eq!(err.kind(), bridge);
        assert_eq!(err.operation(), Some("accept"));
        assert_eq!(err.native().map(|envelope| envelope.kind), Some(native));
    }
}

#[test]
fn invalid_native_text_is_an_encoding_error() {
    let core = Arc::new(CountingCore {
        bad_utf8_output: true,
        ..CountingCore::default()
    });
    let module = Registry::new()
        .load(ModuleConfig::default(), core)
        .expect("load");
    let err = module.call("accept", &[text("key")]).unwrap_err();
    assert_eq!(err.kind(), BridgeErrorKind::Encoding);
}

#[test]
fn handle_release_happens_exactly_once() {
    let core = Arc::new(CountingCore::default());
    let module = Registry::new()
        .load(ModuleConfig::default(), core.clone())
        .expect("load");

    let digest = module.call("digest_new", &[]).expect("digest_new");
    let handle = digest.as_handle().expect("handle").clone();
    assert_eq!(module.live_handles(), 1);

    let closed = module.call("close", &[digest.clone()]).expect("close");
    assert_eq!(closed.as_bool(), Some(true));
    assert_eq!(core.release_count(), 1);

    // Forced second release through both paths.
    let closed_again = module.call("close", &[digest.clone()]).expect("close again");
    assert_eq!(closed_again.as_bool(), Some(false));
    assert!(!handle.release());
    assert_eq!(core.release_count(), 1);

    let calls_before = core.calls();
    let err = module
        .call("digest_update", &[digest.clone(), MarshaledValue::Bytes(vec![1])])
        .unwrap_err();
    assert_eq!(err.kind(), BridgeErrorKind::Argument);
    assert_eq!(core.calls(), calls_before);

    drop(digest);
    drop(handle);
    assert_eq!(core.release_count(), 1);
    assert_eq!(module.live_handles(), 0);
}

#[test]
fn unreachable_handle_is_finalized() {
    let core = Arc::new(CountingCore::default());
    let module = Registry::new()
        .load(ModuleConfig::default(), core.clone())
        .expect("load");

    {
        let digest = module.call("digest_new", &[]).expect("digest_new");
        module
            .call("digest_update", &[digest, MarshaledValue::Bytes(b"x".to_vec())])
            .expect("update");
    }
    assert_eq!(core.release_count(), 1);
    assert_eq!(module.live_handles(), 0);
}

#[test]
fn aliased_native_handle_is_fatal() {
    let core = Arc::new(CountingCore {
        reuse_handle: true,
        ..CountingCore::default()
    });
    let module = Registry::new()
        .load(ModuleConfig::default(), core.clone())
        .expect("load");

    let first = module.call("digest_new", &[]).expect("first");
    let err = module.call("digest_new", &[]).unwrap_err();
    assert_eq!(err.kind(), BridgeErrorKind::FatalNativeCondition);
    assert!(err.is_fatal());
    assert_eq!(core.release_count(), 0);
    drop(first);
    assert_eq!(core.release_count(), 1);
}

#[test]
fn freed_address_reused_by_concurrent_new_is_not_aliasing() {
    let core = Arc::new(CountingCore {
        recycle_freed: true,
        ..CountingCore::default()
    });
    let module = Registry::new()
        .load(ModuleConfig::default(), core.clone())
        .expect("load");
    let digest = module.call("digest_new", &[]).expect("digest_new");
    let freed_raw = core.next_handle.load(Ordering::SeqCst);

    // Runs right after the native free, while the closing thread is still inside release.
    let outcome: Arc<Mutex<Option<Result<ValueKind, BridgeErrorKind>>>> = Arc::default();
    let hook_module = module.clone();
    let hook_outcome = outcome.clone();
    *core.on_release.lock().unwrap() = Some(Box::new(move || {
        let result = thread::spawn(move || {
            hook_module
                .call("digest_new", &[])
                .map(|value| value.kind())
                .map_err(|err| err.kind())
        })
        .join()
        .expect("concurrent digest_new panicked");
        *hook_outcome.lock().unwrap() = Some(result);
    }));

    let closed = module.call("close", &[digest]).expect("close");
    assert_eq!(closed.as_bool(), Some(true));

    let result = outcome.lock().unwrap().take().expect("hook ran");
    assert_eq!(result, Ok(ValueKind::Handle));
    // The recycled address was handed out again, then released when its wrapper dropped.
    assert_eq!(*core.releases.lock().unwrap(), vec![freed_raw, freed_raw]);
    assert_eq!(module.live_handles(), 0);
}

#[test]
fn second_load_reuses_or_refuses() {
    let core = Arc::new(CountingCore::default());
    let registry = Registry::new();

    let first = registry
        .load(ModuleConfig::default(), core.clone())
        .expect("first load");
    let second = registry
        .load(ModuleConfig::default(), core.clone())
        .expect("second load");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(core.inits.load(Ordering::SeqCst), 1);

    let lenient = ModuleConfig::default().with_strict_keys(false);
    let err = registry.load(lenient, core.clone()).err().expect("refused");
    assert_eq!(err.kind(), BridgeErrorKind::Reinitialization);
    assert_eq!(core.inits.load(Ordering::SeqCst), 1);

    // The original state is untouched and still usable.
    let current = registry.current().expect("still loaded");
    assert!(Arc::ptr_eq(&current, &first));
    assert!(current.config().strict_keys);
    assert!(current.call("accept", &[text("k")]).is_ok());
}

#[test]
fn native_state_conflict_is_reinitialization() {
    let core = Arc::new(CountingCore::default());
    Registry::new()
        .load(ModuleConfig::default(), core.clone())
        .expect("first registry");

    // A second registry sharing the same native core sees the conflict from native init.
    let lenient = ModuleConfig::default().with_strict_keys(false);
    let err = Registry::new().load(lenient, core.clone()).err().expect("refused");
    assert_eq!(err.kind(), BridgeErrorKind::Reinitialization);

    let reused = Registry::new()
        .load(ModuleConfig::default(), core)
        .expect("same settings");
    assert_eq!(reused.init_outcome(), InitOutcome::Reused);
}

#[test]
fn unload_of_reused_state_leaves_native_state_alone() {
    let core = Arc::new(CountingCore::default());
    let owner = Registry::new();
    let sharer = Registry::new();
    let owned = owner
        .load(ModuleConfig::default(), core.clone())
        .expect("owner load");
    let shared = sharer
        .load(ModuleConfig::default(), core.clone())
        .expect("sharer load");
    assert_eq!(owned.init_outcome(), InitOutcome::Fresh);
    assert_eq!(shared.init_outcome(), InitOutcome::Reused);

    assert!(sharer.unload());
    assert_eq!(core.teardowns.load(Ordering::SeqCst), 0);
    assert!(core.initialized.lock().unwrap().is_some());
    assert!(owned.call("accept", &[text("k")]).is_ok());

    assert!(owner.unload());
    assert_eq!(core.teardowns.load(Ordering::SeqCst), 1);
    assert!(core.initialized.lock().unwrap().is_none());
}

#[test]
fn abi_version_mismatch_fails_load() {
    let core = Arc::new(CountingCore {
        abi_version: Some(99),
        ..CountingCore::default()
    });
    let registry = Registry::new();
    let err = registry.load(ModuleConfig::default(), core.clone()).err().expect("refused");
    assert_eq!(err.kind(), BridgeErrorKind::NativeFailure);
    assert_eq!(core.inits.load(Ordering::SeqCst), 0);
    assert!(registry.current().is_none());
}

#[test]
fn unload_runs_teardown_and_allows_reload() {
    let core = Arc::new(CountingCore::default());
    let registry = Registry::new();
    let module = registry
        .load(ModuleConfig::default(), core.clone())
        .expect("load");
    let digest = module.call("digest_new", &[]).expect("digest_new");

    assert!(registry.unload());
    assert!(!registry.unload());
    assert_eq!(core.teardowns.load(Ordering::SeqCst), 1);

    // Outstanding handles still release normally.
    drop(digest);
    assert_eq!(core.release_count(), 1);

    let lenient = ModuleConfig::default().with_strict_keys(false);
    let reloaded = registry.load(lenient, core.clone()).expect("reload");
    assert_eq!(reloaded.init_outcome(), InitOutcome::Fresh);
    assert!(!reloaded.config().strict_keys);
}

#[test]
fn manifest_lists_every_export_in_order() {
    let module = Registry::new()
        .load(ModuleConfig::default(), Arc::new(CountingCore::default()))
        .expect("load");
    let manifest = module.manifest();
    assert_eq!(manifest["module"], "mymodule");
    assert_eq!(manifest["export_table_version"], 1);
    let names: Vec<&str> = manifest["functions"]
        .as_array()
        .expect("functions")
        .iter()
        .map(|function| function["name"].as_str().expect("name"))
        .collect();
    assert_eq!(
        names,
        [
            "abi_version",
            "accept",
            "check_key",
            "close",
            "digest_finish",
            "digest_new",
            "digest_reset",
            "digest_update",
        ]
    );
}
