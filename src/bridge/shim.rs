//! Purpose: The choke point where host values become native calls and back.
//! Exports: `Shim`, `Export`, `EXPORTS`.
//! Role: Validate against the descriptor, marshal in, call the core once, marshal out.
//! Invariants: Nothing reaches `NativeCore` before `CallDescriptor::validate` passes.
//! Invariants: Every successful result has the descriptor's return kind.
//! Invariants: Calls are synchronous and never re-enter the host.
use std::sync::Arc;

use crate::bridge::descriptor::{CallDescriptor, Param};
use crate::bridge::error::BridgeError;
use crate::bridge::handle::{HandleTable, NativeHandle};
use crate::bridge::marshal::{NativeText, text_from_native, to_i64};
use crate::bridge::native::NativeCore;
use crate::bridge::value::{MarshaledValue, ValueKind};

type ShimFn = fn(&Shim, &[MarshaledValue]) -> Result<MarshaledValue, BridgeError>;

pub struct Export {
    pub descriptor: CallDescriptor,
    invoke: ShimFn,
}

const KEY: &[Param] = &[Param::new("key", ValueKind::Text)];
const DIGEST: &[Param] = &[Param::new("digest", ValueKind::Handle)];
const DIGEST_DATA: &[Param] = &[
    Param::new("digest", ValueKind::Handle),
    Param::new("data", ValueKind::Bytes),
];

const fn export(
    name: &'static str,
    params: &'static [Param],
    returns: ValueKind,
    fallible: bool,
    invoke: ShimFn,
) -> Export {
    Export {
        descriptor: CallDescriptor {
            name,
            params,
            returns,
            fallible,
        },
        invoke,
    }
}

pub static EXPORTS: &[Export] = &[
    export("abi_version", &[], ValueKind::Int, false, Shim::abi_version),
    export("accept", KEY, ValueKind::Text, true, Shim::accept),
    export("check_key", KEY, ValueKind::Bool, true, Shim::check_key),
    export("digest_new", &[], ValueKind::Handle, true, Shim::digest_new),
    export("digest_update", DIGEST_DATA, ValueKind::Int, true, Shim::digest_update),
    export("digest_finish", DIGEST, ValueKind::Text, true, Shim::digest_finish),
    export("digest_reset", DIGEST, ValueKind::Null, true, Shim::digest_reset),
    export("close", DIGEST, ValueKind::Bool, false, Shim::close),
];

pub struct Shim {
    core: Arc<dyn NativeCore>,
    handles: Arc<HandleTable>,
}

impl Shim {
    pub fn new(core: Arc<dyn NativeCore>) -> Self {
        Self {
            core,
            handles: Arc::new(HandleTable::new()),
        }
    }

    pub fn core(&self) -> &Arc<dyn NativeCore> {
        &self.core
    }

    pub fn live_handles(&self) -> usize {
        self.handles.live_count()
    }

    pub fn call(&self, export: &Export, args: &[MarshaledValue]) -> Result<MarshaledValue, BridgeError> {
        let name = export.descriptor.name;
        export.descriptor.validate(args)?;
        tracing::trace!(op = name, argc = args.len(), "shim call");
        let value = (export.invoke)(self, args).map_err(|err| err.with_operation(name))?;
        if value.kind() != export.descriptor.returns {
            return Err(BridgeError::fatal(format!(
                "{name}() produced {} but is declared to return {}",
                value.kind(),
                export.descriptor.returns
            ))
            .with_operation(name));
        }
        Ok(value)
    }

    fn abi_version(&self, _args: &[MarshaledValue]) -> Result<MarshaledValue, BridgeError> {
        Ok(MarshaledValue::Int(i64::from(self.core.abi_version())))
    }

    fn accept(&self, args: &[MarshaledValue]) -> Result<MarshaledValue, BridgeError> {
        let key = NativeText::new(text_arg(args, 0)?);
        let accept = self.core.accept(key.as_bytes())?;
        Ok(MarshaledValue::Text(text_from_native(accept)?))
    }

    fn check_key(&self, args: &[MarshaledValue]) -> Result<MarshaledValue, BridgeError> {
        let key = NativeText::new(text_arg(args, 0)?);
        Ok(MarshaledValue::Bool(self.core.check_key(key.as_bytes())?))
    }

    fn digest_new(&self, _args: &[MarshaledValue]) -> Result<MarshaledValue, BridgeError> {
        let raw = self.core.digest_new()?;
        let handle = NativeHandle::adopt(raw, self.core.clone(), self.handles.clone())?;
        Ok(MarshaledValue::Handle(handle))
    }

    fn digest_update(&self, args: &[MarshaledValue]) -> Result<MarshaledValue, BridgeError> {
        let handle = self.handle_arg(args, 0)?;
        let data = bytes_arg(args, 1)?;
        let total = handle.with(|raw| Ok(self.core.digest_update(raw, data)?))?;
        Ok(MarshaledValue::Int(to_i64(total, "digest length")?))
    }

    fn digest_finish(&self, args: &[MarshaledValue]) -> Result<MarshaledValue, BridgeError> {
        let handle = self.handle_arg(args, 0)?;
        let accept = handle.with(|raw| Ok(self.core.digest_finish(raw)?))?;
        Ok(MarshaledValue::Text(text_from_native(accept)?))
    }

    fn digest_reset(&self, args: &[MarshaledValue]) -> Result<MarshaledValue, BridgeError> {
        let handle = self.handle_arg(args, 0)?;
        handle.with(|raw| Ok(self.core.digest_reset(raw)?))?;
        Ok(MarshaledValue::Null)
    }

    fn close(&self, args: &[MarshaledValue]) -> Result<MarshaledValue, BridgeError> {
        let handle = self.handle_arg(args, 0)?;
        Ok(MarshaledValue::Bool(handle.release()))
    }

    fn handle_arg<'a>(
        &self,
        args: &'a [MarshaledValue],
        index: usize,
    ) -> Result<&'a Arc<NativeHandle>, BridgeError> {
        let handle = args
            .get(index)
            .and_then(MarshaledValue::as_handle)
            .ok_or_else(|| BridgeError::argument(format!("argument {index} must be a handle")))?;
        if !handle.belongs_to(&self.handles) {
            return Err(BridgeError::argument(format!(
                "handle #{} belongs to a different module instance",
                handle.id()
            )));
        }
        Ok(handle)
    }
}

fn text_arg(args: &[MarshaledValue], index: usize) -> Result<&str, BridgeError> {
    args.get(index)
        .and_then(MarshaledValue::as_text)
        .ok_or_else(|| BridgeError::argument(format!("argument {index} must be text")))
}

fn bytes_arg(args: &[MarshaledValue], index: usize) -> Result<&[u8], BridgeError> {
    match args.get(index) {
        Some(MarshaledValue::Bytes(bytes)) => Ok(bytes),
        _ => Err(BridgeError::argument(format!("argument {index} must be bytes"))),
    }
}

#[cfg(test)]
mod tests {
    use super::{EXPORTS, KEY, Shim, export as declare};
    use crate::bridge::error::BridgeErrorKind;
    use crate::bridge::native::AbiCore;
    use crate::bridge::value::{MarshaledValue, ValueKind};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn export(name: &str) -> &'static super::Export {
        EXPORTS
            .iter()
            .find(|export| export.descriptor.name == name)
            .expect("export")
    }

    #[test]
    fn export_names_are_unique() {
        let names: HashSet<_> = EXPORTS.iter().map(|export| export.descriptor.name).collect();
        assert_eq!(names.len(), EXPORTS.len());
    }

    #[test]
    fn accept_marshals_text_both_ways() {
        let shim = Shim::new(Arc::new(AbiCore));
        let value = shim
            .call(
                export("accept"),
                &[MarshaledValue::Text("dGhlIHNhbXBsZSBub25jZQ==".to_string())],
            )
            .expect("accept");
        assert_eq!(value.as_text(), Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[test]
    fn native_failure_carries_operation() {
        let shim = Shim::new(Arc::new(AbiCore));
        let err = shim
            .call(export("accept"), &[MarshaledValue::Text("short".to_string())])
            .unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::NativeFailure);
        assert_eq!(err.operation(), Some("accept"));
    }

    #[test]
    fn handles_from_another_shim_are_rejected() {
        let first = Shim::new(Arc::new(AbiCore));
        let second = Shim::new(Arc::new(AbiCore));
        let handle = first.call(export("digest_new"), &[]).expect("new");
        let err = second
            .call(export("digest_finish"), &[handle.clone()])
            .unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::Argument);
        assert_eq!(first.live_handles(), 1);
        drop(handle);
        assert_eq!(first.live_handles(), 0);
    }

    #[test]
    fn result_of_undeclared_kind_is_fatal() {
        let shim = Shim::new(Arc::new(AbiCore));
        let mislabeled = declare("accept", KEY, ValueKind::Int, true, Shim::accept);
        let err = shim
            .call(
                &mislabeled,
                &[MarshaledValue::Text("dGhlIHNhbXBsZSBub25jZQ==".to_string())],
            )
            .unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::FatalNativeCondition);
        assert_eq!(err.operation(), Some("accept"));
        assert!(err.message().contains("declared to return int"));
    }
}
