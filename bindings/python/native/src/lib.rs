/*
Purpose: CPython extension `mymodule` over the bridge's module registration.
Key Exports: accept, check_key, digest_* functions, close, abi_version, manifest, Digest, error classes.
Role: Host adapter only: converts Python objects to marshaled values and back.
Invariants: Argument validation happens in the shim; functions take *args and never pre-extract.
Invariants: Native calls run with the GIL released; results are copied before the GIL is retaken.
Invariants: Errors raise a MyModuleError subclass whose name matches the bridge error kind.
Notes: Digest objects release their native handle when closed or garbage collected.
*/

use mymodule::bridge::{
    escalate_fatal, AbiCore, BridgeError, BridgeErrorKind, MarshaledValue, Module, ModuleConfig,
    NativeHandle, Registry,
};
use pyo3::create_exception;
use pyo3::exceptions::PyException;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyByteArray, PyBytes, PyFloat, PyInt, PyString, PyTuple};
use std::sync::Arc;

create_exception!(mymodule, MyModuleError, PyException, "Base class of mymodule errors.");
create_exception!(mymodule, ArgumentError, MyModuleError, "Bad arity, kind, or released handle.");
create_exception!(mymodule, EncodingError, MyModuleError, "Text is not valid UTF-8.");
create_exception!(mymodule, NativeFailure, MyModuleError, "The native core reported a failure.");
create_exception!(
    mymodule,
    ReinitializationError,
    MyModuleError,
    "The module is already loaded with a different configuration."
);

/// Streaming accept computation backed by a native digest handle.
#[pyclass(module = "mymodule", frozen)]
struct Digest {
    handle: Arc<NativeHandle>,
}

#[pymethods]
impl Digest {
    #[new]
    fn new(py: Python<'_>) -> PyResult<Self> {
        call(py, "digest_new", Vec::new())?
            .into_handle()
            .map(|handle| Self { handle })
            .ok_or_else(|| NativeFailure::new_err("digest_new did not return a handle"))
    }

    fn update(&self, py: Python<'_>, data: &Bound<'_, PyAny>) -> PyResult<PyObject> {
        let data = to_marshaled(data).map_err(to_py_err)?;
        self.call_with(py, "digest_update", vec![data])
    }

    fn finish(&self, py: Python<'_>) -> PyResult<PyObject> {
        self.call_with(py, "digest_finish", Vec::new())
    }

    fn reset(&self, py: Python<'_>) -> PyResult<PyObject> {
        self.call_with(py, "digest_reset", Vec::new())
    }

    fn close(&self, py: Python<'_>) -> PyResult<PyObject> {
        self.call_with(py, "close", Vec::new())
    }

    #[getter]
    fn closed(&self) -> bool {
        self.handle.is_released()
    }

    fn __enter__(slf: Py<Self>) -> Py<Self> {
        slf
    }

    #[pyo3(signature = (*_exc_info))]
    fn __exit__(&self, py: Python<'_>, _exc_info: &Bound<'_, PyTuple>) -> PyResult<bool> {
        self.close(py)?;
        Ok(false)
    }

    fn __repr__(&self) -> String {
        let state = if self.handle.is_released() { "closed" } else { "open" };
        format!("<mymodule.Digest #{} {state}>", self.handle.id())
    }
}

impl Digest {
    fn call_with(&self, py: Python<'_>, name: &str, rest: Vec<MarshaledValue>) -> PyResult<PyObject> {
        let mut args = Vec::with_capacity(rest.len() + 1);
        args.push(MarshaledValue::Handle(self.handle.clone()));
        args.extend(rest);
        let value = call(py, name, args)?;
        from_marshaled(py, value)
    }
}

macro_rules! export_fn {
    ($($name:ident),* $(,)?) => {
        $(
            #[pyfunction]
            #[pyo3(signature = (*args))]
            fn $name(py: Python<'_>, args: &Bound<'_, PyTuple>) -> PyResult<PyObject> {
                dispatch(py, stringify!($name), args)
            }
        )*
    };
}

export_fn!(
    abi_version,
    accept,
    check_key,
    digest_new,
    digest_update,
    digest_finish,
    digest_reset,
    close,
);

/// Export table, ABI and version information as a JSON string.
#[pyfunction]
fn manifest() -> PyResult<String> {
    Ok(loaded_module()?.manifest().to_string())
}

/// Best-effort native teardown; registered with `atexit`.
#[pyfunction]
fn _unload() -> bool {
    Registry::global().unload()
}

#[pymodule]
#[pyo3(name = "mymodule")]
fn mymodule_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    let py = m.py();
    let module = Registry::global()
        .load(ModuleConfig::from_env(), Arc::new(AbiCore))
        .map_err(to_py_err)?;

    m.add("MyModuleError", py.get_type_bound::<MyModuleError>())?;
    m.add("ArgumentError", py.get_type_bound::<ArgumentError>())?;
    m.add("EncodingError", py.get_type_bound::<EncodingError>())?;
    m.add("NativeFailure", py.get_type_bound::<NativeFailure>())?;
    m.add("ReinitializationError", py.get_type_bound::<ReinitializationError>())?;
    m.add_class::<Digest>()?;

    m.add_function(wrap_pyfunction!(abi_version, m)?)?;
    m.add_function(wrap_pyfunction!(accept, m)?)?;
    m.add_function(wrap_pyfunction!(check_key, m)?)?;
    m.add_function(wrap_pyfunction!(digest_new, m)?)?;
    m.add_function(wrap_pyfunction!(digest_update, m)?)?;
    m.add_function(wrap_pyfunction!(digest_finish, m)?)?;
    m.add_function(wrap_pyfunction!(digest_reset, m)?)?;
    m.add_function(wrap_pyfunction!(close, m)?)?;
    m.add_function(wrap_pyfunction!(manifest, m)?)?;

    for descriptor in module.exports().descriptors() {
        if !m.hasattr(descriptor.name)? {
            return Err(NativeFailure::new_err(format!(
                "export `{}` has no Python binding",
                descriptor.name
            )));
        }
    }

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add("EXPORT_TABLE_VERSION", module.exports().version())?;

    let unload = wrap_pyfunction!(_unload, m)?;
    py.import_bound("atexit")?.call_method1("register", (unload,))?;
    tracing::debug!("python module initialized");
    Ok(())
}

fn loaded_module() -> PyResult<Arc<Module>> {
    Registry::global()
        .current()
        .ok_or_else(|| ReinitializationError::new_err("mymodule has been unloaded"))
}

fn dispatch(py: Python<'_>, name: &str, args: &Bound<'_, PyTuple>) -> PyResult<PyObject> {
    let values = args
        .iter()
        .map(|arg| to_marshaled(&arg))
        .collect::<Result<Vec<_>, _>>()
        .map_err(to_py_err)?;
    let value = call(py, name, values)?;
    from_marshaled(py, value)
}

fn call(py: Python<'_>, name: &str, args: Vec<MarshaledValue>) -> PyResult<MarshaledValue> {
    let module = loaded_module()?;
    py.allow_threads(|| module.call(name, &args))
        .map_err(to_py_err)
}

fn to_marshaled(obj: &Bound<'_, PyAny>) -> Result<MarshaledValue, BridgeError> {
    if obj.is_none() {
        return Ok(MarshaledValue::Null);
    }
    if let Ok(digest) = obj.downcast::<Digest>() {
        return Ok(MarshaledValue::Handle(digest.get().handle.clone()));
    }
    if let Ok(flag) = obj.downcast::<PyBool>() {
        return Ok(MarshaledValue::Bool(flag.is_true()));
    }
    if let Ok(int) = obj.downcast::<PyInt>() {
        return int
            .extract::<i64>()
            .map(MarshaledValue::Int)
            .map_err(|_| BridgeError::argument("integer argument does not fit in 64 bits"));
    }
    if let Ok(float) = obj.downcast::<PyFloat>() {
        return Ok(MarshaledValue::Float(float.value()));
    }
    if let Ok(text) = obj.downcast::<PyString>() {
        return text
            .to_cow()
            .map(|text| MarshaledValue::Text(text.into_owned()))
            .map_err(|_| BridgeError::encoding("text argument is not valid UTF-8"));
    }
    if let Ok(bytes) = obj.downcast::<PyBytes>() {
        return Ok(MarshaledValue::Bytes(bytes.as_bytes().to_vec()));
    }
    if let Ok(array) = obj.downcast::<PyByteArray>() {
        return Ok(MarshaledValue::Bytes(array.to_vec()));
    }
    let type_name = obj
        .get_type()
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    Err(BridgeError::argument(format!(
        "unsupported argument type `{type_name}`"
    )))
}

fn from_marshaled(py: Python<'_>, value: MarshaledValue) -> PyResult<PyObject> {
    Ok(match value {
        MarshaledValue::Int(value) => value.into_py(py),
        MarshaledValue::Float(value) => value.into_py(py),
        MarshaledValue::Bool(value) => value.into_py(py),
        MarshaledValue::Bytes(bytes) => PyBytes::new_bound(py, &bytes).into_any().unbind(),
        MarshaledValue::Text(text) => text.into_py(py),
        MarshaledValue::Handle(handle) => Py::new(py, Digest { handle })?.into_py(py),
        MarshaledValue::Null => py.None(),
        MarshaledValue::Error(err) => return Err(to_py_err(err)),
    })
}

fn to_py_err(err: BridgeError) -> PyErr {
    let err = escalate_fatal(err);
    let message = err.to_string();
    match err.kind() {
        BridgeErrorKind::Argument => ArgumentError::new_err(message),
        BridgeErrorKind::Encoding => EncodingError::new_err(message),
        BridgeErrorKind::NativeFailure => NativeFailure::new_err(message),
        BridgeErrorKind::Reinitialization => ReinitializationError::new_err(message),
        BridgeErrorKind::FatalNativeCondition => MyModuleError::new_err(message),
    }
}
