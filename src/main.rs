//! Purpose: `mymodule` CLI, a command-line host for the extension bridge.
//! Role: Binary crate root; loads the module, converts argv into marshaled values, prints JSON.
//! Invariants: Every call goes through `Module::call`, exactly like the Python extension.
//! Invariants: Results are JSON on stdout; errors are JSON on stderr.
//! Invariants: Exit codes come from `bridge::to_exit_code`; fatal native conditions abort.
use std::ffi::OsString;
use std::io::Read;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use mymodule::bridge::marshal::text_from_bytes;
use mymodule::bridge::{
    AbiCore, BridgeError, MarshaledValue, Module, ModuleConfig, Registry, escalate_fatal,
    to_exit_code,
};

#[derive(Parser, Debug)]
#[command(
    name = "mymodule",
    version,
    about = "Compute RFC 6455 Sec-WebSocket-Accept values through the native bridge"
)]
struct Cli {
    /// Hash any UTF-8 key instead of requiring a well-formed Sec-WebSocket-Key.
    #[arg(long, global = true)]
    lenient: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the accept value for a key.
    Accept { key: OsString },
    /// Report whether a key is a well-formed Sec-WebSocket-Key.
    Check { key: OsString },
    /// Stream a key in parts through a digest handle.
    Digest {
        /// Key fragment; repeat to feed several fragments in order.
        #[arg(long = "part", value_name = "TEXT")]
        parts: Vec<OsString>,
        /// Append stdin (trailing newline stripped) after the parts.
        #[arg(long)]
        stdin: bool,
    },
    /// Print the exported call table as JSON.
    Manifest,
}

fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    match execute(cli) {
        Ok(value) => {
            println!("{value}");
            0
        }
        Err(err) => {
            let err = escalate_fatal(err);
            eprintln!("{}", error_json(&err));
            to_exit_code(err.kind())
        }
    }
}

fn execute(cli: Cli) -> Result<Value, BridgeError> {
    let config = ModuleConfig::from_env();
    let config = if cli.lenient {
        config.with_strict_keys(false)
    } else {
        config
    };
    let module = Registry::global().load(config, Arc::new(AbiCore))?;

    match cli.command {
        Command::Accept { key } => {
            let key = host_text(key)?;
            let accept = module.call("accept", &[key.clone()])?;
            Ok(json!({ "key": key.as_text(), "accept": accept.as_text() }))
        }
        Command::Check { key } => {
            let key = host_text(key)?;
            let valid = module.call("check_key", &[key.clone()])?;
            Ok(json!({ "key": key.as_text(), "valid": valid.as_bool() }))
        }
        Command::Digest { parts, stdin } => run_digest(&module, parts, stdin),
        Command::Manifest => Ok(module.manifest()),
    }
}

fn run_digest(module: &Module, parts: Vec<OsString>, stdin: bool) -> Result<Value, BridgeError> {
    let digest = module.call("digest_new", &[])?;
    let mut chunks = Vec::with_capacity(parts.len() + 1);
    for part in parts {
        chunks.push(host_string(part)?.into_bytes());
    }
    if stdin {
        chunks.push(read_stdin()?);
    }

    let mut total = MarshaledValue::Int(0);
    for chunk in chunks {
        total = module.call("digest_update", &[digest.clone(), MarshaledValue::Bytes(chunk)])?;
    }
    let accept = module.call("digest_finish", &[digest.clone()])?;
    module.call("close", &[digest])?;
    Ok(json!({ "accept": accept.as_text(), "bytes": total.as_int() }))
}

fn host_text(value: OsString) -> Result<MarshaledValue, BridgeError> {
    MarshaledValue::text_from_host(value.into_encoded_bytes())
}

fn host_string(value: OsString) -> Result<String, BridgeError> {
    text_from_bytes(value.into_encoded_bytes())
}

fn read_stdin() -> Result<Vec<u8>, BridgeError> {
    let mut input = Vec::new();
    std::io::stdin()
        .read_to_end(&mut input)
        .map_err(|err| BridgeError::argument(format!("failed to read stdin: {err}")))?;
    while matches!(input.last(), Some(b'\n' | b'\r')) {
        input.pop();
    }
    Ok(input)
}

fn error_json(err: &BridgeError) -> Value {
    let mut inner = json!({
        "kind": err.kind().label(),
        "message": err.message(),
    });
    if let Some(operation) = err.operation() {
        inner["operation"] = json!(operation);
    }
    if let Some(native) = err.native() {
        inner["native_kind"] = json!(native.kind.label());
    }
    json!({ "error": inner })
}
