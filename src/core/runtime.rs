//! Purpose: Process-wide native state: key-validation mode and the logging sink.
//! Exports: `Settings`, `InitOutcome`, `LogSink`, `init`, `teardown`, `settings`, `is_initialized`.
//! Role: Backing state for `mym_core_init` / `mym_core_teardown`.
//! Invariants: State changes only inside `init`/`teardown`, serialized by one lock.
//! Invariants: A second `init` with equal settings is a no-op; different settings fail with `State`.
//! Notes: Entry points work before `init` using `Settings::default()`.
//! Notes: The log filter of a re-init after teardown replaces the previous one unless the host owns the subscriber.
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settings {
    pub log_filter: String,
    pub strict_keys: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: "warn".to_string(),
            strict_keys: true,
        }
    }
}

/// How `init` applied the log filter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogSink {
    /// Our subscriber was installed as the global default.
    Installed,
    /// Our subscriber was already installed; its filter was swapped.
    Reloaded,
    /// The host installed its own subscriber; the filter does not apply.
    External,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InitOutcome {
    Fresh,
    Reused,
}

static STATE: Mutex<Option<Settings>> = Mutex::new(None);
static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn lock_state() -> MutexGuard<'static, Option<Settings>> {
    STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn init(settings: Settings) -> Result<InitOutcome, Error> {
    let mut state = lock_state();
    if let Some(current) = state.as_ref() {
        if *current == settings {
            tracing::debug!("native core already initialized; reusing state");
            return Ok(InitOutcome::Reused);
        }
        return Err(Error::new(ErrorKind::State).with_message(format!(
            "native core already initialized with different settings (strict_keys={}, log_filter={:?})",
            current.strict_keys, current.log_filter
        )));
    }
    let filter = EnvFilter::try_new(&settings.log_filter).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid log filter {:?}", settings.log_filter))
            .with_source(err)
    })?;
    let sink = install_logging(filter);
    tracing::debug!(strict_keys = settings.strict_keys, ?sink, "native core initialized");
    *state = Some(settings);
    Ok(InitOutcome::Fresh)
}

/// Returns whether there was state to tear down.
pub fn teardown() -> bool {
    let torn_down = lock_state().take().is_some();
    if torn_down {
        tracing::debug!("native core torn down");
    }
    torn_down
}

pub fn settings() -> Settings {
    lock_state().clone().unwrap_or_default()
}

pub fn is_initialized() -> bool {
    lock_state().is_some()
}

// The global subscriber can be set once per process, so its filter sits behind
// a reload layer and a re-init after teardown swaps it. A subscriber the host
// installed first is kept untouched.
fn install_logging(filter: EnvFilter) -> LogSink {
    if let Some(handle) = FILTER.get() {
        return match handle.reload(filter) {
            Ok(()) => LogSink::Reloaded,
            Err(_) => LogSink::External,
        };
    }
    let (filter, handle) = reload::Layer::new(filter);
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
    match installed {
        Ok(()) => {
            let _ = FILTER.set(handle);
            LogSink::Installed
        }
        Err(_) => LogSink::External,
    }
}
