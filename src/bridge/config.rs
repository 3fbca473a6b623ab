//! Purpose: Load-time configuration for the extension module.
//! Exports: `ModuleConfig`, `LOG_ENV`, `STRICT_KEYS_ENV`.
//! Role: Equality of configs decides whether a second load may reuse state.
//! Invariants: Defaults match `core::runtime::Settings::default()`.
use crate::core::runtime::Settings;

pub const LOG_ENV: &str = "MYMODULE_LOG";
pub const STRICT_KEYS_ENV: &str = "MYMODULE_STRICT_KEYS";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleConfig {
    pub log_filter: String,
    pub strict_keys: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            log_filter: settings.log_filter,
            strict_keys: settings.strict_keys,
        }
    }
}

impl ModuleConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(filter) = lookup(LOG_ENV).filter(|value| !value.trim().is_empty()) {
            config.log_filter = filter;
        }
        if let Some(value) = lookup(STRICT_KEYS_ENV) {
            match parse_flag(&value) {
                Some(strict) => config.strict_keys = strict,
                None => tracing::warn!(
                    value = value.as_str(),
                    default = config.strict_keys,
                    "unrecognized {STRICT_KEYS_ENV} value; keeping default"
                ),
            }
        }
        config
    }

    pub fn with_strict_keys(mut self, strict: bool) -> Self {
        self.strict_keys = strict;
        self
    }

    pub fn settings(&self) -> Settings {
        Settings {
            log_filter: self.log_filter.clone(),
            strict_keys: self.strict_keys,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
