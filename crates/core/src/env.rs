//! Environment lookups shared by every `from_env` constructor.

use std::fmt::Display;
use std::str::FromStr;

/// Read `key`, falling back to `default` when it is unset.
pub fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read `key` and return it only when it is set to a non-blank value.
pub fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse `key`, falling back to `default` when it is unset.
///
/// Panics when the variable is set but does not parse, so a typo in a
/// deployment file stops the process at startup instead of silently
/// running with a default.
pub fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match optional(key) {
        Some(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be a valid value, got '{raw}': {e}")),
        None => default,
    }
}
