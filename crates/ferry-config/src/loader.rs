// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./ferry.toml` > `~/.config/ferry/ferry.toml` > `/etc/ferry/ferry.toml`
//! with environment variable overrides via `FERRY_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::FerryConfig;

/// Top-level sections, used to map `FERRY_<SECTION>_<KEY>` onto `section.key`.
const SECTIONS: &[&str] = &[
    "client", "storage", "network", "queue", "auth", "channel", "cache",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/ferry/ferry.toml` (system-wide)
/// 3. `~/.config/ferry/ferry.toml` (user XDG config)
/// 4. `./ferry.toml` (local directory)
/// 5. `FERRY_*` environment variables
pub fn load_config() -> Result<FerryConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<FerryConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FerryConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<FerryConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FerryConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(FerryConfig::default()))
        .merge(Toml::file("/etc/ferry/ferry.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("ferry/ferry.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("ferry.toml"))
        .merge(env_provider())
}

/// Environment provider mapping the first underscore after a known section to a dot.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `FERRY_QUEUE_MAX_RETRIES` must become `queue.max_retries`,
/// not `queue.max.retries`.
fn env_provider() -> Env {
    Env::prefixed("FERRY_").map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
