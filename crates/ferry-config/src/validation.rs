// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes: non-empty paths, positive budgets, ordered delay bounds, and
//! URL schemes.

use crate::diagnostic::ConfigError;
use crate::model::FerryConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every validation error instead of failing fast.
pub fn validate_config(config: &FerryConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.client.log_level.as_str()) {
        fail(format!(
            "client.log_level `{}` is not one of {}",
            config.client.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if !config.storage.in_memory && config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    if !is_http_url(&config.network.api_base_url) {
        fail(format!(
            "network.api_base_url `{}` must start with http:// or https://",
            config.network.api_base_url
        ));
    }

    if config.network.request_timeout_ms == 0 {
        fail("network.request_timeout_ms must be greater than 0".to_string());
    }

    if config.queue.max_retries < 1 {
        fail("queue.max_retries must be at least 1".to_string());
    }

    if config.queue.capacity < 1 {
        fail("queue.capacity must be at least 1".to_string());
    }

    if config.queue.base_backoff_ms > config.queue.max_backoff_ms {
        fail(format!(
            "queue.base_backoff_ms ({}) must not exceed queue.max_backoff_ms ({})",
            config.queue.base_backoff_ms, config.queue.max_backoff_ms
        ));
    }

    if config.auth.refresh_url.trim().is_empty() {
        fail("auth.refresh_url must not be empty".to_string());
    }

    if let Some(url) = &config.channel.url {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            fail(format!(
                "channel.url `{url}` must start with ws:// or wss://"
            ));
        }
    }

    if config.channel.base_delay_ms > config.channel.max_delay_ms {
        fail(format!(
            "channel.base_delay_ms ({}) must not exceed channel.max_delay_ms ({})",
            config.channel.base_delay_ms, config.channel.max_delay_ms
        ));
    }

    for (i, topic) in config.channel.topics.iter().enumerate() {
        if topic.trim().is_empty() {
            fail(format!("channel.topics[{i}] must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(errors: &[ConfigError]) -> Vec<String> {
        errors.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&FerryConfig::default()).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = FerryConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("database_path"))));
    }

    #[test]
    fn in_memory_storage_skips_path_check() {
        let mut config = FerryConfig::default();
        config.storage.database_path = "".to_string();
        config.storage.in_memory = true;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn zero_retries_fails_validation() {
        let mut config = FerryConfig::default();
        config.queue.max_retries = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(messages(&errors).iter().any(|m| m.contains("max_retries")));
    }

    #[test]
    fn inverted_delays_fail_validation() {
        let mut config = FerryConfig::default();
        config.channel.base_delay_ms = 60_000;
        config.queue.base_backoff_ms = 60_000;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2, "got {:?}", messages(&errors));
    }

    #[test]
    fn channel_url_must_be_websocket() {
        let mut config = FerryConfig::default();
        config.channel.url = Some("https://example.test/socket".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert!(messages(&errors).iter().any(|m| m.contains("channel.url")));
    }

    #[test]
    fn collects_all_errors() {
        let mut config = FerryConfig::default();
        config.client.log_level = "loud".to_string();
        config.network.api_base_url = "ftp://nope".to_string();
        config.queue.capacity = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
