// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns figment errors into miette diagnostics for `ferry.toml`.
//!
//! An unknown key is located in the TOML file it came from so the report can
//! underline it, and the closest valid key of the same section is offered as
//! a correction (Jaro-Winkler similarity via `strsim`).

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Similarity a valid key needs before it is offered as a correction.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A problem with the Ferry configuration.
///
/// Loading collects every problem it finds instead of stopping at the first,
/// so callers receive a `Vec<ConfigError>`.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A key that no config section defines, e.g. `queue.max_retry`.
    #[error("unknown key `{key}` in {section}")]
    #[diagnostic(
        code(ferry::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        /// The key as written.
        key: String,
        /// `[queue]`, `[channel]`, ... or `the top level`.
        section: String,
        /// Closest valid key of the same section.
        suggestion: Option<String>,
        /// Comma-separated keys the section accepts.
        valid_keys: String,
        /// Where the key sits in the file, when the file is known.
        #[label("not accepted here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value that does not deserialize into its field, e.g. a string for
    /// `queue.max_retries`.
    #[error("`{key}` has the wrong type: found {found}")]
    #[diagnostic(code(ferry::config::invalid_type), help("`{key}` takes {expected}"))]
    InvalidType {
        /// Dotted path of the field.
        key: String,
        found: String,
        expected: String,
    },

    /// A field without a default that the file left out.
    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(ferry::config::missing_key),
        help("add `{key} = <value>` to ferry.toml or set the matching FERRY_* variable")
    )]
    MissingKey { key: String },

    /// A value that parsed but breaks a rule such as `queue.capacity >= 1`.
    #[error("{message}")]
    #[diagnostic(code(ferry::config::validation))]
    Validation { message: String },

    /// Any other figment failure (unreadable file, bad TOML syntax, ...).
    #[error("configuration error: {0}")]
    #[diagnostic(code(ferry::config::other))]
    Other(String),
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? accepted keys: {valid_keys}"),
        None => format!("accepted keys: {valid_keys}"),
    }
}

/// One diagnostic per error figment reported.
///
/// `toml_sources` holds `(path, content)` pairs of the files that were
/// merged, used to place spans on unknown keys.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    err.into_iter()
        .map(|error| convert(&error, toml_sources))
        .collect()
}

fn convert(error: &figment::Error, toml_sources: &[(String, String)]) -> ConfigError {
    use figment::error::Kind;

    let path: Vec<String> = error.path.iter().map(ToString::to_string).collect();
    match &error.kind {
        Kind::UnknownField(field, accepted) => {
            let (span, src) = locate(error, &path, field, toml_sources);
            ConfigError::UnknownKey {
                key: field.clone(),
                section: match path.first() {
                    Some(section) => format!("[{section}]"),
                    None => "the top level".to_string(),
                },
                suggestion: suggest_key(field, accepted),
                valid_keys: accepted.join(", "),
                span,
                src,
            }
        }
        Kind::MissingField(field) => ConfigError::MissingKey {
            key: dotted(&path, field),
        },
        Kind::InvalidType(found, expected) => ConfigError::InvalidType {
            key: path.join("."),
            found: found.to_string(),
            expected: expected.to_string(),
        },
        _ => ConfigError::Other(error.to_string()),
    }
}

fn dotted(path: &[String], field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{field}", path.join("."))
    }
}

/// Span and source of `field` in the file the error came from.
fn locate(
    error: &figment::Error,
    path: &[String],
    field: &str,
    toml_sources: &[(String, String)],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let origin = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|source| match source {
            figment::Source::File(file) => Some(file.display().to_string()),
            _ => None,
        });

    // Strings loaded with `load_config_from_str` carry no file name.
    let source = match origin {
        Some(file) => toml_sources.iter().find(|(p, _)| *p == file),
        None if toml_sources.len() == 1 => toml_sources.first(),
        None => None,
    };
    let Some((name, content)) = source else {
        return (None, None);
    };
    match find_key_offset(content, path, field) {
        Some(offset) => (
            Some(SourceSpan::new(offset.into(), field.len())),
            Some(NamedSource::new(name, content.clone())),
        ),
        None => (None, None),
    }
}

/// Byte offset of `field` as a key inside the `[path[0]]` table, or among the
/// top-level keys when `path` is empty.
pub fn find_key_offset(content: &str, path: &[String], field: &str) -> Option<usize> {
    let wanted = path.first().map(String::as_str);
    let mut table: Option<&str> = None;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let start = offset;
        offset += line.len();

        let trimmed = line.trim_start();
        if let Some(header) = trimmed.strip_prefix('[') {
            table = header.split(']').next().map(str::trim);
            continue;
        }
        if table != wanted {
            continue;
        }
        let Some(rest) = trimmed.strip_prefix(field) else {
            continue;
        };
        if rest.trim_start().starts_with('=') {
            return Some(start + (line.len() - trimmed.len()));
        }
    }
    None
}

/// The accepted key most similar to `unknown`, if any is close enough.
pub fn suggest_key(unknown: &str, accepted: &[&str]) -> Option<String> {
    accepted
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Prints every diagnostic to stderr with miette's graphical report.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    for error in errors {
        let mut report = String::new();
        match handler.render_report(&mut report, error as &dyn Diagnostic) {
            Ok(()) => eprint!("{report}"),
            Err(_) => eprintln!("error: {error}"),
        }
    }
}
