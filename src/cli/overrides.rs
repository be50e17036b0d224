// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! `--set`/`--var` override parsing (§6.2). Mirrors the source's
//! `parse_key_value_args`: split on the first `=`, then for `--set` try
//! bool, then integer, then float, falling back to string.

use std::collections::HashMap;

use crate::config::Scalar;
use crate::errors::{RunnerError, RunnerResult};

fn split_key_value(flag: &'static str, raw: &str) -> RunnerResult<(String, String)> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| RunnerError::BadOverrideSyntax {
            flag,
            raw: raw.to_string(),
            reason: "expected KEY=VALUE".to_string(),
        })
}

/// Parse a `--set` value: bool (case-insensitive `true`/`false`), then
/// integer, then float, else string (§6.2).
fn parse_scalar(value: &str) -> Scalar {
    if value.eq_ignore_ascii_case("true") {
        return Scalar::Bool(true);
    }
    if value.eq_ignore_ascii_case("false") {
        return Scalar::Bool(false);
    }
    if let Ok(i) = value.parse::<i64>() {
        return Scalar::Int(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        return Scalar::Float(f);
    }
    Scalar::String(value.to_string())
}

/// Parse a list of `--set KEY=VALUE` strings into parameter overrides.
pub fn parse_parameter_overrides(raw: &[String]) -> RunnerResult<HashMap<String, Scalar>> {
    raw.iter()
        .map(|entry| {
            let (key, value) = split_key_value("set", entry)?;
            Ok((key, parse_scalar(&value)))
        })
        .collect()
}

/// Parse a list of `--var KEY=VALUE` strings into data-node path overrides.
/// Unlike `--set`, the value is always a plain path string.
pub fn parse_data_overrides(raw: &[String]) -> RunnerResult<HashMap<String, String>> {
    raw.iter().map(|entry| split_key_value("var", entry)).collect()
}
