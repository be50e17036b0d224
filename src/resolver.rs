// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! Reference resolution (§4.1): `$name` lookups against parameters and data
//! nodes, and path absolutization against the pipeline's base directory.

use std::path::PathBuf;

use crate::config::{Pipeline, Scalar};
use crate::errors::{RunnerError, RunnerResult};
use crate::url_cache::UrlCache;

/// Look up `name` (without its leading `$`) first against data nodes, then
/// against parameters. Data nodes dominate on collision — this is the
/// tested, authoritative tie-break (§4.1), not the textual "parameters
/// first" reading of the same paragraph.
pub fn resolve_ref(pipeline: &Pipeline, name: &str) -> RunnerResult<Scalar> {
    if let Some(node) = pipeline.data.get(name) {
        let path = node.resolved_path(&pipeline.base_dir);
        return Ok(Scalar::String(path.to_string_lossy().into_owned()));
    }
    if let Some(value) = pipeline.parameters.get(name) {
        return Ok(value.clone());
    }
    Err(RunnerError::UnknownReference { name: name.to_string() })
}

/// Resolve a raw value: if it starts with `$`, delegate to [`resolve_ref`];
/// otherwise it is a literal and passes through unchanged (§4.1).
pub fn resolve_value(pipeline: &Pipeline, value: &str) -> RunnerResult<Scalar> {
    match value.strip_prefix('$') {
        Some(name) => resolve_ref(pipeline, name),
        None => Ok(Scalar::String(value.to_string())),
    }
}

/// Resolve a data-node reference (by name, without the `$`) to an absolute
/// path, without URL-cache delegation.
pub fn resolve_path(pipeline: &Pipeline, data_name: &str) -> RunnerResult<PathBuf> {
    let scalar = resolve_ref(pipeline, data_name)?;
    Ok(PathBuf::from(scalar.as_cli_string()))
}

/// Like [`resolve_path`], but if the resolved value is an HTTP(S) URL,
/// delegate to the URL cache and return the cache path instead (§4.1, §4.2).
pub async fn resolve_path_for_execution(
    pipeline: &Pipeline,
    data_name: &str,
    cache: &UrlCache,
    force: bool,
) -> RunnerResult<PathBuf> {
    let scalar = resolve_ref(pipeline, data_name)?;
    let raw = scalar.as_cli_string();
    if crate::url_cache::is_url(&raw) {
        cache.ensure_downloaded(&raw, force).await
    } else {
        Ok(PathBuf::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn pipeline_with_collision() -> Pipeline {
        let yaml = r#"
data:
  shared: { type: csv, path: "shared.csv" }
parameters:
  shared: "param-value"
pipeline: []
"#;
        Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap()
    }

    #[test]
    fn data_node_dominates_same_named_parameter() {
        let pipeline = pipeline_with_collision();
        let resolved = resolve_ref(&pipeline, "shared").unwrap();
        assert_eq!(resolved, Scalar::String("/pipe/shared.csv".to_string()));
    }

    #[test]
    fn resolve_value_passes_through_non_ref_literal() {
        let pipeline = pipeline_with_collision();
        let resolved = resolve_value(&pipeline, "literal-text").unwrap();
        assert_eq!(resolved, Scalar::String("literal-text".to_string()));
    }

    #[test]
    fn resolve_path_is_absolute() {
        let pipeline = pipeline_with_collision();
        let path = resolve_path(&pipeline, "shared").unwrap();
        assert!(path.is_absolute());
    }

    #[test]
    fn unknown_reference_fails() {
        let pipeline = pipeline_with_collision();
        let err = resolve_ref(&pipeline, "nope").unwrap_err();
        assert!(matches!(err, RunnerError::UnknownReference { .. }));
    }
}
