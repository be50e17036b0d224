// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! Error types for the pipeline runtime.
//!
//! Fatal, load-time and override failures are variants of [`RunnerError`] and
//! surface as a single `miette` diagnostic. Per-step and per-path failures
//! during execution or cleanup are *not* routed through this enum — they are
//! plain data on the relevant result struct, since a step failing does not
//! terminate the run (see `orchestrator` and `analysis`).

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for fatal runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(Error, Debug, Diagnostic)]
pub enum RunnerError {
    #[error("pipeline file not found: {path}")]
    #[diagnostic(code(loom_runner::pipeline_not_found))]
    PipelineNotFound { path: PathBuf },

    #[error("failed to read pipeline file '{path}': {source}")]
    #[diagnostic(code(loom_runner::pipeline_read_error))]
    PipelineReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse pipeline YAML: {0}")]
    #[diagnostic(code(loom_runner::invalid_pipeline))]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("invalid pipeline configuration: {reason}")]
    #[diagnostic(code(loom_runner::invalid_pipeline))]
    InvalidPipeline { reason: String },

    #[error("the legacy 'variables:' section is no longer accepted")]
    #[diagnostic(
        code(loom_runner::legacy_variables),
        help("migrate 'variables:' entries to the typed 'data:' section; see the data node schema")
    )]
    LegacyVariablesSection,

    #[error("unknown reference '${name}'")]
    #[diagnostic(
        code(loom_runner::unknown_reference),
        help("'{name}' must be defined under either 'parameters:' or 'data:'")
    )]
    UnknownReference { name: String },

    #[error("data node '{name}' is produced by both '{first}' and '{second}'")]
    #[diagnostic(code(loom_runner::duplicate_producer))]
    DuplicateProducer {
        name: String,
        first: String,
        second: String,
    },

    #[error("duplicate step name '{name}' after expansion")]
    #[diagnostic(code(loom_runner::duplicate_step))]
    DuplicateStep { name: String },

    #[error("step '{name}' not found in pipeline")]
    #[diagnostic(code(loom_runner::step_not_found))]
    StepNotFound { name: String },

    #[error("malformed multi-pass group '{group}': {reason}")]
    #[diagnostic(code(loom_runner::multi_pass_shape))]
    MultiPassShape { group: String, reason: String },

    #[error("the post-expansion dependency graph contains a cycle: {cycle}")]
    #[diagnostic(code(loom_runner::cyclic_pipeline))]
    CyclicPipeline { cycle: String },

    #[error("invalid --{flag} override '{raw}': {reason}")]
    #[diagnostic(code(loom_runner::bad_override_syntax))]
    BadOverrideSyntax {
        flag: &'static str,
        raw: String,
        reason: String,
    },

    #[error("--step and --from cannot be used together")]
    #[diagnostic(code(loom_runner::conflicting_selection))]
    ConflictingSelection,

    #[error("failed to download '{url}': {cause}")]
    #[diagnostic(code(loom_runner::download_error))]
    DownloadError { url: String, cause: String },

    #[error("failed to start step '{step}': {source}")]
    #[diagnostic(code(loom_runner::spawn_failed))]
    SpawnFailed {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline execution failed")]
    #[diagnostic(code(loom_runner::execution_failed))]
    ExecutionFailed,

    #[error("malformed open frame: {reason}")]
    #[diagnostic(code(loom_runner::malformed_open_frame))]
    MalformedOpenFrame { reason: String },
}
