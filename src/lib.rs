// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! `loom-runner` — a pipeline runtime and orchestrator for DAGs of external
//! command-line tasks declared in a YAML configuration file.
//!
//! A pipeline file declares typed `data` nodes, scalar `parameters`, and an
//! ordered `pipeline` of steps (or groups of steps, optionally expanded from
//! a multi-pass macro). Steps reference each other only through the data
//! nodes they produce and consume; the runtime derives a dependency DAG from
//! those references, schedules steps with respect to it, and runs each as a
//! child process — either sequentially with inherited stdio, in bounded
//! parallel with captured output, or streamed over a pseudo-terminal to an
//! interactive client.
//!
//! ## Layout
//!
//! - [`config`] — the pipeline YAML schema, multi-pass expansion, and the
//!   loaded, read-only [`config::Pipeline`].
//! - [`resolver`] — `$name` reference resolution against parameters and data
//!   nodes.
//! - [`url_cache`] — on-demand download cache for HTTP(S)-valued inputs.
//! - [`dag`] — the post-expansion dependency graph and its DAG validation.
//! - [`orchestrator`] — the pure scheduler coroutine: `ready`/`skipped`/
//!   `waiting`/`complete` events, driven turn by turn.
//! - [`batch`] — the sequential and bounded-parallel executors.
//! - [`terminal`] — the streamed, pseudo-terminal executor and its
//!   bidirectional channel protocol.
//! - [`analysis`] — freshness, clean, and ancestor-query analyses over the
//!   data DAG.
//! - [`cli`] — the `clap`-derived command-line surface.

pub mod analysis;
pub mod batch;
pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod orchestrator;
pub mod resolver;
pub mod terminal;
pub mod url_cache;
pub mod utils;

pub use config::Pipeline;
pub use errors::{RunnerError, RunnerResult};

/// Crate version, exposed for `--version` and diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
