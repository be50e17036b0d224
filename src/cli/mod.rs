// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! CLI surface (§6.2, §2.1): one subcommand per mode of operation, plus the
//! `validate`/`graph`/`status`/`clean` ambient conveniences (§6.2.1), all
//! operating on the same loaded [`crate::config::Pipeline`].

pub mod clean;
pub mod graph;
pub mod overrides;
pub mod run;
pub mod status;
pub mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "loom-runner",
    version,
    about = "Pipeline runtime and orchestrator for DAGs of external command-line tasks",
    long_about = None,
    after_help = "Examples:\n\
        loom-runner run pipeline.yaml                 Run every non-optional step\n\
        loom-runner run pipeline.yaml --step build     Run just one step\n\
        loom-runner run pipeline.yaml --dry-run        Print commands without running them\n\
        loom-runner validate pipeline.yaml             Check a pipeline without running it\n\
        loom-runner graph pipeline.yaml --format dot    Render the dependency DAG\n\
        loom-runner status pipeline.yaml               Show per-step freshness\n\
        loom-runner clean pipeline.yaml                Trash every produced artifact"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output.
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to this directory before doing anything else.
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline (§6.2).
    Run(run::RunArgs),

    /// Load and fully expand a pipeline, reporting load-time errors and
    /// non-fatal warnings, without running anything (§6.2.1).
    Validate {
        pipeline: PathBuf,
    },

    /// Render the post-expansion dependency DAG (§6.2.1, §4.7).
    Graph {
        pipeline: PathBuf,

        #[clap(short, long, default_value = "text", value_parser = ["text", "dot", "mermaid"])]
        format: GraphFormat,
    },

    /// Print the §4.7 freshness classification for every step (§6.2.1).
    Status {
        pipeline: PathBuf,
    },

    /// Run the §4.7 clean operation over every produced data-node path
    /// (§6.2.1).
    Clean {
        pipeline: PathBuf,

        /// Permanently delete instead of sending to the OS trash.
        #[clap(long)]
        permanent: bool,

        /// Skip the confirmation prompt.
        #[clap(short, long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            other => Err(format!("unknown graph format: {other}")),
        }
    }
}
