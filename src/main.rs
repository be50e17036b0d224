// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! `loom-runner` — CLI entry point.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loom_runner::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loom_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    let exit_code = match cli.command {
        Commands::Run(args) => loom_runner::cli::run::run(args).await?,
        Commands::Validate { pipeline } => loom_runner::cli::validate::run(pipeline).await?,
        Commands::Graph { pipeline, format } => loom_runner::cli::graph::run(pipeline, format).await?,
        Commands::Status { pipeline } => loom_runner::cli::status::run(pipeline).await?,
        Commands::Clean { pipeline, permanent, yes } => {
            loom_runner::cli::clean::run(pipeline, permanent, yes).await?
        }
    };

    std::process::exit(exit_code);
}
