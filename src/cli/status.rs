// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! `status` subcommand (§6.2.1): print the §4.7 freshness classification for
//! every step, in pipeline order.

use std::path::PathBuf;

use colored::Colorize;
use miette::Result;

use crate::analysis::{classify_freshness, Freshness};
use crate::config::Pipeline;
use crate::errors::RunnerError;

fn colorize(freshness: Freshness) -> colored::ColoredString {
    let text = freshness.to_string();
    match freshness {
        Freshness::Fresh => text.green(),
        Freshness::Stale => text.yellow(),
        Freshness::Missing => text.red(),
        Freshness::NoOutputs => text.dimmed(),
    }
}

pub async fn run(pipeline_path: PathBuf) -> Result<i32> {
    if !pipeline_path.exists() {
        return Err(miette::Report::new(RunnerError::PipelineNotFound { path: pipeline_path }));
    }

    let pipeline = Pipeline::from_file(&pipeline_path).map_err(miette::Report::new)?;

    let width = pipeline.steps.iter().map(|s| s.name.len()).max().unwrap_or(0);
    for step in &pipeline.steps {
        let freshness = classify_freshness(&pipeline, step);
        println!("{:width$}  {}", step.name, colorize(freshness), width = width);
    }

    Ok(0)
}
