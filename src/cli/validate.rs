// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! `validate` subcommand (§6.2.1): load and fully expand a pipeline,
//! reporting load-time errors and non-fatal warnings, without running it.

use std::path::PathBuf;

use colored::Colorize;
use miette::Result;

use crate::config::Pipeline;
use crate::errors::RunnerError;

pub async fn run(pipeline_path: PathBuf) -> Result<i32> {
    if !pipeline_path.exists() {
        return Err(miette::Report::new(RunnerError::PipelineNotFound { path: pipeline_path }));
    }

    let pipeline = Pipeline::from_file(&pipeline_path).map_err(miette::Report::new)?;
    println!("{} pipeline loaded and expanded ({} steps)", "\u{2713}".green(), pipeline.steps.len());

    let mut warnings = Vec::new();

    for step in &pipeline.steps {
        let task_path = crate::config::absolutize(&pipeline.base_dir, &step.task);
        if !task_path.exists() {
            warnings.push(format!("step '{}': task file not found at {}", step.name, task_path.display()));
        }
    }

    let consumed: std::collections::HashSet<&str> = pipeline
        .steps
        .iter()
        .flat_map(|s| s.referenced_inputs())
        .collect();
    for (name, producer) in &pipeline.producers {
        if !consumed.contains(name.as_str()) {
            warnings.push(format!("data node '{name}' (produced by '{producer}') has no consumer"));
        }
    }

    if warnings.is_empty() {
        println!("{} no warnings", "\u{2713}".green());
    } else {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &warnings {
            println!("  {} {}", "\u{26A0}".yellow(), warning);
        }
    }

    Ok(0)
}
