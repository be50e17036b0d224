// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! `clean` subcommand (§6.2.1): run the §4.7 clean operation over every
//! produced data-node path, trashing by default and deleting permanently
//! with `--permanent`.

use std::io::Write;
use std::path::PathBuf;

use colored::Colorize;
use miette::Result;

use crate::analysis::{self, CleanAction};
use crate::config::Pipeline;
use crate::errors::RunnerError;

fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

pub async fn run(pipeline_path: PathBuf, permanent: bool, yes: bool) -> Result<i32> {
    if !pipeline_path.exists() {
        return Err(miette::Report::new(RunnerError::PipelineNotFound { path: pipeline_path }));
    }

    let pipeline = Pipeline::from_file(&pipeline_path).map_err(miette::Report::new)?;

    if !yes {
        let verb = if permanent { "permanently delete" } else { "trash" };
        if !confirm(&format!("{verb} every produced artifact for this pipeline?")) {
            println!("{}", "aborted".dimmed());
            return Ok(0);
        }
    }

    let results = analysis::clean(&pipeline, permanent, false);
    let mut failed = 0;
    for result in &results {
        let verb = match (result.action, result.success) {
            (CleanAction::Trashed, true) => "trashed".green(),
            (CleanAction::Deleted, true) => "deleted".green(),
            (CleanAction::Skipped, _) => "skipped (absent)".dimmed(),
            (_, false) => {
                failed += 1;
                "failed".red()
            }
        };
        println!("{} {}", verb, result.path.display());
        if let Some(error) = &result.error {
            println!("  {error}");
        }
    }

    println!("{}/{} paths cleaned", results.len() - failed, results.len());
    Ok(if failed == 0 { 0 } else { 1 })
}
