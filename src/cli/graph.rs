// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! `graph` subcommand (§6.2.1): render the post-expansion dependency DAG.

use std::path::PathBuf;

use miette::Result;

use super::GraphFormat;
use crate::config::Pipeline;
use crate::dag::Dag;
use crate::errors::RunnerError;

pub async fn run(pipeline_path: PathBuf, format: GraphFormat) -> Result<i32> {
    if !pipeline_path.exists() {
        return Err(miette::Report::new(RunnerError::PipelineNotFound { path: pipeline_path }));
    }

    let pipeline = Pipeline::from_file(&pipeline_path).map_err(miette::Report::new)?;
    let dag = Dag::build(&pipeline).map_err(miette::Report::new)?;

    let rendered = match format {
        GraphFormat::Text => dag.to_text().map_err(miette::Report::new)?,
        GraphFormat::Dot => dag.to_dot(),
        GraphFormat::Mermaid => dag.to_mermaid(),
    };

    print!("{rendered}");
    Ok(0)
}
