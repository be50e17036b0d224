// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! `run` subcommand (§6.2): loads a pipeline, applies selection and
//! overrides, and drives it through the sequential or bounded-parallel
//! batch executor.

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use miette::Result;

use crate::cli::overrides;
use crate::config::Pipeline;
use crate::errors::RunnerError;
use crate::orchestrator::get_steps_to_run;
use crate::url_cache::UrlCache;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline YAML file.
    pub pipeline: PathBuf,

    /// Run exactly these steps (bypasses `disabled`/`optional` filtering).
    #[clap(long = "step", value_name = "NAME")]
    pub step: Vec<String>,

    /// Run from this step to the end of the pipeline.
    #[clap(long, value_name = "NAME", conflicts_with = "step")]
    pub from: Option<String>,

    /// Also run these optional steps.
    #[clap(long = "include", value_name = "NAME")]
    pub include: Vec<String>,

    /// Override a parameter: `--set level=3`.
    #[clap(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Override a data node's path: `--var out=/tmp/out.csv`.
    #[clap(long = "var", value_name = "KEY=VALUE")]
    pub var: Vec<String>,

    /// Extra arguments appended verbatim to a single `--step`'s command.
    #[clap(long)]
    pub extra: Option<String>,

    /// Print every command that would run; execute nothing.
    #[clap(long)]
    pub dry_run: bool,

    /// Force a re-download of any URL-valued inputs.
    #[clap(long)]
    pub force_download: bool,

    /// Use bounded-parallel scheduling (defaults to `execution.parallel` in
    /// the YAML when not given).
    #[clap(long)]
    pub parallel: bool,

    /// Override `execution.max_workers`.
    #[clap(long)]
    pub max_workers: Option<usize>,
}

pub async fn run(args: RunArgs) -> Result<i32> {
    if !args.pipeline.exists() {
        return Err(miette::Report::new(RunnerError::PipelineNotFound { path: args.pipeline.clone() }));
    }
    if args.extra.is_some() && args.step.len() != 1 {
        return Err(miette::miette!("--extra requires exactly one --step"));
    }

    let mut pipeline = Pipeline::from_file(&args.pipeline).map_err(|e| miette::Report::new(e))?;

    let parameter_overrides = overrides::parse_parameter_overrides(&args.set).map_err(miette::Report::new)?;
    pipeline.override_parameters(parameter_overrides);
    let data_overrides = overrides::parse_data_overrides(&args.var).map_err(miette::Report::new)?;
    pipeline.override_data(data_overrides).map_err(miette::Report::new)?;

    if let Some(extra) = &args.extra {
        let name = &args.step[0];
        if let Some(step) = pipeline.steps.iter_mut().find(|s| &s.name == name) {
            step.extra_args = Some(extra.clone());
        } else {
            return Err(miette::Report::new(RunnerError::StepNotFound { name: name.clone() }));
        }
    }

    let steps = if args.step.is_empty() { None } else { Some(args.step.as_slice()) };
    let selected = get_steps_to_run(&pipeline, steps, args.from.as_deref(), &args.include);

    let cache = UrlCache::new(&pipeline.base_dir);
    let parallel = args.parallel || pipeline.execution.parallel;
    let max_workers = args.max_workers.unwrap_or(pipeline.execution.max_workers);

    let outcome = if parallel {
        crate::batch::run_parallel(&pipeline, selected, max_workers, &cache, args.dry_run, args.force_download)
            .await
            .map_err(miette::Report::new)?
    } else {
        crate::batch::run_sequential(&pipeline, selected, &cache, args.dry_run, args.force_download)
            .await
            .map_err(miette::Report::new)?
    };

    if outcome.total == 0 {
        println!("{}", "no steps selected".dimmed());
        return Ok(0);
    }

    Ok(if outcome.succeeded == outcome.total { 0 } else { 1 })
}
