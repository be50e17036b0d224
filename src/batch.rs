// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! Batch executor (§4.5): drives the [`crate::orchestrator::Orchestrator`]
//! in process, running each ready step as a child process with either
//! inherited stdio (sequential) or captured, print-locked stdio (parallel).

use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::config::{ArgValue, Pipeline, Scalar, Step};
use crate::errors::{RunnerError, RunnerResult};
use crate::orchestrator::{Event, Orchestrator, StepResult};
use crate::resolver;
use crate::url_cache::UrlCache;

/// A fully resolved, ready-to-spawn command (§4.5.1 `build_command`).
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BuiltCommand {
    pub fn display(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build the child command for `step`. Every path in the result is absolute
/// (§8 "Path absoluteness"); calling this twice for the same inputs yields an
/// identical vector (§8 "Reference determinism").
///
/// The task-file existence check is skipped when `dry_run` is set: a dry run
/// only prints the command it would have run and always reports success
/// (§6.2, §8 scenario 1), so a not-yet-built task script must not fail it.
pub async fn build_command(
    pipeline: &Pipeline,
    step: &Step,
    cache: &UrlCache,
    force: bool,
    dry_run: bool,
) -> RunnerResult<BuiltCommand> {
    let task_path = crate::config::absolutize(&pipeline.base_dir, &step.task);
    if !dry_run && !task_path.exists() {
        return Err(RunnerError::PipelineReadError {
            path: task_path,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "task file not found"),
        });
    }

    let (program, mut args) = match &step.interpreter {
        Some(interpreter) => (interpreter.clone(), vec![task_path.to_string_lossy().into_owned()]),
        None => (task_path.to_string_lossy().into_owned(), Vec::new()),
    };

    for data_name in step.inputs.values() {
        let path = resolver::resolve_path_for_execution(pipeline, data_name, cache, force).await?;
        args.push(path.to_string_lossy().into_owned());
    }

    for (flag, data_name) in &step.outputs {
        let node = pipeline
            .data
            .get(data_name)
            .ok_or_else(|| RunnerError::UnknownReference { name: data_name.clone() })?;
        let path = node.resolved_path(&pipeline.base_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        args.push(flag.clone());
        args.push(path.to_string_lossy().into_owned());
    }

    for (flag, value) in &step.args {
        let scalar = match value {
            ArgValue::Literal(s) => s.clone(),
            ArgValue::Ref(name) => resolver::resolve_ref(pipeline, name)?,
        };
        match scalar {
            Scalar::Bool(true) => args.push(flag.clone()),
            Scalar::Bool(false) => {}
            other => {
                args.push(flag.clone());
                args.push(other.as_cli_string());
            }
        }
    }

    if let Some(extra) = &step.extra_args {
        args.extend(extra.split_whitespace().map(str::to_string));
    }

    Ok(BuiltCommand { program, args })
}

fn banner(kind: &str, name: &str) {
    println!("[{kind}] {name}");
}

pub struct RunOutcome {
    pub succeeded: usize,
    pub total: usize,
}

/// Run `pipeline` sequentially, printing a banner per event (§4.5.5).
pub async fn run_sequential(
    pipeline: &Pipeline,
    selected: Vec<String>,
    cache: &UrlCache,
    dry_run: bool,
    force_download: bool,
) -> RunnerResult<RunOutcome> {
    let total = selected.len();
    let mut succeeded = 0;
    let mut orchestrator = Orchestrator::sequential(pipeline, selected);
    let mut next_result = None;

    loop {
        match orchestrator.advance(next_result.take()) {
            Event::Ready { name } => {
                let step = pipeline.get_step(&name).expect("orchestrator only names selected steps");
                banner("RUNNING", &name);

                let command = build_command(pipeline, step, cache, force_download, dry_run).await;
                let success = match command {
                    Ok(command) if dry_run => {
                        println!("{}", command.display());
                        true
                    }
                    Ok(command) => run_inherited(&command).await,
                    Err(_) => false,
                };

                if success {
                    succeeded += 1;
                    banner("SUCCESS", &name);
                } else {
                    banner("FAILED", &name);
                }
                next_result = Some(StepResult { name, success });
            }
            Event::Skipped { name, .. } => {
                banner("SKIPPED", &name);
                next_result = None;
            }
            Event::Waiting => unreachable!("sequential mode never waits"),
            Event::Complete => break,
        }
    }

    println!("{succeeded}/{total} steps succeeded");
    Ok(RunOutcome { succeeded, total })
}

async fn run_inherited(command: &BuiltCommand) -> bool {
    Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

async fn run_captured(command: &BuiltCommand, name: &str, print_lock: &Arc<tokio::sync::Mutex<()>>) -> bool {
    let output = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .output()
        .await;

    let (success, bytes) = match output {
        Ok(out) => (out.status.success(), [out.stdout, out.stderr].concat()),
        Err(_) => (false, Vec::new()),
    };

    let guard = print_lock.lock().await;
    for line in String::from_utf8_lossy(&bytes).lines() {
        println!("[{name}] {line}");
    }
    drop(guard);

    success
}

/// Run `pipeline` with a bounded worker pool (§4.5.3). Each command is
/// resolved eagerly (while the orchestrator still holds the `ready` event,
/// with `&Pipeline` in scope) and only the resolved [`BuiltCommand`] crosses
/// into the spawned task; output is captured and printed as a whole
/// step-tagged chunk under a shared lock to avoid interleaving.
pub async fn run_parallel(
    pipeline: &Pipeline,
    selected: Vec<String>,
    max_workers: usize,
    cache: &UrlCache,
    dry_run: bool,
    force_download: bool,
) -> RunnerResult<RunOutcome> {
    let total = selected.len();
    let mut succeeded = 0;
    let mut orchestrator = Orchestrator::parallel(pipeline, selected, max_workers);
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let print_lock = Arc::new(tokio::sync::Mutex::new(()));

    let mut in_flight: tokio::task::JoinSet<StepResult> = tokio::task::JoinSet::new();
    let mut next_result = None;

    loop {
        match orchestrator.advance(next_result.take()) {
            Event::Ready { name } => {
                banner("RUNNING", &name);
                let step = pipeline.get_step(&name).expect("orchestrator only names selected steps");
                let command = build_command(pipeline, step, cache, force_download, dry_run).await;

                let command = match command {
                    Ok(c) => c,
                    Err(_) => {
                        banner("FAILED", &name);
                        next_result = Some(StepResult { name, success: false });
                        continue;
                    }
                };

                if dry_run {
                    let guard = print_lock.lock().await;
                    println!("[{name}] {}", command.display());
                    drop(guard);
                    banner("SUCCESS", &name);
                    next_result = Some(StepResult { name, success: true });
                    continue;
                }

                let permit = semaphore.clone();
                let print_lock = print_lock.clone();
                in_flight.spawn(async move {
                    let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                    let success = run_captured(&command, &name, &print_lock).await;
                    StepResult { name, success }
                });
                next_result = None;
            }
            Event::Skipped { name, .. } => {
                banner("SKIPPED", &name);
                next_result = None;
            }
            Event::Waiting => {
                let finished = in_flight.join_next().await.expect("waiting implies a task is in flight");
                let result = finished.expect("step task does not panic");
                if result.success {
                    succeeded += 1;
                    banner("SUCCESS", &result.name);
                } else {
                    banner("FAILED", &result.name);
                }
                next_result = Some(result);
            }
            Event::Complete => break,
        }
    }

    println!("{succeeded}/{total} steps succeeded");
    Ok(RunOutcome { succeeded, total })
}
