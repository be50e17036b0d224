// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! Terminal executor (§4.6): the streamed backend. Same command
//! construction as [`crate::batch`], but each child's standard streams are
//! attached to a freshly allocated pseudo-terminal so interactive progress
//! bars and ANSI colour survive end-to-end, and the driver talks to a
//! bidirectional byte channel (§6.3) instead of the local console.
//!
//! The channel itself is a small trait ([`TerminalChannel`]); binding it to
//! an actual network socket is the HTTP endpoint layer named out of scope in
//! §1. This module ships the trait, the three mode drivers, and an
//! in-memory implementation ([`InMemoryChannel`]) for integration testing.

use std::collections::HashMap;
use std::sync::Arc;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use pty_process::{Pty, Size};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Mutex};

use crate::analysis;
use crate::config::Pipeline;
use crate::errors::{RunnerError, RunnerResult};
use crate::orchestrator::{Event, Orchestrator, StepResult};
use crate::url_cache::UrlCache;

/// Opening frame sent by the client to select an operating mode (§6.3).
#[derive(Debug, Clone, Deserialize)]
pub struct OpenFrame {
    pub mode: OpenMode,
    #[serde(default)]
    pub step_name: Option<String>,
    #[serde(default)]
    pub step_names: Option<Vec<String>>,
    #[serde(default)]
    pub data_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    Step,
    FromStep,
    ToData,
    All,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
struct StepStatusFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    step: &'a str,
    status: StepStatus,
}

/// A server→client frame. Binary frames carry raw PTY bytes (optionally
/// `[OUTPUT:<step>]`-prefixed in parallel mode); text frames carry the
/// human-readable banners and the structured `step_status` JSON line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Binary(Vec<u8>),
    Text(String),
}

/// The frame-level transport contract (§4.6 "Transport boundary"). Binding
/// this to a websocket or similar is deliberately outside this crate.
#[async_trait::async_trait]
pub trait TerminalChannel: Send {
    async fn send(&mut self, frame: ServerFrame) -> RunnerResult<()>;
    /// `None` signals the client disconnected — equivalent to an implicit
    /// cancel (§4.6 "Client disconnect").
    async fn recv_control(&mut self) -> Option<String>;
}

async fn send_text(channel: &mut dyn TerminalChannel, text: impl Into<String>) -> RunnerResult<()> {
    channel.send(ServerFrame::Text(text.into())).await
}

async fn send_status(channel: &mut dyn TerminalChannel, step: &str, status: StepStatus) -> RunnerResult<()> {
    let frame = StepStatusFrame { kind: "step_status", step, status };
    let json = serde_json::to_string(&frame).expect("StepStatusFrame always serializes");
    send_text(channel, json).await
}

/// In-memory channel for tests: control frames are fed in via `client_tx`,
/// and outgoing frames accumulate for inspection via `outgoing`.
pub struct InMemoryChannel {
    pub outgoing: Vec<ServerFrame>,
    control_rx: mpsc::UnboundedReceiver<String>,
}

pub struct InMemoryClient {
    control_tx: mpsc::UnboundedSender<String>,
}

impl InMemoryClient {
    pub fn cancel(&self) {
        let _ = self.control_tx.send("__CANCEL__".to_string());
    }

    pub fn cancel_step(&self, name: &str) {
        let _ = self.control_tx.send(format!("__CANCEL__:{name}"));
    }
}

impl InMemoryChannel {
    pub fn new() -> (Self, InMemoryClient) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        (Self { outgoing: Vec::new(), control_rx }, InMemoryClient { control_tx })
    }
}

#[async_trait::async_trait]
impl TerminalChannel for InMemoryChannel {
    async fn send(&mut self, frame: ServerFrame) -> RunnerResult<()> {
        self.outgoing.push(frame);
        Ok(())
    }

    async fn recv_control(&mut self) -> Option<String> {
        self.control_rx.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunningStatus {
    Running,
}

struct RunningStep {
    pid: i32,
    #[allow(dead_code)]
    status: RunningStatus,
}

/// Process-wide `running_steps` registry (§4.6 "Session state"). A single
/// mutable map is a deliberate global: the runtime binds at most one
/// pipeline per process, so a per-accept-path registry would add nothing.
#[derive(Clone, Default)]
pub struct RunningSteps(Arc<Mutex<HashMap<String, RunningStep>>>);

impl RunningSteps {
    pub fn new() -> Self {
        Self::default()
    }

    async fn try_register(&self, name: &str, pid: i32) -> bool {
        let mut guard = self.0.lock().await;
        if guard.contains_key(name) {
            return false;
        }
        guard.insert(name.to_string(), RunningStep { pid, status: RunningStatus::Running });
        true
    }

    async fn deregister(&self, name: &str) {
        self.0.lock().await.remove(name);
    }

    async fn pid_of(&self, name: &str) -> Option<i32> {
        self.0.lock().await.get(name).map(|s| s.pid)
    }
}

/// Spawn `program args` with its stdio attached to a fresh PTY, in its own
/// session so a process-group `SIGTERM` reaches any grandchildren too (§9
/// "Process-group cancellation"). Returns the PTY master (for streaming) and
/// the child handle (for waiting/killing).
async fn spawn_in_pty(
    program: &str,
    args: &[String],
) -> RunnerResult<(Pty, pty_process::Child)> {
    fn spawn_failed(program: &str, err: impl std::fmt::Display) -> RunnerError {
        RunnerError::SpawnFailed {
            step: program.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
        }
    }

    let mut pty = Pty::new().map_err(|e| spawn_failed(program, e))?;
    pty.resize(Size::new(24, 80)).map_err(|e| spawn_failed(program, e))?;
    let pts = pty.pts().map_err(|e| spawn_failed(program, e))?;

    let mut command = pty_process::Command::new(program);
    command.args(args);

    let child = command.spawn(&pts).map_err(|e| spawn_failed(program, e))?;

    Ok((pty, child))
}

fn terminate_process_group(pid: i32) {
    let _ = kill(Pid::from_raw(-pid), Signal::SIGTERM);
}

/// Stream `pty`'s output to `channel` (as binary frames, prefixed per
/// `output_prefix` when set) while concurrently watching both the child's
/// exit and cancellation frames addressed to `step_name`. Returns whether
/// the step should be recorded as successful.
async fn pump_pty(
    mut pty: Pty,
    mut child: pty_process::Child,
    channel: &mut dyn TerminalChannel,
    step_name: &str,
    output_prefix: Option<&str>,
    running: &RunningSteps,
) -> bool {
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            read = pty.read(&mut buf) => {
                match read {
                    Ok(0) => {}
                    Ok(n) => {
                        let mut framed = Vec::new();
                        if let Some(prefix) = output_prefix {
                            framed.extend_from_slice(format!("[OUTPUT:{prefix}]").as_bytes());
                        }
                        framed.extend_from_slice(&buf[..n]);
                        let _ = channel.send(ServerFrame::Binary(framed)).await;
                        continue;
                    }
                    Err(_) => {}
                }
            }
            status = child.wait() => {
                let success = status.map(|s| s.success()).unwrap_or(false);
                running.deregister(step_name).await;
                return success;
            }
            control = channel.recv_control() => {
                match control {
                    Some(frame) if is_cancel_for(&frame, step_name) => {
                        if let Some(pid) = running.pid_of(step_name).await {
                            terminate_process_group(pid);
                        }
                        let _ = child.wait().await;
                        running.deregister(step_name).await;
                        return false;
                    }
                    Some(_) => continue,
                    None => {
                        // Client disconnected: implicit cancel (§4.6).
                        if let Some(pid) = running.pid_of(step_name).await {
                            terminate_process_group(pid);
                        }
                        let _ = child.wait().await;
                        running.deregister(step_name).await;
                        return false;
                    }
                }
            }
        }
    }
}

fn is_cancel_for(frame: &str, step_name: &str) -> bool {
    frame == "__CANCEL__" || frame == format!("__CANCEL__:{step_name}")
}

/// Independent single-step mode (§4.6): rejects the request if `step_name`
/// is already running globally, otherwise spawns it and streams until done.
pub async fn run_independent_step(
    pipeline: &Pipeline,
    step_name: &str,
    cache: &UrlCache,
    running: &RunningSteps,
    channel: &mut dyn TerminalChannel,
) -> RunnerResult<()> {
    let step = pipeline
        .get_step(step_name)
        .ok_or_else(|| RunnerError::StepNotFound { name: step_name.to_string() })?;

    let command = crate::batch::build_command(pipeline, step, cache, false, false).await?;

    let (pty, mut child) = spawn_in_pty(&command.program, &command.args).await?;
    let pid = child.id().map(|id| id as i32).unwrap_or(-1);

    if !running.try_register(step_name, pid).await {
        send_text(channel, "[ERROR] step already running").await?;
        let _ = child.kill().await;
        return Ok(());
    }

    send_status(channel, step_name, StepStatus::Running).await?;
    send_text(channel, "[RUNNING] ".to_string() + step_name).await?;

    let success = pump_pty(pty, child, channel, step_name, None, running).await;

    let status = if success { StepStatus::Completed } else { StepStatus::Failed };
    send_status(channel, step_name, status).await?;
    send_text(channel, format!("[{}] {step_name}", if success { "SUCCESS" } else { "FAILED" })).await?;
    send_text(channel, "[COMPLETED]").await?;
    Ok(())
}

enum TaskMsg {
    Output { step: String, bytes: Vec<u8> },
    Done { step: String, success: bool },
}

/// Per-step pump task for parallel mode: reads its own PTY and forwards
/// frames over `tx` rather than holding the shared channel directly, since
/// the channel is driven from one place (`run_parallel_set`'s own loop) to
/// keep frame ordering and cancellation dispatch simple.
async fn pump_task(name: String, mut pty: Pty, mut child: pty_process::Child, tx: mpsc::UnboundedSender<TaskMsg>) {
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            read = pty.read(&mut buf) => {
                match read {
                    Ok(0) => {}
                    Ok(n) => {
                        let _ = tx.send(TaskMsg::Output { step: name.clone(), bytes: buf[..n].to_vec() });
                        continue;
                    }
                    Err(_) => {}
                }
            }
            status = child.wait() => {
                let success = status.map(|s| s.success()).unwrap_or(false);
                let _ = tx.send(TaskMsg::Done { step: name.clone(), success });
                return;
            }
        }
    }
}

/// Ad-hoc parallel set (§4.6): pre-validates that no two named steps share
/// an output (§4.7 conflict check), then runs each concurrently in its own
/// PTY with per-step output tagging. A bare `__CANCEL__` tears down every
/// step in the set; `__CANCEL__:<name>` targets one.
pub async fn run_parallel_set(
    pipeline: &Pipeline,
    step_names: &[String],
    cache: &UrlCache,
    running: &RunningSteps,
    channel: &mut dyn TerminalChannel,
) -> RunnerResult<()> {
    let (ok, diagnostic) = analysis::validate_parallel_execution(pipeline, step_names);
    if !ok {
        send_text(channel, format!("[ERROR] {}", diagnostic.unwrap_or_default())).await?;
        return Ok(());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut pending = 0usize;

    for name in step_names {
        let step = pipeline
            .get_step(name)
            .ok_or_else(|| RunnerError::StepNotFound { name: name.clone() })?
            .clone();
        let command = crate::batch::build_command(pipeline, &step, cache, false, false).await?;
        let (pty, child) = spawn_in_pty(&command.program, &command.args).await?;
        let pid = child.id().map(|id| id as i32).unwrap_or(-1);

        if !running.try_register(name, pid).await {
            send_text(channel, format!("[ERROR] step '{name}' already running")).await?;
            continue;
        }
        send_status(channel, name, StepStatus::Running).await?;
        send_text(channel, format!("[RUNNING] {name}")).await?;

        pending += 1;
        tokio::spawn(pump_task(name.clone(), pty, child, tx.clone()));
    }
    drop(tx);

    while pending > 0 {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(TaskMsg::Output { step, bytes }) => {
                        let mut framed = format!("[OUTPUT:{step}]").into_bytes();
                        framed.extend_from_slice(&bytes);
                        channel.send(ServerFrame::Binary(framed)).await?;
                    }
                    Some(TaskMsg::Done { step, success }) => {
                        running.deregister(&step).await;
                        let status = if success { StepStatus::Completed } else { StepStatus::Failed };
                        send_status(channel, &step, status).await?;
                        send_text(channel, format!("[{}] {step}", if success { "SUCCESS" } else { "FAILED" })).await?;
                        pending -= 1;
                    }
                    None => break,
                }
            }
            control = channel.recv_control() => {
                match control {
                    Some(frame) if frame == "__CANCEL__" => {
                        for name in step_names {
                            if let Some(pid) = running.pid_of(name).await {
                                terminate_process_group(pid);
                            }
                        }
                    }
                    Some(frame) => {
                        if let Some(target) = frame.strip_prefix("__CANCEL__:") {
                            if let Some(pid) = running.pid_of(target).await {
                                terminate_process_group(pid);
                            }
                        }
                    }
                    None => {
                        for name in step_names {
                            if let Some(pid) = running.pid_of(name).await {
                                terminate_process_group(pid);
                            }
                        }
                    }
                }
            }
        }
    }

    send_text(channel, "[COMPLETED]").await?;
    Ok(())
}

/// What an opening frame resolves to, before a driver runs it (§6.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// `mode: "step"` — a single independent step.
    Step(String),
    /// `mode: "parallel"` — a named, pre-validated set run concurrently.
    Parallel(Vec<String>),
    /// `mode: "from_step" | "to_data" | "all"` — an ordered, dependency-driven run.
    Sequential(Vec<String>),
}

/// Mode→selection resolution (§6.3): `step` and `parallel` carry their
/// selection directly in `step_name`/`step_names`; `from_step` and `to_data`
/// derive one via the §4.7 ancestor queries (`steps_up_to`,
/// `steps_to_produce`); `all` is the full `get_steps_to_run` selection.
pub fn resolve_selection(pipeline: &Pipeline, frame: &OpenFrame) -> RunnerResult<Selection> {
    match frame.mode {
        OpenMode::Step => {
            let name = frame.step_name.clone().ok_or_else(|| RunnerError::MalformedOpenFrame {
                reason: "mode \"step\" requires step_name".to_string(),
            })?;
            Ok(Selection::Step(name))
        }
        OpenMode::Parallel => {
            let names = frame.step_names.clone().ok_or_else(|| RunnerError::MalformedOpenFrame {
                reason: "mode \"parallel\" requires step_names".to_string(),
            })?;
            Ok(Selection::Parallel(names))
        }
        OpenMode::FromStep => {
            let name = frame.step_name.clone().ok_or_else(|| RunnerError::MalformedOpenFrame {
                reason: "mode \"from_step\" requires step_name".to_string(),
            })?;
            Ok(Selection::Sequential(analysis::steps_up_to(pipeline, &name)?))
        }
        OpenMode::ToData => {
            let data_name = frame.data_name.clone().ok_or_else(|| RunnerError::MalformedOpenFrame {
                reason: "mode \"to_data\" requires data_name".to_string(),
            })?;
            Ok(Selection::Sequential(analysis::steps_to_produce(pipeline, &data_name, false)?))
        }
        OpenMode::All => {
            Ok(Selection::Sequential(crate::orchestrator::get_steps_to_run(pipeline, None, None, &[])))
        }
    }
}

/// Mode dispatch (§6.3): resolve `frame` to a [`Selection`] and hand it to
/// the matching driver (`run_independent_step`, `run_parallel_set`, or
/// `run_sequential`).
pub async fn dispatch_open_frame(
    pipeline: &Pipeline,
    frame: &OpenFrame,
    cache: &UrlCache,
    running: &RunningSteps,
    channel: &mut dyn TerminalChannel,
) -> RunnerResult<()> {
    match resolve_selection(pipeline, frame)? {
        Selection::Step(name) => run_independent_step(pipeline, &name, cache, running, channel).await,
        Selection::Parallel(names) => run_parallel_set(pipeline, &names, cache, running, channel).await,
        Selection::Sequential(selected) => run_sequential(pipeline, selected, cache, running, channel).await,
    }
}

/// Dependency-driven sequential mode (§4.6): one child at a time over the
/// channel, driven by the same [`Orchestrator`] as the batch executor.
pub async fn run_sequential(
    pipeline: &Pipeline,
    selected: Vec<String>,
    cache: &UrlCache,
    running: &RunningSteps,
    channel: &mut dyn TerminalChannel,
) -> RunnerResult<()> {
    let mut orchestrator = Orchestrator::sequential(pipeline, selected);
    let mut next_result = None;

    loop {
        match orchestrator.advance(next_result.take()) {
            Event::Ready { name } => {
                let step = pipeline.get_step(&name).expect("orchestrator only names selected steps");
                let command = crate::batch::build_command(pipeline, step, cache, false, false).await;
                let command = match command {
                    Ok(c) => c,
                    Err(_) => {
                        send_status(channel, &name, StepStatus::Failed).await?;
                        send_text(channel, format!("[FAILED] {name}")).await?;
                        next_result = Some(StepResult { name, success: false });
                        continue;
                    }
                };

                send_status(channel, &name, StepStatus::Running).await?;
                send_text(channel, format!("[RUNNING] {name}")).await?;

                let (pty, child) = spawn_in_pty(&command.program, &command.args).await?;
                let pid = child.id().map(|id| id as i32).unwrap_or(-1);
                running.try_register(&name, pid).await;
                let success = pump_pty(pty, child, channel, &name, None, running).await;

                let status = if success { StepStatus::Completed } else { StepStatus::Failed };
                send_status(channel, &name, status).await?;
                send_text(channel, format!("[{}] {name}", if success { "SUCCESS" } else { "FAILED" })).await?;
                next_result = Some(StepResult { name, success });
            }
            Event::Skipped { name, .. } => {
                send_text(channel, format!("[SKIPPED] {name}")).await?;
                next_result = None;
            }
            Event::Waiting => unreachable!("sequential mode never waits"),
            Event::Complete => break,
        }
    }

    send_text(channel, "[COMPLETED]").await?;
    Ok(())
}
