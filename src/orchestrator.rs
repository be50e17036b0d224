// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! The scheduler (§4.4): a pure DAG coroutine expressed as an explicit state
//! machine rather than `async fn` + yield points. It never spawns processes,
//! reads files, or calls out-of-band — the two executors (§4.5, §4.6) own
//! all of that and merely drive this struct turn by turn.

use std::collections::{HashMap, HashSet};

use crate::config::{Pipeline, Step};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Dependencies satisfied; the driver may start this step.
    Ready { name: String },
    /// At least one dependency failed or was itself skipped.
    Skipped { name: String, failed_deps: Vec<String> },
    /// Parallel mode only: something is in flight; report a result before more `Ready`s come.
    Waiting,
    /// Terminal: no further events.
    Complete,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: String,
    pub success: bool,
}

/// Which selected steps a given step depends on, restricted to the
/// selected set (edges leaving it are discarded) — distinct from
/// [`Pipeline::get_step_dependencies`], which searches the whole pipeline.
fn build_dependency_graph(pipeline: &Pipeline, selected: &[String]) -> HashMap<String, Vec<String>> {
    let selected_set: HashSet<&str> = selected.iter().map(String::as_str).collect();
    let mut graph = HashMap::new();

    for name in selected {
        let step = pipeline.get_step(name).expect("selected name must exist in pipeline");
        let deps: Vec<String> = step
            .referenced_inputs()
            .filter_map(|data_name| pipeline.producers.get(data_name))
            .filter(|producer| selected_set.contains(producer.as_str()))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        graph.insert(name.clone(), deps);
    }

    graph
}

/// Selection (§4.4 `get_steps_to_run`): explicit `steps` bypasses the
/// `disabled`/`optional` filters entirely; otherwise walk from the start (or
/// `from_step`), dropping disabled steps and optional steps not named in
/// `include_optional`.
pub fn get_steps_to_run(
    pipeline: &Pipeline,
    steps: Option<&[String]>,
    from_step: Option<&str>,
    include_optional: &[String],
) -> Vec<String> {
    if let Some(names) = steps {
        return names.to_vec();
    }

    let start_idx = match from_step {
        Some(name) => pipeline.steps.iter().position(|s| s.name == name).unwrap_or(0),
        None => 0,
    };

    let include: HashSet<&str> = include_optional.iter().map(String::as_str).collect();

    pipeline.steps[start_idx..]
        .iter()
        .filter(|s| !s.disabled)
        .filter(|s| !s.optional || include.contains(s.name.as_str()))
        .map(|s| s.name.clone())
        .collect()
}

enum Mode {
    Sequential { cursor: usize },
    Parallel { max_workers: usize },
}

/// The explicit state machine (§4.4 "Implementation shape"). `advance` is
/// called with `None` to get the first event, then `Some(result)` each time a
/// `Ready` event's child finishes, until `Event::Complete`.
pub struct Orchestrator {
    selected: Vec<String>,
    dependency_graph: HashMap<String, Vec<String>>,
    mode: Mode,
    pending: Vec<String>,
    running: HashSet<String>,
    results: HashMap<String, bool>,
    /// Steps released as `Ready` this `advance` pass but not yet reported, so
    /// a subsequent call without an intervening result doesn't re-release them.
    awaiting_release: Vec<String>,
}

impl Orchestrator {
    pub fn sequential(pipeline: &Pipeline, selected: Vec<String>) -> Self {
        let dependency_graph = build_dependency_graph(pipeline, &selected);
        Self {
            pending: selected.clone(),
            selected,
            dependency_graph,
            mode: Mode::Sequential { cursor: 0 },
            running: HashSet::new(),
            results: HashMap::new(),
            awaiting_release: Vec::new(),
        }
    }

    pub fn parallel(pipeline: &Pipeline, selected: Vec<String>, max_workers: usize) -> Self {
        let dependency_graph = build_dependency_graph(pipeline, &selected);
        Self {
            pending: selected.clone(),
            selected,
            dependency_graph,
            mode: Mode::Parallel { max_workers: max_workers.max(1) },
            running: HashSet::new(),
            results: HashMap::new(),
            awaiting_release: Vec::new(),
        }
    }

    fn deps_of(&self, name: &str) -> &[String] {
        self.dependency_graph.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn failed_deps(&self, name: &str) -> Vec<String> {
        self.deps_of(name)
            .iter()
            .filter(|d| self.results.get(*d) == Some(&false))
            .cloned()
            .collect()
    }

    fn deps_satisfied(&self, name: &str) -> bool {
        self.deps_of(name).iter().all(|d| self.results.get(d) == Some(&true))
    }

    pub fn advance(&mut self, result: Option<StepResult>) -> Event {
        if let Some(r) = result {
            self.running.remove(&r.name);
            self.results.insert(r.name, r.success);
        }

        match self.mode {
            Mode::Sequential { .. } => self.advance_sequential(),
            Mode::Parallel { max_workers } => self.advance_parallel(max_workers),
        }
    }

    fn advance_sequential(&mut self) -> Event {
        let Mode::Sequential { ref mut cursor } = self.mode else { unreachable!() };

        while *cursor < self.selected.len() {
            let name = self.selected[*cursor].clone();
            *cursor += 1;

            let failed = self.failed_deps(&name);
            if !failed.is_empty() {
                self.results.insert(name.clone(), false);
                return Event::Skipped { name, failed_deps: failed };
            }

            return Event::Ready { name };
        }

        Event::Complete
    }

    fn advance_parallel(&mut self, max_workers: usize) -> Event {
        loop {
            if let Some(name) = self.awaiting_release.pop() {
                self.running.insert(name.clone());
                return Event::Ready { name };
            }

            if self.pending.is_empty() && self.running.is_empty() {
                return Event::Complete;
            }

            // Pull out anything whose dependencies have resolved (success or
            // failure) before deciding what's actually runnable.
            let mut still_pending = Vec::new();
            for name in self.pending.drain(..).collect::<Vec<_>>() {
                let failed = self.failed_deps(&name);
                if !failed.is_empty() {
                    self.results.insert(name.clone(), false);
                    self.pending = still_pending;
                    return Event::Skipped { name, failed_deps: failed };
                }
                if self.deps_satisfied(&name) {
                    self.awaiting_release.push(name);
                } else {
                    still_pending.push(name);
                }
            }
            self.pending = still_pending;

            let slots = max_workers.saturating_sub(self.running.len());
            self.awaiting_release.truncate(slots);

            if !self.awaiting_release.is_empty() {
                continue;
            }

            if self.running.is_empty() {
                // Nothing ready, nothing in flight, but pending remains: every
                // remaining step's dependency set can never resolve (cross-edges
                // into a step outside the selection that never reports, or a
                // true cycle already rejected at load time). Surface it directly
                // rather than looping forever.
                if let Some(name) = self.pending.first().cloned() {
                    self.pending.retain(|n| n != &name);
                    self.results.insert(name.clone(), false);
                    return Event::Skipped { name, failed_deps: Vec::new() };
                }
                return Event::Complete;
            }

            return Event::Waiting;
        }
    }
}

/// Convenience: resolve an [`Event::Ready`]'s step name back to its [`Step`].
pub fn step_for<'a>(pipeline: &'a Pipeline, event: &Event) -> Option<&'a Step> {
    match event {
        Event::Ready { name } => pipeline.get_step(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn chain_pipeline() -> Pipeline {
        let yaml = r#"
data:
  a: { type: csv, path: "a.csv" }
  b: { type: csv, path: "b.csv" }
  c: { type: csv, path: "c.csv" }
pipeline:
  - name: A
    task: "./gen_a.py"
    outputs: { "-o": $a }
  - name: B
    task: "./gen_b.py"
    inputs: { "-i": $a }
    outputs: { "-o": $b }
  - name: C
    task: "./gen_c.py"
    inputs: { "-i": $b }
    outputs: { "-o": $c }
"#;
        Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap()
    }

    #[test]
    fn sequential_runs_in_pipeline_order() {
        let pipeline = chain_pipeline();
        let selected = get_steps_to_run(&pipeline, None, None, &[]);
        let mut orchestrator = Orchestrator::sequential(&pipeline, selected);

        let mut order = Vec::new();
        let mut event = orchestrator.advance(None);
        loop {
            match event {
                Event::Ready { name } => {
                    order.push(name.clone());
                    event = orchestrator.advance(Some(StepResult { name, success: true }));
                }
                Event::Complete => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }

        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn sequential_skips_downstream_of_a_failure() {
        let pipeline = chain_pipeline();
        let selected = get_steps_to_run(&pipeline, None, None, &[]);
        let mut orchestrator = Orchestrator::sequential(&pipeline, selected);

        let event = orchestrator.advance(None);
        assert_eq!(event, Event::Ready { name: "A".to_string() });
        let event = orchestrator.advance(Some(StepResult { name: "A".to_string(), success: false }));
        assert_eq!(event, Event::Skipped { name: "B".to_string(), failed_deps: vec!["A".to_string()] });
        let event = orchestrator.advance(None);
        assert_eq!(event, Event::Skipped { name: "C".to_string(), failed_deps: vec!["B".to_string()] });
        let event = orchestrator.advance(None);
        assert_eq!(event, Event::Complete);
    }

    #[test]
    fn parallel_releases_independent_roots_together() {
        let yaml = r#"
data:
  a: { type: csv, path: "a.csv" }
  b: { type: csv, path: "b.csv" }
  c: { type: csv, path: "c.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    outputs: { "-o": $a }
  - name: B
    task: "./gen.py"
    outputs: { "-o": $b }
  - name: C
    task: "./gen.py"
    inputs: { "-i": $a, "-j": $b }
    outputs: { "-o": $c }
"#;
        let pipeline = Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap();
        let selected = get_steps_to_run(&pipeline, None, None, &[]);
        let mut orchestrator = Orchestrator::parallel(&pipeline, selected, 2);

        let first = orchestrator.advance(None);
        let second = orchestrator.advance(None);
        let mut ready_now: Vec<String> = [&first, &second]
            .iter()
            .filter_map(|e| match e {
                Event::Ready { name } => Some(name.clone()),
                _ => None,
            })
            .collect();
        ready_now.sort();
        assert_eq!(ready_now, vec!["A".to_string(), "B".to_string()]);

        let waiting = orchestrator.advance(None);
        assert_eq!(waiting, Event::Waiting);

        let event = orchestrator.advance(Some(StepResult { name: "A".to_string(), success: true }));
        assert_eq!(event, Event::Waiting);
        let event = orchestrator.advance(Some(StepResult { name: "B".to_string(), success: true }));
        assert_eq!(event, Event::Ready { name: "C".to_string() });
        let event = orchestrator.advance(Some(StepResult { name: "C".to_string(), success: true }));
        assert_eq!(event, Event::Complete);
    }

    #[test]
    fn explicit_steps_selection_bypasses_disabled_and_optional_filters() {
        let yaml = r#"
data:
  a: { type: csv, path: "a.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    outputs: { "-o": $a }
    disabled: true
"#;
        let pipeline = Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap();
        let selected = get_steps_to_run(&pipeline, Some(&["A".to_string()]), None, &[]);
        assert_eq!(selected, vec!["A".to_string()]);

        let default_selected = get_steps_to_run(&pipeline, None, None, &[]);
        assert!(default_selected.is_empty());
    }
}
