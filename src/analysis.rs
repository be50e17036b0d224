// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! Data analyses derived from the post-expansion DAG (§4.7): the parallel
//! output-conflict check, the two reverse-BFS ancestor queries, freshness
//! classification, and the clean operation. None of these run child
//! processes — they only reason about paths, producers, and mtimes.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::time::SystemTime;

use crate::config::Pipeline;
use crate::errors::{RunnerError, RunnerResult};

/// Parallel-conflict check (§4.7): no two of `names` may list the same
/// data-node reference as an output. Symmetric in its two halves by
/// construction — it only ever looks at shared membership (§8 "Parallel
/// conflict symmetry").
pub fn validate_parallel_execution(pipeline: &Pipeline, names: &[String]) -> (bool, Option<String>) {
    let mut claimed: std::collections::HashMap<&str, &str> = std::collections::HashMap::new();

    for name in names {
        let Some(step) = pipeline.get_step(name) else { continue };
        for data_name in step.outputs.values() {
            if let Some(other) = claimed.get(data_name.as_str()) {
                if *other != name.as_str() {
                    return (
                        false,
                        Some(format!(
                            "Output conflict: ${data_name} is produced by both '{other}' and '{name}'"
                        )),
                    );
                }
            } else {
                claimed.insert(data_name.as_str(), name.as_str());
            }
        }
    }

    (true, None)
}

/// "Steps to produce X" (§4.7): reverse BFS from the producer of `data_name`,
/// walking each ancestor's `inputs`, returning ancestors plus the target in
/// pipeline order. `only_missing` drops steps whose outputs all already
/// exist on disk (presence only, no timestamp comparison).
pub fn steps_to_produce(pipeline: &Pipeline, data_name: &str, only_missing: bool) -> RunnerResult<Vec<String>> {
    let producer = pipeline
        .producers
        .get(data_name)
        .ok_or_else(|| RunnerError::UnknownReference { name: data_name.to_string() })?;

    let mut required: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    required.insert(producer.clone());
    queue.push_back(producer.clone());

    while let Some(name) = queue.pop_front() {
        let step = pipeline.get_step(&name).expect("producer map only names real steps");
        for dep in pipeline.get_step_dependencies(step) {
            if required.insert(dep.clone()) {
                queue.push_back(dep);
            }
        }
    }

    let mut ordered: Vec<String> = pipeline
        .steps
        .iter()
        .filter(|s| required.contains(&s.name))
        .map(|s| s.name.clone())
        .collect();

    if only_missing {
        ordered.retain(|name| {
            let step = pipeline.get_step(name).expect("name came from pipeline.steps");
            !step_outputs_all_exist(pipeline, step)
        });
    }

    Ok(ordered)
}

/// "Steps up to step S" (§4.7): reverse BFS through `inputs` *and*
/// `loop.over`, returning ancestors plus `S` in pipeline order. `S` itself is
/// always kept, even if `disabled`/`optional`.
pub fn steps_up_to(pipeline: &Pipeline, step_name: &str) -> RunnerResult<Vec<String>> {
    let target = pipeline
        .get_step(step_name)
        .ok_or_else(|| RunnerError::StepNotFound { name: step_name.to_string() })?;

    let mut required: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    required.insert(target.name.clone());
    queue.push_back(target.name.clone());

    while let Some(name) = queue.pop_front() {
        let step = pipeline.get_step(&name).expect("queued name came from the pipeline");
        for dep in pipeline.get_step_dependencies(step) {
            if required.insert(dep.clone()) {
                queue.push_back(dep);
            }
        }
    }

    Ok(pipeline
        .steps
        .iter()
        .filter(|s| required.contains(&s.name))
        .map(|s| s.name.clone())
        .collect())
}

/// Freshness classification (§4.7). Inputs that do not resolve to existing
/// files are ignored — they may be parameter-backed rather than file-backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    NoOutputs,
    Missing,
    Stale,
    Fresh,
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoOutputs => "no_outputs",
            Self::Missing => "missing",
            Self::Stale => "stale",
            Self::Fresh => "fresh",
        };
        f.write_str(s)
    }
}

fn step_output_paths(pipeline: &Pipeline, step: &crate::config::Step) -> Vec<PathBuf> {
    step.outputs
        .values()
        .filter_map(|name| pipeline.data.get(name))
        .map(|node| node.resolved_path(&pipeline.base_dir))
        .collect()
}

fn step_input_paths(pipeline: &Pipeline, step: &crate::config::Step) -> Vec<PathBuf> {
    step.inputs
        .values()
        .filter_map(|name| pipeline.data.get(name))
        .map(|node| node.resolved_path(&pipeline.base_dir))
        .collect()
}

fn step_outputs_all_exist(pipeline: &Pipeline, step: &crate::config::Step) -> bool {
    let outputs = step_output_paths(pipeline, step);
    !outputs.is_empty() && outputs.iter().all(|p| p.exists())
}

fn mtime(path: &PathBuf) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Classify a single step's freshness (§4.7).
pub fn classify_freshness(pipeline: &Pipeline, step: &crate::config::Step) -> Freshness {
    let outputs = step_output_paths(pipeline, step);
    if outputs.is_empty() {
        return Freshness::NoOutputs;
    }
    if outputs.iter().any(|p| !p.exists()) {
        return Freshness::Missing;
    }

    let newest_input = step_input_paths(pipeline, step).iter().filter_map(mtime).max();
    let oldest_output = outputs.iter().filter_map(mtime).min();

    match (newest_input, oldest_output) {
        (Some(input), Some(output)) if input > output => Freshness::Stale,
        _ => Freshness::Fresh,
    }
}

pub const THUMBNAIL_CACHE_DIR_NAME: &str = ".loom-thumbnails";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanAction {
    Trashed,
    Deleted,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct CleanResult {
    pub path: PathBuf,
    pub action: CleanAction,
    pub success: bool,
    pub error: Option<String>,
}

/// Enumerate the data-node paths eligible for cleaning: every node that is
/// *produced* by some step (source nodes — those with no producer — are
/// exempt per invariant 5). Optionally includes the thumbnail cache dir.
fn cleanable_paths(pipeline: &Pipeline, include_thumbnails: bool) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = pipeline
        .data
        .values()
        .filter(|node| pipeline.producers.contains_key(&node.name))
        .map(|node| node.resolved_path(&pipeline.base_dir))
        .collect();

    if include_thumbnails {
        paths.push(pipeline.base_dir.join(THUMBNAIL_CACHE_DIR_NAME));
    }

    paths.sort();
    paths.dedup();
    paths
}

/// Run the clean operation (§4.7). Never touches a path outside the
/// enumerated set. Idempotent: a path already gone reports `Skipped`
/// rather than an error (§8 "Idempotent clean").
pub fn clean(pipeline: &Pipeline, permanent: bool, include_thumbnails: bool) -> Vec<CleanResult> {
    cleanable_paths(pipeline, include_thumbnails)
        .into_iter()
        .map(|path| clean_one(path, permanent))
        .collect()
}

fn clean_one(path: PathBuf, permanent: bool) -> CleanResult {
    if !path.exists() {
        return CleanResult { path, action: CleanAction::Skipped, success: true, error: None };
    }

    if permanent {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => CleanResult { path, action: CleanAction::Deleted, success: true, error: None },
            Err(e) => CleanResult { path, action: CleanAction::Deleted, success: false, error: Some(e.to_string()) },
        }
    } else {
        match trash::delete(&path) {
            Ok(()) => CleanResult { path, action: CleanAction::Trashed, success: true, error: None },
            Err(e) => CleanResult { path, action: CleanAction::Trashed, success: false, error: Some(e.to_string()) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn diamond_pipeline() -> Pipeline {
        let yaml = r#"
data:
  a: { type: csv, path: "a.csv" }
  b: { type: csv, path: "b.csv" }
  c: { type: csv, path: "c.csv" }
  d: { type: csv, path: "d.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    outputs: { "-o": $a }
  - name: B
    task: "./gen.py"
    inputs: { "-i": $a }
    outputs: { "-o": $b }
  - name: C
    task: "./gen.py"
    inputs: { "-i": $a }
    outputs: { "-o": $c }
  - name: D
    task: "./gen.py"
    inputs: { "-i": $b, "-j": $c }
    outputs: { "-o": $d }
"#;
        Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap()
    }

    // `Pipeline::from_yaml` itself rejects two steps declaring the same
    // output (§3.2 invariant 2, enforced at load time) — stricter than the
    // original tool, which resolved such clashes with last-write-wins and
    // only caught them here, at parallel-selection time. Built directly so
    // `validate_parallel_execution`'s own conflict branch stays reachable
    // and tested (§8 "Parallel conflict symmetry" / scenario six) even
    // though a loaded `Pipeline` can no longer carry this shape.
    fn conflicting_pipeline() -> Pipeline {
        use crate::config::{DataNode, DataType, ExecutionConfig, Step};
        use std::collections::HashMap;
        use indexmap::IndexMap;

        let step = |name: &str| Step {
            name: name.to_string(),
            task: "./gen.py".to_string(),
            interpreter: None,
            inputs: IndexMap::new(),
            outputs: IndexMap::from([("-o".to_string(), "shared".to_string())]),
            args: IndexMap::new(),
            optional: false,
            disabled: false,
            group: None,
            loop_spec: None,
            extra_args: None,
        };

        Pipeline {
            base_dir: PathBuf::from("/pipe"),
            parameters: HashMap::new(),
            data: HashMap::from([(
                "shared".to_string(),
                DataNode {
                    name: "shared".to_string(),
                    node_type: DataType::Csv,
                    path: "shared.csv".to_string(),
                    display_name: None,
                    description: None,
                    pattern: None,
                },
            )]),
            steps: vec![step("s1"), step("s2")],
            producers: HashMap::from([("shared".to_string(), "s1".to_string())]),
            execution: ExecutionConfig { parallel: true, max_workers: 4 },
        }
    }

    #[test]
    fn parallel_conflict_symmetry() {
        let pipeline = conflicting_pipeline();
        let (ok_ab, _) = validate_parallel_execution(&pipeline, &["s1".to_string(), "s2".to_string()]);
        let (ok_ba, _) = validate_parallel_execution(&pipeline, &["s2".to_string(), "s1".to_string()]);
        assert_eq!(ok_ab, ok_ba);
        assert!(!ok_ab);
    }

    #[test]
    fn parallel_conflict_message_matches_scenario_six() {
        let pipeline = conflicting_pipeline();
        let (ok, msg) = validate_parallel_execution(&pipeline, &["s1".to_string(), "s2".to_string()]);
        assert!(!ok);
        assert_eq!(msg.unwrap(), "Output conflict: $shared is produced by both 's1' and 's2'");
    }

    #[test]
    fn steps_to_produce_collects_both_branches_of_a_diamond() {
        let pipeline = diamond_pipeline();
        let ancestors = steps_to_produce(&pipeline, "d", false).unwrap();
        let set: HashSet<_> = ancestors.iter().cloned().collect();
        assert_eq!(set, HashSet::from(["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()]));
        assert_eq!(ancestors.last(), Some(&"D".to_string()));
    }

    #[test]
    fn steps_up_to_keeps_disabled_target() {
        let yaml = r#"
data:
  a: { type: csv, path: "a.csv" }
  b: { type: csv, path: "b.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    outputs: { "-o": $a }
  - name: B
    task: "./gen.py"
    inputs: { "-i": $a }
    outputs: { "-o": $b }
    disabled: true
"#;
        let pipeline = Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap();
        let ancestors = steps_up_to(&pipeline, "B").unwrap();
        assert_eq!(ancestors.into_iter().collect::<HashSet<_>>(), HashSet::from(["A".to_string(), "B".to_string()]));
    }

    #[test]
    fn freshness_missing_when_output_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let yaml = r#"
data:
  out: { type: csv, path: "out.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    outputs: { "-o": $out }
"#;
        let pipeline = Pipeline::from_yaml(yaml, tmp.path().to_path_buf()).unwrap();
        let step = pipeline.get_step("A").unwrap();
        assert_eq!(classify_freshness(&pipeline, step), Freshness::Missing);
    }

    #[test]
    fn freshness_stale_when_input_newer_than_output() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.csv");
        let output = tmp.path().join("out.csv");
        std::fs::write(&output, "old").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&input, "new").unwrap();

        let yaml = r#"
data:
  in: { type: csv, path: "in.csv" }
  out: { type: csv, path: "out.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    inputs: { "-i": $in }
    outputs: { "-o": $out }
"#;
        let pipeline = Pipeline::from_yaml(yaml, tmp.path().to_path_buf()).unwrap();
        let step = pipeline.get_step("A").unwrap();
        assert_eq!(classify_freshness(&pipeline, step), Freshness::Stale);
    }

    #[test]
    fn freshness_fresh_when_output_newer_than_input() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.csv");
        let output = tmp.path().join("out.csv");
        std::fs::write(&input, "old").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&output, "new").unwrap();

        let yaml = r#"
data:
  in: { type: csv, path: "in.csv" }
  out: { type: csv, path: "out.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    inputs: { "-i": $in }
    outputs: { "-o": $out }
"#;
        let pipeline = Pipeline::from_yaml(yaml, tmp.path().to_path_buf()).unwrap();
        let step = pipeline.get_step("A").unwrap();
        assert_eq!(classify_freshness(&pipeline, step), Freshness::Fresh);
    }

    #[test]
    fn clean_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let out_path = tmp.path().join("out.csv");
        std::fs::write(&out_path, "data").unwrap();

        let yaml = r#"
data:
  out: { type: csv, path: "out.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    outputs: { "-o": $out }
"#;
        let pipeline = Pipeline::from_yaml(yaml, tmp.path().to_path_buf()).unwrap();

        let first = clean(&pipeline, true, false);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].action, CleanAction::Deleted);
        assert!(first[0].success);

        let second = clean(&pipeline, true, false);
        assert_eq!(second[0].action, CleanAction::Skipped);
    }

    #[test]
    fn clean_never_touches_source_only_data_nodes() {
        let tmp = tempfile::tempdir().unwrap();
        let source_path = tmp.path().join("source.csv");
        std::fs::write(&source_path, "data").unwrap();

        let yaml = r#"
data:
  source: { type: csv, path: "source.csv" }
  out: { type: csv, path: "out.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    inputs: { "-i": $source }
    outputs: { "-o": $out }
"#;
        let pipeline = Pipeline::from_yaml(yaml, tmp.path().to_path_buf()).unwrap();
        let results = clean(&pipeline, true, false);
        assert!(results.iter().all(|r| r.path != source_path));
    }
}
