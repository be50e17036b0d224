// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! Pipeline configuration: the runtime data model produced by loading and
//! fully expanding a `.yaml` pipeline file (§3, §4.3, §6.1).

pub mod multi_pass;
pub mod raw;

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::errors::{RunnerError, RunnerResult};
use raw::{RawDataNode, RawPipelineFile, RawPipelineItem, RawScalar, RawStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Video,
    Image,
    Csv,
    Json,
    Txt,
    ImageDirectory,
    DataFolder,
}

impl From<raw::DataType> for DataType {
    fn from(t: raw::DataType) -> Self {
        match t {
            raw::DataType::Video => Self::Video,
            raw::DataType::Image => Self::Image,
            raw::DataType::Csv => Self::Csv,
            raw::DataType::Json => Self::Json,
            raw::DataType::Txt => Self::Txt,
            raw::DataType::ImageDirectory => Self::ImageDirectory,
            raw::DataType::DataFolder => Self::DataFolder,
        }
    }
}

/// A resolved scalar value: a parameter, or an arg/loop literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<RawScalar> for Scalar {
    fn from(raw: RawScalar) -> Self {
        match raw {
            RawScalar::Bool(b) => Self::Bool(b),
            RawScalar::Int(i) => Self::Int(i),
            RawScalar::Float(f) => Self::Float(f),
            RawScalar::String(s) => Self::String(s),
        }
    }
}

impl Scalar {
    /// Render as a command-line token. Used for args and for reading a
    /// resolved data-node path back out as a plain string.
    pub fn as_cli_string(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
        }
    }
}

/// A named, typed file or directory reference (§3.1).
#[derive(Debug, Clone)]
pub struct DataNode {
    pub name: String,
    pub node_type: DataType,
    pub path: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub pattern: Option<String>,
}

impl DataNode {
    fn from_raw(name: String, raw: RawDataNode) -> Self {
        Self {
            name,
            node_type: raw.node_type.into(),
            path: raw.path,
            display_name: raw.name,
            description: raw.description,
            pattern: raw.pattern,
        }
    }

    /// Absolutize `path` against `base_dir` when relative.
    pub fn resolved_path(&self, base_dir: &Path) -> PathBuf {
        absolutize(base_dir, &self.path)
    }
}

pub fn absolutize(base_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// An arg value after multi-pass expansion: either a literal scalar or a
/// reference to a parameter/data node, resolved at command-build time.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Literal(Scalar),
    Ref(String),
}

#[derive(Debug, Clone)]
pub struct LoopSpec {
    pub over: String,
    pub into: String,
}

/// A single concrete step invocation (§3.1). Present after expansion — there
/// is no separate "template step" type at runtime.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub task: String,
    pub interpreter: Option<String>,
    pub inputs: IndexMap<String, String>,
    pub outputs: IndexMap<String, String>,
    pub args: IndexMap<String, ArgValue>,
    pub optional: bool,
    pub disabled: bool,
    pub group: Option<String>,
    pub loop_spec: Option<LoopSpec>,
    pub extra_args: Option<String>,
}

impl Step {
    fn from_raw(raw: RawStep) -> RunnerResult<Self> {
        let task = raw.task.or(raw.script).ok_or_else(|| RunnerError::InvalidPipeline {
            reason: format!("step '{}' declares neither 'task' nor 'script'", raw.name),
        })?;

        let inputs = strip_refs(&raw.name, "inputs", raw.inputs)?;
        let outputs = strip_refs(&raw.name, "outputs", raw.outputs)?;

        let mut args = IndexMap::new();
        for (flag, value) in raw.args {
            let arg = match value {
                RawScalar::String(s) => match s.strip_prefix('$') {
                    Some(name) => ArgValue::Ref(name.to_string()),
                    None => ArgValue::Literal(Scalar::String(s)),
                },
                other => ArgValue::Literal(Scalar::from(other)),
            };
            args.insert(flag, arg);
        }

        let loop_spec = raw
            .loop_spec
            .map(|l| -> RunnerResult<LoopSpec> {
                Ok(LoopSpec {
                    over: strip_ref(&raw.name, "loop.over", &l.over)?,
                    into: strip_ref(&raw.name, "loop.into", &l.into)?,
                })
            })
            .transpose()?;

        Ok(Self {
            name: raw.name,
            task,
            interpreter: raw.interpreter,
            inputs,
            outputs,
            args,
            optional: raw.optional,
            disabled: raw.disabled,
            group: None,
            loop_spec,
            extra_args: raw.extra_args,
        })
    }

    /// All data-node names this step depends on: its `inputs` plus, when
    /// present, `loop.over` (§4.4, §4.7 — two distinct dependency notions
    /// share this helper).
    pub fn referenced_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .values()
            .map(String::as_str)
            .chain(self.loop_spec.iter().map(|l| l.over.as_str()))
    }
}

fn strip_ref(step_name: &str, field: &str, value: &str) -> RunnerResult<String> {
    value
        .strip_prefix('$')
        .map(str::to_string)
        .ok_or_else(|| RunnerError::InvalidPipeline {
            reason: format!("step '{step_name}' field '{field}' value '{value}' must be a '$'-prefixed reference"),
        })
}

fn strip_refs(
    step_name: &str,
    field: &str,
    map: IndexMap<String, String>,
) -> RunnerResult<IndexMap<String, String>> {
    map.into_iter()
        .map(|(flag, value)| Ok((flag, strip_ref(step_name, field, &value)?)))
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionConfig {
    pub parallel: bool,
    pub max_workers: usize,
}

impl From<raw::RawExecutionConfig> for ExecutionConfig {
    fn from(raw: raw::RawExecutionConfig) -> Self {
        Self {
            parallel: raw.parallel,
            max_workers: raw.max_workers.unwrap_or_else(num_cpus),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// The fully loaded and expanded pipeline (§3.1, §3.3). Read-only once
/// built, except for [`Pipeline::override_parameters`]/[`Pipeline::override_data`],
/// which must run before a run begins.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub base_dir: PathBuf,
    pub parameters: HashMap<String, Scalar>,
    pub data: HashMap<String, DataNode>,
    pub steps: Vec<Step>,
    pub producers: HashMap<String, String>,
    pub execution: ExecutionConfig,
}

impl Pipeline {
    pub fn from_file(path: &Path) -> RunnerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| RunnerError::PipelineReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_yaml(&content, base_dir)
    }

    pub fn from_yaml(yaml: &str, base_dir: PathBuf) -> RunnerResult<Self> {
        let raw: RawPipelineFile = serde_yaml::from_str(yaml)?;

        if raw.has_legacy_variables_section() {
            return Err(RunnerError::LegacyVariablesSection);
        }

        let mut data: IndexMap<String, DataNode> = raw
            .data
            .into_iter()
            .map(|(name, node)| (name.clone(), DataNode::from_raw(name, node)))
            .collect();
        let parameters: HashMap<String, Scalar> = raw
            .parameters
            .into_iter()
            .map(|(name, v)| (name, Scalar::from(v)))
            .collect();

        let mut steps = Vec::new();
        let mut producers: HashMap<String, String> = HashMap::new();

        for item in raw.pipeline {
            match item {
                RawPipelineItem::Step(s) => steps.push(Step::from_raw(s)?),
                RawPipelineItem::Group(g) => {
                    if let Some(mp) = &g.multi_pass {
                        let expanded =
                            multi_pass::expand_group(&mut data, &mut producers, &g.group, &g.steps, mp)?;
                        steps.extend(expanded);
                    } else {
                        for raw_step in g.steps {
                            let mut step = Step::from_raw(raw_step)?;
                            step.group = Some(g.group.clone());
                            steps.push(step);
                        }
                    }
                }
            }
        }

        let mut seen_names = HashSet::new();
        for step in &steps {
            if !seen_names.insert(step.name.clone()) {
                return Err(RunnerError::DuplicateStep { name: step.name.clone() });
            }
        }

        for step in &steps {
            for data_name in step.outputs.values() {
                match producers.get(data_name) {
                    Some(existing) if existing != &step.name => {
                        return Err(RunnerError::DuplicateProducer {
                            name: data_name.clone(),
                            first: existing.clone(),
                            second: step.name.clone(),
                        });
                    }
                    _ => {
                        producers.insert(data_name.clone(), step.name.clone());
                    }
                }
            }
        }

        validate_references(&data, &parameters, &steps)?;

        let pipeline = Self {
            base_dir,
            parameters,
            data: data.into_iter().collect(),
            steps,
            producers,
            execution: raw.execution.into(),
        };

        crate::dag::build(&pipeline)?;

        Ok(pipeline)
    }

    pub fn get_step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Shallow-merge parameter overrides (§4.1). Only valid before a run begins.
    pub fn override_parameters(&mut self, overrides: HashMap<String, Scalar>) {
        self.parameters.extend(overrides);
    }

    /// Shallow-merge data-node path overrides (§4.1). Only valid before a run begins.
    pub fn override_data(&mut self, overrides: HashMap<String, String>) -> RunnerResult<()> {
        for (name, path) in overrides {
            let node = self
                .data
                .get_mut(&name)
                .ok_or_else(|| RunnerError::UnknownReference { name: name.clone() })?;
            node.path = path;
        }
        Ok(())
    }

    /// Dependency names for `step` per the "steps up to step S" analysis
    /// (§4.7), distinct from the orchestrator's selected-set-only view
    /// (§4.4's `build_dependency_graph`): this one walks the *whole*
    /// pipeline's producer map, ignoring selection.
    pub fn get_step_dependencies(&self, step: &Step) -> Vec<String> {
        step.referenced_inputs()
            .filter_map(|data_name| self.producers.get(data_name).cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect()
    }
}

fn validate_references(
    data: &IndexMap<String, DataNode>,
    parameters: &HashMap<String, Scalar>,
    steps: &[Step],
) -> RunnerResult<()> {
    let check_data = |name: &str| -> RunnerResult<()> {
        if data.contains_key(name) {
            Ok(())
        } else {
            Err(RunnerError::UnknownReference { name: name.to_string() })
        }
    };
    let check_ref = |name: &str| -> RunnerResult<()> {
        if data.contains_key(name) || parameters.contains_key(name) {
            Ok(())
        } else {
            Err(RunnerError::UnknownReference { name: name.to_string() })
        }
    };

    for step in steps {
        for name in step.inputs.values() {
            check_data(name)?;
        }
        for name in step.outputs.values() {
            check_data(name)?;
        }
        for arg in step.args.values() {
            if let ArgValue::Ref(name) = arg {
                check_ref(name)?;
            }
        }
        if let Some(loop_spec) = &step.loop_spec {
            check_data(&loop_spec.over)?;
            check_data(&loop_spec.into)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_yaml() -> &'static str {
        r#"
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
"#
    }

    #[test]
    fn loads_linear_chain() {
        let pipeline = Pipeline::from_yaml(linear_yaml(), PathBuf::from("/pipe")).unwrap();
        assert_eq!(pipeline.steps.len(), 3);
        assert_eq!(pipeline.producers.get("a"), Some(&"A".to_string()));
        assert_eq!(pipeline.producers.get("c"), Some(&"C".to_string()));
    }

    #[test]
    fn rejects_legacy_variables_section() {
        let yaml = "variables:\n  a: {}\npipeline: []\n";
        let err = Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap_err();
        assert!(matches!(err, RunnerError::LegacyVariablesSection));
    }

    #[test]
    fn rejects_legacy_variables_section_even_when_null() {
        let yaml = "variables:\npipeline: []\n";
        let err = Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap_err();
        assert!(matches!(err, RunnerError::LegacyVariablesSection));
    }

    #[test]
    fn rejects_legacy_variables_section_when_empty_map() {
        let yaml = "variables: {}\npipeline: []\n";
        let err = Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap_err();
        assert!(matches!(err, RunnerError::LegacyVariablesSection));
    }

    #[test]
    fn rejects_unknown_reference() {
        let yaml = r#"
data:
  a: { type: csv, path: "a.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    inputs: { "-i": $missing }
    outputs: { "-o": $a }
"#;
        let err = Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap_err();
        assert!(matches!(err, RunnerError::UnknownReference { .. }));
    }

    #[test]
    fn rejects_duplicate_producer() {
        let yaml = r#"
data:
  a: { type: csv, path: "a.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    outputs: { "-o": $a }
  - name: B
    task: "./gen.py"
    outputs: { "-o": $a }
"#;
        let err = Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap_err();
        assert!(matches!(err, RunnerError::DuplicateProducer { .. }));
    }

    #[test]
    fn task_wins_over_legacy_script_key() {
        let yaml = r#"
pipeline:
  - name: A
    task: "./task.py"
    script: "./legacy.py"
"#;
        let pipeline = Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap();
        assert_eq!(pipeline.steps[0].task, "./task.py");
    }

    #[test]
    fn rejects_cyclic_pipeline() {
        let yaml = r#"
data:
  a: { type: csv, path: "a.csv" }
  b: { type: csv, path: "b.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    inputs: { "-i": $b }
    outputs: { "-o": $a }
  - name: B
    task: "./gen.py"
    inputs: { "-i": $a }
    outputs: { "-o": $b }
"#;
        let err = Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap_err();
        assert!(matches!(err, RunnerError::CyclicPipeline { .. }));
    }
}
