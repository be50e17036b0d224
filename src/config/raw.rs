// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! Raw YAML schema for pipeline files, deserialized as written (§6.1).
//!
//! These types mirror the YAML grammar exactly, including the legacy
//! `script:` key and the `variables:` section whose mere presence is a hard
//! error. Expansion into the runtime [`crate::config::Pipeline`] happens in
//! `config::mod` and `config::multi_pass`.

use indexmap::IndexMap;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Video,
    Image,
    Csv,
    Json,
    Txt,
    ImageDirectory,
    DataFolder,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDataNode {
    #[serde(rename = "type")]
    pub node_type: DataType,
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
}

/// A scalar as it appears in YAML: a parameter value, or an arg/loop value
/// before reference resolution. `untagged` lets serde pick the narrowest
/// type (bool before int before float before string).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLoopSpec {
    pub over: String,
    pub into: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStep {
    pub name: String,
    #[serde(default)]
    pub task: Option<String>,
    /// Legacy command key; `task:` wins on collision (§4.3).
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub inputs: IndexMap<String, String>,
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
    #[serde(default)]
    pub args: IndexMap<String, RawScalar>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, rename = "loop")]
    pub loop_spec: Option<RawLoopSpec>,
    #[serde(default)]
    pub extra_args: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPass {
    pub name: String,
    #[serde(default)]
    pub params: IndexMap<String, RawScalar>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMultiPass {
    pub passes: Vec<RawPass>,
    #[serde(default)]
    pub chain: IndexMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawGroup {
    pub group: String,
    #[serde(default)]
    pub steps: Vec<RawStep>,
    #[serde(default)]
    pub multi_pass: Option<RawMultiPass>,
}

/// A pipeline-list item is either a bare step or a group. `untagged`
/// disambiguates on required fields: a step always has `name`, a group
/// always has `group`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPipelineItem {
    Group(RawGroup),
    Step(RawStep),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExecutionConfig {
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPipelineFile {
    #[serde(default)]
    pub data: IndexMap<String, RawDataNode>,
    #[serde(default)]
    pub parameters: IndexMap<String, RawScalar>,
    #[serde(default)]
    pub pipeline: Vec<RawPipelineItem>,
    #[serde(default)]
    pub execution: RawExecutionConfig,
    /// Every top-level key this struct doesn't name, `variables:` included.
    /// Catching these by key instead of a typed `variables: Option<_>` field
    /// means a bare `variables:` (null value) is still caught: the key ends
    /// up in this map regardless of what its value deserializes to.
    /// `layout:` and `editor:` are editor hints and also land here, ignored.
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

impl RawPipelineFile {
    /// Presence alone (any value, including `null`) is a hard load error
    /// (§3.1/§6.1).
    pub fn has_legacy_variables_section(&self) -> bool {
        self.extra.contains_key("variables")
    }
}
