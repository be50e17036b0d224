// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! Dependency graph over a loaded pipeline's steps (§4.4).
//!
//! Unlike a hand-authored `depends_on` list, every edge here is implicit: a
//! step depends on whichever step produces a data node it reads from
//! `inputs` or `loop.over` (§4.4's "Dependency graph" wording).

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::config::Pipeline;
use crate::errors::{RunnerError, RunnerResult};

pub struct Dag {
    graph: DiGraph<usize, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    index_to_name: HashMap<NodeIndex, String>,
}

impl Dag {
    fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_index: HashMap::new(),
            index_to_name: HashMap::new(),
        }
    }

    /// Build and validate the dependency graph for `pipeline`, returning
    /// [`RunnerError::CyclicPipeline`] if it is not a DAG.
    pub fn build(pipeline: &Pipeline) -> RunnerResult<Self> {
        let mut dag = Self::new();

        for (idx, step) in pipeline.steps.iter().enumerate() {
            let node = dag.graph.add_node(idx);
            dag.name_to_index.insert(step.name.clone(), node);
            dag.index_to_name.insert(node, step.name.clone());
        }

        for step in &pipeline.steps {
            let step_node = dag.name_to_index[&step.name];
            for data_name in step.referenced_inputs() {
                if let Some(producer) = pipeline.producers.get(data_name) {
                    if producer == &step.name {
                        continue;
                    }
                    let producer_node = dag.name_to_index[producer];
                    if !dag.graph.contains_edge(producer_node, step_node) {
                        dag.graph.add_edge(producer_node, step_node, ());
                    }
                }
                // Data nodes with no producer are external inputs; they impose
                // no edge, only a file-existence expectation at run time.
            }
        }

        dag.validate_acyclic()?;
        Ok(dag)
    }

    fn validate_acyclic(&self) -> RunnerResult<()> {
        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => {
                let members = self.find_cycle_members(cycle.node_id());
                Err(RunnerError::CyclicPipeline { cycle: members.join(" -> ") })
            }
        }
    }

    fn find_cycle_members(&self, start: NodeIndex) -> Vec<String> {
        use petgraph::visit::{depth_first_search, DfsEvent};

        let mut in_cycle = vec![self.index_to_name[&start].clone()];
        let mut visited = std::collections::HashSet::new();

        depth_first_search(&self.graph, Some(start), |event| {
            if let DfsEvent::Discover(node, _) = event {
                let name = &self.index_to_name[&node];
                if visited.contains(name) {
                    in_cycle.push(name.clone());
                    return petgraph::visit::Control::Break(());
                }
                visited.insert(name.clone());
                in_cycle.push(name.clone());
            }
            petgraph::visit::Control::Continue
        });

        in_cycle
    }

    pub fn topological_order_names(&self) -> RunnerResult<Vec<String>> {
        toposort(&self.graph, None)
            .map(|nodes| nodes.into_iter().map(|n| self.index_to_name[&n].clone()).collect())
            .map_err(|cycle| RunnerError::CyclicPipeline {
                cycle: self.find_cycle_members(cycle.node_id()).join(" -> "),
            })
    }

    pub fn dependencies(&self, step_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(step_name)?;
        Some(
            self.graph
                .neighbors_directed(*node, petgraph::Direction::Incoming)
                .map(|n| self.index_to_name[&n].clone())
                .collect(),
        )
    }

    pub fn dependents(&self, step_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(step_name)?;
        Some(
            self.graph
                .neighbors_directed(*node, petgraph::Direction::Outgoing)
                .map(|n| self.index_to_name[&n].clone())
                .collect(),
        )
    }

    /// Whether `a` depends, directly or transitively, on `b` (§6.2.1 `graph`).
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        let (Some(&node_a), Some(&node_b)) = (self.name_to_index.get(a), self.name_to_index.get(b)) else {
            return false;
        };
        petgraph::algo::has_path_connecting(&self.graph, node_b, node_a, None)
    }

    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        for name in self.name_to_index.keys() {
            out.push_str(&format!("    {name}[{name}]\n"));
        }
        for edge in self.graph.edge_indices() {
            let (from, to) = self.graph.edge_endpoints(edge).unwrap();
            out.push_str(&format!(
                "    {} --> {}\n",
                self.index_to_name[&from], self.index_to_name[&to]
            ));
        }
        out
    }

    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n    rankdir=TB;\n    node [shape=box, style=rounded];\n\n");
        for edge in self.graph.edge_indices() {
            let (from, to) = self.graph.edge_endpoints(edge).unwrap();
            out.push_str(&format!(
                "    \"{}\" -> \"{}\";\n",
                self.index_to_name[&from], self.index_to_name[&to]
            ));
        }
        for (name, node) in &self.name_to_index {
            if self.graph.neighbors_undirected(*node).count() == 0 {
                out.push_str(&format!("    \"{name}\";\n"));
            }
        }
        out.push_str("}\n");
        out
    }

    pub fn to_text(&self) -> RunnerResult<String> {
        let order = self.topological_order_names()?;
        let mut out = String::new();
        for (i, name) in order.iter().enumerate() {
            let deps = self.dependencies(name).unwrap_or_default();
            out.push_str(&format!("{}. {name}", i + 1));
            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }
            out.push('\n');
        }
        Ok(out)
    }
}

/// Build and validate in one call — the shape `config::Pipeline::from_yaml`
/// needs, discarding the [`Dag`] itself (the loader only cares that one exists).
pub fn build(pipeline: &Pipeline) -> RunnerResult<Dag> {
    Dag::build(pipeline)
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
    fn topological_order_respects_producer_edges() {
        let pipeline = chain_pipeline();
        let dag = Dag::build(&pipeline).unwrap();
        assert_eq!(dag.topological_order_names().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn dependencies_and_dependents_follow_producer_map() {
        let pipeline = chain_pipeline();
        let dag = Dag::build(&pipeline).unwrap();
        assert_eq!(dag.dependencies("B"), Some(vec!["A".to_string()]));
        assert_eq!(dag.dependents("A"), Some(vec!["B".to_string()]));
    }

    #[test]
    fn depends_on_is_transitive() {
        let pipeline = chain_pipeline();
        let dag = Dag::build(&pipeline).unwrap();
        assert!(dag.depends_on("C", "A"));
        assert!(!dag.depends_on("A", "C"));
    }

    #[test]
    fn external_input_with_no_producer_imposes_no_edge() {
        let yaml = r#"
data:
  ext: { type: csv, path: "ext.csv" }
  out: { type: csv, path: "out.csv" }
pipeline:
  - name: A
    task: "./gen.py"
    inputs: { "-i": $ext }
    outputs: { "-o": $out }
"#;
        let pipeline = Pipeline::from_yaml(yaml, PathBuf::from("/pipe")).unwrap();
        let dag = Dag::build(&pipeline).unwrap();
        assert_eq!(dag.dependencies("A"), Some(Vec::new()));
    }
}
