// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! Multi-pass group expansion (§4.3) — the one compile-time macro this
//! runtime supports. Turns a template of steps plus an ordered list of
//! passes into concrete, pass-suffixed steps, registering the suffixed data
//! nodes it invents along the way and aliasing the last pass back onto the
//! un-suffixed names.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::raw::{RawMultiPass, RawScalar, RawStep};
use super::{ArgValue, DataNode, LoopSpec, Scalar, Step};
use crate::errors::{RunnerError, RunnerResult};

/// Insert `_{suffix}` before the extension, before a trailing `/`, or at the
/// end if there is no extension (§4.3 step 2b).
fn suffix_path(path: &str, suffix: &str) -> String {
    if let Some(trimmed) = path.strip_suffix('/') {
        return format!("{trimmed}_{suffix}/");
    }

    let p = Path::new(path);
    match p.extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or(path);
            let new_name = format!("{stem}_{suffix}.{ext}");
            match p.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                Some(parent) => parent.join(new_name).to_string_lossy().into_owned(),
                None => new_name,
            }
        }
        None => format!("{path}_{suffix}"),
    }
}

fn strip_ref(group: &str, value: &str) -> RunnerResult<String> {
    value
        .strip_prefix('$')
        .map(str::to_string)
        .ok_or_else(|| RunnerError::MultiPassShape {
            group: group.to_string(),
            reason: format!("expected a '$'-prefixed reference, got '{value}'"),
        })
}

/// Expand a `multi_pass` group into concrete steps, mutating `data` with the
/// per-pass suffixed nodes (and the last-pass alias) and `producers` with the
/// alias's canonical producer.
pub fn expand_group(
    data: &mut IndexMap<String, DataNode>,
    producers: &mut HashMap<String, String>,
    group_name: &str,
    template_steps: &[RawStep],
    multi_pass: &RawMultiPass,
) -> RunnerResult<Vec<Step>> {
    if multi_pass.passes.is_empty() {
        return Err(RunnerError::MultiPassShape {
            group: group_name.to_string(),
            reason: "'passes' must not be empty".to_string(),
        });
    }

    // §4.3 step 1: data names produced by any template step's outputs.
    let mut internal: HashSet<String> = HashSet::new();
    for step in template_steps {
        for data_ref in step.outputs.values() {
            internal.insert(strip_ref(group_name, data_ref)?);
        }
    }

    let mut concrete_steps = Vec::new();
    let mut last_producer: HashMap<String, String> = HashMap::new();

    for (pass_idx, pass) in multi_pass.passes.iter().enumerate() {
        for template in template_steps {
            let concrete_name = format!("{}_{}", template.name, pass.name);

            let mut outputs = IndexMap::new();
            for (flag, data_ref) in &template.outputs {
                let d = strip_ref(group_name, data_ref)?;
                if internal.contains(&d) {
                    let suffixed = format!("{d}_{}", pass.name);
                    register_suffixed_node(data, &d, &suffixed, &pass.name, group_name)?;
                    outputs.insert(flag.clone(), suffixed);
                    last_producer.insert(d, concrete_name.clone());
                } else {
                    outputs.insert(flag.clone(), d);
                }
            }

            let mut inputs = IndexMap::new();
            for (flag, data_ref) in &template.inputs {
                let d = strip_ref(group_name, data_ref)?;
                if internal.contains(&d) {
                    inputs.insert(flag.clone(), format!("{d}_{}", pass.name));
                } else {
                    inputs.insert(flag.clone(), d);
                }
            }

            let mut args = IndexMap::new();
            for (flag, value) in &template.args {
                let resolved = match value {
                    RawScalar::String(s) if s.starts_with('$') => {
                        let k = &s[1..];
                        if let Some(literal) = pass.params.get(k) {
                            ArgValue::Literal(Scalar::from(literal.clone()))
                        } else if internal.contains(k) {
                            ArgValue::Ref(format!("{k}_{}", pass.name))
                        } else {
                            ArgValue::Ref(k.to_string())
                        }
                    }
                    other => ArgValue::Literal(Scalar::from(other.clone())),
                };
                args.insert(flag.clone(), resolved);
            }

            // §4.3 step 2e: chain wiring from the previous pass.
            if pass_idx > 0 {
                let prev_pass_name = &multi_pass.passes[pass_idx - 1].name;
                for (src_key, dst_key) in &multi_pass.chain {
                    let (src_step, src_flag) = split_chain_key(group_name, src_key)?;
                    let (dst_step, dst_flag) = split_chain_key(group_name, dst_key)?;
                    if template.name != dst_step {
                        continue;
                    }
                    let src_template = template_steps
                        .iter()
                        .find(|s| s.name == src_step)
                        .ok_or_else(|| RunnerError::MultiPassShape {
                            group: group_name.to_string(),
                            reason: format!("chain source step '{src_step}' not found in group template"),
                        })?;
                    let produced_ref =
                        src_template
                            .outputs
                            .get(&src_flag)
                            .ok_or_else(|| RunnerError::MultiPassShape {
                                group: group_name.to_string(),
                                reason: format!(
                                    "chain source '{src_step}.{src_flag}' is not one of that step's outputs"
                                ),
                            })?;
                    let d = strip_ref(group_name, produced_ref)?;
                    args.insert(dst_flag, ArgValue::Ref(format!("{d}_{prev_pass_name}")));
                }
            }

            let loop_spec = template
                .loop_spec
                .as_ref()
                .map(|l| -> RunnerResult<LoopSpec> {
                    let over = strip_ref(group_name, &l.over)?;
                    let into = strip_ref(group_name, &l.into)?;
                    Ok(LoopSpec {
                        over: if internal.contains(&over) {
                            format!("{over}_{}", pass.name)
                        } else {
                            over
                        },
                        into: if internal.contains(&into) {
                            format!("{into}_{}", pass.name)
                        } else {
                            into
                        },
                    })
                })
                .transpose()?;

            let task = template.task.clone().or_else(|| template.script.clone()).ok_or_else(|| {
                RunnerError::InvalidPipeline {
                    reason: format!("step '{}' in group '{group_name}' declares neither 'task' nor 'script'", template.name),
                }
            })?;

            concrete_steps.push(Step {
                name: concrete_name,
                task,
                interpreter: template.interpreter.clone(),
                inputs,
                outputs,
                args,
                optional: template.optional,
                disabled: template.disabled,
                group: Some(group_name.to_string()),
                loop_spec,
                extra_args: template.extra_args.clone(),
            });
        }
    }

    // §4.3 step 3: alias the un-suffixed name to the last pass's output.
    let last_pass_name = &multi_pass.passes.last().expect("checked non-empty above").name;
    for d in &internal {
        let suffixed = format!("{d}_{last_pass_name}");
        if let Some(node) = data.get(&suffixed).cloned() {
            data.insert(
                d.clone(),
                DataNode {
                    name: d.clone(),
                    node_type: node.node_type,
                    path: node.path,
                    display_name: node.display_name,
                    description: node.description,
                    pattern: node.pattern,
                },
            );
        }
        if let Some(producer) = last_producer.get(d) {
            producers.insert(d.clone(), producer.clone());
        }
    }

    Ok(concrete_steps)
}

fn register_suffixed_node(
    data: &mut IndexMap<String, DataNode>,
    original_name: &str,
    suffixed_name: &str,
    pass_name: &str,
    group_name: &str,
) -> RunnerResult<()> {
    if data.contains_key(suffixed_name) {
        return Ok(());
    }
    let original = data.get(original_name).cloned().ok_or_else(|| RunnerError::MultiPassShape {
        group: group_name.to_string(),
        reason: format!("internal data node '${original_name}' has no 'data:' entry to suffix"),
    })?;
    data.insert(
        suffixed_name.to_string(),
        DataNode {
            name: suffixed_name.to_string(),
            node_type: original.node_type,
            path: suffix_path(&original.path, pass_name),
            display_name: None,
            description: original.description.clone(),
            pattern: original.pattern.clone(),
        },
    );
    Ok(())
}

fn split_chain_key(group_name: &str, key: &str) -> RunnerResult<(String, String)> {
    key.split_once('.')
        .map(|(step, flag)| (step.to_string(), flag.to_string()))
        .ok_or_else(|| RunnerError::MultiPassShape {
            group: group_name.to_string(),
            reason: format!("chain key '{key}' must be 'step.flag'"),
        })
}
