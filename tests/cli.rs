// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! Black-box CLI specs: invoke the `loom-runner` binary against fixture
//! pipelines and check stdout/exit codes, per §6.2/§6.2.1.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_task(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, "#!/bin/sh\ntrue\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path.to_string_lossy().into_owned()
}

fn cmd() -> Command {
    Command::cargo_bin("loom-runner").unwrap()
}

#[test]
fn run_dry_run_over_a_linear_chain_prints_every_command() {
    let tmp = tempfile::tempdir().unwrap();
    let gen_a = write_task(tmp.path(), "gen_a.sh");
    let gen_b = write_task(tmp.path(), "gen_b.sh");

    let pipeline_path = tmp.path().join("pipeline.yaml");
    fs::write(
        &pipeline_path,
        format!(
            r#"
data:
  a: {{ type: csv, path: "a.csv" }}
  b: {{ type: csv, path: "b.csv" }}
pipeline:
  - name: A
    task: "{gen_a}"
    outputs: {{ "-o": $a }}
  - name: B
    task: "{gen_b}"
    inputs: {{ "-i": $a }}
    outputs: {{ "-o": $b }}
"#
        ),
    )
    .unwrap();

    cmd()
        .arg("run")
        .arg(&pipeline_path)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains(gen_a))
        .stdout(predicate::str::contains(gen_b))
        .stdout(predicate::str::contains("2/2 steps succeeded"));
}

#[test]
fn run_reports_failure_exit_code_when_a_step_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let failing = tmp.path().join("fail.sh");
    fs::write(&failing, "#!/bin/sh\nexit 1\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&failing, fs::Permissions::from_mode(0o755)).unwrap();
    }

    let pipeline_path = tmp.path().join("pipeline.yaml");
    fs::write(
        &pipeline_path,
        format!(
            r#"
data:
  out: {{ type: csv, path: "out.csv" }}
pipeline:
  - name: A
    task: "{}"
    outputs: {{ "-o": $out }}
"#,
            failing.to_string_lossy()
        ),
    )
    .unwrap();

    cmd().arg("run").arg(&pipeline_path).assert().failure().code(1);
}

#[test]
fn validate_reports_load_errors_for_a_malformed_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline_path = tmp.path().join("pipeline.yaml");
    fs::write(&pipeline_path, "variables:\n  old: {}\npipeline: []\n").unwrap();

    cmd()
        .arg("validate")
        .arg(&pipeline_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("variables"));
}

#[test]
fn validate_warns_about_an_unconsumed_data_node() {
    let tmp = tempfile::tempdir().unwrap();
    let gen = write_task(tmp.path(), "gen.sh");
    let pipeline_path = tmp.path().join("pipeline.yaml");
    fs::write(
        &pipeline_path,
        format!(
            r#"
data:
  out: {{ type: csv, path: "out.csv" }}
pipeline:
  - name: A
    task: "{gen}"
    outputs: {{ "-o": $out }}
"#
        ),
    )
    .unwrap();

    cmd()
        .arg("validate")
        .arg(&pipeline_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("no consumer"));
}

#[test]
fn graph_text_format_lists_steps_in_dependency_order() {
    let tmp = tempfile::tempdir().unwrap();
    let gen_a = write_task(tmp.path(), "gen_a.sh");
    let gen_b = write_task(tmp.path(), "gen_b.sh");

    let pipeline_path = tmp.path().join("pipeline.yaml");
    fs::write(
        &pipeline_path,
        format!(
            r#"
data:
  a: {{ type: csv, path: "a.csv" }}
  b: {{ type: csv, path: "b.csv" }}
pipeline:
  - name: A
    task: "{gen_a}"
    outputs: {{ "-o": $a }}
  - name: B
    task: "{gen_b}"
    inputs: {{ "-i": $a }}
    outputs: {{ "-o": $b }}
"#
        ),
    )
    .unwrap();

    cmd()
        .arg("graph")
        .arg(&pipeline_path)
        .arg("--format")
        .arg("dot")
        .assert()
        .success()
        .stdout(predicate::str::contains("digraph pipeline"))
        .stdout(predicate::str::contains("\"A\" -> \"B\""));
}

#[test]
fn status_reports_missing_before_a_step_has_run_and_fresh_after() {
    let tmp = tempfile::tempdir().unwrap();
    let gen = write_task(tmp.path(), "gen.sh");
    let pipeline_path = tmp.path().join("pipeline.yaml");
    fs::write(
        &pipeline_path,
        format!(
            r#"
data:
  out: {{ type: csv, path: "out.csv" }}
pipeline:
  - name: A
    task: "{gen}"
    outputs: {{ "-o": $out }}
"#
        ),
    )
    .unwrap();

    cmd()
        .arg("status")
        .arg(&pipeline_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("missing"));

    cmd().arg("run").arg(&pipeline_path).assert().success();

    cmd()
        .arg("status")
        .arg(&pipeline_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("fresh"));
}

#[test]
fn clean_permanently_deletes_a_produced_artifact_with_yes() {
    let tmp = tempfile::tempdir().unwrap();
    let out_path = tmp.path().join("out.csv");
    fs::write(&out_path, "data").unwrap();

    let pipeline_path = tmp.path().join("pipeline.yaml");
    fs::write(
        &pipeline_path,
        r#"
data:
  out: { type: csv, path: "out.csv" }
pipeline:
  - name: A
    task: "./gen.sh"
    outputs: { "-o": $out }
"#,
    )
    .unwrap();

    cmd()
        .arg("clean")
        .arg(&pipeline_path)
        .arg("--permanent")
        .arg("--yes")
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"));

    assert!(!out_path.exists());
}

#[test]
fn run_rejects_conflicting_step_and_from_flags() {
    let tmp = tempfile::tempdir().unwrap();
    let gen = write_task(tmp.path(), "gen.sh");
    let pipeline_path = tmp.path().join("pipeline.yaml");
    fs::write(
        &pipeline_path,
        format!(
            r#"
data:
  out: {{ type: csv, path: "out.csv" }}
pipeline:
  - name: A
    task: "{gen}"
    outputs: {{ "-o": $out }}
"#
        ),
    )
    .unwrap();

    cmd()
        .arg("run")
        .arg(&pipeline_path)
        .arg("--step")
        .arg("A")
        .arg("--from")
        .arg("A")
        .assert()
        .failure();
}

#[test]
fn run_rejects_two_steps_declaring_the_same_output() {
    let tmp = tempfile::tempdir().unwrap();
    let gen1 = write_task(tmp.path(), "gen1.sh");
    let gen2 = write_task(tmp.path(), "gen2.sh");

    let pipeline_path = tmp.path().join("pipeline.yaml");
    fs::write(
        &pipeline_path,
        format!(
            r#"
data:
  shared: {{ type: csv, path: "shared.csv" }}
execution:
  parallel: true
pipeline:
  - name: s1
    task: "{gen1}"
    outputs: {{ "-o": $shared }}
  - name: s2
    task: "{gen2}"
    outputs: {{ "-o": $shared }}
"#
        ),
    )
    .unwrap();

    // Two steps claiming the same output are rejected at load time (§3.2
    // invariant 2), before either `run` or its parallel scheduler ever sees
    // them — `validate_parallel_execution`'s own conflict branch is exercised
    // directly as a unit instead (see `analysis::tests::conflicting_pipeline`).
    cmd()
        .arg("run")
        .arg(&pipeline_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("is produced by both"));
}
