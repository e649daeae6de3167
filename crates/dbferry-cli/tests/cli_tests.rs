//! CLI integration tests for dbferry.
//!
//! These tests cover argument parsing, help output, configuration checks
//! and exit codes. None of them needs a database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Get a command for the dbferry binary.
fn cmd() -> Command {
    Command::cargo_bin("dbferry").unwrap()
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

const TABLES: &str = r#"
- name: customers
  orderSQL: id
  keyFields: [id]
- name: orders
  orderSQL: id
  keyFields: [id]
  references: [customers]
- name: order_lines
  orderSQL: id
  references: [orders]
"#;

fn profile(tables: &str) -> String {
    format!(
        r#"
mode: once
threads: 2
instances:
  - name: main
    tasks:
      - name: copy
        kind: migration
        sources:
          - {{ dialect: mssql, host: sql01, catalog: sales, user: sa, password: secret }}
        dest: {{ dialect: postgres, host: pg01, catalog: sales }}
        tables: {}
"#,
        tables
    )
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("prefetch"))
        .stdout(predicate::str::contains("levels"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--once"))
        .stdout(predicate::str::contains("--no-transaction"))
        .stdout(predicate::str::contains("--threads"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dbferry"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_exist() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--report"));
}

#[test]
fn test_log_flags_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

// =============================================================================
// Check Tests
// =============================================================================

#[test]
fn test_check_valid_profile() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tables.yaml", TABLES);
    let path = write(dir.path(), "profile.yaml", &profile("tables.yaml"));

    cmd()
        .args(["--config", path.to_str().unwrap(), "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 instances, 1 tasks, 3 tables"));
}

#[test]
fn test_check_json_output() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tables.yaml", TABLES);
    let path = write(dir.path(), "profile.yaml", &profile("tables.yaml"));

    cmd()
        .args(["--config", path.to_str().unwrap(), "--output-json", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\":true"));
}

#[test]
fn test_levels_from_table_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tables.yaml", TABLES);
    let path = write(dir.path(), "profile.yaml", &profile("tables.yaml"));

    cmd()
        .args(["--config", path.to_str().unwrap(), "levels"])
        .assert()
        .success()
        .stdout(predicate::str::contains("100: customers"))
        .stdout(predicate::str::contains("200: orders"))
        .stdout(predicate::str::contains("300: order_lines"));
}

#[test]
fn test_levels_reports_cycle() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "tables.yaml",
        "- name: a\n  orderSQL: id\n  references: [b]\n- name: b\n  orderSQL: id\n  references: [a]\n",
    );
    let path = write(dir.path(), "profile.yaml", &profile("tables.yaml"));

    cmd()
        .args(["--config", path.to_str().unwrap(), "levels"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0: a, b"))
        .stdout(predicate::str::contains("unresolved cycle"));
}

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 2)
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_2() {
    cmd()
        .args(["--config", "nonexistent_profile.yaml", "check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nonexistent_profile.yaml"));
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "check"])
        .assert()
        .code(2);
}

#[test]
fn test_zero_page_size_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tables.yaml", "- name: a\n  orderSQL: id\n  pageSize: 0\n");
    let path = write(dir.path(), "profile.yaml", &profile("tables.yaml"));

    cmd()
        .args(["--config", path.to_str().unwrap(), "check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("pageSize 0"));
}

#[test]
fn test_update_without_keys_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tables.yaml", "- name: a\n  orderSQL: id\n  mode: Update\n");
    let path = write(dir.path(), "profile.yaml", &profile("tables.yaml"));

    cmd()
        .args(["--config", path.to_str().unwrap(), "run", "--once"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("keyFields"));
}

#[test]
fn test_unknown_dialect_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tables.yaml", TABLES);
    let content = profile("tables.yaml").replace("dialect: postgres", "dialect: oracle");
    let path = write(dir.path(), "profile.yaml", &content);

    cmd()
        .args(["--config", path.to_str().unwrap(), "check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("oracle"));
}

#[test]
fn test_unknown_filter_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "tables.yaml",
        "- name: a\n  orderSQL: id\n  filter: rot13\n",
    );
    let path = write(dir.path(), "profile.yaml", &profile("tables.yaml"));

    cmd()
        .args(["--config", path.to_str().unwrap(), "check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("rot13"));
}
