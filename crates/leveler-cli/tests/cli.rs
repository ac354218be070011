//! Tests for the `leveler` binary
//!
//! | Exit Code | Meaning |
//! |-----------|---------|
//! | 0 | Workload leveled (or checked) |
//! | 1 | Unreadable workload, invalid graph or leveling failure |

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use leveler_core::Schedule;
use pretty_assertions::assert_eq;
use tempfile::{tempdir, TempDir};

const BASIC_PRIORITY: &str = r#"
[project]
name = "basic"
start = "2000-01-01"
end = "2000-01-10"

[[resources]]
id = "R1"
daily = [{ from = "2000-01-01", days = 10, hours = 1 }]

[[tasks]]
id = "T1"
priority = 100
sizing = 2
resources = { R1 = 2 }

[[tasks]]
id = "T2"
priority = 200
sizing = 2
resources = { R1 = 2 }
"#;

const TOO_BIG: &str = r#"
[project]
name = "too-big"
start = "2000-01-01"
end = "2000-01-10"

[[resources]]
id = "R1"
daily = [{ from = "2000-01-01", days = 10, hours = 1 }]

[[tasks]]
id = "big"
priority = 100
sizing = 20
resources = { R1 = 20 }
"#;

fn leveler_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_leveler"))
}

fn write_workload(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn run(args: &[&str], file: &Path) -> Output {
    Command::new(leveler_binary())
        .args(args)
        .arg(file)
        .env_remove("RUST_LOG")
        .env_remove("LEVELER_MAX_STEPS")
        .output()
        .expect("failed to execute leveler")
}

#[test]
fn level_prints_calendar() {
    let dir = tempdir().unwrap();
    let file = write_workload(&dir, "basic.toml", BASIC_PRIORITY);

    let output = run(&["level"], &file);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout,
        "----------+-1234567890\n\
         T1 100 R1 |   ==\n\
         T2 200 R1 | ==\n\
         ----------+-1234567890\n"
    );
}

#[test]
fn level_prints_json_schedule() {
    let dir = tempdir().unwrap();
    let file = write_workload(&dir, "basic.toml", BASIC_PRIORITY);

    let output = run(&["level", "--format", "json"], &file);

    assert!(output.status.success());
    let schedule: Schedule = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(schedule.len(), 2);
    assert_eq!(schedule.get("T2").unwrap().start.to_string(), "2000-01-01");
    assert_eq!(schedule.get("T1").unwrap().start.to_string(), "2000-01-03");
}

#[test]
fn level_reads_json_workloads() {
    let dir = tempdir().unwrap();
    let workload: toml::Value = toml::from_str(BASIC_PRIORITY).unwrap();
    let file = write_workload(&dir, "basic.json", &serde_json::to_string(&workload).unwrap());

    let output = run(&["level"], &file);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("T2 200 R1 | =="));
}

#[test]
fn infeasible_workload_exits_1() {
    let dir = tempdir().unwrap();
    let file = write_workload(&dir, "big.toml", TOO_BIG);

    let output = run(&["level"], &file);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("big: needs 20 hours"), "stderr: {}", stderr);
    assert!(output.stdout.is_empty());
}

#[test]
fn step_budget_flag_overrides_file() {
    let dir = tempdir().unwrap();
    let file = write_workload(&dir, "basic.toml", BASIC_PRIORITY);

    let output = run(&["level", "--max-steps", "1"], &file);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("budget exhausted"), "stderr: {}", stderr);
}

#[test]
fn missing_file_exits_1() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("absent.toml");

    let output = run(&["level"], &file);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read"));
}

#[test]
fn malformed_file_exits_1() {
    let dir = tempdir().unwrap();
    let file = write_workload(&dir, "broken.toml", "[project\nname = ");

    let output = run(&["level"], &file);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to parse"));
}

#[test]
fn check_shows_partitions_and_ordering() {
    let dir = tempdir().unwrap();
    let file = write_workload(&dir, "basic.toml", BASIC_PRIORITY);

    let output = run(&["check"], &file);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout,
        "basic: 2 task(s), 1 resource(s)\n\
         Partitions:\n  \
         1: T1, T2\n\
         Ordering: T2 (200), T1 (100)\n"
    );
}

#[test]
fn check_rejects_unknown_successor() {
    let dir = tempdir().unwrap();
    let content = BASIC_PRIORITY.replace("sizing = 2\nresources = { R1 = 2 }\n\n[[tasks]]", "sizing = 2\nresources = { R1 = 2 }\nsuccessors = [\"ghost\"]\n\n[[tasks]]");
    let file = write_workload(&dir, "ghost.toml", &content);

    let output = run(&["check"], &file);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("ghost"));
}
