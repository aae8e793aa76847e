use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn evtx() -> Command {
    let mut cmd = Command::cargo_bin("evtx-ctl").unwrap();
    cmd.env_remove("EVTX_MODE").env_remove("EVTX_PORT");
    cmd
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("evtx.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_config_show_reflects_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "[transport]\ndefault_mode = \"long\"\n\n[server]\nport = 9911\n",
    );

    evtx()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("default_mode = \"long\""))
        .stdout(predicate::str::contains("port = 9911"))
        .stdout(predicate::str::contains("sse_supported = true"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = TempDir::new().unwrap();

    evtx()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_invalid_config_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[server\nport = ");

    evtx()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse"));
}

#[test]
fn test_queue_pop_and_purge() {
    let dir = TempDir::new().unwrap();
    let queues = dir.path().join("queues");
    let path = write_config(
        &dir,
        &format!("[queue]\ndir = {:?}\n", queues.to_string_lossy()),
    );
    fs::create_dir_all(&queues).unwrap();
    fs::write(
        queues.join("evq_echo_s1.json"),
        r#"[{"type":"token","data":{"t":"He"}}]"#,
    )
    .unwrap();

    evtx()
        .arg("--config")
        .arg(&path)
        .args(["queue", "pop", "evq_echo_s1"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"data":{"t":"He"},"type":"token"}"#));

    evtx()
        .arg("--config")
        .arg(&path)
        .args(["queue", "pop", "evq_echo_s1"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"type":"empty"}"#));

    evtx()
        .arg("--config")
        .arg(&path)
        .args(["queue", "purge", "--max-age-secs", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Purged 1 queue record(s)"));
    assert!(!queues.join("evq_echo_s1.json").exists());
}

#[test]
fn test_help_lists_commands() {
    evtx()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("listen"))
        .stdout(predicate::str::contains("queue"));
}
