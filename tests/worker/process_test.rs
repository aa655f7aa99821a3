//! Tests for worker process spawning.

use std::ffi::OsString;

use tokio::io::AsyncReadExt;
use visitor_flow::worker::{SpawnError, WorkerCommand, WorkerProcess};

#[test]
fn build_args_puts_script_first() {
    let command = WorkerCommand::new("python3")
        .script("main.py")
        .args(["--camera", "0"]);

    assert_eq!(command.program(), "python3");
    assert_eq!(
        command.build_args(),
        vec![
            OsString::from("main.py"),
            OsString::from("--camera"),
            OsString::from("0"),
        ]
    );
}

#[test]
fn search_path_is_prepended() {
    let command = WorkerCommand::new("python3")
        .working_dir("/opt/app")
        .search_path_var("PYTHONPATH");

    let (name, value) = command
        .search_path_value(Some(OsString::from("/usr/lib/site")))
        .expect("search path configured");
    assert_eq!(name, "PYTHONPATH");

    let paths: Vec<_> = std::env::split_paths(&value).collect();
    assert_eq!(paths[0], std::path::PathBuf::from("/opt/app"));
    assert_eq!(paths[1], std::path::PathBuf::from("/usr/lib/site"));
}

#[tokio::test]
async fn spawn_missing_program_is_not_found() {
    let err = WorkerProcess::spawn(&WorkerCommand::new("/nonexistent/visitor-worker"))
        .expect_err("spawn should fail");
    assert!(matches!(err, SpawnError::NotFound(_)));
}

#[tokio::test]
async fn spawned_worker_sees_env_and_cwd() {
    let dir = tempfile::tempdir().expect("tempdir");
    let command = WorkerCommand::new("sh")
        .arg("-c")
        .arg("pwd; echo \"$PYTHONPATH\"; echo \"$STORE_ID\"")
        .working_dir(dir.path())
        .search_path_var("PYTHONPATH")
        .env("STORE_ID", "store-7");

    let mut process = WorkerProcess::spawn(&command).expect("spawn sh");
    let mut stdout = process.take_stdout().expect("stdout piped");
    let mut output = String::new();
    stdout.read_to_string(&mut output).await.expect("read stdout");
    let status = process.wait().await.expect("wait");

    assert!(status.success());
    let lines: Vec<&str> = output.lines().collect();
    let root = dir.path().canonicalize().expect("canonical tempdir");
    assert_eq!(
        std::path::Path::new(lines[0]).canonicalize().expect("pwd"),
        root
    );
    assert!(lines[1].starts_with(&dir.path().display().to_string()));
    assert_eq!(lines[2], "store-7");
}

#[cfg(unix)]
#[tokio::test]
async fn terminate_sends_sigterm() {
    let command = WorkerCommand::new("sh")
        .arg("-c")
        .arg("trap 'exit 7' TERM; while :; do sleep 0.05; done");
    let mut process = WorkerProcess::spawn(&command).expect("spawn sh");

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    process.terminate().expect("signal delivered");
    let status = process.wait().await.expect("wait");
    assert_eq!(status.code(), Some(7));
}
