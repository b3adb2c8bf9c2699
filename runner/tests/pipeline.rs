use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    fs,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{Command, Output},
    thread,
    time::{Duration, Instant},
};

const BINARY: &str = env!("CARGO_BIN_EXE_fastjob");

fn fastjob(base: &Path, args: &[&str]) -> Output {
    Command::new(BINARY)
        .arg("--directory")
        .arg(base)
        .args(args)
        .output()
        .unwrap()
}

fn files(base: &Path, key: &str) -> Vec<PathBuf> {
    fs::read_dir(base.join(format!("sample-{key}")))
        .map(|entries| entries.map(|entry| entry.unwrap().path()).collect())
        .unwrap_or_default()
}

fn write_space(base: &Path, contents: &str) -> String {
    let path = base.join("space.yaml");
    fs::write(&path, contents).unwrap();

    path.to_string_lossy().into_owned()
}

#[test]
fn generate_then_run_with_worker_pool() {
    let base = tempfile::tempdir().unwrap();
    let space = write_space(
        base.path(),
        "space:\n  command: echo\n  dir: [a, b c, d e f, g]\ncount: 2\n",
    );

    assert!(fastjob(base.path(), &["-g", "--space", &space]).status.success());
    assert_eq!(files(base.path(), "queue").len(), 8);

    let run = fastjob(base.path(), &["--space", &space, "--cores", "3"]);
    assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stdout));

    assert!(files(base.path(), "queue").is_empty());
    assert!(files(base.path(), "wip").is_empty());
    assert_eq!(files(base.path(), "done").len(), 8);
    assert_eq!(files(base.path(), "results").len(), 8);

    for result in files(base.path(), "results") {
        let result: serde_json::Value =
            serde_json::from_slice(&fs::read(&result).unwrap()).unwrap();
        let dir = result["config"]["dir"].as_str().unwrap();

        assert_eq!(
            result["line count"].as_u64().unwrap() as usize,
            dir.split_whitespace().count()
        );
        assert_eq!(result["length"].as_u64().unwrap() as usize, dir.len() + 1);
    }

    // everything is known already, nothing is queued again
    assert!(fastjob(base.path(), &["-g", "--space", &space]).status.success());
    assert!(files(base.path(), "queue").is_empty());
}

#[test]
fn failing_jobs_end_in_error() {
    let base = tempfile::tempdir().unwrap();
    let space = write_space(base.path(), "space:\n  command: [\"true\", \"false\"]\n");

    assert!(fastjob(base.path(), &["-g", "--space", &space]).status.success());
    assert!(fastjob(base.path(), &["--space", &space]).status.success());

    assert_eq!(files(base.path(), "done").len(), 1);
    assert_eq!(files(base.path(), "error").len(), 1);
    // only the successful run leaves a result behind
    assert_eq!(files(base.path(), "results").len(), 1);
}

#[test]
fn runs_job_file_directly() {
    let base = tempfile::tempdir().unwrap();
    let job = base.path().join("job.cfg");
    fs::write(&job, r#"{"command": "echo", "dir": "direct", "run": 1}"#).unwrap();

    let output = fastjob(base.path(), &[job.to_str().unwrap()]);

    assert!(output.status.success());
    assert!(job.exists());
    assert_eq!(files(base.path(), "results").len(), 1);
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"length\": 7"));
}

#[test]
fn rejects_conflicting_options() {
    let base = tempfile::tempdir().unwrap();

    assert!(!fastjob(base.path(), &["--debug", "--silent"]).status.success());
    assert!(!fastjob(base.path(), &["-g", "job.cfg"]).status.success());
    assert!(!fastjob(base.path(), &["--cores", "0"]).status.success());
}

#[test]
fn terminated_worker_moves_claim_to_failure() {
    let base = tempfile::tempdir().unwrap();
    let space = write_space(base.path(), "space:\n  command: sleep\n  dir: \"5\"\n");
    assert!(fastjob(base.path(), &["-g", "--space", &space]).status.success());

    let mut worker = Command::new(BINARY)
        .arg("--worker")
        .arg("--directory")
        .arg(base.path())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while files(base.path(), "wip").is_empty() {
        assert!(Instant::now() < deadline, "worker never claimed the job");
        thread::sleep(Duration::from_millis(20));
    }
    // give the worker time to reach the handler
    thread::sleep(Duration::from_millis(200));

    kill(Pid::from_raw(worker.id() as i32), Signal::SIGTERM).unwrap();
    let status = worker.wait().unwrap();

    assert_eq!(status.code(), Some(128 + Signal::SIGTERM as i32));
    assert!(status.signal().is_none());
    assert!(files(base.path(), "wip").is_empty());
    assert_eq!(files(base.path(), "failure").len(), 1);
    assert!(files(base.path(), "results").is_empty());
}
