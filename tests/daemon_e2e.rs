#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use mqserve::config::Settings;
use mqserve::fscall::{submit, FsFuture, SubmitOptions, STARTED_FILE, STATUS_FILE, SUCCESS_FILE};
use mqserve::server::Daemon;

const PARAMS_YAML: &str = "\
rawFiles:
  - files:
      - name: input1
    params:
      defaults: default
fastaFiles:
  fileNames: []
globalParams:
  defaults: default
";

fn stub_engine(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("engine.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

struct Harness {
    _base: tempfile::TempDir,
    listen_dir: PathBuf,
    inputs_dir: PathBuf,
    settings: Settings,
}

impl Harness {
    fn new(engine_body: &str, num_workers: usize, sem_timeout: u64, mq_timeout: Option<u64>, max_tasks: usize) -> Self {
        let base = tempfile::tempdir().unwrap();
        let listen_dir = base.path().join("queue");
        let output_dir = base.path().join("out");
        let inputs_dir = base.path().join("inputs");
        fs::create_dir(&listen_dir).unwrap();
        fs::create_dir(&output_dir).unwrap();
        fs::create_dir(&inputs_dir).unwrap();
        let engine = stub_engine(base.path(), engine_body);

        let mut settings = Settings::default();
        settings.server.listen_dir = Some(listen_dir.clone());
        settings.server.output_dir = Some(output_dir);
        settings.server.engine_path = Some(engine);
        settings.limits.num_workers = num_workers;
        settings.limits.sem_timeout_secs = sem_timeout;
        settings.limits.mq_timeout_secs = mq_timeout;
        settings.limits.scan_interval_secs = 1;
        settings.limits.heartbeat_interval_secs = 1;
        settings.limits.max_tasks = Some(max_tasks);

        Self {
            _base: base,
            listen_dir,
            inputs_dir,
            settings,
        }
    }

    fn serve(&self) -> thread::JoinHandle<()> {
        let settings = self.settings.clone();
        thread::spawn(move || {
            let daemon = Daemon::new(&settings).unwrap();
            daemon.serve().unwrap();
        })
    }

    fn input(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.inputs_dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn submit(&self, infiles: &[PathBuf]) -> FsFuture {
        submit(
            &self.listen_dir,
            infiles,
            SubmitOptions {
                beat_timeout: Duration::from_secs(2),
                timeout: Duration::from_secs(30),
            },
        )
        .unwrap()
    }
}

#[test]
fn happy_path_produces_success_and_engine_output() {
    let harness = Harness::new("exit 0", 2, 200, None, 1);
    let server = harness.serve();

    let raw = harness.input("input1.raw", "spectra");
    let params = harness.input("params.yaml", PARAMS_YAML);
    let future = harness.submit(&[raw, params]);

    let outdir = future.result(Some(Duration::from_secs(60))).unwrap();
    server.join().unwrap();

    let workdir = future.workdir();
    assert!(workdir.join(STARTED_FILE).exists());
    assert!(workdir.join(SUCCESS_FILE).exists());
    assert_eq!(
        fs::read_to_string(workdir.join(STATUS_FILE)).unwrap(),
        "SUCCESS"
    );
    assert_eq!(future.status(), "SUCCESS");

    let xml = fs::read_to_string(outdir.join("params.xml")).unwrap();
    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains("input1.raw"));
    assert!(xml.contains("<fixedCombinedFolder>"));

    let log = future.log().unwrap();
    assert!(log.contains("Engine finished successfully"));
}

#[test]
fn missing_parameter_file_fails_without_an_engine_run() {
    let harness = Harness::new("echo ran > \"$0.ran\"", 2, 200, None, 1);
    let server = harness.serve();

    let raw = harness.input("input1.raw", "spectra");
    let future = harness.submit(&[raw]);

    let err = future.result(Some(Duration::from_secs(60))).unwrap_err();
    server.join().unwrap();

    assert!(err.to_string().contains("No parameter file"), "got: {err}");
    // the stub never ran
    let engine = harness.settings.server.engine_path.clone().unwrap();
    assert!(!PathBuf::from(format!("{}.ran", engine.display())).exists());
}

#[test]
fn two_parameter_files_fail_the_request() {
    let harness = Harness::new("exit 0", 2, 200, None, 1);
    let server = harness.serve();

    let raw = harness.input("input1.raw", "spectra");
    let first = harness.input("a.yaml", PARAMS_YAML);
    let second = harness.input("b.json", "{}");
    let future = harness.submit(&[raw, first, second]);

    let err = future.result(Some(Duration::from_secs(60))).unwrap_err();
    server.join().unwrap();

    assert!(err.to_string().contains("Too many parameter files"), "got: {err}");
}

#[test]
fn gate_timeout_fails_the_queued_task() {
    let harness = Harness::new("sleep 3", 1, 1, None, 2);
    let server = harness.serve();

    let raw = harness.input("input1.raw", "spectra");
    let params = harness.input("params.yaml", PARAMS_YAML);
    let first = harness.submit(&[raw.clone(), params.clone()]);
    let second = harness.submit(&[raw, params]);

    let outcomes = [
        first.result(Some(Duration::from_secs(120))),
        second.result(Some(Duration::from_secs(120))),
    ];
    server.join().unwrap();

    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one task should win the gate");
    let failure = outcomes
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one task should time out");
    assert!(
        failure.to_string().contains("Timeout. No resources available."),
        "got: {failure}"
    );
}

#[test]
fn slow_engine_is_killed_and_reported() {
    let harness = Harness::new("sleep 30", 2, 200, Some(2), 1);
    let server = harness.serve();

    let raw = harness.input("input1.raw", "spectra");
    let params = harness.input("params.yaml", PARAMS_YAML);
    let future = harness.submit(&[raw, params]);

    let err = future.result(Some(Duration::from_secs(60))).unwrap_err();
    server.join().unwrap();

    assert!(err.to_string().contains("timed out"), "got: {err}");
    // the claim sentinel and the workspace survive the failure
    let workdir = future.workdir();
    assert!(workdir.join(STARTED_FILE).exists());
    assert!(workdir.join("output").is_dir());
    assert!(workdir.join("output").join("params.xml").exists());
}

#[test]
fn checksum_sidecars_are_verified() {
    let harness = Harness::new("exit 0", 2, 200, None, 1);
    let server = harness.serve();

    let raw = harness.input("input1.raw", "spectra");
    let sidecar = harness.input("input1.sha", "0000000000000000000000000000000000000000000000000000000000000000  input1.raw\n");
    let params = harness.input("params.yaml", PARAMS_YAML);
    let future = harness.submit(&[raw, sidecar, params]);

    let err = future.result(Some(Duration::from_secs(60))).unwrap_err();
    server.join().unwrap();

    assert!(err.to_string().contains("checksum"), "got: {err}");
}
