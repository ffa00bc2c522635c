//! Engine subprocess execution and monitoring.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{MqError, Result};
use crate::fscall::TaskLog;

/// How often the child is polled for completion and advisory progress.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Run the engine on a parameter file and wait for it to finish.
///
/// Both output streams are captured by drain threads (the child would block
/// on a full pipe otherwise) and logged to the task log afterwards. With a
/// `timeout`, the child is killed once its runtime exceeds it. While
/// polling, the engine's `combined/proc` directory under `outdir` is
/// scanned for newly appeared files; those are advisory progress markers
/// and any failure to read them is swallowed.
pub fn run_engine(
    log: &TaskLog,
    binary: &Path,
    flag: &str,
    xml_path: &Path,
    outdir: &Path,
    timeout: Option<Duration>,
) -> Result<()> {
    let mut child = Command::new(binary)
        .arg(flag)
        .arg(xml_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    log.info(format!("Engine running with pid {}", child.id()));

    let stdout = capture_stream(child.stdout.take());
    let stderr = capture_stream(child.stderr.take());

    let started = Instant::now();
    let progress_dir = outdir.join("combined").join("proc");
    let mut seen_progress = HashSet::new();

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                log.error(format!("Engine timed out. Timeout was {}s", limit.as_secs()));
                let _ = child.kill();
                let _ = child.wait();
                drain_output(log, stdout, stderr);
                return Err(MqError::EngineTimeout(limit.as_secs()));
            }
        }
        scan_progress(log, &progress_dir, &mut seen_progress);

        let nap = match timeout {
            Some(limit) => POLL_INTERVAL
                .min(limit.saturating_sub(started.elapsed()))
                .max(Duration::from_millis(50)),
            None => POLL_INTERVAL,
        };
        thread::sleep(nap);
    };

    drain_output(log, stdout, stderr);
    match status.code() {
        Some(0) => {
            log.info("Engine finished successfully");
            Ok(())
        }
        Some(code) => {
            log.error(format!("Engine finished with error code {code}"));
            Err(MqError::EngineFailure(code))
        }
        None => {
            log.error("Engine terminated by signal");
            Err(MqError::EngineFailure(-1))
        }
    }
}

fn capture_stream<R: Read + Send + 'static>(stream: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buffer);
        }
        buffer
    })
}

fn drain_output(log: &TaskLog, stdout: JoinHandle<Vec<u8>>, stderr: JoinHandle<Vec<u8>>) {
    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    log.info(format!("Engine stdout: {}", String::from_utf8_lossy(&stdout)));
    log.info(format!("Engine stderr: {}", String::from_utf8_lossy(&stderr)));
}

fn scan_progress(log: &TaskLog, dir: &Path, seen: &mut HashSet<OsString>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            log.debug("Could not read engine progress directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if seen.insert(name.clone()) {
            log.info(format!("New engine status file: {}", name.to_string_lossy()));
        }
    }
}
