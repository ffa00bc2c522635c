//! A claimed request directory and its task-local log.

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{MqError, Result};
use crate::fscall::heartbeat::Heartbeat;
use crate::fscall::{checksum, Status};
use crate::fscall::{BEAT_FILE, FAILED_FILE, LOG_FILE, OUTPUT_DIR, STARTED_FILE, START_FILE, STATUS_FILE, SUCCESS_FILE};

/// Names the server owns; never treated as task input.
const PROTOCOL_FILES: [&str; 7] = [
    START_FILE,
    STARTED_FILE,
    STATUS_FILE,
    BEAT_FILE,
    SUCCESS_FILE,
    FAILED_FILE,
    LOG_FILE,
];

/// Sidecar extensions excluded from the input set.
const CHECKSUM_EXTENSIONS: [&str; 2] = ["sha", "md5"];

/// Log sink writing to `logfile.txt` inside the request directory.
///
/// Every record is also forwarded to the global log with the task id
/// attached. Writes flush immediately so that clients polling the file see
/// a current log.
#[derive(Clone)]
#[derive(Debug)]
pub struct TaskLog {
    uuid: Arc<str>,
    sink: Arc<Mutex<File>>,
}

impl TaskLog {
    pub fn open(path: &Path, uuid: &str) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            uuid: Arc::from(uuid),
            sink: Arc::new(Mutex::new(file)),
        })
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.write_line("DEBUG", msg.as_ref());
        tracing::debug!(task = %self.uuid, "{}", msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.write_line("INFO", msg.as_ref());
        tracing::info!(task = %self.uuid, "{}", msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.write_line("WARN", msg.as_ref());
        tracing::warn!(task = %self.uuid, "{}", msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.write_line("ERROR", msg.as_ref());
        tracing::error!(task = %self.uuid, "{}", msg.as_ref());
    }

    pub fn critical(&self, msg: impl AsRef<str>) {
        self.write_line("CRITICAL", msg.as_ref());
        tracing::error!(task = %self.uuid, "{}", msg.as_ref());
    }

    fn write_line(&self, level: &str, msg: &str) {
        let line = format!("{} [{level}] {msg}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.write_all(line.as_bytes());
            let _ = sink.flush();
        }
    }

    /// Force the log onto disk; called on terminal transitions so clients
    /// never observe a terminal state with a stale log.
    pub fn close(&self) {
        if let Ok(sink) = self.sink.lock() {
            let _ = sink.sync_all();
        }
    }
}

/// One claimed request: a directory owned by this server process.
#[derive(Debug)]
pub struct FsRequest {
    uuid: String,
    dir: PathBuf,
    infiles: Vec<PathBuf>,
    outdir: PathBuf,
    beat_path: PathBuf,
    log: TaskLog,
}

impl FsRequest {
    /// Take ownership of a request directory. The caller must already have
    /// won the `STARTED` create-exclusive race.
    pub fn claim(dir: PathBuf) -> Result<Self> {
        let uuid = dir
            .file_name()
            .and_then(OsStr::to_str)
            .and_then(|name| Uuid::parse_str(name).ok())
            .unwrap_or_else(Uuid::new_v4)
            .to_string();

        let infiles = collect_infiles(&dir)?;

        let log_path = dir.join(LOG_FILE);
        let log_existed = log_path.exists();
        let log = TaskLog::open(&log_path, &uuid)?;
        if log_existed {
            log.warn("logfile already exists, appending");
        }
        log.info(format!("Create new task for {} with uuid {}", dir.display(), uuid));
        log.info("Start log in task-local logfile");

        let outdir = dir.join(OUTPUT_DIR);
        if let Err(e) = fs::create_dir(&outdir) {
            if e.kind() == io::ErrorKind::AlreadyExists {
                return Err(MqError::WorkspaceExists(dir));
            }
            return Err(e.into());
        }

        let beat_path = dir.join(BEAT_FILE);
        if beat_path.exists() {
            log.warn("BEAT file already exists, appending");
        }

        Ok(Self {
            uuid,
            dir,
            infiles,
            outdir,
            beat_path,
            log,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn infiles(&self) -> &[PathBuf] {
        &self.infiles
    }

    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    pub fn log(&self) -> &TaskLog {
        &self.log
    }

    /// Start the liveness writer for this request.
    pub fn heartbeat(&self, interval: Duration) -> Heartbeat {
        Heartbeat::start(self.beat_path.clone(), interval)
    }

    /// Verify every input file against its `.sha` sidecar, if present.
    pub fn verify_checksums(&self) -> Result<()> {
        for file in &self.infiles {
            checksum::verify_sidecar(&self.log, file)?;
        }
        Ok(())
    }

    pub fn set_status(&self, status: Status) {
        self.write_file(STATUS_FILE, Some(&status.to_string()));
        self.log.info(format!("Switch to status {status}"));
    }

    /// Terminal success; the optional message becomes the `SUCCESS` body.
    pub fn success(&self, message: Option<&str>) {
        self.write_file(SUCCESS_FILE, message);
        self.log.info("Successfully finished task");
        self.set_status(Status::Success);
        self.log.close();
    }

    /// Terminal failure with a mandatory message.
    pub fn fail(&self, message: &str) {
        self.log.error(format!("Task failed. Message was: {message}"));
        self.write_file(FAILED_FILE, Some(message));
        self.set_status(Status::Failed);
        self.log.close();
    }

    // Progress files are best effort: a failed write is logged but never
    // aborts the task.
    fn write_file(&self, name: &str, body: Option<&str>) {
        if let Err(e) = fs::write(self.dir.join(name), body.unwrap_or("")) {
            self.log.critical(format!("Can not write status file {name}: {e}"));
        }
    }
}

fn collect_infiles(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if PROTOCOL_FILES.contains(&name.as_ref()) {
            continue;
        }
        let extension = entry
            .path()
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);
        if extension
            .as_deref()
            .is_some_and(|ext| CHECKSUM_EXTENSIONS.contains(&ext))
        {
            continue;
        }
        files.push(entry.into_path());
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn request_dir() -> (tempfile::TempDir, PathBuf) {
        let base = tempdir().unwrap();
        let dir = base.path().join("a2f6cbe6-6f34-4d69-8b7d-4cbe9f1d6a01");
        fs::create_dir(&dir).unwrap();
        (base, dir)
    }

    #[test]
    fn test_claim_collects_inputs_and_creates_workspace() {
        let (_base, dir) = request_dir();
        fs::write(dir.join("input1.raw"), b"spectra").unwrap();
        fs::write(dir.join("params.yaml"), b"{}").unwrap();
        fs::write(dir.join("input1.sha"), b"cafe").unwrap();
        fs::write(dir.join(START_FILE), b"").unwrap();

        let request = FsRequest::claim(dir.clone()).unwrap();

        assert_eq!(request.uuid(), "a2f6cbe6-6f34-4d69-8b7d-4cbe9f1d6a01");
        assert!(dir.join(OUTPUT_DIR).is_dir());
        let names: Vec<_> = request
            .infiles()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["input1.raw", "params.yaml"]);
    }

    #[test]
    fn test_claim_fails_when_workspace_exists() {
        let (_base, dir) = request_dir();
        fs::create_dir(dir.join(OUTPUT_DIR)).unwrap();

        match FsRequest::claim(dir) {
            Err(MqError::WorkspaceExists(_)) => {}
            other => panic!("expected WorkspaceExists, got {other:?}"),
        }
    }

    #[test]
    fn test_claim_generates_uuid_for_arbitrary_names() {
        let base = tempdir().unwrap();
        let dir = base.path().join("my-request");
        fs::create_dir(&dir).unwrap();

        let request = FsRequest::claim(dir).unwrap();
        assert!(Uuid::parse_str(request.uuid()).is_ok());
    }

    #[test]
    fn test_terminal_files_carry_messages() {
        let (_base, dir) = request_dir();
        let request = FsRequest::claim(dir.clone()).unwrap();

        request.set_status(Status::Running);
        assert_eq!(fs::read_to_string(dir.join(STATUS_FILE)).unwrap(), "RUNNING");

        request.fail("engine exploded");
        assert_eq!(fs::read_to_string(dir.join(FAILED_FILE)).unwrap(), "engine exploded");
        assert_eq!(fs::read_to_string(dir.join(STATUS_FILE)).unwrap(), "FAILED");

        let log = fs::read_to_string(dir.join(LOG_FILE)).unwrap();
        assert!(log.contains("engine exploded"));
    }
}
