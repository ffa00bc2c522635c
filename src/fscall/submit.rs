//! Client side of the request protocol: submit a job and watch it run.

use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::error::{MqError, Result};
use crate::fscall::{
    BEAT_FILE, BEAT_READ_FORMAT, FAILED_FILE, LOG_FILE, OUTPUT_DIR, STARTED_FILE, START_FILE,
    STATUS_FILE, SUCCESS_FILE,
};

#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    /// Maximum gap between heartbeat advances before the server counts as
    /// dead; also the monitor poll period.
    pub beat_timeout: Duration,
    /// Maximum time to wait for the server to pick the request up.
    pub timeout: Duration,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            beat_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Submit a new job to a server listening in `server_dir`.
///
/// Creates a uniquely named request directory, copies the input files into
/// it and creates `START`. The returned [`FsFuture`] monitors the request
/// from a background thread. Cancellation is not supported.
pub fn submit(server_dir: &Path, infiles: &[PathBuf], options: SubmitOptions) -> Result<FsFuture> {
    let workdir = server_dir.join(Uuid::new_v4().to_string());
    fs::create_dir(&workdir)?;

    let shared = Arc::new(Shared {
        workdir,
        status: Mutex::new("NOT STARTED".to_string()),
        state: Mutex::new(State::default()),
        done: Condvar::new(),
    });

    let worker_shared = Arc::clone(&shared);
    let infiles = infiles.to_vec();
    thread::Builder::new()
        .name("fscall-client".to_string())
        .spawn(move || run_monitor(worker_shared, infiles, options))?;

    Ok(FsFuture { shared })
}

type Outcome = std::result::Result<PathBuf, String>;

#[derive(Default)]
struct State {
    outcome: Option<Outcome>,
    callbacks: Vec<Box<dyn FnOnce(FsFuture) + Send>>,
}

struct Shared {
    workdir: PathBuf,
    status: Mutex<String>,
    state: Mutex<State>,
    done: Condvar,
}

/// Handle on a submitted job.
///
/// Mirrors a future: the job runs remotely, terminal state is observed
/// through the protocol files. There is deliberately no way to cancel.
#[derive(Clone)]
pub struct FsFuture {
    shared: Arc<Shared>,
}

impl FsFuture {
    /// The request directory created for this submission.
    pub fn workdir(&self) -> &Path {
        &self.shared.workdir
    }

    pub fn done(&self) -> bool {
        self.lock_state().outcome.is_some()
    }

    pub fn running(&self) -> bool {
        !self.done()
    }

    /// Last observed status label.
    pub fn status(&self) -> String {
        self.shared
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current contents of the remote task log.
    pub fn log(&self) -> Result<String> {
        Ok(fs::read_to_string(self.shared.workdir.join(LOG_FILE))?)
    }

    /// Wait for the job to finish and return the output directory.
    ///
    /// `None` waits forever. Failure messages recorded by the server (and
    /// client-side monitor failures) surface as [`MqError::TaskFailed`].
    pub fn result(&self, timeout: Option<Duration>) -> Result<PathBuf> {
        match self.outcome(timeout)? {
            Ok(outdir) => Ok(outdir),
            Err(message) => Err(MqError::TaskFailed(message)),
        }
    }

    /// Wait for the job to finish and return the raw outcome.
    pub fn outcome(&self, timeout: Option<Duration>) -> Result<Outcome> {
        let mut state = self.lock_state();
        match timeout {
            Some(limit) => {
                let deadline = Instant::now() + limit;
                while state.outcome.is_none() {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(MqError::SubmitTimeout);
                    }
                    let (guard, _) = self
                        .shared
                        .done
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    state = guard;
                }
            }
            None => {
                while state.outcome.is_none() {
                    state = self
                        .shared
                        .done
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
        }
        Ok(state.outcome.clone().expect("outcome is set"))
    }

    /// Run `callback` once the job finishes; immediately if it already has.
    pub fn add_done_callback(&self, callback: impl FnOnce(FsFuture) + Send + 'static) {
        let mut state = self.lock_state();
        if state.outcome.is_some() {
            drop(state);
            callback(self.clone());
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn run_monitor(shared: Arc<Shared>, infiles: Vec<PathBuf>, options: SubmitOptions) {
    let outcome = monitor(&shared, &infiles, &options).map_err(|e| e.to_string());
    let callbacks = {
        let mut state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
        state.outcome = Some(outcome);
        mem::take(&mut state.callbacks)
    };
    shared.done.notify_all();
    for callback in callbacks {
        callback(FsFuture {
            shared: Arc::clone(&shared),
        });
    }
}

fn monitor(shared: &Shared, infiles: &[PathBuf], options: &SubmitOptions) -> Result<PathBuf> {
    set_status(shared, "COPY FILES");
    for file in infiles {
        let name = file
            .file_name()
            .ok_or_else(|| MqError::BadRequest(format!("invalid input file {}", file.display())))?;
        fs::copy(file, shared.workdir.join(name))?;
    }
    fs::write(shared.workdir.join(START_FILE), "")?;

    // Wait for the server to answer with its first status, beat and claim.
    let deadline = Instant::now() + options.timeout;
    let mut last_beat = loop {
        thread::sleep(Duration::from_secs(1).min(options.timeout));
        if exists_all(&shared.workdir, &[STATUS_FILE, BEAT_FILE, STARTED_FILE]) {
            if let Some(beat) = read_last_beat(&shared.workdir)? {
                update_status(shared);
                break beat;
            }
        }
        if Instant::now() >= deadline {
            return Err(MqError::SubmitTimeout);
        }
    };

    loop {
        thread::sleep(options.beat_timeout);
        update_status(shared);

        // Terminal files win over heartbeat checks: the writer stops
        // beating the moment the task completes.
        if shared.workdir.join(FAILED_FILE).exists() {
            let message = fs::read_to_string(shared.workdir.join(FAILED_FILE)).unwrap_or_default();
            return Err(MqError::TaskFailed(message));
        }
        if shared.workdir.join(SUCCESS_FILE).exists() {
            return Ok(shared.workdir.join(OUTPUT_DIR));
        }

        let beat = read_last_beat(&shared.workdir)?.ok_or(MqError::LostHeartbeat)?;
        if beat <= last_beat {
            return Err(MqError::LostHeartbeat);
        }
        last_beat = beat;
    }
}

fn set_status(shared: &Shared, status: &str) {
    *shared.status.lock().unwrap_or_else(|e| e.into_inner()) = status.to_string();
}

fn update_status(shared: &Shared) {
    if let Ok(status) = fs::read_to_string(shared.workdir.join(STATUS_FILE)) {
        set_status(shared, status.trim());
    }
}

fn exists_all(dir: &Path, names: &[&str]) -> bool {
    names.iter().all(|name| dir.join(name).exists())
}

/// Timestamp of the last non-blank `BEAT` line, `None` while unparsable.
fn read_last_beat(dir: &Path) -> Result<Option<NaiveDateTime>> {
    let contents = match fs::read_to_string(dir.join(BEAT_FILE)) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let last = contents.lines().rev().find(|line| !line.trim().is_empty());
    Ok(last.and_then(|line| NaiveDateTime::parse_from_str(line.trim(), BEAT_READ_FORMAT).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_read_last_beat_parses_the_final_line() {
        let dir = tempdir().unwrap();
        let earlier = Local::now().naive_local();
        let later = earlier + chrono::Duration::seconds(3);
        fs::write(
            dir.path().join(BEAT_FILE),
            format!(
                "{}\n{}\n",
                earlier.format(crate::fscall::BEAT_WRITE_FORMAT),
                later.format(crate::fscall::BEAT_WRITE_FORMAT)
            ),
        )
        .unwrap();

        let beat = read_last_beat(dir.path()).unwrap().unwrap();
        assert!(beat > earlier);
    }

    #[test]
    fn test_read_last_beat_tolerates_garbage() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(BEAT_FILE), "not a timestamp\n").unwrap();
        assert!(read_last_beat(dir.path()).unwrap().is_none());
        assert!(read_last_beat(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn test_submit_times_out_without_a_server() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input1.raw");
        fs::write(&input, b"spectra").unwrap();

        let future = submit(
            dir.path(),
            &[input],
            SubmitOptions {
                beat_timeout: Duration::from_millis(100),
                timeout: Duration::from_secs(2),
            },
        )
        .unwrap();

        let err = future.result(Some(Duration::from_secs(10))).unwrap_err();
        assert!(err.to_string().contains("not responding"), "got: {err}");
        assert!(future.done());
        // files were copied and START was created before the timeout
        assert!(future.workdir().join("input1.raw").exists());
        assert!(future.workdir().join(START_FILE).exists());
    }

    #[test]
    fn test_done_callback_fires() {
        let dir = tempdir().unwrap();
        let future = submit(
            dir.path(),
            &[],
            SubmitOptions {
                beat_timeout: Duration::from_millis(50),
                timeout: Duration::from_millis(200),
            },
        )
        .unwrap();

        let (tx, rx) = crossbeam_channel::bounded(1);
        future.add_done_callback(move |finished| {
            let _ = tx.send(finished.done());
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), true);
    }
}
