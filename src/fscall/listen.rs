//! Discovery of new request directories.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use regex::Regex;

use crate::error::{MqError, Result};
use crate::fscall::{FsRequest, STARTED_FILE, START_FILE};

/// Polls the listen directory and yields claimed requests.
///
/// A subdirectory is a candidate once it contains `START` and its name
/// matches the configured pattern (fully). The listener then races for
/// `STARTED` with a create-exclusive open; losing the race silently skips
/// the candidate. A candidate whose [`FsRequest::claim`] fails is dropped
/// for good, since its `STARTED` file stays behind.
pub struct Listener {
    dir: PathBuf,
    task_re: Option<Regex>,
    interval: Duration,
    pending: VecDeque<PathBuf>,
}

impl Listener {
    pub fn new(dir: &Path, task_re: Option<&str>, interval: Duration) -> Result<Self> {
        if !dir.is_dir() {
            return Err(MqError::BadRequest(format!(
                "can only listen in a directory: {}",
                dir.display()
            )));
        }
        let task_re = match task_re {
            Some(pattern) => Some(
                // Anchored on both sides: the whole name has to match.
                Regex::new(&format!(r"\A(?:{pattern})\z"))
                    .map_err(|e| MqError::BadRequest(format!("invalid task pattern: {e}")))?,
            ),
            None => None,
        };
        let mut listener = Self {
            dir: dir.to_path_buf(),
            task_re,
            interval,
            pending: VecDeque::new(),
        };
        Listener::scan(&mut listener);
        Ok(listener)
    }

    fn scan(&mut self) {
        tracing::debug!("Look for new tasks in dir {}", self.dir.display());
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("could not scan {}: {}", self.dir.display(), e);
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(task_re) = &self.task_re {
                let name = entry.file_name();
                if !task_re.is_match(&name.to_string_lossy()) {
                    tracing::debug!("Skip dir {}, does not match re", path.display());
                    continue;
                }
            }
            if path.join(START_FILE).exists() {
                self.pending.push_back(path);
            }
        }
    }

    fn claim_pending(&mut self) -> Option<FsRequest> {
        while let Some(dir) = self.pending.pop_front() {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(dir.join(STARTED_FILE))
            {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    tracing::warn!("could not claim {}: {}", dir.display(), e);
                    continue;
                }
            }
            tracing::info!("New task in dir {}", dir.display());
            match FsRequest::claim(dir) {
                Ok(request) => return Some(request),
                Err(e) => tracing::error!("Could not create task: {e}"),
            }
        }
        None
    }
}

impl Iterator for Listener {
    type Item = FsRequest;

    fn next(&mut self) -> Option<FsRequest> {
        loop {
            if let Some(request) = self.claim_pending() {
                return Some(request);
            }
            thread::sleep(self.interval);
            self.scan();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fscall::OUTPUT_DIR;
    use tempfile::tempdir;

    fn listener(dir: &Path, task_re: Option<&str>) -> Listener {
        Listener::new(dir, task_re, Duration::from_millis(10)).unwrap()
    }

    #[test]
    fn test_directory_without_start_is_never_admitted() {
        let base = tempdir().unwrap();
        fs::create_dir(base.path().join("req")).unwrap();

        let mut listener = listener(base.path(), None);
        for _ in 0..3 {
            Listener::scan(&mut listener);
        }
        assert!(listener.claim_pending().is_none());
        assert!(!base.path().join("req").join(STARTED_FILE).exists());
    }

    #[test]
    fn test_started_is_created_exactly_once() {
        let base = tempdir().unwrap();
        let dir = base.path().join("req");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join(START_FILE), b"").unwrap();

        let mut listener = listener(base.path(), None);
        let request = listener.claim_pending().expect("candidate should be claimed");
        assert!(dir.join(STARTED_FILE).exists());
        assert!(dir.join(OUTPUT_DIR).is_dir());
        assert_eq!(request.dir(), dir);

        // a second scan sees the directory again but cannot reclaim it
        Listener::scan(&mut listener);
        assert!(listener.claim_pending().is_none());
    }

    #[test]
    fn test_task_re_must_match_the_full_name() {
        let base = tempdir().unwrap();
        for name in ["task-1", "xtask-1", "task-1x"] {
            let dir = base.path().join(name);
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join(START_FILE), b"").unwrap();
        }

        let mut listener = listener(base.path(), Some("task-[0-9]+"));
        let request = listener.claim_pending().expect("matching dir admitted");
        assert_eq!(request.dir().file_name().unwrap(), "task-1");
        assert!(listener.claim_pending().is_none());
        assert!(!base.path().join("xtask-1").join(STARTED_FILE).exists());
        assert!(!base.path().join("task-1x").join(STARTED_FILE).exists());
    }

    #[test]
    fn test_failed_claim_drops_the_candidate() {
        let base = tempdir().unwrap();
        let dir = base.path().join("req");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join(START_FILE), b"").unwrap();
        // pre-existing workspace makes FsRequest::claim fail
        fs::create_dir(dir.join(OUTPUT_DIR)).unwrap();

        let mut listener = listener(base.path(), None);
        assert!(listener.claim_pending().is_none());
        // STARTED stays behind, so the candidate is never retried
        assert!(dir.join(STARTED_FILE).exists());
        Listener::scan(&mut listener);
        assert!(listener.claim_pending().is_none());
    }
}
