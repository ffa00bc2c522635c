//! Liveness heartbeat for in-flight tasks.
//!
//! While a task runs, a background writer appends one timestamp line to the
//! request's `BEAT` file per interval. Clients prove the server is alive by
//! watching the last line advance.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::fscall::BEAT_WRITE_FORMAT;

/// Scoped heartbeat writer.
///
/// Dropping the guard stops the writer. [`stop`](Heartbeat::stop) is
/// idempotent and joins the thread, so no beat is written after it returns.
pub struct Heartbeat {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn start(path: PathBuf, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = thread::spawn(move || loop {
            if let Err(e) = write_beat(&path) {
                tracing::warn!("could not write heartbeat to {}: {}", path.display(), e);
            }
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                _ => break,
            }
        });
        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            drop(stop_tx);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_beat(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", Local::now().format(BEAT_WRITE_FORMAT))
}
