//! Filesystem request protocol.
//!
//! A shared directory doubles as the submission queue: clients create a
//! subdirectory with their input files and signal readiness with a `START`
//! sentinel, the server claims the request by creating `STARTED` with
//! create-exclusive semantics and reports progress through small text files
//! in the same directory:
//!
//! * `STATUS` — current state label, overwritten on every transition
//! * `BEAT` — append-only heartbeat timestamps, one per line
//! * `SUCCESS` / `FAILED` — terminal markers, `FAILED` carries the message
//! * `logfile.txt` — the full task log
//! * `output/` — engine results
//!
//! The create-exclusive `STARTED` file is the only synchronization between
//! competing discovery iterations or server processes.

pub mod checksum;
pub mod heartbeat;
pub mod listen;
pub mod request;
pub mod submit;

pub use heartbeat::Heartbeat;
pub use listen::Listener;
pub use request::{FsRequest, TaskLog};
pub use submit::{submit, FsFuture, SubmitOptions};

use std::fmt;

pub const START_FILE: &str = "START";
pub const STARTED_FILE: &str = "STARTED";
pub const STATUS_FILE: &str = "STATUS";
pub const BEAT_FILE: &str = "BEAT";
pub const SUCCESS_FILE: &str = "SUCCESS";
pub const FAILED_FILE: &str = "FAILED";
pub const LOG_FILE: &str = "logfile.txt";
pub const OUTPUT_DIR: &str = "output";

/// Heartbeat lines are local timestamps without a zone, microsecond precision.
pub(crate) const BEAT_WRITE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
pub(crate) const BEAT_READ_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Task state as published through the `STATUS` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Waiting,
    PreparingFiles,
    Running,
    Success,
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Waiting => "WAITING",
            Status::PreparingFiles => "PREPARING FILES",
            Status::Running => "RUNNING",
            Status::Success => "SUCCESS",
            Status::Failed => "FAILED",
        };
        f.write_str(label)
    }
}
