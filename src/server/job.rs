//! Per-task worker: drives one claimed request through its lifecycle.
//!
//! A task runs in two gated stages. Preparation (cheap: bucket the input
//! files, verify checksums, parse the parameter document) runs under the
//! prepare gate so that malformed requests fail fast even while engines
//! are busy. Execution (expensive: convert to XML, run the engine) runs
//! under the execute gate. Either gate may time out, and any stage error
//! turns into a terminal `FAILED` with a message; nothing propagates out
//! of the worker.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{MqError, Result};
use crate::fscall::{FsRequest, Status, TaskLog};
use crate::params::{self, ParamDoc};
use crate::server::engine;
use crate::server::gate::Gate;

/// Shared scheduling state handed to every worker.
pub struct JobContext {
    pub prepare_gate: Gate,
    pub execute_gate: Gate,
    pub sem_timeout: Duration,
    pub mq_timeout: Option<Duration>,
    pub heartbeat_interval: Duration,
    pub engine_path: PathBuf,
    pub engine_flag: String,
    pub tmp_dir: Option<PathBuf>,
}

pub struct Job {
    task: FsRequest,
    ctx: Arc<JobContext>,
}

struct Prepared {
    params: ParamDoc,
    raw_paths: HashMap<String, PathBuf>,
    fasta_paths: HashMap<String, PathBuf>,
}

impl Job {
    pub fn new(task: FsRequest, ctx: Arc<JobContext>) -> Self {
        Self { task, ctx }
    }

    /// Run the task to a terminal state. Never panics the caller over a
    /// task error; the heartbeat stops once the state is terminal.
    pub fn run(self) {
        let mut heartbeat = self.task.heartbeat(self.ctx.heartbeat_interval);
        self.drive();
        heartbeat.stop();
    }

    fn drive(&self) {
        let log = self.task.log();

        log.info("Want to prepare files. Waiting for resources.");
        self.task.set_status(Status::Waiting);
        let prepare_permit = match self.ctx.prepare_gate.acquire(self.ctx.sem_timeout) {
            Some(permit) => permit,
            None => {
                let message = MqError::GateTimeout.to_string();
                log.error(&message);
                self.task.fail(&message);
                return;
            }
        };

        self.task.set_status(Status::PreparingFiles);
        let prepared = match self.prepare() {
            Ok(prepared) => {
                log.info("File preparation finished");
                prepared
            }
            Err(e) => {
                log.error(format!("Error while preparing files: {e}"));
                self.task.fail(&format!("Error while preparing files: {e}"));
                return;
            }
        };
        drop(prepare_permit);

        log.info("Want to start the engine. Waiting for resources.");
        self.task.set_status(Status::Waiting);
        let _execute_permit = match self.ctx.execute_gate.acquire(self.ctx.sem_timeout) {
            Some(permit) => permit,
            None => {
                let message = MqError::GateTimeout.to_string();
                log.error(&message);
                self.task.fail(&message);
                return;
            }
        };

        self.task.set_status(Status::Running);
        match self.execute(&prepared) {
            Ok(()) => self.task.success(None),
            Err(e) => {
                log.error(format!("Error running engine: {e}"));
                self.task.fail(&format!("Error running engine: {e}"));
            }
        }
    }

    fn prepare(&self) -> Result<Prepared> {
        let log = self.task.log();
        let (param_file, datafiles) = bucket_files(log, self.task.infiles())?;
        self.task.verify_checksums()?;
        let params = parse_param_file(log, &param_file)?;

        let mut raw_paths = HashMap::new();
        let mut fasta_paths = HashMap::new();
        for (stem, path) in datafiles {
            match lowercase_extension(&path).as_deref() {
                Some("raw") => {
                    raw_paths.insert(stem, path);
                }
                Some("fasta") => {
                    fasta_paths.insert(stem, path);
                }
                _ => {}
            }
        }
        Ok(Prepared {
            params,
            raw_paths,
            fasta_paths,
        })
    }

    fn execute(&self, prepared: &Prepared) -> Result<()> {
        let log = self.task.log();
        let tmp = match &self.ctx.tmp_dir {
            Some(base) => tempfile::Builder::new().prefix("mqserve-").tempdir_in(base)?,
            None => tempfile::tempdir()?,
        };
        log.info(format!(
            "Executing engine with tempdir {} and outdir {}",
            tmp.path().display(),
            self.task.outdir().display()
        ));

        let tree = params::to_xml(
            &prepared.params,
            &prepared.raw_paths,
            &prepared.fasta_paths,
            Some(self.task.outdir()),
            Some(tmp.path()),
        )?;
        let xml_path = self.task.outdir().join("params.xml");
        log.info("Writing engine parameter file");
        params::write_params_file(&tree, &xml_path)?;

        engine::run_engine(
            log,
            &self.ctx.engine_path,
            &self.ctx.engine_flag,
            &xml_path,
            self.task.outdir(),
            self.ctx.mq_timeout,
        )
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
}

/// Separate input files into data files and the single parameter file.
///
/// Data file stems double as logical names and must be unique. Unknown
/// extensions are warned about but tolerated.
fn bucket_files(log: &TaskLog, infiles: &[PathBuf]) -> Result<(PathBuf, HashMap<String, PathBuf>)> {
    let mut datafiles: HashMap<String, PathBuf> = HashMap::new();
    let mut param_files: Vec<PathBuf> = Vec::new();

    for file in infiles {
        let stem = file
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
            .to_string();
        match lowercase_extension(file).as_deref() {
            Some("raw") | Some("fasta") => {
                if datafiles.contains_key(&stem) {
                    log.error(format!("File name not unique: {stem}"));
                    return Err(MqError::BadRequest(format!("File name not unique: {stem}")));
                }
                datafiles.insert(stem, file.clone());
            }
            Some("yaml") | Some("json") => param_files.push(file.clone()),
            _ => log.warn(format!("Unknown input file: {}", file.display())),
        }
    }

    if param_files.len() > 1 {
        log.error("Got more than one parameter file");
        return Err(MqError::BadRequest("Too many parameter files".to_string()));
    }
    let param_file = param_files.pop().ok_or_else(|| {
        log.error("No parameter file");
        MqError::BadRequest("No parameter file".to_string())
    })?;
    Ok((param_file, datafiles))
}

/// Parse the parameter file as YAML or JSON, depending on its suffix.
fn parse_param_file(log: &TaskLog, path: &Path) -> Result<ParamDoc> {
    let contents = fs::read_to_string(path)?;
    let value: Value = match lowercase_extension(path).as_deref() {
        Some("yaml") => {
            log.debug(format!("Found yaml parameter file: {}", path.display()));
            serde_yaml::from_str(&contents)?
        }
        Some("json") => {
            log.debug(format!("Found json parameter file: {}", path.display()));
            serde_json::from_str(&contents)?
        }
        _ => {
            return Err(MqError::BadRequest(format!(
                "Unsupported parameter file: {}",
                path.display()
            )))
        }
    };
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(MqError::BadRequest(
            "Parameter file must contain a mapping".to_string(),
        )),
    }
}
