use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;

/// Root configuration structure with versioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Configuration schema version for compatibility tracking
    #[serde(default = "default_version")]
    pub version: String,
    /// Directories, engine binary and request filtering
    #[serde(default)]
    pub server: ServerConfig,
    /// Concurrency and timeout limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory polled for new request directories
    #[serde(default)]
    pub listen_dir: Option<PathBuf>,
    /// Base directory for engine outputs
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Path to the engine binary
    #[serde(default)]
    pub engine_path: Option<PathBuf>,
    /// CLI flag the engine expects in front of the parameter file
    #[serde(default = "default_engine_flag")]
    pub engine_flag: String,
    /// Base directory for per-task temporary directories
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,
    /// Regular expression request directory names must match (fully)
    #[serde(default)]
    pub task_re: Option<String>,
}

/// Limits configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Concurrent tasks allowed in each of the two gated stages
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Seconds a task waits for a gate before failing
    #[serde(default = "default_sem_timeout")]
    pub sem_timeout_secs: u64,
    /// Engine runtime bound in seconds; unbounded when unset
    #[serde(default)]
    pub mq_timeout_secs: Option<u64>,
    /// Seconds between scans of the listen directory
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// Seconds between heartbeat lines while a task is in flight
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Cap on admitted requests before the daemon shuts down
    #[serde(default)]
    pub max_tasks: Option<usize>,
}

/// Logging configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log file; stderr only when unset
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_version() -> String {
    "1.0".to_string()
}

fn default_engine_flag() -> String {
    "-mqpar".to_string()
}

fn default_num_workers() -> usize {
    2
}

fn default_sem_timeout() -> u64 {
    200
}

fn default_scan_interval() -> u64 {
    2
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from a YAML file. Falls back to defaults if file is
    /// missing. Fails fast with a clear error message when parsing fails.
    pub fn load_from_yaml(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from("mqserve.yaml"),
        };

        let config_str = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "[INFO] Config file not found at {:?}, using hardcoded defaults",
                    path
                );
                return Ok(Self::default());
            }
            Err(e) => return Err(e).context(format!("Failed to read config file at {:?}", path)),
        };

        let settings: Settings = serde_yaml::from_str(&config_str).context(format!(
            "Failed to parse config at {:?}: invalid YAML structure",
            path
        ))?;

        if settings.version != "1.0" {
            eprintln!(
                "[WARN] Config version mismatch: expected 1.0, got {}. Continuing with current schema.",
                settings.version
            );
        }
        Ok(settings)
    }

    /// Merge CLI arguments into settings, with CLI taking precedence
    pub fn merge_with_cli(mut self, args: &Args) -> Self {
        if let Some(listen_dir) = &args.listen_dir {
            self.server.listen_dir = Some(listen_dir.clone());
        }
        if let Some(output_dir) = &args.output_dir {
            self.server.output_dir = Some(output_dir.clone());
        }
        if let Some(engine_path) = &args.engine_path {
            self.server.engine_path = Some(engine_path.clone());
        }
        if let Some(engine_flag) = &args.engine_flag {
            self.server.engine_flag = engine_flag.clone();
        }
        if let Some(tmp_dir) = &args.tmp_dir {
            self.server.tmp_dir = Some(tmp_dir.clone());
        }
        if let Some(task_re) = &args.task_re {
            self.server.task_re = Some(task_re.clone());
        }
        if let Some(num_workers) = args.num_workers {
            self.limits.num_workers = num_workers;
        }
        if let Some(sem_timeout) = args.sem_timeout {
            self.limits.sem_timeout_secs = sem_timeout;
        }
        if let Some(mq_timeout) = args.mq_timeout {
            self.limits.mq_timeout_secs = Some(mq_timeout);
        }
        if let Some(scan_interval) = args.scan_interval {
            self.limits.scan_interval_secs = scan_interval;
        }
        if let Some(max_tasks) = args.max_tasks {
            self.limits.max_tasks = Some(max_tasks);
        }
        if let Some(log_file) = &args.log_file {
            self.logging.log_file = Some(log_file.clone());
        }
        self
    }

    /// Resolve paths relative to the given root
    pub fn resolve_paths(&mut self, root: &Path) -> Result<()> {
        for path in [
            &mut self.server.listen_dir,
            &mut self.server.output_dir,
            &mut self.server.engine_path,
            &mut self.server.tmp_dir,
            &mut self.logging.log_file,
        ]
        .into_iter()
        .flatten()
        {
            *path = resolve_path(path, root)?;
        }
        Ok(())
    }

    /// Get the listen directory; error if not set
    pub fn listen_dir(&self) -> Result<&Path> {
        self.server
            .listen_dir
            .as_deref()
            .ok_or_else(|| anyhow!("listen_dir is required (set via --listen-dir or the config file)"))
    }

    /// Get the output directory; error if not set
    pub fn output_dir(&self) -> Result<&Path> {
        self.server
            .output_dir
            .as_deref()
            .ok_or_else(|| anyhow!("output_dir is required (set via --output-dir or the config file)"))
    }

    /// Get the engine binary path; error if not set
    pub fn engine_path(&self) -> Result<&Path> {
        self.server
            .engine_path
            .as_deref()
            .ok_or_else(|| anyhow!("engine_path is required (set via --engine-path or the config file)"))
    }

    pub fn sem_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.sem_timeout_secs)
    }

    pub fn mq_timeout(&self) -> Option<Duration> {
        self.limits.mq_timeout_secs.map(Duration::from_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.limits.scan_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.limits.heartbeat_interval_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_dir: None,
            output_dir: None,
            engine_path: None,
            engine_flag: default_engine_flag(),
            tmp_dir: None,
            task_re: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            log_level: default_log_level(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            sem_timeout_secs: default_sem_timeout(),
            mq_timeout_secs: None,
            scan_interval_secs: default_scan_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            max_tasks: None,
        }
    }
}

/// Resolve a path to be either relative to root or return as-is if absolute
fn resolve_path(path: &Path, root: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(root.join(path))
    }
}
