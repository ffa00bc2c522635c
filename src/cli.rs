use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mqserve")]
#[command(about = "Run the engine on request directories dropped into a listen directory")]
#[command(version)]
pub struct Args {
    /// Path to config YAML file (default: mqserve.yaml in the working dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory where requests are dumped
    /// Overrides the config value if provided
    #[arg(short, long)]
    pub listen_dir: Option<PathBuf>,

    /// Base directory for engine outputs
    /// Overrides the config value if provided
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Path to the engine binary
    #[arg(long)]
    pub engine_path: Option<PathBuf>,

    /// Flag the engine expects in front of the parameter file
    #[arg(long)]
    pub engine_flag: Option<String>,

    /// Number of tasks allowed in each gated stage at once
    #[arg(short = 'n', long)]
    pub num_workers: Option<usize>,

    /// Seconds to wait for stage resources before failing a task
    #[arg(short = 's', long)]
    pub sem_timeout: Option<u64>,

    /// Maximal engine runtime in seconds (unbounded if omitted)
    #[arg(long)]
    pub mq_timeout: Option<u64>,

    /// Seconds between scans for new tasks
    #[arg(short = 'b', long)]
    pub scan_interval: Option<u64>,

    /// Base directory for per-task temporary directories
    #[arg(long)]
    pub tmp_dir: Option<PathBuf>,

    /// Regular expression request directory names must fully match
    #[arg(long)]
    pub task_re: Option<String>,

    /// Maximum number of tasks to start before shutting down
    #[arg(long)]
    pub max_tasks: Option<usize>,

    /// Global logfile for all runs
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
