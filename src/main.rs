use anyhow::{bail, Result};
use clap::Parser;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing::Level;

use mqserve::cli::Args;
use mqserve::config::Settings;
use mqserve::server::Daemon;

/// A writer that tees log output to both a file and stderr.
#[derive(Clone)]
struct TeeWriter {
    file: Arc<Mutex<File>>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Ok(mut file) = self.file.lock() {
            file.write_all(buf)?;
            let _ = file.flush();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

fn init_logging(settings: &Settings) -> Result<()> {
    let level = match settings.logging.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    match &settings.logging.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let tee = TeeWriter {
                file: Arc::new(Mutex::new(file)),
            };
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(move || tee.clone())
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(io::stderr)
                .init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load_from_yaml(args.config.as_deref())?;
    settings = settings.merge_with_cli(&args);

    // Resolve paths relative to the current working directory
    let root = env::current_dir()?;
    settings.resolve_paths(&root)?;

    init_logging(&settings)?;

    tracing::info!("starting daemon");
    tracing::info!("listen dir is {}", settings.listen_dir()?.display());
    tracing::info!("output dir is {}", settings.output_dir()?.display());
    tracing::info!("engine path is {}", settings.engine_path()?.display());
    tracing::info!("num workers is {}", settings.limits.num_workers);
    tracing::info!("gate timeout is {}s", settings.limits.sem_timeout_secs);
    match settings.limits.mq_timeout_secs {
        Some(secs) => tracing::info!("engine timeout is {}s", secs),
        None => tracing::info!("engine timeout is unbounded"),
    }
    match settings.limits.max_tasks {
        Some(max) => tracing::info!("max tasks is {}", max),
        None => tracing::info!("max tasks is unlimited"),
    }

    if !settings.listen_dir()?.is_dir() {
        bail!("Not a directory: {}", settings.listen_dir()?.display());
    }
    if !settings.engine_path()?.is_file() {
        bail!("Not a file: {}", settings.engine_path()?.display());
    }
    fs::create_dir_all(settings.output_dir()?)?;

    let daemon = Daemon::new(&settings)?;
    tracing::info!(
        "start to listen in directory {}",
        settings.listen_dir()?.display()
    );
    daemon.serve()
}
