//! The serving loop: discovery in the calling thread, one worker per task.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::config::Settings;
use crate::fscall::Listener;
use crate::server::gate::Gate;
use crate::server::job::{Job, JobContext};

pub struct Daemon {
    listen_dir: PathBuf,
    scan_interval: Duration,
    task_re: Option<String>,
    max_tasks: Option<usize>,
    ctx: Arc<JobContext>,
}

impl Daemon {
    pub fn new(settings: &Settings) -> Result<Self> {
        let ctx = JobContext {
            prepare_gate: Gate::new(settings.limits.num_workers),
            execute_gate: Gate::new(settings.limits.num_workers),
            sem_timeout: settings.sem_timeout(),
            mq_timeout: settings.mq_timeout(),
            heartbeat_interval: settings.heartbeat_interval(),
            engine_path: settings.engine_path()?.to_path_buf(),
            engine_flag: settings.server.engine_flag.clone(),
            tmp_dir: settings.server.tmp_dir.clone(),
        };
        Ok(Self {
            listen_dir: settings.listen_dir()?.to_path_buf(),
            scan_interval: settings.scan_interval(),
            task_re: settings.server.task_re.clone(),
            max_tasks: settings.limits.max_tasks,
            ctx: Arc::new(ctx),
        })
    }

    /// Listen for new tasks and start a worker thread for each.
    ///
    /// Returns after `max_tasks` admissions once every started worker has
    /// been joined; without a cap it serves forever.
    pub fn serve(&self) -> Result<()> {
        let listener = Listener::new(&self.listen_dir, self.task_re.as_deref(), self.scan_interval)?;
        let mut workers = Vec::new();

        for (started, request) in listener.enumerate() {
            let uuid = request.uuid().to_string();
            request
                .log()
                .info(format!("Create thread for new task {uuid}"));
            let job = Job::new(request, Arc::clone(&self.ctx));
            let worker = thread::Builder::new()
                .name(format!("worker-{uuid}"))
                .spawn(move || job.run())?;
            workers.push(worker);

            if self.max_tasks.is_some_and(|max| started + 1 >= max) {
                break;
            }
        }

        tracing::info!("Maximum number of tasks reached. No new tasks will be started.");
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        Ok(())
    }
}
