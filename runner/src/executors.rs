pub mod local;

use crate::{
    collector::{CollectorError, QueueCollector},
    config::{ConfigErrors, Options},
    configuration::Configuration,
    distributed::directory::{DirectoryKey, JobDirectory},
    document::{self, DocumentError},
    handler::{JobOutput, WorkHandler},
    space::SpaceError,
};
use serde_json::Value;
use std::{
    io,
    path::{Path, PathBuf},
    time::Instant,
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Cannot store result without directory")]
    NoDirectory,
    #[error("Cannot start job runner without queue directory {0:?}")]
    MissingQueue(PathBuf),
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("Failed to move {path:?} to {target}: {source}")]
    Finalize {
        path: PathBuf,
        target: DirectoryKey,
        source: io::Error,
    },
    #[error("Failed to install signal handlers: {0}")]
    Signal(nix::Error),
    #[error("Failed to start worker process: {0}")]
    SpawnWorker(io::Error),
    #[error("Failed to wait for worker process: {0}")]
    WaitWorker(io::Error),
    #[error("{failed} of {total} workers exited unsuccessfully")]
    WorkersFailed { failed: usize, total: usize },
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Space(#[from] SpaceError),
}

/// What happened to a single configuration
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// the handler ran and produced this result
    Completed(JobOutput),
    /// a result already existed, the handler was not called
    Cached(JobOutput),
    /// the handler failed or returned nothing
    Failed,
}

impl JobOutcome {
    pub fn result(&self) -> Option<&JobOutput> {
        match self {
            Self::Completed(result) | Self::Cached(result) => Some(result),
            Self::Failed => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result().is_some()
    }
}

/// Counters of one worker loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkSummary {
    pub completed: usize,
    pub cached: usize,
    pub failed: usize,
}

/// runs `cleanup` when the handler invocation ends, whether by return, error or panic
struct CleanupGuard<'a, H: WorkHandler> {
    handler: &'a H,
    options: &'a Options,
    config: &'a Configuration,
}

impl<H: WorkHandler> Drop for CleanupGuard<'_, H> {
    fn drop(&mut self) {
        self.handler.cleanup(self.options, self.config);
    }
}

/// Claims, executes and finalizes jobs of a [`JobDirectory`]
#[derive(Debug)]
pub struct JobRunner<H> {
    handler: H,
    directory: Option<JobDirectory>,
    options: Options,
}

impl<H: WorkHandler> JobRunner<H> {
    pub fn new(handler: H, directory: Option<JobDirectory>, options: Options) -> Self {
        Self {
            handler,
            directory,
            options,
        }
    }

    pub fn directory(&self) -> Option<&JobDirectory> {
        self.directory.as_ref()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Calls the handler, `None` signals a failed execution
    fn call_handler(&self, config: &Configuration) -> Option<JobOutput> {
        let _cleanup = CleanupGuard {
            handler: &self.handler,
            options: &self.options,
            config,
        };

        if let Err(error) = self.handler.prepare(&self.options, config) {
            error!(error = %error, "Failed to prepare job");
            return None;
        }

        let start = Instant::now();
        let mut result = match self.handler.execute(&self.options, config) {
            Ok(result) if result.is_empty() => return None,
            Ok(result) => result,
            Err(error) => {
                error!(error = %error, "Failed to execute job");
                return None;
            }
        };
        let runtime = start.elapsed();

        result.insert("runtime".to_owned(), Value::from(runtime.as_secs_f64()));

        Some(result)
    }

    fn result_path(&self, config: &Configuration) -> Option<PathBuf> {
        self.directory.as_ref().map(|directory| {
            directory.join(DirectoryKey::Results, directory.config_filename(config))
        })
    }

    /// Run one configuration, reusing a stored result if there is one
    #[instrument(skip_all, level = "debug")]
    pub fn process_job(
        &self,
        config: &Configuration,
        store_result: bool,
    ) -> Result<JobOutcome, RunnerError> {
        let result_path = match (store_result, self.result_path(config)) {
            (true, None) => return Err(RunnerError::NoDirectory),
            (true, path) => path,
            (false, _) => None,
        };

        info!("Run {}", config.to_pretty());

        // never run a configuration twice
        if let Some(path) = result_path.as_ref().filter(|path| path.exists()) {
            debug!(path = ?path, "Found existing result");
            return Ok(JobOutcome::Cached(document::read_document(path)?));
        }

        match self.call_handler(config) {
            Some(mut result) => {
                info!("Run {config} finished: {}", document::to_canonical_string(&result));
                result.insert("config".to_owned(), Value::Object(config.as_map().clone()));

                if let Some(path) = result_path {
                    document::write_document(&path, &result)?;
                }

                Ok(JobOutcome::Completed(result))
            }
            None => {
                warn!("Execution error: {config}");

                Ok(JobOutcome::Failed)
            }
        }
    }

    /// Runs a given job file
    pub fn run_job(&self, path: &Path, store_result: bool) -> Result<JobOutcome, RunnerError> {
        let config = Configuration::from(document::read_document(path)?);

        self.process_job(&config, store_result)
    }

    /// Worker loop: claim and run jobs until the queue is empty.
    ///
    /// An error while a job is claimed moves that job to the failure directory and ends the
    /// loop, as does a panic (through the claim's drop).
    #[instrument(skip(self), level = "info")]
    pub fn work(&self) -> Result<WorkSummary, RunnerError> {
        let directory = self.directory.as_ref().ok_or(RunnerError::NoDirectory)?;
        let queue = directory.resolve(DirectoryKey::Queue);

        if !queue.is_dir() {
            return Err(RunnerError::MissingQueue(queue.to_path_buf()));
        }

        info!("Job runner starts");
        let mut summary = WorkSummary::default();

        for job in QueueCollector::new(directory) {
            let job = job?;
            debug!(path = ?job.path(), "Process config file");

            let target = match self.run_job(job.path(), true) {
                Ok(JobOutcome::Completed(_)) => {
                    summary.completed += 1;
                    DirectoryKey::Done
                }
                Ok(JobOutcome::Cached(_)) => {
                    summary.cached += 1;
                    DirectoryKey::Done
                }
                Ok(JobOutcome::Failed) => {
                    summary.failed += 1;
                    DirectoryKey::Error
                }
                Err(error) => {
                    error!(error = %error, path = ?job.path(), "Execution failure");

                    let path = job.path().to_path_buf();
                    if let Err(source) = job.finish(directory, DirectoryKey::Failure) {
                        error!(error = ?source, path = ?path, "Failed to move job to failure");
                    }

                    return Err(error);
                }
            };

            let path = job.path().to_path_buf();
            job.finish(directory, target)
                .map_err(|source| RunnerError::Finalize {
                    path,
                    target,
                    source,
                })?;
        }

        info!(
            completed = summary.completed,
            cached = summary.cached,
            failed = summary.failed,
            "Job runner stops"
        );

        Ok(summary)
    }

    /// Start `core_count` worker processes on this machine and wait for all of them
    pub fn start(&self) -> Result<(), RunnerError> {
        if self.directory.is_none() {
            return Err(RunnerError::NoDirectory);
        }

        local::LocalExecutor::for_current_process(&self.options)?.execute()
    }
}
