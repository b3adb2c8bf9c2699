use super::RunnerError;
use crate::config::Options;
use std::{
    env,
    ffi::OsString,
    path::PathBuf,
    process::{Child, Command},
};
use tracing::{debug, error, info, instrument};

/// Executor that runs a fixed number of worker processes on the local machine.
///
/// Workers share nothing but the job directory, each one claims jobs on its own until
/// the queue is empty.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    workers: usize,
    program: PathBuf,
    args: Vec<OsString>,
}

impl LocalExecutor {
    pub fn new(workers: usize, program: PathBuf, args: Vec<OsString>) -> Self {
        Self {
            workers,
            program,
            args,
        }
    }

    /// re-execute the running binary in worker mode
    pub fn for_current_process(options: &Options) -> Result<Self, RunnerError> {
        let program = env::current_exe().map_err(RunnerError::SpawnWorker)?;
        let args = options.worker_args().into_iter().map(OsString::from).collect();

        Ok(Self::new(options.core_count, program, args))
    }

    /// start all workers and wait for them to exit
    #[instrument(skip(self), level = "info")]
    pub fn execute(&self) -> Result<(), RunnerError> {
        debug!("Starting {} worker processes", self.workers);

        let mut children = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            match Command::new(&self.program).args(&self.args).spawn() {
                Ok(child) => children.push(child),
                Err(spawn_error) => {
                    error!(error = ?spawn_error, "Failed to start worker");
                    // don't leave the already started workers without a parent waiting on them
                    wait_all(children)?;

                    return Err(RunnerError::SpawnWorker(spawn_error));
                }
            }
        }

        let failed = wait_all(children)?;

        if failed > 0 {
            return Err(RunnerError::WorkersFailed {
                failed,
                total: self.workers,
            });
        }

        info!("Done with processing");

        Ok(())
    }
}

/// wait for every child, returns the number of unsuccessful ones
fn wait_all(children: Vec<Child>) -> Result<usize, RunnerError> {
    let mut failed = 0;

    for mut child in children {
        let pid = child.id();
        let status = child.wait().map_err(RunnerError::WaitWorker)?;

        if status.success() {
            debug!(pid = pid, "Worker finished");
        } else {
            error!(pid = pid, status = %status, "Worker exited unsuccessfully");
            failed += 1;
        }
    }

    Ok(failed)
}
