pub mod exec;

use crate::{config::Options, configuration::Configuration};
use serde_json::{Map, Value};
use std::{io, process::ExitStatus};
use thiserror::Error;

/// Fields a handler reports for one configuration, an empty map counts as a failed run
pub type JobOutput = Map<String, Value>;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Configuration is missing `{0}`")]
    MissingField(String),
    #[error("Configuration field `{field}` is malformed: {reason}")]
    MalformedField { field: String, reason: String },
    #[error("Failed to spawn {command}: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("{command} exited with {status}: {stderr}")]
    ExitStatus {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{0} ran into its timeout")]
    Timeout(String),
    #[error("I/O error while running job: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

/// The computation run for every configuration.
///
/// Only `execute` is required. `prepare` runs right before it, `cleanup` runs after it
/// in every case, including failures in `prepare`/`execute` and panics.
pub trait WorkHandler {
    fn prepare(&self, _options: &Options, _config: &Configuration) -> Result<(), HandlerError> {
        Ok(())
    }

    /// An `Err` or an empty map is recorded as a failed execution
    fn execute(&self, options: &Options, config: &Configuration)
        -> Result<JobOutput, HandlerError>;

    fn cleanup(&self, _options: &Options, _config: &Configuration) {}
}

impl<F> WorkHandler for F
where
    F: Fn(&Options, &Configuration) -> Result<JobOutput, HandlerError>,
{
    fn execute(
        &self,
        options: &Options,
        config: &Configuration,
    ) -> Result<JobOutput, HandlerError> {
        self(options, config)
    }
}
