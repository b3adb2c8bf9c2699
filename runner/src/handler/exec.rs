use super::{HandlerError, JobOutput, WorkHandler};
use crate::{config::Options, configuration::Configuration};
use serde_json::Value;
use std::{
    io::Read,
    process::{Command, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

/// Runs `command` with the configured `dir` and `args` and reports the size of its output.
///
/// Recognized keys:
/// - `command`: executable to run (required)
/// - `dir`: first argument
/// - `args`: further arguments, split on whitespace
/// - `timeout`: seconds before the child is killed, overrides the handler default
#[derive(Debug, Clone, Default)]
pub struct CommandHandler {
    pub timeout: Option<Duration>,
}

/// render a scalar configuration value as a command line argument
fn as_argument(field: &str, value: &Value) -> Result<String, HandlerError> {
    match value {
        Value::String(string) => Ok(string.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(boolean) => Ok(boolean.to_string()),
        other => Err(HandlerError::MalformedField {
            field: field.to_owned(),
            reason: format!("expected a scalar, found {other}"),
        }),
    }
}

/// drain a pipe on its own thread so a chatty child never blocks on a full pipe
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = String::new();

        if let Some(mut pipe) = pipe {
            if let Err(error) = pipe.read_to_string(&mut buffer) {
                warn!(error = ?error, "Failed to read child output");
            }
        }

        buffer
    })
}

impl CommandHandler {
    fn timeout(&self, config: &Configuration) -> Result<Option<Duration>, HandlerError> {
        match config.get("timeout") {
            None => Ok(self.timeout),
            Some(value) => value
                .as_f64()
                .filter(|seconds| *seconds > 0.0)
                .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
                .map(Some)
                .ok_or_else(|| HandlerError::MalformedField {
                    field: "timeout".to_owned(),
                    reason: "must be a positive number of seconds".to_owned(),
                }),
        }
    }
}

impl WorkHandler for CommandHandler {
    #[tracing::instrument(level = "debug", skip(self, _options))]
    fn execute(
        &self,
        _options: &Options,
        config: &Configuration,
    ) -> Result<JobOutput, HandlerError> {
        let command = config
            .get_str("command")
            .ok_or_else(|| HandlerError::MissingField("command".to_owned()))?;
        let timeout = self.timeout(config)?;

        let mut arguments = Vec::new();
        if let Some(dir) = config.get("dir") {
            arguments.push(as_argument("dir", dir)?);
        }
        if let Some(args) = config.get("args") {
            arguments.extend(
                as_argument("args", args)?
                    .split_whitespace()
                    .map(str::to_owned),
            );
        }

        let mut child = Command::new(command)
            .args(&arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HandlerError::Spawn {
                command: command.to_owned(),
                source,
            })?;

        debug!("Waiting on {command} ({})", child.id());
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match timeout {
            Some(timeout) => match child.wait_timeout(timeout)? {
                Some(status) => status,
                None => {
                    debug!("{command} ran into timeout, killing it");
                    child.kill()?;
                    child.wait()?;

                    return Err(HandlerError::Timeout(command.to_owned()));
                }
            },
            None => child.wait()?,
        };

        let output = stdout.join().unwrap_or_default();
        let errors = stderr.join().unwrap_or_default();
        trace!("Output: {output}");

        if !status.success() {
            return Err(HandlerError::ExitStatus {
                command: command.to_owned(),
                status,
                stderr: errors.trim().to_owned(),
            });
        }

        let mut result = JobOutput::new();
        result.insert(
            "line count".to_owned(),
            Value::from(output.split_whitespace().count()),
        );
        result.insert("length".to_owned(), Value::from(output.len()));

        Ok(result)
    }
}
