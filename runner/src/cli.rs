//! Process entry point shared by all job runner binaries.
//!
//! A binary hands its handler, directory prefix and configuration space to [`main`]; the
//! command line then decides whether to generate job files, run the queue with a pool of
//! worker processes, or run individual job files.

use crate::{
    config::{ConfigErrors, Options, SpaceConfig},
    distributed::{directory::JobDirectory, fs::install_signal_handlers},
    document,
    executors::{JobRunner, RunnerError},
    handler::WorkHandler,
    space::ConfigurationSpace,
};
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Log to stdout at the level picked by `--debug`/`--silent`, `RUST_LOG` takes precedence
pub fn init_logging(options: &Options) {
    let level = if options.debug {
        "debug"
    } else if options.silent {
        "warn"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // a subscriber installed by the embedding binary wins
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Dispatch on the mode selected by `options`
pub fn run<H: WorkHandler>(
    handler: H,
    prefix: Option<&str>,
    space: Option<ConfigurationSpace>,
    options: Options,
) -> Result<(), RunnerError> {
    options.preflight_checks()?;

    let space = match &options.space {
        Some(path) => Some(SpaceConfig::load(path)?.into_space()),
        None => space,
    };
    let directory = JobDirectory::new(&options.directory, prefix).map_err(ConfigErrors::from)?;

    if options.worker {
        install_signal_handlers().map_err(RunnerError::Signal)?;
        JobRunner::new(handler, Some(directory), options).work()?;

        return Ok(());
    }

    if options.generate_configs {
        let space = space.ok_or(ConfigErrors::MissingSpace)?;
        space.generate_files(Some(&directory))?;

        return Ok(());
    }

    let files = options.files.clone();
    let runner = JobRunner::new(handler, Some(directory), options);

    if files.is_empty() {
        return runner.start();
    }

    for file in files {
        match runner.run_job(&file, true)?.result() {
            Some(result) => info!("{}", document::to_pretty_string(result)),
            None => warn!(path = ?file, "Job failed"),
        }
    }

    Ok(())
}

/// Parse the command line, set up logging and run
pub fn main<H: WorkHandler>(
    handler: H,
    prefix: Option<&str>,
    space: Option<ConfigurationSpace>,
) -> ExitCode {
    let options = Options::parse();
    init_logging(&options);

    match run(handler, prefix, space, options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = %error, "Job runner failed");

            ExitCode::FAILURE
        }
    }
}
