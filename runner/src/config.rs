use crate::{
    configuration::Configuration, distributed::directory::DirectoryError,
    space::ConfigurationSpace,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Space file {path:?} could not be opened: {source}")]
    FileNotFound { path: PathBuf, source: io::Error },
    #[error("Space file {path:?} is invalid: {source}")]
    InvalidSpace {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("No configuration space given, nothing to generate")]
    MissingSpace,
    #[error("{0} invalid option(s), see the log for details")]
    Preflight(usize),
    #[error("Job directory is unusable: {0}")]
    Directory(#[from] DirectoryError),
}

/// Process level controls shared by the coordinator, its workers and the handler
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
fastjob -g        - Generate configuration files in directory
fastjob           - Run generated configuration files until no file is left
fastjob <file1>   - Run configuration of <file1>")]
pub struct Options {
    /// Adds debug output to console
    #[arg(long)]
    pub debug: bool,

    /// Only display warning and error messages
    #[arg(long)]
    pub silent: bool,

    /// Base directory to use by the job runner
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,

    /// Generate configuration files
    #[arg(short = 'g', long = "generate")]
    pub generate_configs: bool,

    /// Number of parallel job executions on current machine
    #[arg(long = "cores", default_value_t = 1)]
    pub core_count: usize,

    /// YAML or JSON file describing the configuration space, replaces the built-in space
    #[arg(long)]
    pub space: Option<PathBuf>,

    /// Run a single worker loop in this process, used by the coordinator to start workers
    #[arg(long, hide = true)]
    pub worker: bool,

    /// Job files to run directly, bypassing the queue
    pub files: Vec<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            debug: false,
            silent: false,
            directory: PathBuf::from("."),
            generate_configs: false,
            core_count: 1,
            space: None,
            worker: false,
            files: Vec::new(),
        }
    }
}

impl Options {
    /// Validate option combinations clap can't express.
    ///
    /// All problems are logged before returning, instead of stopping at the first one.
    pub fn preflight_checks(&self) -> Result<(), ConfigErrors> {
        let mut errors = 0;

        if self.debug && self.silent {
            error!("--debug and --silent are mutually exclusive");
            errors += 1;
        }

        if self.generate_configs && !self.files.is_empty() {
            error!("--generate and job files are mutually exclusive");
            errors += 1;
        }

        if self.worker && (self.generate_configs || !self.files.is_empty()) {
            error!("A worker only processes the queue, it can't generate or run job files");
            errors += 1;
        }

        if self.core_count == 0 {
            error!("--cores must be at least 1");
            errors += 1;
        }

        if errors == 0 {
            Ok(())
        } else {
            Err(ConfigErrors::Preflight(errors))
        }
    }

    /// Arguments that start a worker with the same settings as this process
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec![
            "--worker".to_owned(),
            "--directory".to_owned(),
            self.directory.to_string_lossy().into_owned(),
        ];

        if self.debug {
            args.push("--debug".to_owned());
        }
        if self.silent {
            args.push("--silent".to_owned());
        }
        if let Some(space) = &self.space {
            args.push("--space".to_owned());
            args.push(space.to_string_lossy().into_owned());
        }

        args
    }
}

/// Configuration space as stored in a space file
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SpaceConfig {
    /// specification, every list is a choice point
    pub space: Configuration,
    /// first run index
    #[serde(default)]
    pub start: i64,
    /// number of runs per configuration
    #[serde(default = "default_count")]
    pub count: u64,
}

impl SpaceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path).map_err(|source| ConfigErrors::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;

        // YAML is a superset of JSON, one parser covers both
        serde_yaml::from_reader(file).map_err(|source| ConfigErrors::InvalidSpace {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn into_space(self) -> ConfigurationSpace {
        ConfigurationSpace::new(self.space).with_runs(self.start, self.count)
    }
}

fn default_count() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_short_flags() {
        let options = Options::parse_from(["fastjob", "-g", "-d", "/tmp/jobs", "--cores", "4"]);

        assert!(options.generate_configs);
        assert_eq!(options.directory, PathBuf::from("/tmp/jobs"));
        assert_eq!(options.core_count, 4);
        assert!(options.preflight_checks().is_ok());
    }

    #[test]
    fn defaults_match_parser() {
        let parsed = Options::parse_from(["fastjob"]);
        let default = Options::default();

        assert_eq!(parsed.directory, default.directory);
        assert_eq!(parsed.core_count, default.core_count);
        assert_eq!(parsed.files, default.files);
    }

    #[test]
    fn preflight_counts_every_problem() {
        let options = Options::parse_from([
            "fastjob", "--debug", "--silent", "-g", "--cores", "0", "job.cfg",
        ]);

        assert!(matches!(
            options.preflight_checks(),
            Err(ConfigErrors::Preflight(3))
        ));
    }

    #[test]
    fn worker_args_round_trip() {
        let options = Options::parse_from(["fastjob", "-d", "/jobs", "--debug", "--cores", "3"]);
        let mut args = vec!["fastjob".to_owned()];
        args.extend(options.worker_args());

        let worker = Options::parse_from(args);
        assert!(worker.worker);
        assert!(worker.debug);
        assert_eq!(worker.directory, PathBuf::from("/jobs"));
        assert!(worker.preflight_checks().is_ok());
    }

    #[test]
    fn loads_yaml_space() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("space.yaml");
        fs::write(
            &path,
            "space:\n  command: [ls, df]\n  dir: [/, /etc]\n  limits:\n    memory: 512\ncount: 2\n",
        )
        .unwrap();

        let config = SpaceConfig::load(&path).unwrap();
        assert_eq!(config.start, 0);
        assert_eq!(config.count, 2);
        assert_eq!(
            config.space.section("limits").and_then(|l| l.get_u64("memory")),
            Some(512)
        );
        assert_eq!(config.into_space().configurations().len(), 8);
    }

    #[test]
    fn loads_json_space_and_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("space.json");

        fs::write(&path, r#"{"space": {"a": [1, 2, 3]}, "start": 5}"#).unwrap();
        let space = SpaceConfig::load(&path).unwrap().into_space();
        let runs = space
            .configurations()
            .iter()
            .filter_map(Configuration::run)
            .collect::<Vec<_>>();
        assert_eq!(runs, vec![5, 5, 5]);

        fs::write(&path, r#"{"space": {}, "repeat": 2}"#).unwrap();
        assert!(matches!(
            SpaceConfig::load(&path),
            Err(ConfigErrors::InvalidSpace { .. })
        ));
    }

    #[test]
    fn missing_space_file() {
        assert!(matches!(
            SpaceConfig::load(Path::new("/nonexistent/space.yaml")),
            Err(ConfigErrors::FileNotFound { .. })
        ));
    }
}
