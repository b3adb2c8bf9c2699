use crate::{
    configuration::{Configuration, RUN_KEY},
    distributed::directory::{DirectoryKey, JobDirectory},
    document::{self, DocumentError},
};
use itertools::Itertools;
use serde_json::{Map, Value};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum SpaceError {
    #[error("Job runner cannot generate configurations without directory")]
    MissingDirectory,
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Predicate deciding whether an expanded configuration is queued
pub type Filter = Arc<dyn Fn(&Configuration) -> bool + Send + Sync>;

/// Counters of a single `generate_files` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateReport {
    /// configurations that passed all filters
    pub accepted: usize,
    /// job files newly written to the queue
    pub written: usize,
}

/// A specification plus the filters and runs used to expand it into job files.
///
/// Every list in the specification is a choice point: the expansion contains one
/// configuration per element, crossed with all other choice points. Nested objects are
/// expanded on their own and crossed with the rest.
#[derive(Clone)]
pub struct ConfigurationSpace {
    specification: Configuration,
    filters: Vec<Filter>,
    start: i64,
    count: u64,
}

impl fmt::Debug for ConfigurationSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationSpace")
            .field("specification", &self.specification)
            .field("filters", &self.filters.len())
            .field("start", &self.start)
            .field("count", &self.count)
            .finish()
    }
}

/// Recursively expand all choice points of `config`.
///
/// The first list or object in key order drives the split, which keeps the order of the
/// generated configurations stable between calls.
pub fn expand(config: &Map<String, Value>) -> Vec<Map<String, Value>> {
    for (key, value) in config {
        match value {
            Value::Array(choices) => {
                return choices
                    .iter()
                    .flat_map(|choice| {
                        let mut branch = config.clone();
                        branch.insert(key.clone(), choice.clone());

                        expand(&branch)
                    })
                    .collect();
            }
            Value::Object(nested) => {
                let mut remainder = config.clone();
                remainder.remove(key);

                return expand(nested)
                    .into_iter()
                    .cartesian_product(expand(&remainder))
                    .map(|(nested, mut rest)| {
                        rest.insert(key.clone(), Value::Object(nested));
                        rest
                    })
                    .collect();
            }
            _ => {}
        }
    }

    vec![config.clone()]
}

impl ConfigurationSpace {
    /// Space with a single run starting at index 0 and no filters
    pub fn new(specification: Configuration) -> Self {
        Self {
            specification,
            filters: Vec::new(),
            start: 0,
            count: 1,
        }
    }

    pub fn with_filters(
        specification: Configuration,
        filters: Vec<Filter>,
        start: i64,
        count: u64,
    ) -> Self {
        Self {
            specification,
            filters,
            start,
            count,
        }
    }

    /// Adds a new filter check, only configurations passing all filters are created
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Configuration) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Generate `count` repetitions with run indices starting at `start`
    pub fn with_runs(mut self, start: i64, count: u64) -> Self {
        self.start = start;
        self.count = count;
        self
    }

    pub fn specification(&self) -> &Configuration {
        &self.specification
    }

    pub fn runs(&self) -> impl Iterator<Item = i64> {
        let start = self.start;

        (0..self.count).map(move |offset| start.saturating_add(offset as i64))
    }

    /// every expansion of a single run, before filtering
    pub fn expand_run(&self, run: i64) -> Vec<Configuration> {
        let mut base = Map::new();
        base.insert(RUN_KEY.to_owned(), Value::from(run));
        // the specification may override or even expand `run`
        base.extend(
            self.specification
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        expand(&base).into_iter().map(Configuration::from).collect()
    }

    pub fn accepts(&self, config: &Configuration) -> bool {
        self.filters.iter().all(|filter| filter(config))
    }

    /// all accepted configurations over all runs, in generation order
    pub fn configurations(&self) -> Vec<Configuration> {
        self.runs()
            .flat_map(|run| self.expand_run(run))
            .filter(|config| self.accepts(config))
            .collect()
    }

    /// Write a job file for every accepted configuration not seen before.
    ///
    /// A configuration counts as seen if a file with its name exists in any of the job
    /// directories, so finished, failed and cached work is never queued again.
    #[instrument(skip(self, directory), level = "info")]
    pub fn generate_files(
        &self,
        directory: Option<&JobDirectory>,
    ) -> Result<GenerateReport, SpaceError> {
        let directory = directory.ok_or(SpaceError::MissingDirectory)?;
        let mut report = GenerateReport::default();

        debug!("Start generating configuration space");

        for config in self.configurations() {
            report.accepted += 1;
            info!("{config}");

            if write_config_file(directory, config)? {
                report.written += 1;
            }
        }

        info!(
            accepted = report.accepted,
            written = report.written,
            "Generated configuration space"
        );

        Ok(report)
    }
}

/// Writes a given configuration unless it already exists in some job directory
pub fn write_config_file(
    directory: &JobDirectory,
    mut config: Configuration,
) -> Result<bool, SpaceError> {
    if !config.contains_key(RUN_KEY) {
        config.insert(RUN_KEY, 1);
    }

    let file_name = directory.config_filename(&config);
    if directory.contains(&file_name) {
        debug!("Skip job file {file_name}");
        return Ok(false);
    }

    debug!("Write job file {file_name}");
    Ok(document::publish_document(
        &directory.join(DirectoryKey::Queue, &file_name),
        config.as_map(),
    )?)
}
