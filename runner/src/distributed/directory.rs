use super::util::device_id;
use crate::{configuration::Configuration, hash::fingerprint};
use itertools::Itertools;
use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error};

/// The fixed set of directories a job file moves through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DirectoryKey {
    Results,
    Queue,
    Wip,
    Done,
    Error,
    Failure,
}

impl DirectoryKey {
    pub const ALL: [DirectoryKey; 6] = [
        Self::Results,
        Self::Queue,
        Self::Wip,
        Self::Done,
        Self::Error,
        Self::Failure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Results => "results",
            Self::Queue => "queue",
            Self::Wip => "wip",
            Self::Done => "done",
            Self::Error => "error",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for DirectoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Base directory {0:?} does not exist")]
    MissingBase(PathBuf),
    #[error("Failed to create directory {path:?}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("Failed to read metadata of {path:?}: {source}")]
    Metadata { path: PathBuf, source: io::Error },
    #[error("Illegal directory setting: {0:?} are not on the same file system")]
    MultipleFileSystems(Vec<PathBuf>),
    #[error("Failed to list {path:?}: {source}")]
    List { path: PathBuf, source: io::Error },
}

/// Base directory holding the queue, wip, terminal and results directories of one sweep.
///
/// All six directories must live on the same file system, otherwise moving a job file
/// between them would not be a single atomic rename.
#[derive(Clone, Debug)]
pub struct JobDirectory {
    base: PathBuf,
    prefix: Option<String>,
    directories: BTreeMap<DirectoryKey, PathBuf>,
}

/// return the sub directory, creating it first if neccessary
fn get_or_make_dir(path: PathBuf) -> Result<PathBuf, DirectoryError> {
    match fs::create_dir(&path) {
        Ok(()) => {
            debug!(path = ?path, "Created directory");

            Ok(path)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(path),
        Err(source) => Err(DirectoryError::Create { path, source }),
    }
}

impl JobDirectory {
    pub fn new(base: impl Into<PathBuf>, prefix: Option<&str>) -> Result<Self, DirectoryError> {
        let base = base.into();
        let prefix = prefix.filter(|prefix| !prefix.is_empty()).map(str::to_owned);

        if !base.is_dir() {
            return Err(DirectoryError::MissingBase(base));
        }

        let directories = DirectoryKey::ALL
            .iter()
            .map(|key| {
                let name = match &prefix {
                    Some(prefix) => format!("{prefix}-{key}"),
                    None => key.to_string(),
                };

                get_or_make_dir(base.join(name)).map(|path| (*key, path))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        // rename(2) is only atomic within a single file system. A directory could still be
        // over-mounted after this check, which we accept
        let devices = directories
            .values()
            .map(|path| {
                device_id(path).map_err(|source| DirectoryError::Metadata {
                    path: path.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if devices.iter().unique().count() > 1 {
            error!(
                directories = %directories.values().map(|path| path.display()).join(", "),
                "Job directories span multiple file systems"
            );

            return Err(DirectoryError::MultipleFileSystems(
                directories.into_values().collect(),
            ));
        }

        Ok(Self {
            base,
            prefix,
            directories,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn resolve(&self, key: DirectoryKey) -> &Path {
        // every key is inserted by `new`
        &self.directories[&key]
    }

    pub fn join(&self, key: DirectoryKey, file_name: impl AsRef<Path>) -> PathBuf {
        self.resolve(key).join(file_name)
    }

    /// all managed directories, used to find a job file wherever it currently is
    pub fn all(&self) -> impl Iterator<Item = &Path> {
        self.directories.values().map(PathBuf::as_path)
    }

    /// checks if a file with this name exists in any of the managed directories
    pub fn contains(&self, file_name: impl AsRef<Path>) -> bool {
        self.all().any(|directory| directory.join(&file_name).exists())
    }

    /// file name of the job and result file for `config`
    pub fn config_filename(&self, config: &Configuration) -> String {
        fingerprint(config).file_name()
    }

    /// List the files in `key`, hidden staging files are skipped
    pub fn list(&self, key: DirectoryKey) -> Result<Vec<PathBuf>, DirectoryError> {
        let directory = self.resolve(key);
        let entries = fs::read_dir(directory).map_err(|source| DirectoryError::List {
            path: directory.to_path_buf(),
            source,
        })?;

        Ok(entries
            // entries vanishing while we iterate are other workers claiming them
            .filter_map(Result::ok)
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .map(|entry| entry.path())
            .collect())
    }
}
