//! Reading and writing of job and result documents.
//!
//! Documents are JSON objects written with sorted keys and four space indentation, so that
//! two files describing the same configuration are byte-identical and easy to diff.

use serde::{ser::SerializeMap, Serialize, Serializer};
use serde_json::{ser::PrettyFormatter, Map, Value};
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Failed to read document {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to decode document {path:?}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Document {0:?} is not a JSON object")]
    NotAnObject(PathBuf),
    #[error("Failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to write document {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Serializes a JSON value with object keys in sorted order at every depth
struct Canonical<'a>(&'a Value);

/// Sorted view over a single JSON object
struct CanonicalMap<'a>(&'a Map<String, Value>);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => CanonicalMap(map).serialize(serializer),
            Value::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            scalar => scalar.serialize(serializer),
        }
    }
}

impl Serialize for CanonicalMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // serde_json may be built with `preserve_order`, so never rely on the map's own order
        let mut entries = self.0.iter().collect::<Vec<_>>();
        entries.sort_unstable_by(|(left, _), (right, _)| left.cmp(right));

        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, &Canonical(value))?;
        }
        map.end()
    }
}

/// compact, key sorted encoding used for fingerprinting
pub fn to_canonical_vec(map: &Map<String, Value>) -> Vec<u8> {
    // NOTE: serializing a `serde_json::Value` into memory has no failure path
    serde_json::to_vec(&CanonicalMap(map)).expect("JSON values always serialize")
}

/// compact, key sorted encoding as a string, used for log lines
pub fn to_canonical_string(map: &Map<String, Value>) -> String {
    String::from_utf8(to_canonical_vec(map)).unwrap_or_default()
}

/// human readable, key sorted encoding as it is stored on disk
pub fn to_pretty_vec(map: &Map<String, Value>) -> Result<Vec<u8>, DocumentError> {
    let mut buffer = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    CanonicalMap(map).serialize(&mut serializer)?;
    buffer.push(b'\n');

    Ok(buffer)
}

pub fn to_pretty_string(map: &Map<String, Value>) -> String {
    to_pretty_vec(map)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

/// Read a whole document, which has to be a JSON object
pub fn read_document(path: &Path) -> Result<Map<String, Value>, DocumentError> {
    let bytes = fs::read(path).map_err(|source| DocumentError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DocumentError::NotAnObject(path.to_path_buf())),
        Err(source) => Err(DocumentError::Decode {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// hidden sibling used while a document is being written, never picked up by queue listings
fn staging_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()))
}

fn write_staged(staging: &Path, contents: &[u8]) -> Result<(), DocumentError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(staging)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .map_err(|source| DocumentError::Write {
            path: staging.to_path_buf(),
            source,
        })
}

/// Write `map` to `path`, replacing it atomically if it exists
pub fn write_document(path: &Path, map: &Map<String, Value>) -> Result<(), DocumentError> {
    let contents = to_pretty_vec(map)?;
    let staging = staging_path(path);

    write_staged(&staging, &contents)?;
    fs::rename(&staging, path).map_err(|source| {
        let _ = fs::remove_file(&staging);

        DocumentError::Write {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Write `map` to `path` only if nothing exists at `path` yet.
///
/// The document is staged next to its destination and hard linked into place, so readers
/// never observe a partially written file and an existing file is never replaced. Returns
/// `false` if the destination was already taken.
pub fn publish_document(path: &Path, map: &Map<String, Value>) -> Result<bool, DocumentError> {
    let contents = to_pretty_vec(map)?;
    let staging = staging_path(path);

    write_staged(&staging, &contents)?;
    let linked = fs::hard_link(&staging, path);

    if let Err(error) = fs::remove_file(&staging) {
        warn!(path = ?staging, error = ?error, "Failed to remove staging file");
    }

    match linked {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
            debug!(path = ?path, "Document already exists, leaving it untouched");

            Ok(false)
        }
        Err(source) => Err(DocumentError::Write {
            path: path.to_path_buf(),
            source,
        }),
    }
}
