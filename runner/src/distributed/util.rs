use std::{
    ffi::OsStr,
    fs, io,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

/// Result of moving a file that other processes may move concurrently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Moved {
    /// the file is now at the destination
    Moved,
    /// the source was gone, somebody else moved it first
    Vanished,
}

/// Rename `from` to `to`, distinguishing a lost race from real errors.
///
/// `ENOENT` is ambiguous for rename(2): it is also returned when the destination directory
/// is missing. Only the destination is checked afterwards, the source is never consulted
/// since its state may have changed again already.
pub fn move_file(from: &Path, to: &Path) -> io::Result<Moved> {
    match fs::rename(from, to) {
        Ok(()) => Ok(Moved::Moved),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            match to.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                Some(parent) if !parent.is_dir() => Err(error),
                _ => Ok(Moved::Vanished),
            }
        }
        Err(error) => Err(error),
    }
}

/// device the path lives on
pub fn device_id(path: &Path) -> io::Result<u64> {
    fs::metadata(path).map(|metadata| metadata.dev())
}

/// `target` with its file name replaced by the file name of `source`
pub fn with_file_name_of(target: &Path, source: &Path) -> PathBuf {
    target.join(source.file_name().unwrap_or(OsStr::new("")))
}
