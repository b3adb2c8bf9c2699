use crate::distributed::{
    directory::{DirectoryError, DirectoryKey, JobDirectory},
    fs::ClaimedJob,
};
use once_cell::sync::Lazy;
use std::{
    io,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error(transparent)]
    List(#[from] DirectoryError),
    #[error("Failed to claim {path:?}: {source}")]
    Claim { path: PathBuf, source: io::Error },
}

/// Per process offset into the queue listing, so workers started together do not all
/// race for the same first file
static SEED: Lazy<usize> = Lazy::new(|| {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos())
        .unwrap_or(0);

    (std::process::id() as usize) ^ (nanos as usize)
});

/// Iterator over the jobs this process manages to claim from the queue.
///
/// The queue is listed again before each claim. Iteration ends as soon as a listing comes
/// back empty; files queued afterwards are left for workers that are still running.
#[derive(Debug)]
pub struct QueueCollector<'a> {
    directory: &'a JobDirectory,
    attempts: usize,
    exhausted: bool,
}

impl<'a> QueueCollector<'a> {
    pub fn new(directory: &'a JobDirectory) -> Self {
        Self {
            directory,
            attempts: 0,
            exhausted: false,
        }
    }

    fn try_next(&mut self) -> Result<Option<ClaimedJob>, CollectorError> {
        loop {
            let candidates = self.directory.list(DirectoryKey::Queue)?;

            if candidates.is_empty() {
                debug!("Queue is empty");
                return Ok(None);
            }

            // any unclaimed file is as good as any other
            let candidate = &candidates[SEED.wrapping_add(self.attempts) % candidates.len()];
            self.attempts += 1;
            trace!(path = ?candidate, remaining = candidates.len(), "Selected job file");

            match ClaimedJob::claim(self.directory, candidate) {
                Ok(Some(job)) => return Ok(Some(job)),
                Ok(None) => continue,
                Err(source) => {
                    return Err(CollectorError::Claim {
                        path: candidate.clone(),
                        source,
                    })
                }
            }
        }
    }
}

impl Iterator for QueueCollector<'_> {
    type Item = Result<ClaimedJob, CollectorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let next = self.try_next().transpose();
        // a failed listing or claim ends the collector as well
        self.exhausted = !matches!(next, Some(Ok(_)));

        next
    }
}
