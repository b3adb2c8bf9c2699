use super::{
    directory::{DirectoryKey, JobDirectory},
    util::{move_file, with_file_name_of, Moved},
};
use nix::{
    libc,
    sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal},
};
use std::{
    ffi::{CString, OsStr},
    fs, io,
    os::unix::prelude::OsStrExt,
    path::{Path, PathBuf},
    ptr::{self, NonNull},
    sync::atomic::{AtomicBool, AtomicPtr, Ordering},
};
use tracing::{debug, error, warn};

/// Paths the signal handler needs to hand a claimed job over to the failure directory
struct ClaimPaths {
    wip: CString,
    failure: CString,
}

/// Claim of the current worker, published for `release_claim`
static CLAIMED: AtomicPtr<ClaimPaths> = AtomicPtr::new(ptr::null_mut());
static SIGNALS_INSTALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn release_claim(signal: libc::c_int) {
    // only async-signal-safe calls below: rename(2) and _exit(2)
    let paths = CLAIMED.swap(ptr::null_mut(), Ordering::SeqCst);

    if !paths.is_null() {
        // SAFETY: published by `register`, freed only after it was swapped out again. The
        // pointer is leaked here, the process ends right after
        unsafe {
            libc::rename((*paths).wip.as_ptr(), (*paths).failure.as_ptr());
        }
    }

    // SAFETY: terminating without running destructors is the point
    unsafe { libc::_exit(128 + signal) }
}

/// Move a claimed job to the failure directory when the worker is asked to terminate.
///
/// Should be called once per worker process, before the first claim.
pub fn install_signal_handlers() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(release_claim),
        SaFlags::empty(),
        SigSet::empty(),
    );

    for signal in [Signal::SIGTERM, Signal::SIGINT] {
        // SAFETY: the handler touches nothing but an atomic pointer and two syscalls
        unsafe { sigaction(signal, &action) }?;
    }

    SIGNALS_INSTALLED.store(true, Ordering::SeqCst);
    debug!("Installed signal handlers for claimed jobs");

    Ok(())
}

fn termination_signals() -> SigSet {
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGTERM);
    signals.add(Signal::SIGINT);

    signals
}

/// Holds back SIGTERM and SIGINT on the current thread until dropped.
///
/// A claim is renamed into wip before it can be published in `CLAIMED`, a signal arriving
/// in between would leave the file in wip.
struct DeferredSignals {
    previous: Option<SigSet>,
}

impl DeferredSignals {
    fn block() -> Self {
        match termination_signals().thread_swap_mask(SigmaskHow::SIG_BLOCK) {
            Ok(previous) => Self {
                previous: Some(previous),
            },
            Err(error) => {
                warn!(error = ?error, "Failed to defer signals during claim");

                Self { previous: None }
            }
        }
    }
}

impl Drop for DeferredSignals {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            // pending signals are delivered here, `CLAIMED` is already published
            if let Err(error) = previous.thread_set_mask() {
                error!(error = ?error, "Failed to restore signal mask after claim");
            }
        }
    }
}

fn register(wip: &Path, failure: &Path) -> Option<NonNull<ClaimPaths>> {
    if !SIGNALS_INSTALLED.load(Ordering::SeqCst) {
        return None;
    }

    let paths = match (
        CString::new(wip.as_os_str().as_bytes()),
        CString::new(failure.as_os_str().as_bytes()),
    ) {
        (Ok(wip), Ok(failure)) => Box::new(ClaimPaths { wip, failure }),
        _ => {
            warn!(path = ?wip, "Path contains a nul byte, a signal will not release it");
            return None;
        }
    };
    let raw = Box::into_raw(paths);

    match CLAIMED.compare_exchange(ptr::null_mut(), raw, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(_) => NonNull::new(raw),
        Err(_) => {
            // SAFETY: `raw` was never published
            drop(unsafe { Box::from_raw(raw) });
            warn!(path = ?wip, "Another claim is already registered for signals");

            None
        }
    }
}

fn unregister(paths: NonNull<ClaimPaths>) {
    if CLAIMED
        .compare_exchange(
            paths.as_ptr(),
            ptr::null_mut(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_ok()
    {
        // SAFETY: allocated in `register` and no longer reachable by the signal handler
        drop(unsafe { Box::from_raw(paths.as_ptr()) });
    }
}

/// A job file this process owns because it renamed it into the wip directory.
///
/// Ownership ends with [`ClaimedJob::finish`]. If the value is dropped before that, e.g.
/// due to an error or a panic unwinding the worker, the file is moved to the failure
/// directory so it never stays in wip silently.
#[derive(Debug)]
pub struct ClaimedJob {
    path: PathBuf,
    failure_path: PathBuf,
    finished: bool,
    registration: Option<NonNull<ClaimPaths>>,
}

impl ClaimedJob {
    /// Claim `queued` by renaming it into the wip directory.
    ///
    /// Returns `Ok(None)` if another worker claimed it first.
    pub fn claim(directory: &JobDirectory, queued: &Path) -> io::Result<Option<Self>> {
        let path = with_file_name_of(directory.resolve(DirectoryKey::Wip), queued);
        let failure_path = with_file_name_of(directory.resolve(DirectoryKey::Failure), queued);
        let _deferred = DeferredSignals::block();

        match move_file(queued, &path)? {
            Moved::Vanished => {
                debug!(path = ?queued, "Skipped since it was claimed between listing and rename");

                Ok(None)
            }
            Moved::Moved => {
                let registration = register(&path, &failure_path);

                Ok(Some(Self {
                    path,
                    failure_path,
                    finished: false,
                    registration,
                }))
            }
        }
    }

    /// location of the job file inside the wip directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &OsStr {
        self.path.file_name().unwrap_or_default()
    }

    /// Move the job file into the terminal directory `key` and release it
    pub fn finish(mut self, directory: &JobDirectory, key: DirectoryKey) -> io::Result<PathBuf> {
        let target = with_file_name_of(directory.resolve(key), &self.path);

        fs::rename(&self.path, &target)?;
        self.finished = true;
        debug!(path = ?target, "Finished rename for job file");

        Ok(target)
    }
}

impl Drop for ClaimedJob {
    fn drop(&mut self) {
        if !self.finished {
            match fs::rename(&self.path, &self.failure_path) {
                Ok(()) => warn!(path = ?self.failure_path, "Moved unfinished job to failure"),
                Err(error) => {
                    error!(error = ?error, path = ?self.path, "Failed to move unfinished job to failure")
                }
            }
        }

        // released only after the file left wip, a signal in between finds nothing to move
        if let Some(registration) = self.registration.take() {
            unregister(registration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    fn queued(directory: &JobDirectory, name: &str) -> PathBuf {
        let path = directory.join(DirectoryKey::Queue, name);
        fs::write(&path, "{\"run\": 1}").unwrap();

        path
    }

    #[test]
    fn claim_moves_into_wip() {
        let base = tempfile::tempdir().unwrap();
        let directory = JobDirectory::new(base.path(), Some("t")).unwrap();
        let path = queued(&directory, "a.cfg");

        let job = ClaimedJob::claim(&directory, &path).unwrap().unwrap();
        assert!(!path.exists());
        assert_eq!(job.path(), directory.join(DirectoryKey::Wip, "a.cfg"));
        assert!(job.path().exists());

        let done = job.finish(&directory, DirectoryKey::Done).unwrap();
        assert_eq!(done, directory.join(DirectoryKey::Done, "a.cfg"));
        assert!(done.exists());
        assert!(!directory.join(DirectoryKey::Failure, "a.cfg").exists());
    }

    #[test]
    fn dropped_claim_ends_in_failure() {
        let base = tempfile::tempdir().unwrap();
        let directory = JobDirectory::new(base.path(), Some("t")).unwrap();
        let path = queued(&directory, "a.cfg");

        drop(ClaimedJob::claim(&directory, &path).unwrap().unwrap());

        assert!(!directory.join(DirectoryKey::Wip, "a.cfg").exists());
        assert!(directory.join(DirectoryKey::Failure, "a.cfg").exists());
    }

    #[test]
    fn claim_of_missing_file_is_a_lost_race() {
        let base = tempfile::tempdir().unwrap();
        let directory = JobDirectory::new(base.path(), Some("t")).unwrap();

        assert!(
            ClaimedJob::claim(&directory, &directory.join(DirectoryKey::Queue, "x.cfg"))
                .unwrap()
                .is_none()
        );
    }

    fn termination_blocked() -> bool {
        let mask = SigSet::thread_get_mask().unwrap();

        mask.contains(Signal::SIGTERM) && mask.contains(Signal::SIGINT)
    }

    #[test]
    fn signals_are_deferred_while_claiming() {
        // fresh thread, the mask of the test harness thread stays untouched
        thread::spawn(|| {
            assert!(!termination_blocked());

            let deferred = DeferredSignals::block();
            assert!(termination_blocked());
            drop(deferred);
            assert!(!termination_blocked());

            let base = tempfile::tempdir().unwrap();
            let directory = JobDirectory::new(base.path(), Some("t")).unwrap();
            let path = queued(&directory, "a.cfg");

            let job = ClaimedJob::claim(&directory, &path).unwrap().unwrap();
            assert!(!termination_blocked());
            job.finish(&directory, DirectoryKey::Done).unwrap();

            assert!(ClaimedJob::claim(&directory, &path).unwrap().is_none());
            assert!(!termination_blocked());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn concurrent_claims_are_exclusive() {
        const CONTENDERS: usize = 16;

        let base = tempfile::tempdir().unwrap();
        let directory = Arc::new(JobDirectory::new(base.path(), Some("t")).unwrap());
        let path = Arc::new(queued(&directory, "contested.cfg"));
        let barrier = Arc::new(Barrier::new(CONTENDERS));

        let winners = (0..CONTENDERS)
            .map(|_| {
                let (directory, path, barrier) =
                    (directory.clone(), path.clone(), barrier.clone());

                thread::spawn(move || {
                    barrier.wait();

                    match ClaimedJob::claim(&directory, &path).unwrap() {
                        Some(job) => {
                            job.finish(&directory, DirectoryKey::Done).unwrap();
                            1
                        }
                        None => 0,
                    }
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .sum::<usize>();

        assert_eq!(winners, 1);
        assert!(directory.join(DirectoryKey::Done, "contested.cfg").exists());
        assert!(!directory.join(DirectoryKey::Failure, "contested.cfg").exists());
    }
}
