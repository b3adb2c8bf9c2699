pub mod directory;
pub mod fs;
pub mod util;

#[cfg(test)]
mod util_test;

/*
 * Coordinator-less work distribution over a shared file system:
 * 1. The generator writes one file per configuration into the queue directory
 * 2. Workers list the queue and claim a file by renaming it into the wip directory,
 *    rename(2) within one file system is atomic so exactly one worker wins
 * 3. The winner runs the job and renames the file into done, error or failure
 *
 * There is no lease or heartbeat. A worker killed without a chance to run its signal
 * handler leaves its file in wip, where it stays until someone moves it back by hand.
 */
