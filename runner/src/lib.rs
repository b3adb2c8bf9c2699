//! Parameter sweeps coordinated over a shared file system.
//!
//! A [`space::ConfigurationSpace`] expands a specification into job files inside a
//! [`distributed::directory::JobDirectory`]. Any number of worker processes, possibly on
//! different hosts sharing the mount, then claim those files by renaming them and run a
//! [`handler::WorkHandler`] against each configuration.

pub mod cli;
pub mod collector;
pub mod config;
pub mod configuration;
pub mod distributed;
pub mod document;
pub mod executors;
pub mod handler;
pub mod hash;
pub mod space;

pub use configuration::Configuration;
pub use distributed::directory::{DirectoryKey, JobDirectory};
pub use executors::{JobOutcome, JobRunner};
pub use handler::{HandlerError, JobOutput, WorkHandler};
pub use space::ConfigurationSpace;
