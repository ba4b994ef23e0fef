//! CLI surface: worker selection and command implementations.

pub mod commands;

use clap::ValueEnum;

/// Which worker(s) `run` starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkerKind {
    All,
    Ingestion,
    Signals,
    Profiler,
    Scoring,
    Notifier,
}
