//! Execution engine for project test suites: resolves what to run,
//! runs every test/data-set/browser unit in a bounded worker pool and
//! aggregates per-unit reports into an execution report.

pub mod cli;
pub mod emit;
pub mod error;
pub mod logging;
pub mod plan;
pub mod project;
pub mod report;
pub mod runner;
