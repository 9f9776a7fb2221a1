//! The `rangebench` command line tool.
//!
//! Wires the [`rangebench_engine`] to a real or simulated store, to configuration, logging, Sentry
//! and Datadog metrics, and writes the results of every run to disk.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod export;
pub mod monitor;
pub mod observability;
pub mod output;
pub mod prepare;
pub mod report;
pub mod runtime;
pub mod storage;
