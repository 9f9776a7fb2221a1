//! Test utilities for rangebench.
//!
//! See the modules for all available utilities.

pub mod backend;
pub mod tracing;
