//! Serializes durations as fractional milliseconds.
//!
//! Outcome files and summaries are consumed by plotting scripts that expect plain numbers.

use std::time::Duration;

use serde::Serializer;

pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(value.as_secs_f64() * 1000.0)
}

