//! Storage backends driven by the rangebench engine.
//!
//! Every backend implements [`StorageClient`], the small capability set the benchmark needs:
//! reading a byte range of an object, checking that an object exists, and uploading an object.
//! The engine only ever talks to a `dyn StorageClient`, so the concrete backend is picked once
//! at construction time.
//!
//! Two families of backends are provided:
//!
//! - [`S3Compatible`] speaks the S3 protocol and covers both AWS S3 and Cloudflare R2 through
//!   [`S3Flavor`].
//! - [`SimulatedBackend`] keeps object sizes in memory and fakes latency, a shared link
//!   bandwidth and injected failures. It exists for tests and for dry runs of a benchmark
//!   configuration without touching a real bucket.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod common;
pub mod payload;
mod s3_compatible;
mod simulated;

pub use common::{BackendError, BackendResult, RangeRead, SharedClient, StorageClient};
pub use payload::Payload;
pub use s3_compatible::{S3Compatible, S3CompatibleConfig, S3Flavor};
pub use simulated::{SimulatedBackend, SimulatedBackendBuilder};
