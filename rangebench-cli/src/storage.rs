//! Construction of the storage client.

use std::sync::Arc;

use anyhow::{Context, Result};
use rangebench_backend::{
    S3Compatible, S3CompatibleConfig, S3Flavor, SharedClient, SimulatedBackend,
};
use secrecy::{ExposeSecret, SecretBox};

use crate::config::{Config, Secret, Storage};

/// Creates the client for the configured store.
///
/// A simulated store is created with the full object pool of the benchmark already in place.
pub fn client(config: &Config) -> Result<SharedClient> {
    let (flavor, bucket, path_style) = match &config.storage {
        Storage::Simulated { latency, bandwidth } => {
            let benchmark = &config.benchmark;
            let backend = SimulatedBackend::builder()
                .objects(benchmark.object_keys(), benchmark.object_size.as_u64())
                .latency(*latency)
                .bandwidth(bandwidth.map_or(0, |bandwidth| bandwidth.as_u64()))
                .build();
            return Ok(Arc::new(backend));
        }
        Storage::S3 { region, bucket } => (
            S3Flavor::Aws {
                region: region.clone(),
            },
            bucket,
            false,
        ),
        Storage::R2 { account_id, bucket } => (
            S3Flavor::R2 {
                account_id: account_id.clone(),
            },
            bucket,
            false,
        ),
        Storage::Custom {
            endpoint,
            region,
            bucket,
            path_style,
        } => (
            S3Flavor::Custom {
                endpoint: endpoint.clone(),
                region: region.clone(),
            },
            bucket,
            *path_style,
        ),
    };

    let credentials = &config.credentials;
    let client = S3Compatible::new(S3CompatibleConfig {
        flavor,
        bucket: bucket.clone(),
        path_style,
        request_timeout: config.benchmark.request_timeout,
        access_key: expose(&credentials.access_key_id),
        secret_key: expose(&credentials.secret_access_key),
        session_token: expose(&credentials.session_token),
    })
    .context("failed to create storage client")?;

    Ok(Arc::new(client))
}

fn expose(secret: &Option<SecretBox<Secret>>) -> Option<String> {
    secret
        .as_ref()
        .map(|secret| secret.expose_secret().as_str().to_owned())
}
