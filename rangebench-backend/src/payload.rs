//! Random object contents for preparing benchmark objects.

use std::pin::Pin;
use std::{io, task};

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use tokio::io::{AsyncRead, ReadBuf};

/// Randomized contents of an object, generated on the fly.
///
/// The payload never materializes in memory, which matters for the gigabyte-sized objects the
/// benchmark reads from. Two payloads created with the same seed and length yield identical
/// bytes.
#[derive(Debug, Clone)]
pub struct Payload {
    /// The remaining length of the payload in bytes.
    pub len: u64,
    rng: SmallRng,
}

impl Payload {
    /// Creates a payload of `len` random bytes derived from `seed`.
    pub fn random(len: u64, seed: u64) -> Self {
        Self {
            len,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl AsyncRead for Payload {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        let len_to_fill = (buf.remaining() as u64).min(self.len) as usize;

        let fill_buf = buf.initialize_unfilled_to(len_to_fill);
        self.rng.fill_bytes(fill_buf);

        self.len -= len_to_fill as u64;
        buf.advance(len_to_fill);

        task::Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn yields_exact_length() {
        let mut payload = Payload::random(100_000, 7);
        let mut contents = Vec::new();
        payload.read_to_end(&mut contents).await.unwrap();

        assert_eq!(contents.len(), 100_000);
        assert_eq!(payload.len, 0);
    }

    #[tokio::test]
    async fn same_seed_same_contents() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        Payload::random(4096, 42).read_to_end(&mut a).await.unwrap();
        Payload::random(4096, 42).read_to_end(&mut b).await.unwrap();
        assert_eq!(a, b);

        let mut c = Vec::new();
        Payload::random(4096, 43).read_to_end(&mut c).await.unwrap();
        assert_ne!(a, c);
    }
}
