//! Request bodies for upload operations.
//!
//! A [`BodySource`] describes where the bytes of a request come from. Sources are only turned into
//! an actual request body by the executor, so a [`BodySource::File`] is opened right before the
//! request and its handle is dropped together with the request, whether it succeeds or fails.

use std::path::PathBuf;
use std::pin::Pin;
use std::{fmt, io, task};

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use rand_distr::{Distribution, LogNormal};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::ReaderStream;

/// The source of a request body.
#[derive(Debug)]
pub enum BodySource {
    /// No body at all.
    Empty,
    /// A fixed in-memory buffer.
    Buffer(Bytes),
    /// A local file, streamed from disk.
    File(PathBuf),
    /// Pseudo-random contents, generated while streaming.
    Generated(Payload),
}

impl BodySource {
    /// Returns the number of bytes in this body, if known without touching the filesystem.
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            BodySource::Empty => Some(0),
            BodySource::Buffer(bytes) => Some(bytes.len() as u64),
            BodySource::File(_) => None,
            BodySource::Generated(payload) => Some(payload.len),
        }
    }

    /// Converts this source into a streaming [`reqwest::Body`].
    ///
    /// Files are opened here. The returned body owns the file handle.
    pub async fn into_body(self) -> io::Result<reqwest::Body> {
        let body = match self {
            BodySource::Empty => reqwest::Body::from(Bytes::new()),
            BodySource::Buffer(bytes) => reqwest::Body::from(bytes),
            BodySource::File(path) => {
                let file = tokio::fs::File::open(&path).await?;
                reqwest::Body::wrap_stream(ReaderStream::new(file))
            }
            BodySource::Generated(payload) => reqwest::Body::wrap_stream(ReaderStream::new(payload)),
        };

        Ok(body)
    }
}

impl From<Bytes> for BodySource {
    fn from(bytes: Bytes) -> Self {
        BodySource::Buffer(bytes)
    }
}

impl From<Payload> for BodySource {
    fn from(payload: Payload) -> Self {
        BodySource::Generated(payload)
    }
}

/// A distribution of generated payload sizes.
///
/// Either a fixed size, or a *LogNormal* distribution defined by its `p50` and `p99`. The latter
/// models many small files with a long tail of larger ones.
#[derive(Clone)]
pub enum SizeDistribution {
    /// Every payload has the same size.
    Fixed(u64),
    /// Sizes follow a log-normal distribution.
    LogNormal(LogNormal<f64>),
}

impl SizeDistribution {
    /// Creates a log-normal distribution from its median and 99th percentile.
    ///
    /// Falls back to a fixed size of `p50` if `p99` does not exceed it.
    pub fn from_percentiles(p50: u64, p99: u64) -> Self {
        if p99 <= p50 || p50 == 0 {
            return SizeDistribution::Fixed(p50);
        }

        // Inspired by <https://stats.stackexchange.com/a/649432>
        let mu = (p50 as f64).ln();
        let sigma = ((p99 as f64).ln() - mu) / 2.3263;

        match LogNormal::new(mu, sigma) {
            Ok(distribution) => SizeDistribution::LogNormal(distribution),
            Err(_) => SizeDistribution::Fixed(p50),
        }
    }

    /// Draws a payload with a size from this distribution, seeded from `seed`.
    pub fn payload(&self, seed: u64) -> Payload {
        let mut rng = SmallRng::seed_from_u64(seed);
        let len = match self {
            SizeDistribution::Fixed(len) => *len,
            SizeDistribution::LogNormal(distribution) => distribution.sample(&mut rng) as u64,
        };

        Payload { len, rng }
    }
}

impl fmt::Debug for SizeDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeDistribution::Fixed(len) => f.debug_tuple("Fixed").field(len).finish(),
            SizeDistribution::LogNormal(_) => f.debug_tuple("LogNormal").finish_non_exhaustive(),
        }
    }
}

/// Randomized contents of an uploaded file.
///
/// Clone this instance to reuse it with deterministic contents across multiple uploads.
#[derive(Debug, Clone)]
pub struct Payload {
    /// The remaining length of the payload in bytes.
    pub len: u64,
    /// The RNG used to fill the payload with random bytes.
    pub rng: SmallRng,
}

impl Payload {
    /// Creates a payload of `len` bytes with contents derived from `seed`.
    pub fn new(len: u64, seed: u64) -> Self {
        Self {
            len,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl io::Read for Payload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len_to_fill = (buf.len() as u64).min(self.len) as usize;

        let fill_buf = &mut buf[..len_to_fill];
        self.rng.fill_bytes(fill_buf);

        self.len -= len_to_fill as u64;
        Ok(len_to_fill)
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

    #[test]
    fn payload_yields_exact_length() {
        let mut contents = Vec::new();
        io::Read::read_to_end(&mut Payload::new(10_000, 42), &mut contents).unwrap();
        assert_eq!(contents.len(), 10_000);
    }

    #[tokio::test]
    async fn payload_is_deterministic() {
        let mut first = Vec::new();
        let mut second = Vec::new();
        AsyncReadExt::read_to_end(&mut Payload::new(4096, 7), &mut first)
            .await
            .unwrap();
        AsyncReadExt::read_to_end(&mut Payload::new(4096, 7), &mut second)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn fixed_sizes_are_constant() {
        let sizes = SizeDistribution::from_percentiles(1024, 1024);
        for seed in 0..100 {
            assert_eq!(sizes.payload(seed).len, 1024);
        }
    }

    #[test]
    fn lognormal_median_is_close_to_p50() {
        let sizes = SizeDistribution::from_percentiles(1000, 100_000);
        let mut samples: Vec<_> = (0..1001).map(|seed| sizes.payload(seed).len).collect();
        samples.sort_unstable();

        let median = samples[500];
        assert!((500..2000).contains(&median), "median was {median}");
    }

    #[test]
    fn len_hint() {
        assert_eq!(BodySource::Empty.len_hint(), Some(0));
        assert_eq!(BodySource::from(Bytes::from_static(b"oh hai!")).len_hint(), Some(7));
        assert_eq!(BodySource::File("/dev/null".into()).len_hint(), None);
        assert_eq!(BodySource::from(Payload::new(5, 0)).len_hint(), Some(5));
    }

    #[tokio::test]
    async fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let source = BodySource::File(dir.path().join("does-not-exist"));
        let err = source.into_body().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn existing_file_opens() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"contents").unwrap();

        let body = BodySource::File(file.path().into()).into_body().await.unwrap();
        assert!(body.as_bytes().is_none(), "file bodies are streamed");
    }
}
