use std::fmt;
use std::io;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha512};

use crate::error::TypeError;

/// Digest algorithms understood by the engine.
///
/// SHA-512 is the server default: at least one SHA-512 digest is computed
/// and stored for every binary even when the caller declares none. The
/// older algorithms exist so caller-declared legacy digests can still be
/// verified and round-tripped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "sha-512", alias = "sha512")]
    Sha512,
    #[serde(rename = "sha-256", alias = "sha256")]
    Sha256,
    #[serde(rename = "sha1", alias = "sha-1")]
    Sha1,
    #[serde(rename = "md5", alias = "md-5")]
    Md5,
}

impl DigestAlgorithm {
    pub const DEFAULT: Self = Self::Sha512;

    /// The algorithm name as it appears inside a digest URN.
    pub fn urn_name(&self) -> &'static str {
        match self {
            Self::Sha512 => "sha-512",
            Self::Sha256 => "sha-256",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }

    /// Expected hex length of a digest produced by this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha512 => 128,
            Self::Sha256 => 64,
            Self::Sha1 => 40,
            Self::Md5 => 32,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.urn_name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha-512" | "sha512" => Ok(Self::Sha512),
            "sha-256" | "sha256" => Ok(Self::Sha256),
            "sha-1" | "sha1" => Ok(Self::Sha1),
            "md-5" | "md5" => Ok(Self::Md5),
            other => Err(TypeError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// A content digest, rendered externally as `urn:<algorithm>:<hex>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Digest {
    pub algorithm: DigestAlgorithm,
    pub hex: String,
}

impl Digest {
    pub fn new(algorithm: DigestAlgorithm, hex: impl Into<String>) -> Self {
        Self {
            algorithm,
            hex: hex.into().to_ascii_lowercase(),
        }
    }

    /// Parse a `urn:<algorithm>:<hex>` string.
    pub fn parse_urn(urn: &str) -> Result<Self, TypeError> {
        let invalid = || TypeError::InvalidDigestUrn(urn.to_string());
        let rest = urn.strip_prefix("urn:").ok_or_else(invalid)?;
        let colon = rest.rfind(':').ok_or_else(invalid)?;
        let (algorithm, hex) = (&rest[..colon], &rest[colon + 1..]);
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        Ok(Self::new(algorithm.parse()?, hex))
    }

    /// Digest `data` under a single algorithm.
    pub fn compute(algorithm: DigestAlgorithm, data: &[u8]) -> Self {
        let mut hasher = Hasher::new(algorithm);
        hasher.update(data);
        Self::new(algorithm, hasher.finalize_hex())
    }

    /// Render as a digest URN.
    pub fn urn(&self) -> String {
        format!("urn:{}:{}", self.algorithm.urn_name(), self.hex)
    }

    /// Case-insensitive comparison against another digest of the same
    /// algorithm.
    pub fn matches(&self, other: &Digest) -> bool {
        self.algorithm == other.algorithm && self.hex.eq_ignore_ascii_case(&other.hex)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urn())
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.urn()
    }
}

impl TryFrom<String> for Digest {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Digest::parse_urn(&s)
    }
}

enum Hasher {
    Sha512(Sha512),
    Sha256(Sha256),
    Sha1(Sha1),
    Md5(Md5),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            DigestAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            DigestAlgorithm::Md5 => Self::Md5(Md5::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha512(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Md5(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha512(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

/// Computes any set of digest algorithms over one pass of the data.
///
/// Used both when content is first staged (to derive server-managed
/// digests) and during fixity verification (to recompute digests for
/// comparison against caller-declared values). Duplicate algorithms in the
/// requested set collapse to one hasher.
pub struct MultiDigestWriter {
    hashers: Vec<(DigestAlgorithm, Hasher)>,
}

impl MultiDigestWriter {
    pub fn new(algorithms: impl IntoIterator<Item = DigestAlgorithm>) -> Self {
        let mut hashers: Vec<(DigestAlgorithm, Hasher)> = Vec::new();
        for algorithm in algorithms {
            if !hashers.iter().any(|(a, _)| *a == algorithm) {
                hashers.push((algorithm, Hasher::new(algorithm)));
            }
        }
        Self { hashers }
    }

    /// The default-algorithm writer.
    pub fn sha512() -> Self {
        Self::new([DigestAlgorithm::DEFAULT])
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, hasher) in &mut self.hashers {
            hasher.update(data);
        }
    }

    pub fn finalize(self) -> Vec<Digest> {
        self.hashers
            .into_iter()
            .map(|(algorithm, hasher)| Digest::new(algorithm, hasher.finalize_hex()))
            .collect()
    }

    /// One-shot digest computation over a full buffer.
    pub fn compute(
        data: &[u8],
        algorithms: impl IntoIterator<Item = DigestAlgorithm>,
    ) -> Vec<Digest> {
        let mut writer = Self::new(algorithms);
        writer.update(data);
        writer.finalize()
    }
}

impl io::Write for MultiDigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
