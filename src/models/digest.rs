//! Algorithm-tagged content checksums.
//!
//! A digest travels as a single opaque identifier of the form
//! `urn:<algorithm>:<value>`, e.g. `urn:sha1:aaf4c61d...`. The same value is
//! stored on datastreams, used as the HTTP entity tag, and accepted from
//! clients as an ingest precondition.

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};
use sha2::Sha256;
use std::{fmt, str::FromStr};
use thiserror::Error;

const URN_PREFIX: &str = "urn:";

/// Algorithm assumed when a caller supplies a bare checksum value.
pub const LEGACY_DEFAULT_ALGORITHM: DigestAlgorithm = DigestAlgorithm::Sha1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("malformed content digest `{0}`")]
    Malformed(String),
    #[error("unsupported digest algorithm `{0}`")]
    UnsupportedAlgorithm(String),
}

/// Hash algorithms the repository can compute while ingesting content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Canonical lowercase name used inside digest identifiers.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    pub fn hasher(self) -> ContentHasher {
        match self {
            Self::Sha1 => ContentHasher::Sha1(Sha1::new()),
            Self::Md5 => ContentHasher::Md5(md5::Context::new()),
            Self::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = DigestError;

    /// Accepts canonical names and the common dashed/uppercase aliases
    /// (`SHA-1`, `SHA-256`, `MD5`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" | "sha" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            _ => Err(DigestError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Incremental hasher fed chunk by chunk while content streams to disk.
pub enum ContentHasher {
    Sha1(Sha1),
    Md5(md5::Context),
    Sha256(Sha256),
}

impl ContentHasher {
    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(chunk),
            Self::Md5(h) => h.consume(chunk),
            Self::Sha256(h) => h.update(chunk),
        }
    }

    /// Consume the hasher and return the digest as lowercase hex.
    pub fn finish_hex(self) -> String {
        match self {
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Md5(h) => format!("{:x}", h.compute()),
            Self::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// A checksum tagged with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest {
    algorithm: String,
    value: String,
}

impl ContentDigest {
    /// Split a `urn:<algorithm>:<value>` identifier into its parts.
    pub fn parse(uri: &str) -> Result<Self, DigestError> {
        let malformed = || DigestError::Malformed(uri.to_string());
        let prefix = uri.get(..URN_PREFIX.len()).ok_or_else(malformed)?;
        if !prefix.eq_ignore_ascii_case(URN_PREFIX) {
            return Err(malformed());
        }
        let (algorithm, value) = uri[URN_PREFIX.len()..]
            .split_once(':')
            .ok_or_else(malformed)?;
        if algorithm.is_empty() || value.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            algorithm: algorithm.to_string(),
            value: value.to_string(),
        })
    }

    /// Build the identifier string for `algorithm` and `value`.
    ///
    /// `algorithm` must not contain `:`; everything after the second colon
    /// belongs to the value.
    pub fn format(algorithm: &str, value: &str) -> String {
        format!("{URN_PREFIX}{algorithm}:{value}")
    }

    pub fn new(algorithm: DigestAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.name().to_string(),
            value: value.into(),
        }
    }

    /// Interpret a caller-supplied checksum. A full identifier is parsed as
    /// is; a bare value is tagged with `default_algorithm`. Either way the
    /// value must be hex, since that is what ingest computes.
    pub fn from_checksum(
        checksum: &str,
        default_algorithm: DigestAlgorithm,
    ) -> Result<Self, DigestError> {
        let checksum = checksum.trim();
        let has_prefix = checksum
            .get(..URN_PREFIX.len())
            .is_some_and(|p| p.eq_ignore_ascii_case(URN_PREFIX));
        let digest = if has_prefix {
            Self::parse(checksum)?
        } else {
            Self::new(default_algorithm, checksum)
        };
        if digest.value.is_empty() || hex::decode(&digest.value).is_err() {
            return Err(DigestError::Malformed(checksum.to_string()));
        }
        Ok(digest)
    }

    /// Read the first supported entry of an RFC 3230 `Digest` header
    /// (`SHA=<base64>, MD5=<base64>`) and convert it to hex.
    pub fn from_digest_header(header: &str) -> Result<Self, DigestError> {
        let mut last_err = DigestError::Malformed(header.to_string());
        for entry in header.split(',') {
            let Some((alg, encoded)) = entry.trim().split_once('=') else {
                continue;
            };
            let algorithm = match alg.parse::<DigestAlgorithm>() {
                Ok(a) => a,
                Err(err) => {
                    last_err = err;
                    continue;
                }
            };
            let raw = general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|_| DigestError::Malformed(header.to_string()))?;
            return Ok(Self::new(algorithm, hex::encode(raw)));
        }
        Err(last_err)
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Resolve the algorithm name to one the repository can compute.
    pub fn digest_algorithm(&self) -> Result<DigestAlgorithm, DigestError> {
        self.algorithm.parse()
    }

    /// Compare against a freshly computed hex digest of the same algorithm.
    pub fn matches_hex(&self, computed: &str) -> bool {
        self.value.eq_ignore_ascii_case(computed)
    }

    /// Compute the digest of an in-memory buffer.
    pub fn compute(algorithm: DigestAlgorithm, content: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(content);
        Self::new(algorithm, hasher.finish_hex())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Self::format(&self.algorithm, &self.value))
    }
}

impl FromStr for ContentDigest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn parse_inverts_format() {
        for (alg, value) in [
            ("sha1", "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"),
            ("SHA-256", "ABCDEF"),
            ("md5", "value:with:colons"),
        ] {
            let digest = ContentDigest::parse(&ContentDigest::format(alg, value)).unwrap();
            assert_eq!(digest.algorithm(), alg);
            assert_eq!(digest.value(), value);
        }
    }

    #[test]
    fn parse_rejects_malformed_identifiers() {
        for bad in ["", "urn:", "urn:sha1", "urn::abc", "urn:sha1:", "sha1:abc", "ur"] {
            assert_eq!(
                ContentDigest::parse(bad),
                Err(DigestError::Malformed(bad.to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn bare_checksum_uses_default_algorithm() {
        let digest = ContentDigest::from_checksum("abc123", DigestAlgorithm::Sha1).unwrap();
        assert_eq!(digest.to_string(), "urn:sha1:abc123");

        let explicit = ContentDigest::from_checksum("urn:md5:ff", DigestAlgorithm::Sha1).unwrap();
        assert_eq!(explicit.algorithm(), "md5");
    }

    #[test]
    fn checksum_input_must_be_hex() {
        for bad in ["", "abcé1", "é", "xyz", "abc", "urn:sha1:not-hex", "urn:md5:é0"] {
            assert_eq!(
                ContentDigest::from_checksum(bad, DigestAlgorithm::Sha1),
                Err(DigestError::Malformed(bad.to_string())),
                "{bad}"
            );
        }
        let upper = ContentDigest::from_checksum("URN:SHA1:ABCD", DigestAlgorithm::Md5).unwrap();
        assert_eq!(upper.algorithm(), "SHA1");
        assert_eq!(upper.digest_algorithm(), Ok(DigestAlgorithm::Sha1));
    }

    #[test]
    fn checksum_and_digest_header_agree_on_the_same_content() {
        let content = b"The quick brown fox jumps over the lazy dog";
        for algorithm in [DigestAlgorithm::Sha1, DigestAlgorithm::Md5, DigestAlgorithm::Sha256] {
            let computed = ContentDigest::compute(algorithm, content);
            let raw = hex::decode(computed.value()).unwrap();
            let header = format!("{}={}", algorithm, general_purpose::STANDARD.encode(raw));

            let from_header = ContentDigest::from_digest_header(&header).unwrap();
            let from_bare = ContentDigest::from_checksum(computed.value(), algorithm).unwrap();
            let from_urn =
                ContentDigest::from_checksum(&computed.to_string(), DigestAlgorithm::Sha1).unwrap();

            assert_eq!(from_header, computed, "{algorithm}");
            assert_eq!(from_bare, computed, "{algorithm}");
            assert_eq!(from_urn, computed, "{algorithm}");
        }
    }

    #[test]
    fn format_parse_holds_for_generated_pairs() {
        let algorithms = ["sha1", "MD5", "sha-256", "x-custom.alg_1"];
        let values = ["0", "ff", "a:b", "::", "urn:sha1:nested", "with space", "é"];
        for alg in algorithms {
            for value in values {
                let uri = ContentDigest::format(alg, value);
                let digest = ContentDigest::parse(&uri).unwrap();
                assert_eq!((digest.algorithm(), digest.value()), (alg, value), "{uri}");
                assert_eq!(digest.to_string(), uri);
            }
        }
    }

    #[test]
    fn computes_known_sha1() {
        let digest = ContentDigest::compute(DigestAlgorithm::Sha1, b"hello");
        assert_eq!(
            digest.to_string(),
            "urn:sha1:aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
        assert!(digest.matches_hex("AAF4C61DDCC5E8A2DABEDE0F3B482CD9AEA9434D"));
    }

    #[test]
    fn algorithm_aliases() {
        assert_eq!("SHA-1".parse::<DigestAlgorithm>(), Ok(DigestAlgorithm::Sha1));
        assert_eq!("Sha-256".parse::<DigestAlgorithm>(), Ok(DigestAlgorithm::Sha256));
        assert_eq!("MD5".parse::<DigestAlgorithm>(), Ok(DigestAlgorithm::Md5));
        assert!("crc32".parse::<DigestAlgorithm>().is_err());
    }

    #[test]
    fn digest_header_is_converted_to_hex() {
        // base64 of sha1("hello")
        let digest = ContentDigest::from_digest_header("SHA=qvTGHdzF6KLavt4PO0gs2a6pQ00=").unwrap();
        assert_eq!(digest.value(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");

        let skipped = ContentDigest::from_digest_header("crc32c=AAAA, MD5=XUFAKrxLKna5cZ2REBfFkg==")
            .unwrap();
        assert_eq!(skipped.algorithm(), "md5");
        assert_eq!(skipped.value(), "5d41402abc4b2a76b9719d911017c592");
    }
}
