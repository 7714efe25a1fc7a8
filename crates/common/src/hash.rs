use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Name of the digest algorithm, used as the key string prefix
pub const ALGORITHM: &str = "sha256";
/// Length of a raw digest in bytes
pub const DIGEST_LEN: usize = 32;

/**
 * Keys
 * ====
 * A key is the digest of a node's canonical encoding. Everything else in
 *  the system (deduplication, ownership, ticket scoping) keys off this
 *  value, so there is exactly one string form: `sha256:` followed by 64
 *  lowercase hex characters. Uppercase hex is rejected rather than
 *  normalised, otherwise two strings could name the same node.
 */
/// Source of content digests.
pub trait HashProvider: Send + Sync + std::fmt::Debug {
    /// Algorithm name, used as the key string prefix
    fn algorithm(&self) -> &'static str;

    fn digest(&self, data: &[u8]) -> Key;
}

/// SHA-256, the only algorithm keys are minted with.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl HashProvider for Sha256Hasher {
    fn algorithm(&self) -> &'static str {
        ALGORITHM
    }

    fn digest(&self, data: &[u8]) -> Key {
        let out = Sha256::digest(data);
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&out);
        Key(bytes)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key([u8; DIGEST_LEN]);

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("missing algorithm prefix in key: {0}")]
    MissingPrefix(String),
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("digest must be {expected} hex characters, got {actual}")]
    BadLength { expected: usize, actual: usize },
    #[error("digest is not lowercase hex: {0}")]
    BadHex(String),
}

impl Key {
    /// Hash `data` into a key.
    pub fn digest(data: &[u8]) -> Self {
        Sha256Hasher.digest(data)
    }

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Read a key from a raw digest slice, if it has the right length.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex digest without the algorithm prefix
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check that `data` hashes to this key.
    pub fn verify(&self, data: &[u8]) -> bool {
        self.verify_with(&Sha256Hasher, data)
    }

    pub fn verify_with(&self, hasher: &dyn HashProvider, data: &[u8]) -> bool {
        hasher.digest(data) == *self
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", ALGORITHM, self.hex())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, digest) = s
            .split_once(':')
            .ok_or_else(|| KeyError::MissingPrefix(s.to_string()))?;
        if algorithm != ALGORITHM {
            return Err(KeyError::UnknownAlgorithm(algorithm.to_string()));
        }
        if digest.len() != DIGEST_LEN * 2 {
            return Err(KeyError::BadLength {
                expected: DIGEST_LEN * 2,
                actual: digest.len(),
            });
        }
        if !digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(KeyError::BadHex(digest.to_string()));
        }
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(digest, &mut bytes)
            .map_err(|_| KeyError::BadHex(digest.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
