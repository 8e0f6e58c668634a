//! Unguessable team identifiers and join passwords.
//!
//! Tokens are base62 strings drawn from the operating system CSPRNG with rejection
//! sampling, so every character is uniformly distributed. The generated length is
//! checked before a token is handed out.

use std::sync::Arc;

use rand::{TryRngCore, rngs::OsRng};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
// Largest multiple of 62 that fits in a byte; bytes at or above it are rejected.
const REJECTION_BOUND: u8 = 248;
const MAX_SAMPLING_ROUNDS: usize = 4;

/// Length of generated team identifiers.
pub const TEAM_ID_LENGTH: usize = 20;
/// Length of generated join passwords.
pub const PASSWORD_LENGTH: usize = 48;
/// Password committed by the legacy fallback when generation fails.
pub const PLACEHOLDER_PASSWORD: &str = "ERROR_PASS_456";

/// Failure to produce a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The random source refused to produce bytes.
    #[error("entropy source failed: {0}")]
    Entropy(String),
    /// Sampling produced fewer characters than requested.
    #[error("generated token too short ({actual} of {expected} characters)")]
    TooShort {
        /// Requested length.
        expected: usize,
        /// Length actually produced.
        actual: usize,
    },
}

/// Source of random bytes.
pub trait EntropySource: Send + Sync {
    /// Fill `buf` entirely with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), TokenError>;
}

/// Operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), TokenError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|err| TokenError::Entropy(err.to_string()))
    }
}

/// What team creation does when no password could be generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordFallback {
    /// Fail the operation.
    #[default]
    Reject,
    /// Use [`PLACEHOLDER_PASSWORD`]. Anyone who knows the constant can join.
    Placeholder,
}

/// Compare a stored secret with a supplied one in time independent of where they differ.
///
/// Only the length can leak, and generated passwords all share one length.
pub fn secrets_match(expected: &str, supplied: &str) -> bool {
    let (expected, supplied) = (expected.as_bytes(), supplied.as_bytes());
    if expected.len() != supplied.len() {
        return false;
    }
    expected
        .iter()
        .zip(supplied)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// Produces team identifiers and passwords.
#[derive(Clone)]
pub struct TokenGenerator {
    source: Arc<dyn EntropySource>,
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new(Arc::new(OsEntropy))
    }
}

impl TokenGenerator {
    /// Generator drawing from `source`.
    pub fn new(source: Arc<dyn EntropySource>) -> Self {
        Self { source }
    }

    /// New team identifier.
    pub fn team_id(&self) -> Result<String, TokenError> {
        self.alphanumeric(TEAM_ID_LENGTH)
    }

    /// New join password.
    pub fn password(&self) -> Result<String, TokenError> {
        self.alphanumeric(PASSWORD_LENGTH)
    }

    /// New join password, applying `fallback` when generation fails.
    pub fn password_or_fallback(&self, fallback: PasswordFallback) -> Result<String, TokenError> {
        match (self.password(), fallback) {
            (Ok(password), _) => Ok(password),
            (Err(err), PasswordFallback::Placeholder) => {
                warn!(error = %err, "password generation failed; using placeholder password");
                Ok(PLACEHOLDER_PASSWORD.to_owned())
            }
            (Err(err), PasswordFallback::Reject) => Err(err),
        }
    }

    fn alphanumeric(&self, len: usize) -> Result<String, TokenError> {
        let mut token = String::with_capacity(len);
        let mut buf = vec![0u8; len * 2];

        for _ in 0..MAX_SAMPLING_ROUNDS {
            self.source.fill(&mut buf)?;
            token.extend(
                buf.iter()
                    .filter(|byte| **byte < REJECTION_BOUND)
                    .map(|byte| ALPHABET[(*byte % 62) as usize] as char)
                    .take(len - token.len()),
            );
            if token.len() == len {
                break;
            }
        }

        if token.len() < len {
            return Err(TokenError::TooShort {
                expected: len,
                actual: token.len(),
            });
        }
        Ok(token)
    }
}
