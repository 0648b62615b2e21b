use std::{collections::BTreeSet, fmt, sync::Arc};

use rand::Rng;
use rearch::CapsuleHandle;
use thiserror::Error;

/// Number of characters in every issued short code.
pub const SHORT_CODE_LEN: usize = 7;

const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

// 4 * 62; bytes at or above this are discarded so every symbol is equally likely.
const ACCEPT_BELOW: u8 = 248;

/// A validated short code: exactly [`SHORT_CODE_LEN`] ASCII alphanumeric characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortCode(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortCodeValidationError {
    #[error("short code must be {SHORT_CODE_LEN} characters long, got {actual}")]
    InvalidLength { actual: usize },
    #[error("short code contains invalid characters: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
}

impl ShortCode {
    /// # Errors
    /// Will return [`Err`] if `code` is not exactly [`SHORT_CODE_LEN`] characters
    /// drawn from `[A-Za-z0-9]`.
    pub fn new(code: String) -> Result<Self, ShortCodeValidationError> {
        let invalid_chars: String = code
            .chars()
            .filter(|c| !c.is_ascii_alphanumeric())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !invalid_chars.is_empty() {
            return Err(ShortCodeValidationError::InvalidCharacters { invalid_chars });
        }

        let actual = code.len();
        if actual != SHORT_CODE_LEN {
            return Err(ShortCodeValidationError::InvalidLength { actual });
        }

        Ok(Self(code))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of candidate short codes.
///
/// Implementations never consult storage; uniqueness is the caller's concern.
#[cfg_attr(test, mockall::automock)]
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> ShortCode;
}

/// Draws codes uniformly from `[A-Za-z0-9]` using the thread-local CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> ShortCode {
        let mut rng = rand::rng();
        let mut code = String::with_capacity(SHORT_CODE_LEN);
        let mut buf = [0; 16];

        while code.len() < SHORT_CODE_LEN {
            rng.fill_bytes(&mut buf);
            let accepted = buf
                .into_iter()
                .filter(|byte| *byte < ACCEPT_BELOW)
                .take(SHORT_CODE_LEN - code.len());
            for byte in accepted {
                code.push(char::from(ALPHABET[usize::from(byte) % ALPHABET.len()]));
            }
        }

        ShortCode(code)
    }
}

pub fn code_generator_capsule(_: CapsuleHandle) -> Arc<dyn CodeGenerator> {
    Arc::new(RandomCodeGenerator)
}
