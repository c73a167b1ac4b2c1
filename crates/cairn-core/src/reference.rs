//! Correlation references
//!
//! Every request carries a reference; every report about that request carries
//! the same reference back.

use crate::constants::REFERENCE_LENGTH_BYTES_MAX;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation id tying a request to its outcome reports
///
/// # TigerStyle
/// - Explicit validation on construction
/// - Immutable after creation
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference(String);

impl Reference {
    /// Create a reference with validation
    ///
    /// # Errors
    /// Returns error if the reference is empty, too long, or contains
    /// characters outside `[A-Za-z0-9-_.:]`.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();

        if value.is_empty() {
            return Err(Error::InvalidReference {
                reference: value,
                reason: "reference must not be empty".into(),
            });
        }

        if value.len() > REFERENCE_LENGTH_BYTES_MAX {
            return Err(Error::InvalidReference {
                reason: format!(
                    "length {} exceeds limit {}",
                    value.len(),
                    REFERENCE_LENGTH_BYTES_MAX
                ),
                reference: value,
            });
        }

        let valid = value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
        if !valid {
            return Err(Error::InvalidReference {
                reference: value,
                reason: "reference contains invalid characters".into(),
            });
        }

        Ok(Self(value))
    }

    /// Generate a fresh random reference
    pub fn generate() -> Self {
        let value = uuid::Uuid::new_v4().to_string();
        debug_assert!(value.len() <= REFERENCE_LENGTH_BYTES_MAX);
        Self(value)
    }

    /// Get the reference as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Reference {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.0
    }
}
