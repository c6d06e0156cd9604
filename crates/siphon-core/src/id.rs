//! Strongly-typed identifiers for Siphon entities.
//!
//! All identifiers in Siphon are:
//! - **Strongly typed**: Prevents mixing up different ID types at compile time
//! - **Validated on parse**: Malformed keys are rejected at the boundary
//! - **Serialization-transparent**: Serialize as plain strings on the wire
//!
//! # Example
//!
//! ```rust
//! use siphon_core::id::{PropertyKey, RunId, SourceType};
//!
//! let property = PropertyKey::new("https://example.com/").unwrap();
//! let run = RunId::generate();
//! let source: SourceType = "search_performance".parse().unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// An opaque key scoping one independently rate-limited property.
///
/// A property is one unit of quota accounting against the remote metrics
/// API, typically identified by its site URL. Each property carries its
/// own token bucket and daily counter; one property's exhaustion never
/// starves another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyKey(String);

impl PropertyKey {
    /// Creates a new property key after validating it is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the key is empty or all whitespace.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(Error::InvalidId {
                message: "property key must be non-empty".into(),
            });
        }
        Ok(Self(key))
    }

    /// Creates a property key without validation.
    ///
    /// Intended for keys that have already been validated (e.g., read
    /// back from storage).
    #[must_use]
    pub fn new_unchecked(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PropertyKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// The kind of metrics data being ingested for a property.
///
/// Each `(property, source)` pair has its own watermark and is synced as
/// an independent unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Daily search performance metrics (clicks, impressions, CTR, position).
    SearchPerformance,
    /// URL inspection results.
    UrlInspection,
    /// Sitemap submission status.
    Sitemaps,
}

impl SourceType {
    /// Returns the canonical string form used in storage keys and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SearchPerformance => "search_performance",
            Self::UrlInspection => "url_inspection",
            Self::Sitemaps => "sitemaps",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "search_performance" => Ok(Self::SearchPerformance),
            "url_inspection" => Ok(Self::UrlInspection),
            "sitemaps" => Ok(Self::Sitemaps),
            other => Err(Error::InvalidId {
                message: format!("unknown source type '{other}'"),
            }),
        }
    }
}

/// A unique identifier for one orchestrator invocation.
///
/// Uses ULID generation which is:
/// - Lexicographically sortable by creation time
/// - Globally unique without coordination
/// - URL-safe and case-insensitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Ulid);

impl RunId {
    /// Generates a new unique run ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a run ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        #[allow(clippy::cast_possible_wrap)]
        chrono::DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid run ID '{s}': {e}"),
        })
    }
}
