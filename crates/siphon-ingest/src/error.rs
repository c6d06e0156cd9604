//! Error types for the ingestion domain.

use siphon_core::PropertyKey;

/// The result type used throughout siphon-ingest.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ingestion operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The property's daily quota is exhausted for the remainder of the run.
    ///
    /// Expected, not a bug: the property is skipped and retried on the
    /// next scheduled run.
    #[error("daily quota exhausted for property {property}")]
    QuotaExhausted {
        /// The property whose quota ran out.
        property: PropertyKey,
    },

    /// Remote-side retries were exhausted for a property.
    #[error("retries exhausted for property {property} after {attempts} attempts")]
    RetriesExhausted {
        /// The property that kept failing.
        property: PropertyKey,
        /// How many attempts were made.
        attempts: u32,
    },

    /// Local admission never granted within the configured retries.
    #[error("admission timed out for property {property}")]
    AdmissionTimeout {
        /// The property that could not be admitted.
        property: PropertyKey,
    },

    /// The remote side reported a non-retryable error.
    #[error("permanent remote error: {message}")]
    Permanent {
        /// Description from the remote side.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An error from siphon-core.
    #[error("core error: {0}")]
    Core(#[from] siphon_core::error::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if a later scheduled run may succeed without operator action.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QuotaExhausted { .. }
                | Self::RetriesExhausted { .. }
                | Self::AdmissionTimeout { .. }
        )
    }
}
