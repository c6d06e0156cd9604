//! # siphon-core
//!
//! Core abstractions for the Siphon quota-governed ingestion pipeline.
//!
//! This crate provides the foundational types used across all Siphon components:
//!
//! - **Identifiers**: Strongly-typed keys for properties, sources, and runs
//! - **Date Ranges**: Inclusive day ranges with increasing-order iteration
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Structured logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `siphon-core` is the only crate allowed to define shared primitives.
//! The ingestion engine (`siphon-ingest`) and the operator CLI build on
//! the contracts defined here.
//!
//! ## Example
//!
//! ```rust
//! use siphon_core::prelude::*;
//!
//! let property = PropertyKey::new("https://example.com/").unwrap();
//! let run_id = RunId::generate();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod daterange;
pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use siphon_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::daterange::DateRange;
    pub use crate::error::{Error, Result};
    pub use crate::id::{PropertyKey, RunId, SourceType};
    pub use crate::observability::{LogFormat, init_logging};
}

// Re-export key types at crate root for ergonomics
pub use daterange::DateRange;
pub use error::{Error, Result};
pub use id::{PropertyKey, RunId, SourceType};
pub use observability::{LogFormat, init_logging};
