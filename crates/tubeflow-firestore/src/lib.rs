//! Firestore REST API client.
//!
//! This crate provides:
//! - Service account authentication via gcp_auth (or the emulator)
//! - Document get/create/update with `updateTime` preconditions
//! - Structured queries
//! - Generic JSON encoding for document fields
//! - Retry logic and request metrics

pub mod client;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig, Precondition};
pub use error::{FirestoreError, FirestoreResult};
pub use retry::RetryConfig;
pub use token_cache::TokenSource;
pub use types::{fields_from_json, Direction, Document, FieldOperator, Filter, StructuredQuery, Value};
