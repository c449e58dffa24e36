//! Persistent state for the TubeFlow pipeline.
//!
//! - [`VideoStore`]: the authoritative video record, mutated only through
//!   status compare-and-swap transitions
//! - [`TokenStore`]: one YouTube credential per user
//! - [`ApiKeyStore`]: one user-supplied Gemini key per user
//!
//! Each comes in an in-memory flavour (tests, single-node dev) and a
//! Firestore flavour.

pub mod config;
pub mod error;
pub mod firestore;
pub mod memory;
pub mod store;

pub use config::{StateConfig, Stores};
pub use error::{StateError, StateResult};
pub use firestore::{FirestoreApiKeyStore, FirestoreTokenStore, FirestoreVideoStore};
pub use memory::{InMemoryApiKeyStore, InMemoryTokenStore, InMemoryVideoStore};
pub use store::{ApiKeyStore, TokenStore, VideoStore};
