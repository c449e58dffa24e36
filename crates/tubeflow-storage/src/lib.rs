//! Media store backends.
//!
//! This crate provides:
//! - The `MediaStore` trait (put/get/delete/stat by video id)
//! - A local filesystem backend rooted at a content directory
//! - A Cloudflare R2 backend over the S3 API

pub mod config;
pub mod error;
pub mod local;
pub mod r2;
pub mod store;

pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use local::LocalMediaStore;
pub use r2::{R2Config, R2MediaStore};
pub use store::{MediaStore, StoredMedia, VIDEO_FILE_NAME};
