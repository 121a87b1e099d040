//! Request-scoped temporary media storage.
//!
//! This crate provides:
//! - A store rooted at a work directory
//! - Per-request scopes in isolated `<root>/<uuid>/` directories
//! - Upload extension allow-listing
//! - Guaranteed cleanup (explicit release, or on drop)

pub mod config;
pub mod error;
pub mod store;

pub use config::StoreConfig;
pub use error::{StorageError, StorageResult};
pub use store::{AssetHandle, AssetScope, MediaAssetStore, ALLOWED_UPLOAD_EXTENSIONS};
