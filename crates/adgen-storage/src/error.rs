//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File type not allowed: .{0} (expected png, jpg or jpeg)")]
    DisallowedExtension(String),

    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Asset belongs to another scope: {0}")]
    ForeignHandle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn disallowed_extension(ext: impl Into<String>) -> Self {
        Self::DisallowedExtension(ext.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Whether the caller supplied the bad input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, StorageError::DisallowedExtension(_))
    }
}
