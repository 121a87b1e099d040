//! On-disk asset store with per-request scopes.

use std::path::{Path, PathBuf};

use adgen_models::{AssetId, AssetKind};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{StorageError, StorageResult};

/// Extensions accepted for client uploads (compared case-insensitively).
pub const ALLOWED_UPLOAD_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Root of all request scopes.
#[derive(Debug, Clone)]
pub struct MediaAssetStore {
    root: PathBuf,
}

impl MediaAssetStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Open a store from configuration.
    pub async fn from_config(config: &StoreConfig) -> StorageResult<Self> {
        Self::new(config.work_dir.clone()).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a fresh scope for one request.
    pub async fn scope(&self) -> StorageResult<AssetScope> {
        let id = Uuid::new_v4().to_string();
        let dir = self.root.join(&id);
        fs::create_dir(&dir).await?;
        debug!(scope = %id, "Opened asset scope");
        Ok(AssetScope {
            id,
            dir,
            released: false,
        })
    }

    /// Number of scope directories currently on disk.
    pub async fn live_scopes(&self) -> StorageResult<usize> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Check that the root directory accepts writes.
    pub async fn check_writable(&self) -> StorageResult<()> {
        let probe = self.root.join(format!(".probe-{}", Uuid::new_v4()));
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }
}

/// A stored file belonging to one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHandle {
    pub id: AssetId,
    pub kind: AssetKind,
    pub extension: String,
    pub path: PathBuf,
}

impl AssetHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// All files produced while serving one request.
///
/// The directory is removed by [`AssetScope::release_all`], or synchronously
/// when the scope is dropped without being released.
#[derive(Debug)]
pub struct AssetScope {
    id: String,
    dir: PathBuf,
    released: bool,
}

impl AssetScope {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store a client upload. Only allow-listed image extensions are accepted.
    pub async fn store_upload(
        &self,
        kind: AssetKind,
        bytes: &[u8],
        extension: &str,
    ) -> StorageResult<AssetHandle> {
        let extension = normalize_extension(extension);
        if !is_allowed_upload(&extension) {
            return Err(StorageError::disallowed_extension(extension));
        }
        self.store_generated(kind, bytes, &extension).await
    }

    /// Store bytes produced by the pipeline.
    pub async fn store_generated(
        &self,
        kind: AssetKind,
        bytes: &[u8],
        extension: &str,
    ) -> StorageResult<AssetHandle> {
        let handle = self.allocate(kind, extension);
        fs::write(&handle.path, bytes).await?;
        debug!(
            scope = %self.id,
            asset = %handle.id,
            kind = %kind,
            bytes = bytes.len(),
            "Stored asset"
        );
        Ok(handle)
    }

    /// Reserve a path for a file another component will write.
    pub fn allocate(&self, kind: AssetKind, extension: &str) -> AssetHandle {
        let id = AssetId::new();
        let extension = normalize_extension(extension);
        let path = self.dir.join(format!("{}_{}.{}", kind.as_str(), id, extension));
        AssetHandle {
            id,
            kind,
            extension,
            path,
        }
    }

    /// Read a stored asset back.
    pub async fn read(&self, handle: &AssetHandle) -> StorageResult<Vec<u8>> {
        self.check_owned(handle)?;
        match fs::read(&handle.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(handle.id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete one asset. Releasing an already-deleted asset is a no-op.
    pub async fn release(&self, handle: &AssetHandle) -> StorageResult<()> {
        self.check_owned(handle)?;
        match fs::remove_file(&handle.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the scope directory and everything in it.
    pub async fn release_all(mut self) -> StorageResult<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.released = true;
        debug!(scope = %self.id, "Released asset scope");
        Ok(())
    }

    fn check_owned(&self, handle: &AssetHandle) -> StorageResult<()> {
        if handle.path.parent() == Some(self.dir.as_path()) {
            Ok(())
        } else {
            Err(StorageError::ForeignHandle(handle.id.to_string()))
        }
    }
}

impl Drop for AssetScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(scope = %self.id, "Removed unreleased asset scope"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(scope = %self.id, error = %e, "Failed to remove asset scope"),
        }
    }
}

fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn is_allowed_upload(extension: &str) -> bool {
    ALLOWED_UPLOAD_EXTENSIONS.contains(&extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, MediaAssetStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaAssetStore::new(dir.path().join("work")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_upload_allow_list_is_case_insensitive() {
        let (_dir, store) = store().await;
        let scope = store.scope().await.unwrap();

        for ext in ["png", "JPG", ".jpeg", "Png"] {
            let handle = scope
                .store_upload(AssetKind::ProductImage, b"img", ext)
                .await
                .unwrap();
            assert!(handle.path.exists());
        }

        for ext in ["gif", "webp", "", "png.exe"] {
            let err = scope
                .store_upload(AssetKind::BackgroundImage, b"img", ext)
                .await
                .unwrap_err();
            assert!(err.is_client_error(), "{ext} should be rejected");
        }

        scope.release_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let (_dir, store) = store().await;
        let a = store.scope().await.unwrap();
        let b = store.scope().await.unwrap();
        assert_ne!(a.dir(), b.dir());

        let handle = a
            .store_generated(AssetKind::Audio, b"mp3", "mp3")
            .await
            .unwrap();
        assert!(matches!(
            b.read(&handle).await,
            Err(StorageError::ForeignHandle(_))
        ));
        assert_eq!(a.read(&handle).await.unwrap(), b"mp3");
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (_dir, store) = store().await;
        let scope = store.scope().await.unwrap();
        let handle = scope
            .store_generated(AssetKind::Frame, b"png", "png")
            .await
            .unwrap();

        scope.release(&handle).await.unwrap();
        scope.release(&handle).await.unwrap();
        assert!(matches!(
            scope.read(&handle).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_release_all_and_drop_leave_nothing_behind() {
        let (_dir, store) = store().await;

        let released = store.scope().await.unwrap();
        released
            .store_upload(AssetKind::ProductImage, b"img", "png")
            .await
            .unwrap();

        let dropped = store.scope().await.unwrap();
        dropped
            .store_generated(AssetKind::Output, b"mp4", "mp4")
            .await
            .unwrap();

        assert_eq!(store.live_scopes().await.unwrap(), 2);
        released.release_all().await.unwrap();
        drop(dropped);
        assert_eq!(store.live_scopes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_allocate_does_not_touch_disk() {
        let (_dir, store) = store().await;
        let scope = store.scope().await.unwrap();
        let handle = scope.allocate(AssetKind::Output, "MP4");
        assert_eq!(handle.extension, "mp4");
        assert!(!handle.path.exists());
        assert!(handle.path.starts_with(scope.dir()));
        store.check_writable().await.unwrap();
    }
}
