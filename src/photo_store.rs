//! Directory-backed photo bucket with atomic writes and public URL helpers.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Object key for a new photo: `{user}/{scrapbook}/{memory}/{uuid}.{ext}`.
pub fn build_storage_path(
    user_id: &str,
    scrapbook_id: &str,
    memory_id: &str,
    extension: &str,
) -> String {
    format!(
        "{user_id}/{scrapbook_id}/{memory_id}/{}.{extension}",
        Uuid::new_v4()
    )
}

pub struct PhotoStore {
    root: PathBuf,
    bucket: String,
    public_base_url: String,
}

impl PhotoStore {
    pub fn new(root: PathBuf, bucket: &str, public_base_url: &str) -> Self {
        Self {
            root,
            bucket: bucket.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Maps an object key onto the bucket directory, rejecting anything that could escape it.
    pub fn object_path(&self, storage_path: &str) -> Result<PathBuf, StorageError> {
        let invalid = || StorageError::InvalidPath(storage_path.to_string());
        if storage_path.is_empty() || storage_path.contains('\\') || storage_path.contains('\0') {
            return Err(invalid());
        }

        let mut path = self.root.clone();
        for segment in storage_path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(invalid());
            }
            path.push(segment);
        }
        Ok(path)
    }

    pub fn upload(&self, storage_path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let target_path = self.object_path(storage_path)?;
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = temp_path_for(&target_path);
        if temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }
        fs::write(&temp_path, bytes)?;
        if let Err(error) = fs::rename(&temp_path, &target_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(error.into());
        }
        debug!(
            "Stored object {} ({} bytes) in bucket {}",
            storage_path,
            bytes.len(),
            self.bucket
        );
        Ok(())
    }

    pub fn read(&self, storage_path: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(storage_path)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(storage_path.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Removes objects; keys that are already gone count as removed.
    pub fn remove(&self, storage_paths: &[String]) -> Result<(), StorageError> {
        let mut first_error = None;
        for storage_path in storage_paths {
            let result = self
                .object_path(storage_path)
                .and_then(|path| match fs::remove_file(&path) {
                    Ok(()) => Ok(()),
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(error) => Err(error.into()),
                });
            if let Err(error) = result {
                warn!("Failed to remove object {}: {}", storage_path, error);
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn public_url(&self, storage_path: &str) -> String {
        let encoded = storage_path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/storage/{}/{}",
            self.public_base_url, self.bucket, encoded
        )
    }
}

fn temp_path_for(target_path: &Path) -> PathBuf {
    let mut name = target_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target_path.with_file_name(name)
}
