use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{public_object_url, sort_objects, validate_key, BlobObject, BlobStore, SortOrder, UploadOptions};
use crate::error::{CatalogError, Result};

/// Objects stored as plain files under `{root}/{bucket}/{key}`.
pub struct FsBlobStore {
    root: PathBuf,
    bucket: String,
    public_base: String,
}

impl FsBlobStore {
    pub fn new(
        root: impl Into<PathBuf>,
        bucket: impl Into<String>,
        public_base: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            public_base: public_base.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(&self.bucket).join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str, order: SortOrder) -> Result<Vec<BlobObject>> {
        let dir = self.path_for(prefix.trim_end_matches('/'))?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(path = ?entry.path(), "skipping non utf-8 object name");
                continue;
            };
            out.push(BlobObject {
                name,
                size: metadata.len(),
            });
        }
        sort_objects(&mut out, order);
        Ok(out)
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if options.upsert {
            tokio::fs::write(&path, &bytes).await?;
            return Ok(());
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    CatalogError::Conflict(format!("object already exists: {key}"))
                }
                _ => err.into(),
            })?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path).await.map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => CatalogError::NotFound(format!("object {key}")),
            _ => err.into(),
        })
    }

    fn public_url(&self, key: &str) -> String {
        public_object_url(&self.public_base, &self.bucket, key)
    }
}
