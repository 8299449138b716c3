pub mod fs;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlobObject {
    /// Name relative to the listed prefix.
    pub name: String,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Overwrite an existing object instead of failing with `Conflict`.
    pub upsert: bool,
    pub content_type: Option<String>,
}

/// Hierarchical object store addressed by `/`-separated keys inside one bucket.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Direct children of `prefix`, sorted by name.
    async fn list(&self, prefix: &str, order: SortOrder) -> Result<Vec<BlobObject>>;

    async fn upload(&self, key: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<()>;

    /// Fails with `NotFound` when nothing is stored at `key`.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Pure derivation, no I/O.
    fn public_url(&self, key: &str) -> String;
}

pub(crate) fn public_object_url(base: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key)
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(CatalogError::MalformedInput(format!("invalid object key: {key:?}")));
    }
    Ok(())
}

pub(crate) fn sort_objects(objects: &mut [BlobObject], order: SortOrder) {
    match order {
        SortOrder::Asc => objects.sort_by(|a, b| a.name.cmp(&b.name)),
        SortOrder::Desc => objects.sort_by(|a, b| b.name.cmp(&a.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_joins_base_bucket_and_key() {
        assert_eq!(
            public_object_url("https://cdn.example.com/public/", "event", "4/gallery/cover"),
            "https://cdn.example.com/public/event/4/gallery/cover"
        );
    }

    #[test]
    fn rejects_escaping_keys() {
        assert!(validate_key("4/gallery/a.png").is_ok());
        for key in ["", "/abs", "4//a", "4/../5/a", "./a"] {
            assert!(validate_key(key).is_err(), "{key} should be rejected");
        }
    }
}
