use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use super::{public_object_url, sort_objects, validate_key, BlobObject, BlobStore, SortOrder, UploadOptions};
use crate::error::{CatalogError, Result};

pub struct MemoryBlobStore {
    bucket: String,
    public_base: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>, public_base: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            public_base: public_base.into(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| CatalogError::Backend("blob store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str, order: SortOrder) -> Result<Vec<BlobObject>> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let objects = self.lock()?;
        let mut out: Vec<BlobObject> = objects
            .iter()
            .filter_map(|(key, bytes)| {
                let name = key.strip_prefix(&dir)?;
                (!name.contains('/')).then(|| BlobObject {
                    name: name.to_string(),
                    size: bytes.len() as u64,
                })
            })
            .collect();
        sort_objects(&mut out, order);
        Ok(out)
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<()> {
        validate_key(key)?;
        let mut objects = self.lock()?;
        if !options.upsert && objects.contains_key(key) {
            return Err(CatalogError::Conflict(format!("object already exists: {key}")));
        }
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.lock()?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| CatalogError::NotFound(format!("object {key}")))
    }

    fn public_url(&self, key: &str) -> String {
        public_object_url(&self.public_base, &self.bucket, key)
    }
}
