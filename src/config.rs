use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_PAGE_SIZE;
use crate::error::{CatalogError, Result};
use crate::service::GalleryPolicy;
use crate::utils;

const DEFAULT_BUCKET: &str = "event";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://127.0.0.1:54321/storage/v1/object/public";
const DEFAULT_DETAIL_PATH_PREFIX: &str = "/dashboard/e/event";
const DEFAULT_LISTING_PATH: &str = "/events";
const ENV_PREFIX: &str = "EVENT_CATALOG_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    pub database_path: PathBuf,
    pub blob_root: PathBuf,
    pub bucket: String,
    pub public_base_url: String,
    pub default_page_size: u32,
    pub detail_path_prefix: String,
    pub listing_path: String,
    pub revalidate_endpoint: Option<String>,
    pub revalidate_secret: Option<String>,
    pub gallery_policy: GalleryPolicy,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_path: utils::database_path(),
            blob_root: utils::blob_root(),
            bucket: DEFAULT_BUCKET.to_string(),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            default_page_size: DEFAULT_PAGE_SIZE,
            detail_path_prefix: DEFAULT_DETAIL_PATH_PREFIX.to_string(),
            listing_path: DEFAULT_LISTING_PATH.to_string(),
            revalidate_endpoint: None,
            revalidate_secret: None,
            gallery_policy: GalleryPolicy::default(),
        }
    }
}

impl CatalogConfig {
    /// Applies `EVENT_CATALOG_*` overrides. Unparseable values are logged and
    /// ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(path) = var("DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(path) = var("BLOB_ROOT") {
            self.blob_root = PathBuf::from(path);
        }
        if let Some(bucket) = var("BUCKET") {
            self.bucket = bucket;
        }
        if let Some(url) = var("PUBLIC_BASE_URL") {
            self.public_base_url = url;
        }
        if let Some(raw) = var("PAGE_SIZE") {
            match raw.parse::<u32>() {
                Ok(size) if size > 0 => self.default_page_size = size,
                _ => tracing::warn!(value = %raw, "ignoring invalid page size override"),
            }
        }
        if let Some(prefix) = var("DETAIL_PATH_PREFIX") {
            self.detail_path_prefix = prefix;
        }
        if let Some(path) = var("LISTING_PATH") {
            self.listing_path = path;
        }
        if let Some(endpoint) = var("REVALIDATE_ENDPOINT") {
            self.revalidate_endpoint = Some(endpoint);
        }
        if let Some(secret) = var("REVALIDATE_SECRET") {
            self.revalidate_secret = Some(secret);
        }
        if let Some(raw) = var("GALLERY_POLICY") {
            match serde_json::from_value(serde_json::Value::String(raw.clone())) {
                Ok(policy) => self.gallery_policy = policy,
                Err(err) => tracing::warn!(value = %raw, %err, "ignoring invalid gallery policy"),
            }
        }
    }
}

/// Config file plus environment overrides, kept in memory and written back
/// on every update.
pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<CatalogConfig>,
}

impl ConfigStore {
    pub fn load() -> Self {
        Self::load_from(utils::config_path())
    }

    pub fn load_from(path: PathBuf) -> Self {
        let mut data = read_config(&path).unwrap_or_else(|err| {
            tracing::warn!(?path, %err, "failed to read config, using defaults");
            CatalogConfig::default()
        });
        data.apply_overrides(|name| std::env::var(name).ok());
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> CatalogConfig {
        match self.data.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F>(&self, transform: F) -> Result<CatalogConfig>
    where
        F: FnOnce(&mut CatalogConfig),
    {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| CatalogError::Backend("config mutex poisoned".to_string()))?;
        transform(&mut guard);
        write_config(&self.path, &guard)?;
        Ok(guard.clone())
    }
}

fn read_config(path: &Path) -> Result<CatalogConfig> {
    if !path.exists() {
        return Ok(CatalogConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_config(path: &Path, config: &CatalogConfig) -> Result<()> {
    utils::ensure_parent(path);
    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)?;
    Ok(())
}
