use dirs::data_dir;
use once_cell::sync::Lazy;
use std::{fs, path::Path, path::PathBuf};

static DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    let base = data_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let root = base.join("event-catalog");
    if let Err(err) = fs::create_dir_all(&root) {
        tracing::warn!(?root, %err, "failed to create data root");
    }
    root
});

pub fn data_root() -> PathBuf {
    DATA_ROOT.clone()
}

pub fn database_path() -> PathBuf {
    data_root().join("events.sqlite")
}

pub fn blob_root() -> PathBuf {
    data_root().join("blobs")
}

pub fn config_path() -> PathBuf {
    data_root().join("config.json")
}

pub fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            tracing::warn!(?parent, %err, "failed to create parent directory");
        }
    }
}
