pub mod blob;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gallery;
pub mod invalidation;
pub mod logging;
pub mod models;
pub mod service;
pub mod store;
mod utils;

pub use blob::{BlobObject, BlobStore, FsBlobStore, MemoryBlobStore, SortOrder, UploadOptions};
pub use catalog::{Catalog, DEFAULT_PAGE_SIZE};
pub use config::{CatalogConfig, ConfigStore};
pub use error::{CatalogError, InvalidationError, Result};
pub use gallery::{GalleryStore, ImageUpload, COVER_NAME};
pub use invalidation::{
    HttpRevalidateSink, InvalidationReport, InvalidationSink, Invalidator, LogSink, RecordingSink,
    ResourcePaths,
};
pub use logging::init_tracing;
pub use models::{Event, EventId, EventPatch, NewEvent, Page, SearchColumn};
pub use service::{DeletedEvent, EventService, GalleryPolicy, Mutated};
pub use store::{Datastore, EventQuery, Filter, MemoryDatastore, OrderBy, SqliteDatastore};
