use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blob::{BlobStore, SortOrder, UploadOptions};
use crate::error::{CatalogError, Result};
use crate::models::{Event, EventId};
use crate::store::{Datastore, EventQuery, Filter};

/// Reserved object name of the cover slot inside every gallery.
pub const COVER_NAME: &str = "cover";

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }
}

pub fn gallery_prefix(event_id: EventId) -> String {
    format!("{event_id}/gallery")
}

pub fn gallery_key(event_id: EventId, name: &str) -> String {
    format!("{}/{name}", gallery_prefix(event_id))
}

/// Spaces become underscores and `_t=<millisecond component of now>` is
/// appended. Two same-named uploads inside one millisecond tick get the same
/// name; the second one is then rejected by the store.
pub fn gallery_file_name(original: &str, now: DateTime<Utc>) -> Result<String> {
    let original = original.trim();
    if original.is_empty() {
        return Err(CatalogError::MalformedInput("image file name is empty".to_string()));
    }
    if original.contains('/') {
        return Err(CatalogError::MalformedInput(format!(
            "image file name must not contain '/': {original}"
        )));
    }
    Ok(format!(
        "{}_t={}",
        original.replace(' ', "_"),
        now.timestamp_subsec_millis()
    ))
}

/// Per-event image namespaces `{eventId}/gallery/{name}` inside one bucket.
#[derive(Clone)]
pub struct GalleryStore {
    blobs: Arc<dyn BlobStore>,
    datastore: Arc<dyn Datastore>,
    clock: Clock,
}

impl GalleryStore {
    pub fn new(blobs: Arc<dyn BlobStore>, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            blobs,
            datastore,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Public URLs of every image in the gallery, by object name ascending.
    pub async fn event_gallery(&self, event_id: EventId) -> Result<Vec<String>> {
        let objects = self
            .blobs
            .list(&gallery_prefix(event_id), SortOrder::Asc)
            .await?;
        Ok(objects
            .into_iter()
            .map(|object| self.blobs.public_url(&gallery_key(event_id, &object.name)))
            .collect())
    }

    pub fn cover_image_url(&self, event: &Event) -> Option<String> {
        event
            .cover_image_url
            .as_deref()
            .map(|name| self.blobs.public_url(&gallery_key(event.id, name)))
    }

    /// Resolves the event's cover pointer. `Ok(None)` when no cover is set.
    pub async fn event_cover_image(&self, event_id: EventId) -> Result<Option<String>> {
        let event = self
            .datastore
            .select(&EventQuery::new().filter(Filter::IdEq(event_id)))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::NotFound(format!("event {event_id}")))?;
        Ok(self.cover_image_url(&event))
    }

    /// Stores a regular gallery image and returns its generated object name.
    pub async fn upload_image(&self, event_id: EventId, upload: ImageUpload) -> Result<String> {
        let name = gallery_file_name(&upload.file_name, (self.clock)())?;
        let options = UploadOptions {
            upsert: false,
            content_type: upload.content_type,
        };
        self.blobs
            .upload(&gallery_key(event_id, &name), upload.bytes, options)
            .await?;
        tracing::info!(event_id, %name, "gallery image uploaded");
        Ok(name)
    }

    /// Writes the cover slot, replacing any previous cover.
    pub async fn upload_cover_image(&self, event_id: EventId, upload: ImageUpload) -> Result<()> {
        let options = UploadOptions {
            upsert: true,
            content_type: upload.content_type,
        };
        self.blobs
            .upload(&gallery_key(event_id, COVER_NAME), upload.bytes, options)
            .await?;
        tracing::info!(event_id, "cover image uploaded");
        Ok(())
    }

    pub async fn has_cover(&self, event_id: EventId) -> Result<bool> {
        let objects = self
            .blobs
            .list(&gallery_prefix(event_id), SortOrder::Asc)
            .await?;
        Ok(objects.iter().any(|object| object.name == COVER_NAME))
    }

    /// Deletes the object behind `image_url` and returns its key.
    pub async fn delete_image(&self, event_id: EventId, image_url: &str) -> Result<String> {
        let key = self.key_from_public_url(event_id, image_url)?;
        self.blobs.remove(&key).await?;
        tracing::info!(event_id, %key, "gallery image deleted");
        Ok(key)
    }

    /// Removes every object in the gallery, returning how many were deleted.
    pub async fn clear(&self, event_id: EventId) -> Result<usize> {
        let objects = self
            .blobs
            .list(&gallery_prefix(event_id), SortOrder::Asc)
            .await?;
        for object in &objects {
            self.blobs.remove(&gallery_key(event_id, &object.name)).await?;
        }
        Ok(objects.len())
    }

    pub async fn is_empty(&self, event_id: EventId) -> Result<bool> {
        let objects = self
            .blobs
            .list(&gallery_prefix(event_id), SortOrder::Asc)
            .await?;
        Ok(objects.is_empty())
    }

    /// Strips everything up to and including `/{bucket}/` from a public URL.
    /// The remaining key must lie inside this event's gallery.
    pub fn key_from_public_url(&self, event_id: EventId, image_url: &str) -> Result<String> {
        let marker = format!("/{}/", self.blobs.bucket());
        let (_, key) = image_url.split_once(&marker).ok_or_else(|| {
            CatalogError::MalformedInput(format!("image url has no {marker} segment: {image_url}"))
        })?;

        let prefix = format!("{}/", gallery_prefix(event_id));
        match key.strip_prefix(&prefix) {
            Some(name) if !name.is_empty() && !name.contains('/') => Ok(key.to_string()),
            _ => Err(CatalogError::MalformedInput(format!(
                "image url is outside the gallery of event {event_id}: {image_url}"
            ))),
        }
    }
}
