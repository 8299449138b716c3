use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::blob::{BlobStore, FsBlobStore};
use crate::catalog::Catalog;
use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::gallery::{gallery_key, Clock, GalleryStore, ImageUpload, COVER_NAME};
use crate::invalidation::{
    HttpRevalidateSink, InvalidationReport, InvalidationSink, Invalidator, LogSink, ResourcePaths,
};
use crate::models::{Event, EventId, EventPatch, NewEvent, SearchColumn};
use crate::store::{Datastore, SqliteDatastore};

/// What happens to an event's gallery when the event row is deleted.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GalleryPolicy {
    /// Leave the objects in place; they become unreachable through the catalog.
    #[default]
    Keep,
    /// Remove every gallery object once the row is gone. A failed removal is
    /// reported in [`DeletedEvent::gallery_error`]; the delete still stands.
    Cascade,
    /// Refuse to delete an event whose gallery still has objects.
    RejectIfNonEmpty,
}

/// Result of a successful mutation plus the invalidation signals sent after it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Mutated<T> {
    pub value: T,
    pub invalidation: InvalidationReport,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeletedEvent {
    pub id: EventId,
    pub gallery_objects_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gallery_error: Option<String>,
}

/// Entry point for catalog reads and all mutations. Each mutation that
/// succeeds is followed by invalidation of the event's detail path and the
/// listing path; a failed mutation sends nothing.
#[derive(Clone)]
pub struct EventService {
    catalog: Catalog,
    gallery: GalleryStore,
    invalidator: Invalidator,
    policy: GalleryPolicy,
    page_size: u32,
}

impl EventService {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        blobs: Arc<dyn BlobStore>,
        sink: Arc<dyn InvalidationSink>,
    ) -> Self {
        Self {
            catalog: Catalog::new(Arc::clone(&datastore)),
            gallery: GalleryStore::new(blobs, datastore),
            invalidator: Invalidator::new(sink, ResourcePaths::default()),
            policy: GalleryPolicy::default(),
            page_size: crate::catalog::DEFAULT_PAGE_SIZE,
        }
    }

    /// SQLite rows, filesystem blobs, and HTTP revalidation when an endpoint
    /// is configured (log-only otherwise).
    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        let datastore = Arc::new(SqliteDatastore::open(&config.database_path)?);
        let blobs = Arc::new(FsBlobStore::new(
            config.blob_root.clone(),
            config.bucket.clone(),
            config.public_base_url.clone(),
        ));
        let sink: Arc<dyn InvalidationSink> = match config.revalidate_endpoint.as_deref() {
            Some(endpoint) => Arc::new(
                HttpRevalidateSink::new(endpoint, config.revalidate_secret.clone())
                    .map_err(|err| CatalogError::MalformedInput(err.to_string()))?,
            ),
            None => Arc::new(LogSink),
        };

        let paths = ResourcePaths {
            detail_prefix: config.detail_path_prefix.clone(),
            listing: config.listing_path.clone(),
        };
        Ok(Self::new(datastore, blobs, sink)
            .with_paths(paths)
            .with_gallery_policy(config.gallery_policy)
            .with_page_size(config.default_page_size)?)
    }

    pub fn with_paths(mut self, paths: ResourcePaths) -> Self {
        self.invalidator = self.invalidator.with_paths(paths);
        self
    }

    pub fn with_gallery_policy(mut self, policy: GalleryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Page size for the paged reads. Zero is rejected.
    pub fn with_page_size(mut self, page_size: u32) -> Result<Self> {
        if page_size == 0 {
            return Err(CatalogError::MalformedInput(
                "page size must be at least 1".to_string(),
            ));
        }
        self.page_size = page_size;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.gallery = self.gallery.with_clock(clock);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn gallery(&self) -> &GalleryStore {
        &self.gallery
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    async fn finish<T>(&self, id: EventId, value: T) -> Mutated<T> {
        let invalidation = self.invalidator.event_changed(id).await;
        Mutated {
            value,
            invalidation,
        }
    }

    pub async fn get_event(&self, id: EventId) -> Result<Event> {
        self.catalog.get_event(id).await
    }

    /// Listing page using the configured page size.
    pub async fn get_events(&self, page: u32, only_published: bool) -> Result<Vec<Event>> {
        self.catalog
            .get_events(page, self.page_size, only_published)
            .await
    }

    pub async fn search_events(
        &self,
        term: &str,
        column: SearchColumn,
        page: u32,
    ) -> Result<Vec<Event>> {
        self.catalog
            .search_events(term, column, page, self.page_size)
            .await
    }

    pub async fn search_events_by_tags(&self, tags: &[String], page: u32) -> Result<Vec<Event>> {
        self.catalog
            .search_events_by_tags(tags.iter().cloned(), page, self.page_size)
            .await
    }

    pub async fn get_all_events(&self) -> Result<Vec<Event>> {
        self.catalog.get_all_events().await
    }

    pub async fn get_event_gallery(&self, id: EventId) -> Result<Vec<String>> {
        self.gallery.event_gallery(id).await
    }

    pub async fn get_event_cover_image(&self, id: EventId) -> Result<Option<String>> {
        self.gallery.event_cover_image(id).await
    }

    pub async fn create_event(&self, event: NewEvent) -> Result<Mutated<Event>> {
        if event.title.trim().is_empty() {
            return Err(CatalogError::MalformedInput("event title is empty".to_string()));
        }
        let created = self.catalog.datastore().insert(event).await?;
        tracing::info!(event_id = created.id, title = %created.title, "event created");
        Ok(self.finish(created.id, created).await)
    }

    pub async fn update_event(&self, id: EventId, patch: EventPatch) -> Result<Mutated<Event>> {
        if patch.is_empty() {
            return Err(CatalogError::MalformedInput(format!(
                "update for event {id} has no fields"
            )));
        }
        let updated = self.catalog.datastore().update(id, patch).await?;
        tracing::info!(event_id = id, "event updated");
        Ok(self.finish(id, updated).await)
    }

    /// Deletes the row, then applies the gallery policy. `RejectIfNonEmpty`
    /// refuses before the row is touched; `Cascade` clears the gallery after.
    pub async fn delete_event(&self, id: EventId) -> Result<Mutated<DeletedEvent>> {
        self.catalog.get_event(id).await?;

        if self.policy == GalleryPolicy::RejectIfNonEmpty && !self.gallery.is_empty(id).await? {
            return Err(CatalogError::Conflict(format!(
                "event {id} still has gallery images"
            )));
        }

        self.catalog.datastore().delete(id).await?;

        let mut deleted = DeletedEvent {
            id,
            gallery_objects_removed: 0,
            gallery_error: None,
        };
        if self.policy == GalleryPolicy::Cascade {
            match self.gallery.clear(id).await {
                Ok(removed) => deleted.gallery_objects_removed = removed,
                Err(err) => {
                    tracing::warn!(event_id = id, error = %err, "gallery cleanup failed");
                    deleted.gallery_error = Some(err.to_string());
                }
            }
        }
        tracing::info!(
            event_id = id,
            gallery_objects_removed = deleted.gallery_objects_removed,
            "event deleted"
        );
        Ok(self.finish(id, deleted).await)
    }

    /// Returns the public URL of the stored image.
    pub async fn upload_image_to_gallery(
        &self,
        id: EventId,
        upload: ImageUpload,
    ) -> Result<Mutated<String>> {
        let name = self.gallery.upload_image(id, upload).await?;
        let url = self.gallery.blobs().public_url(&gallery_key(id, &name));
        Ok(self.finish(id, url).await)
    }

    /// Writes the cover slot only; the event's pointer is left as is.
    /// See [`Self::set_cover_image`] for the coupled operation.
    pub async fn upload_cover_image_to_gallery(
        &self,
        id: EventId,
        upload: ImageUpload,
    ) -> Result<Mutated<String>> {
        self.gallery.upload_cover_image(id, upload).await?;
        let url = self.gallery.blobs().public_url(&gallery_key(id, COVER_NAME));
        Ok(self.finish(id, url).await)
    }

    /// Returns the deleted object key.
    pub async fn delete_image_from_gallery(
        &self,
        id: EventId,
        image_url: &str,
    ) -> Result<Mutated<String>> {
        let key = self.gallery.delete_image(id, image_url).await?;
        Ok(self.finish(id, key).await)
    }

    /// Uploads the cover and points the event at it. When the row write fails
    /// and there was no cover before, the new object is removed again; an
    /// overwritten cover cannot be restored.
    pub async fn set_cover_image(&self, id: EventId, upload: ImageUpload) -> Result<Mutated<Event>> {
        self.catalog.get_event(id).await?;
        let had_cover = self.gallery.has_cover(id).await?;
        self.gallery.upload_cover_image(id, upload).await?;

        let patch = EventPatch::cover_image(Some(COVER_NAME.to_string()));
        match self.catalog.datastore().update(id, patch).await {
            Ok(event) => Ok(self.finish(id, event).await),
            Err(err) => {
                if !had_cover {
                    if let Err(rollback) = self
                        .gallery
                        .blobs()
                        .remove(&gallery_key(id, COVER_NAME))
                        .await
                    {
                        tracing::error!(event_id = id, error = %rollback, "cover rollback failed");
                    }
                }
                tracing::warn!(event_id = id, error = %err, "cover pointer update failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobObject, MemoryBlobStore, SortOrder, UploadOptions};
    use crate::error::InvalidationError;
    use crate::invalidation::RecordingSink;
    use crate::store::{EventQuery, MemoryDatastore};
    use async_trait::async_trait;

    struct Fixture {
        service: EventService,
        sink: Arc<RecordingSink>,
        blobs: Arc<MemoryBlobStore>,
    }

    fn fixture_with(datastore: Arc<dyn Datastore>) -> Fixture {
        let sink = Arc::new(RecordingSink::new());
        let blobs = Arc::new(MemoryBlobStore::new("event", "https://cdn.test/public"));
        let service = EventService::new(datastore, blobs.clone(), sink.clone());
        Fixture {
            service,
            sink,
            blobs,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryDatastore::new()))
    }

    struct DownSink;

    #[async_trait]
    impl InvalidationSink for DownSink {
        async fn revalidate(&self, _path: &str) -> std::result::Result<(), InvalidationError> {
            Err(InvalidationError::Unavailable("cache offline".into()))
        }
    }

    /// Accepts reads and inserts, fails every update.
    struct ReadOnlyUpdates(MemoryDatastore);

    #[async_trait]
    impl Datastore for ReadOnlyUpdates {
        async fn insert(&self, event: NewEvent) -> Result<Event> {
            self.0.insert(event).await
        }
        async fn update(&self, _id: EventId, _patch: EventPatch) -> Result<Event> {
            Err(CatalogError::Backend("permission denied for table events".into()))
        }
        async fn delete(&self, id: EventId) -> Result<()> {
            self.0.delete(id).await
        }
        async fn select(&self, query: &EventQuery) -> Result<Vec<Event>> {
            self.0.select(query).await
        }
    }

    /// Accepts reads, inserts and updates, fails every delete.
    struct StuckDeletes(MemoryDatastore);

    #[async_trait]
    impl Datastore for StuckDeletes {
        async fn insert(&self, event: NewEvent) -> Result<Event> {
            self.0.insert(event).await
        }
        async fn update(&self, id: EventId, patch: EventPatch) -> Result<Event> {
            self.0.update(id, patch).await
        }
        async fn delete(&self, _id: EventId) -> Result<()> {
            Err(CatalogError::Backend("foreign key violation on events".into()))
        }
        async fn select(&self, query: &EventQuery) -> Result<Vec<Event>> {
            self.0.select(query).await
        }
    }

    /// Blob store that lists and stores but cannot remove anything.
    struct PinnedBlobs(MemoryBlobStore);

    #[async_trait]
    impl BlobStore for PinnedBlobs {
        fn bucket(&self) -> &str {
            self.0.bucket()
        }
        async fn list(&self, prefix: &str, order: SortOrder) -> Result<Vec<BlobObject>> {
            self.0.list(prefix, order).await
        }
        async fn upload(&self, key: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<()> {
            self.0.upload(key, bytes, options).await
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            Err(CatalogError::Backend("bucket is read-only".into()))
        }
        fn public_url(&self, key: &str) -> String {
            self.0.public_url(key)
        }
    }

    #[tokio::test]
    async fn every_mutation_signals_detail_and_listing() {
        let fx = fixture();
        let created = fx.service.create_event(NewEvent::titled("Demo")).await.unwrap();
        let id = created.value.id;
        assert_eq!(
            created.invalidation.signalled,
            vec![format!("/dashboard/e/event/{id}"), "/events".to_string()]
        );

        fx.sink.clear();
        fx.service.update_event(id, EventPatch::published(true)).await.unwrap();
        let url = fx
            .service
            .upload_image_to_gallery(id, ImageUpload::new("a.png", vec![1]))
            .await
            .unwrap()
            .value;
        fx.service
            .upload_cover_image_to_gallery(id, ImageUpload::new("c.png", vec![1]))
            .await
            .unwrap();
        fx.service.delete_image_from_gallery(id, &url).await.unwrap();
        fx.service.delete_event(id).await.unwrap();

        let paths = fx.sink.paths();
        assert_eq!(paths.len(), 10);
        for pair in paths.chunks(2) {
            assert_eq!(pair[0], format!("/dashboard/e/event/{id}"));
            assert_eq!(pair[1], "/events");
        }
    }

    #[tokio::test]
    async fn failed_mutations_send_nothing() {
        let fx = fixture();
        assert!(fx.service.update_event(9, EventPatch::published(true)).await.is_err());
        assert!(fx.service.delete_event(9).await.is_err());
        assert!(fx
            .service
            .delete_image_from_gallery(9, "https://cdn.test/public/event/9/gallery/nope")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(fx.service.create_event(NewEvent::titled("  ")).await.is_err());
        assert!(fx.sink.paths().is_empty());
    }

    #[tokio::test]
    async fn invalidation_failure_does_not_fail_the_mutation() {
        let service = EventService::new(
            Arc::new(MemoryDatastore::new()),
            Arc::new(MemoryBlobStore::new("event", "https://cdn.test/public")),
            Arc::new(DownSink),
        );
        let created = service.create_event(NewEvent::titled("Demo")).await.unwrap();
        assert!(!created.invalidation.is_clean());
        assert_eq!(created.invalidation.failures.len(), 2);
        assert!(created.invalidation.signalled.is_empty());
        assert_eq!(service.get_event(created.value.id).await.unwrap().title, "Demo");
    }

    #[tokio::test]
    async fn custom_paths_are_used() {
        let fx = fixture();
        let service = fx.service.with_paths(ResourcePaths {
            detail_prefix: "/events/".into(),
            listing: "/".into(),
        });
        let created = service.create_event(NewEvent::titled("Demo")).await.unwrap();
        assert_eq!(
            fx.sink.paths(),
            vec![format!("/events/{}", created.value.id), "/".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let fx = fixture();
        let id = fx.service.create_event(NewEvent::titled("Demo")).await.unwrap().value.id;
        let err = fx.service.update_event(id, EventPatch::default()).await.unwrap_err();
        assert!(matches!(err, CatalogError::MalformedInput(_)));
    }

    #[tokio::test]
    async fn set_cover_image_links_pointer() {
        let fx = fixture();
        let id = fx.service.create_event(NewEvent::titled("Demo")).await.unwrap().value.id;
        let updated = fx
            .service
            .set_cover_image(id, ImageUpload::new("c.png", vec![1]))
            .await
            .unwrap();
        assert_eq!(updated.value.cover_image_url.as_deref(), Some(COVER_NAME));
        assert_eq!(
            fx.service.get_event_cover_image(id).await.unwrap().as_deref(),
            Some(format!("https://cdn.test/public/event/{id}/gallery/cover").as_str())
        );
    }

    #[tokio::test]
    async fn set_cover_image_rolls_back_new_blob() {
        let fx = fixture_with(Arc::new(ReadOnlyUpdates(MemoryDatastore::new())));
        let id = fx.service.create_event(NewEvent::titled("Demo")).await.unwrap().value.id;
        fx.sink.clear();

        let err = fx
            .service
            .set_cover_image(id, ImageUpload::new("c.png", vec![1]))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Backend(msg) if msg.contains("permission denied")));
        assert!(fx.blobs.is_empty());
        assert!(fx.sink.paths().is_empty());
    }

    #[tokio::test]
    async fn set_cover_image_keeps_overwritten_blob_on_failure() {
        let fx = fixture_with(Arc::new(ReadOnlyUpdates(MemoryDatastore::new())));
        let id = fx.service.create_event(NewEvent::titled("Demo")).await.unwrap().value.id;
        fx.service
            .upload_cover_image_to_gallery(id, ImageUpload::new("old.png", vec![1]))
            .await
            .unwrap();

        assert!(fx
            .service
            .set_cover_image(id, ImageUpload::new("new.png", vec![2]))
            .await
            .is_err());
        assert_eq!(fx.blobs.get(&gallery_key(id, COVER_NAME)), Some(vec![2]));
    }

    #[tokio::test]
    async fn delete_policies() {
        let fx = fixture();
        let keep_id = fx.service.create_event(NewEvent::titled("keep")).await.unwrap().value.id;
        fx.service
            .upload_image_to_gallery(keep_id, ImageUpload::new("a.png", vec![1]))
            .await
            .unwrap();
        let deleted = fx.service.delete_event(keep_id).await.unwrap();
        assert_eq!(deleted.value.gallery_objects_removed, 0);
        assert_eq!(fx.blobs.len(), 1);

        let strict = fx.service.clone().with_gallery_policy(GalleryPolicy::RejectIfNonEmpty);
        let id = strict.create_event(NewEvent::titled("strict")).await.unwrap().value.id;
        strict
            .upload_cover_image_to_gallery(id, ImageUpload::new("c.png", vec![1]))
            .await
            .unwrap();
        let err = strict.delete_event(id).await.unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
        assert!(strict.get_event(id).await.is_ok());

        let cascade = strict.with_gallery_policy(GalleryPolicy::Cascade);
        let deleted = cascade.delete_event(id).await.unwrap();
        assert_eq!(deleted.value.gallery_objects_removed, 1);
        assert!(cascade.get_event_gallery(id).await.unwrap().is_empty());
        assert!(cascade.get_event(id).await.unwrap_err().is_not_found());
        assert!(deleted.value.gallery_error.is_none());
    }

    #[tokio::test]
    async fn cascade_keeps_gallery_when_row_delete_fails() {
        let fx = fixture_with(Arc::new(StuckDeletes(MemoryDatastore::new())));
        let service = fx.service.with_gallery_policy(GalleryPolicy::Cascade);
        let id = service.create_event(NewEvent::titled("Demo")).await.unwrap().value.id;
        service
            .upload_image_to_gallery(id, ImageUpload::new("a.png", vec![1]))
            .await
            .unwrap();
        fx.sink.clear();

        let err = service.delete_event(id).await.unwrap_err();
        assert!(matches!(err, CatalogError::Backend(msg) if msg.contains("foreign key")));
        assert_eq!(fx.blobs.len(), 1);
        assert!(service.get_event(id).await.is_ok());
        assert!(fx.sink.paths().is_empty());
    }

    #[tokio::test]
    async fn cascade_reports_gallery_cleanup_failure() {
        let sink = Arc::new(RecordingSink::new());
        let service = EventService::new(
            Arc::new(MemoryDatastore::new()),
            Arc::new(PinnedBlobs(MemoryBlobStore::new("event", "https://cdn.test/public"))),
            sink.clone(),
        )
        .with_gallery_policy(GalleryPolicy::Cascade);
        let id = service.create_event(NewEvent::titled("Demo")).await.unwrap().value.id;
        service
            .upload_image_to_gallery(id, ImageUpload::new("a.png", vec![1]))
            .await
            .unwrap();
        sink.clear();

        let deleted = service.delete_event(id).await.unwrap();
        assert_eq!(deleted.value.gallery_objects_removed, 0);
        assert!(deleted
            .value
            .gallery_error
            .as_deref()
            .is_some_and(|msg| msg.contains("read-only")));
        assert!(service.get_event(id).await.unwrap_err().is_not_found());
        assert_eq!(sink.paths(), vec![format!("/dashboard/e/event/{id}"), "/events".to_string()]);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let fx = fixture();
        let err = fx.service.clone().with_page_size(0).err().unwrap();
        assert!(matches!(err, CatalogError::MalformedInput(_)));
        assert_eq!(fx.service.with_page_size(25).unwrap().page_size(), 25);
    }

    #[tokio::test]
    async fn reads_use_configured_page_size() {
        let fx = fixture();
        let service = fx.service.with_page_size(2).unwrap();
        for idx in 0..5 {
            let mut event = NewEvent::titled(format!("e{idx}")).with_tags(["t"]);
            event.published = true;
            service.create_event(event).await.unwrap();
        }
        assert_eq!(service.get_events(0, true).await.unwrap().len(), 2);
        assert_eq!(service.get_events(2, false).await.unwrap().len(), 1);
        assert_eq!(service.search_events("e", SearchColumn::Title, 1).await.unwrap().len(), 2);
        assert_eq!(
            service.search_events_by_tags(&["t".to_string()], 0).await.unwrap().len(),
            2
        );
        assert_eq!(service.get_all_events().await.unwrap().len(), 5);
    }
}
