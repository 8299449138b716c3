use std::{collections::BTreeSet, sync::Arc};

use crate::error::{CatalogError, Result};
use crate::models::{Event, EventId, Page, SearchColumn};
use crate::store::{Datastore, EventQuery, Filter, OrderBy};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Read side of the event catalog: lookups, listings and searches. Every
/// paged query is ordered by registration deadline, undated events last.
#[derive(Clone)]
pub struct Catalog {
    datastore: Arc<dyn Datastore>,
}

impl Catalog {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self { datastore }
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    pub async fn get_event(&self, id: EventId) -> Result<Event> {
        let query = EventQuery::new().filter(Filter::IdEq(id));
        self.datastore
            .select(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::NotFound(format!("event {id}")))
    }

    pub async fn get_events(
        &self,
        page: u32,
        limit: u32,
        only_published: bool,
    ) -> Result<Vec<Event>> {
        let mut query = EventQuery::new();
        if only_published {
            query = query.filter(Filter::Published(true));
        }
        self.paged(query, page, limit).await
    }

    pub async fn search_events(
        &self,
        term: &str,
        column: SearchColumn,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Event>> {
        tracing::debug!(term, %column, page, limit, "search events");
        let query = EventQuery::new().filter(Filter::ILike(column, term.to_string()));
        self.paged(query, page, limit).await
    }

    /// Events carrying every one of `tags`.
    pub async fn search_events_by_tags<I, S>(&self, tags: I, page: u32, limit: u32) -> Result<Vec<Event>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        tracing::debug!(?tags, page, limit, "search events by tags");
        self.paged(EventQuery::new().filter(Filter::ContainsTags(tags)), page, limit)
            .await
    }

    /// Whole catalog, unpaged and unordered. Meant for admin views.
    pub async fn get_all_events(&self) -> Result<Vec<Event>> {
        self.datastore.select(&EventQuery::new()).await
    }

    async fn paged(&self, query: EventQuery, page: u32, limit: u32) -> Result<Vec<Event>> {
        let query = query
            .order(OrderBy::registration_deadline())
            .page(Page::new(page, limit)?);
        self.datastore.select(&query).await
    }
}
