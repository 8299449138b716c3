pub mod memory;
pub mod sqlite;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};

use crate::error::Result;
use crate::models::{Event, EventId, EventPatch, NewEvent, Page, SearchColumn};

pub use memory::MemoryDatastore;
pub use sqlite::SqliteDatastore;

/// Row filters understood by every datastore backend. All filters in a query
/// must hold for a row to match.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    IdEq(EventId),
    Published(bool),
    /// Case-insensitive substring match. The term is literal text.
    ILike(SearchColumn, String),
    /// Row tags must be a superset of these.
    ContainsTags(BTreeSet<String>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderColumn {
    RegistrationEnd,
    StartsAt,
    Title,
    CreatedAt,
}

impl OrderColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderColumn::RegistrationEnd => "registration_end",
            OrderColumn::StartsAt => "starts_at",
            OrderColumn::Title => "title",
            OrderColumn::CreatedAt => "created_at",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub column: OrderColumn,
    pub ascending: bool,
    pub nulls_first: bool,
}

impl OrderBy {
    /// Soonest registration deadline first, undated events last.
    pub fn registration_deadline() -> Self {
        Self {
            column: OrderColumn::RegistrationEnd,
            ascending: true,
            nulls_first: false,
        }
    }
}

/// Filters are applied first, then ordering, then the `(offset, count)` range.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventQuery {
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
    pub range: Option<(u64, u64)>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: OrderBy) -> Self {
        self.order = Some(order);
        self
    }

    pub fn page(mut self, page: Page) -> Self {
        self.range = Some(page.range());
        self
    }
}

/// Unicode case-insensitive substring test shared by every backend.
pub(crate) fn contains_ignoring_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Stored timestamps keep microseconds; anything finer is dropped.
pub(crate) fn stored_time(time: DateTime<Utc>) -> DateTime<Utc> {
    time.trunc_subsecs(6)
}

/// Row storage for events. Timestamps read back are truncated to
/// microseconds on every backend.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn insert(&self, event: NewEvent) -> Result<Event>;

    /// Merges the submitted fields into the stored row and returns the result.
    /// Fails with `NotFound` when no row has `id`.
    async fn update(&self, id: EventId, patch: EventPatch) -> Result<Event>;

    /// Fails with `NotFound` when no row has `id`.
    async fn delete(&self, id: EventId) -> Result<()>;

    async fn select(&self, query: &EventQuery) -> Result<Vec<Event>>;
}
