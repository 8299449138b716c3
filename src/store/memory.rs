use std::{cmp::Ordering, collections::BTreeMap, sync::Mutex, sync::MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    contains_ignoring_case, stored_time, Datastore, EventQuery, Filter, OrderBy, OrderColumn,
};
use crate::error::{CatalogError, Result};
use crate::models::{Event, EventId, EventPatch, NewEvent};

/// In-process datastore with the same filtering, ordering and range semantics
/// as [`super::SqliteDatastore`].
#[derive(Default)]
pub struct MemoryDatastore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    last_id: EventId,
    rows: BTreeMap<EventId, Event>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| CatalogError::Backend("datastore mutex poisoned".to_string()))
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn insert(&self, event: NewEvent) -> Result<Event> {
        let mut state = self.lock()?;
        state.last_id += 1;
        let mut event = event.into_event(state.last_id, Utc::now());
        truncate_times(&mut event);
        state.rows.insert(event.id, event.clone());
        Ok(event)
    }

    async fn update(&self, id: EventId, patch: EventPatch) -> Result<Event> {
        let mut state = self.lock()?;
        let row = state
            .rows
            .get_mut(&id)
            .ok_or_else(|| CatalogError::NotFound(format!("event {id}")))?;
        patch.apply(row);
        truncate_times(row);
        Ok(row.clone())
    }

    async fn delete(&self, id: EventId) -> Result<()> {
        let mut state = self.lock()?;
        state
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CatalogError::NotFound(format!("event {id}")))
    }

    async fn select(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let state = self.lock()?;
        let mut rows: Vec<Event> = state
            .rows
            .values()
            .filter(|event| query.filters.iter().all(|f| matches_filter(event, f)))
            .cloned()
            .collect();
        drop(state);

        if let Some(order) = query.order {
            rows.sort_by(|a, b| compare(a, b, order).then_with(|| a.id.cmp(&b.id)));
        }

        if let Some((offset, count)) = query.range {
            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
            let count = usize::try_from(count).unwrap_or(usize::MAX);
            rows = rows.into_iter().skip(offset).take(count).collect();
        }

        Ok(rows)
    }
}

fn matches_filter(event: &Event, filter: &Filter) -> bool {
    match filter {
        Filter::IdEq(id) => event.id == *id,
        Filter::Published(published) => event.published == *published,
        Filter::ILike(column, term) => column
            .value_of(event)
            .map(|value| contains_ignoring_case(value, term))
            .unwrap_or(false),
        Filter::ContainsTags(tags) => tags.is_subset(&event.tags),
    }
}

fn truncate_times(event: &mut Event) {
    event.starts_at = event.starts_at.map(stored_time);
    event.registration_end = event.registration_end.map(stored_time);
    event.created_at = stored_time(event.created_at);
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum SortKey<'a> {
    Time(DateTime<Utc>),
    Text(&'a str),
}

fn sort_key(event: &Event, column: OrderColumn) -> Option<SortKey<'_>> {
    match column {
        OrderColumn::RegistrationEnd => event.registration_end.map(SortKey::Time),
        OrderColumn::StartsAt => event.starts_at.map(SortKey::Time),
        OrderColumn::CreatedAt => Some(SortKey::Time(event.created_at)),
        OrderColumn::Title => Some(SortKey::Text(event.title.as_str())),
    }
}

fn compare(a: &Event, b: &Event, order: OrderBy) -> Ordering {
    match (sort_key(a, order.column), sort_key(b, order.column)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) if order.nulls_first => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) if order.nulls_first => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) if order.ascending => x.cmp(&y),
        (Some(x), Some(y)) => y.cmp(&x),
    }
}
