use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CatalogError;

pub type EventId = i64;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub registration_end: Option<DateTime<Utc>>,
    pub published: bool,
    pub tags: BTreeSet<String>,
    /// Name of a blob inside this event's gallery, not a full URL.
    pub cover_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Create payload. The datastore assigns `id` and `created_at`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub registration_end: Option<DateTime<Utc>>,
    pub published: bool,
    pub tags: BTreeSet<String>,
    pub cover_image_url: Option<String>,
}

impl NewEvent {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn into_event(self, id: EventId, created_at: DateTime<Utc>) -> Event {
        Event {
            id,
            title: self.title,
            description: self.description,
            location: self.location,
            starts_at: self.starts_at,
            registration_end: self.registration_end,
            published: self.published,
            tags: self.tags,
            cover_image_url: self.cover_image_url,
            created_at,
        }
    }
}

/// Partial update. `None` leaves a field untouched; for nullable fields
/// `Some(None)` clears the stored value.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct EventPatch {
    pub title: Option<String>,
    #[serde(deserialize_with = "explicit_null", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(deserialize_with = "explicit_null", skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<String>>,
    #[serde(deserialize_with = "explicit_null", skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<Option<DateTime<Utc>>>,
    #[serde(deserialize_with = "explicit_null", skip_serializing_if = "Option::is_none")]
    pub registration_end: Option<Option<DateTime<Utc>>>,
    pub published: Option<bool>,
    pub tags: Option<BTreeSet<String>>,
    #[serde(deserialize_with = "explicit_null", skip_serializing_if = "Option::is_none")]
    pub cover_image_url: Option<Option<String>>,
}

// Distinguishes an explicit `null` (clear the field) from an absent key.
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl EventPatch {
    pub fn published(published: bool) -> Self {
        Self {
            published: Some(published),
            ..Self::default()
        }
    }

    pub fn cover_image(name: Option<String>) -> Self {
        Self {
            cover_image_url: Some(name),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(self, event: &mut Event) {
        if let Some(title) = self.title {
            event.title = title;
        }
        if let Some(description) = self.description {
            event.description = description;
        }
        if let Some(location) = self.location {
            event.location = location;
        }
        if let Some(starts_at) = self.starts_at {
            event.starts_at = starts_at;
        }
        if let Some(registration_end) = self.registration_end {
            event.registration_end = registration_end;
        }
        if let Some(published) = self.published {
            event.published = published;
        }
        if let Some(tags) = self.tags {
            event.tags = tags;
        }
        if let Some(cover) = self.cover_image_url {
            event.cover_image_url = cover;
        }
    }
}

/// Scalar text columns that support substring search. Tags are searched
/// through containment only and have no variant here.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SearchColumn {
    #[default]
    Title,
    Description,
    Location,
}

impl SearchColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchColumn::Title => "title",
            SearchColumn::Description => "description",
            SearchColumn::Location => "location",
        }
    }

    pub fn value_of(self, event: &Event) -> Option<&str> {
        match self {
            SearchColumn::Title => Some(event.title.as_str()),
            SearchColumn::Description => event.description.as_deref(),
            SearchColumn::Location => event.location.as_deref(),
        }
    }
}

impl fmt::Display for SearchColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchColumn {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "title" => Ok(SearchColumn::Title),
            "description" => Ok(SearchColumn::Description),
            "location" => Ok(SearchColumn::Location),
            "tags" => Err(CatalogError::MalformedInput(
                "tags cannot be searched by substring, use tag containment".to_string(),
            )),
            other => Err(CatalogError::MalformedInput(format!(
                "unknown search column: {other}"
            ))),
        }
    }
}

/// Zero-indexed page over an ordered result set.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(page: u32, limit: u32) -> Result<Self, CatalogError> {
        if limit == 0 {
            return Err(CatalogError::MalformedInput(
                "page limit must be greater than zero".to_string(),
            ));
        }
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.limit)
    }

    pub fn range(&self) -> (u64, u64) {
        (self.offset(), u64::from(self.limit))
    }
}
