use std::{
    collections::BTreeSet,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    functions::FunctionFlags, params, params_from_iter, types::Value, Connection,
    OptionalExtension,
};

use super::{contains_ignoring_case, stored_time, Datastore, EventQuery, Filter, OrderBy};
use crate::error::{CatalogError, Result};
use crate::models::{Event, EventId, EventPatch, NewEvent};
use crate::utils;

const COLUMNS: &str = "id, title, description, location, starts_at, registration_end, \
                       published, tags, cover_image_url, created_at";

/// Events table in SQLite. Rusqlite is blocking, so every call runs on the
/// blocking pool against a single shared connection.
#[derive(Clone)]
pub struct SqliteDatastore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatastore {
    pub fn open_default() -> Result<Self> {
        Self::open(&utils::database_path())
    }

    pub fn open(path: &Path) -> Result<Self> {
        utils::ensure_parent(path);
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        register_functions(&conn)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CatalogError::Backend("database mutex poisoned".to_string()))?;
            op(&guard)
        })
        .await?
    }
}

// `ci_contains(haystack, needle)`: Unicode case-insensitive substring match.
// NULL haystacks never match.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "ci_contains",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let haystack: Option<String> = ctx.get(0)?;
            let needle: String = ctx.get(1)?;
            Ok(haystack
                .map(|value| contains_ignoring_case(&value, &needle))
                .unwrap_or(false))
        },
    )
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            description TEXT,
            location TEXT,
            starts_at TEXT,
            registration_end TEXT,
            published INTEGER NOT NULL DEFAULT 0,
            tags TEXT NOT NULL DEFAULT '[]',
            cover_image_url TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS events_registration_end ON events(registration_end);",
    )
}

#[async_trait]
impl Datastore for SqliteDatastore {
    async fn insert(&self, event: NewEvent) -> Result<Event> {
        self.run(move |conn| {
            let tags = serde_json::to_string(&event.tags)?;
            conn.execute(
                "INSERT INTO events (title, description, location, starts_at, registration_end,
                                     published, tags, cover_image_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.title,
                    event.description,
                    event.location,
                    event.starts_at.map(format_time),
                    event.registration_end.map(format_time),
                    event.published,
                    tags,
                    event.cover_image_url,
                    format_time(Utc::now()),
                ],
            )?;
            fetch(conn, conn.last_insert_rowid())
        })
        .await
    }

    async fn update(&self, id: EventId, patch: EventPatch) -> Result<Event> {
        self.run(move |conn| {
            let assignments = assignments(patch)?;
            if assignments.is_empty() {
                return fetch(conn, id);
            }

            let set_clause = assignments
                .iter()
                .enumerate()
                .map(|(idx, (column, _))| format!("{column} = ?{}", idx + 1))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE events SET {set_clause} WHERE id = ?{}",
                assignments.len() + 1
            );
            let mut values: Vec<Value> = assignments.into_iter().map(|(_, v)| v).collect();
            values.push(Value::Integer(id));

            let changed = conn.execute(&sql, params_from_iter(values))?;
            if changed == 0 {
                return Err(CatalogError::NotFound(format!("event {id}")));
            }
            fetch(conn, id)
        })
        .await
    }

    async fn delete(&self, id: EventId) -> Result<()> {
        self.run(move |conn| {
            let changed = conn.execute("DELETE FROM events WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(CatalogError::NotFound(format!("event {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn select(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let query = query.clone();
        self.run(move |conn| {
            let (sql, values) = build_select(&query)?;
            tracing::trace!(%sql, "select events");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), map_row)?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }
}

fn fetch(conn: &Connection, id: EventId) -> Result<Event> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM events WHERE id = ?1"),
        params![id],
        map_row,
    )
    .optional()?
    .ok_or_else(|| CatalogError::NotFound(format!("event {id}")))
}

fn assignments(patch: EventPatch) -> Result<Vec<(&'static str, Value)>> {
    let mut out = Vec::new();
    if let Some(title) = patch.title {
        out.push(("title", Value::Text(title)));
    }
    if let Some(description) = patch.description {
        out.push(("description", text_or_null(description)));
    }
    if let Some(location) = patch.location {
        out.push(("location", text_or_null(location)));
    }
    if let Some(starts_at) = patch.starts_at {
        out.push(("starts_at", text_or_null(starts_at.map(format_time))));
    }
    if let Some(registration_end) = patch.registration_end {
        out.push((
            "registration_end",
            text_or_null(registration_end.map(format_time)),
        ));
    }
    if let Some(published) = patch.published {
        out.push(("published", Value::Integer(i64::from(published))));
    }
    if let Some(tags) = patch.tags {
        out.push(("tags", Value::Text(serde_json::to_string(&tags)?)));
    }
    if let Some(cover) = patch.cover_image_url {
        out.push(("cover_image_url", text_or_null(cover)));
    }
    Ok(out)
}

fn build_select(query: &EventQuery) -> Result<(String, Vec<Value>)> {
    let mut sql = format!("SELECT {COLUMNS} FROM events");
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    for filter in &query.filters {
        match filter {
            Filter::IdEq(id) => {
                clauses.push("id = ?".to_string());
                values.push(Value::Integer(*id));
            }
            Filter::Published(published) => {
                clauses.push("published = ?".to_string());
                values.push(Value::Integer(i64::from(*published)));
            }
            Filter::ILike(column, term) => {
                clauses.push(format!("ci_contains({}, ?)", column.as_str()));
                values.push(Value::Text(term.clone()));
            }
            Filter::ContainsTags(tags) if tags.is_empty() => {}
            Filter::ContainsTags(tags) => {
                clauses.push(
                    "NOT EXISTS (SELECT 1 FROM json_each(?) AS wanted
                     WHERE wanted.value NOT IN (SELECT value FROM json_each(events.tags)))"
                        .to_string(),
                );
                values.push(Value::Text(serde_json::to_string(tags)?));
            }
        }
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if let Some(order) = query.order {
        sql.push_str(&order_clause(order));
    }

    if let Some((offset, count)) = query.range {
        sql.push_str(" LIMIT ? OFFSET ?");
        values.push(Value::Integer(i64::try_from(count).unwrap_or(i64::MAX)));
        values.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
    }

    Ok((sql, values))
}

fn order_clause(order: OrderBy) -> String {
    let column = order.column.as_str();
    let direction = if order.ascending { "ASC" } else { "DESC" };
    let nulls = if order.nulls_first { "DESC" } else { "ASC" };
    format!(" ORDER BY {column} IS NULL {nulls}, {column} {direction}, id ASC")
}

fn text_or_null(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

// Fixed-width UTC text so lexical order in SQLite matches chronological order.
fn format_time(time: DateTime<Utc>) -> String {
    stored_time(time).to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|text| {
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(err),
                )
            })
    })
    .transpose()
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let tags_json: String = row.get(7)?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags_json).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(err))
    })?;
    let created_at = parse_time(9, Some(row.get(9)?))?.unwrap_or_else(Utc::now);

    Ok(Event {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        location: row.get(3)?,
        starts_at: parse_time(4, row.get(4)?)?,
        registration_end: parse_time(5, row.get(5)?)?,
        published: row.get(6)?,
        tags,
        cover_image_url: row.get(8)?,
        created_at,
    })
}
