use std::sync::Arc;

use chrono::{Duration, Utc};
use rusqlite::{OptionalExtension, Row};

use snippetbox_types::Snippet;

use crate::{Database, StoreError, format_ts, parse_ts};

/// Capability interface for snippet storage. Handlers depend on this
/// trait rather than a concrete database so tests can swap in fakes.
pub trait SnippetStore: Send + Sync {
    /// Insert a snippet expiring `expires_days` from now, returning its id.
    fn insert(&self, title: &str, content: &str, expires_days: u32) -> Result<i64, StoreError>;

    /// Fetch one unexpired snippet, or `NoRecord`.
    fn get(&self, id: i64) -> Result<Snippet, StoreError>;

    /// The most recently created unexpired snippets, newest first.
    fn latest(&self, limit: u32) -> Result<Vec<Snippet>, StoreError>;
}

pub struct SqliteSnippets {
    db: Arc<Database>,
}

impl SqliteSnippets {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl SnippetStore for SqliteSnippets {
    fn insert(&self, title: &str, content: &str, expires_days: u32) -> Result<i64, StoreError> {
        let now = Utc::now();
        let expires = now + Duration::days(i64::from(expires_days));

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO snippets (title, content, created, expires) VALUES (?1, ?2, ?3, ?4)",
                (title, content, format_ts(now), format_ts(expires)),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn get(&self, id: i64) -> Result<Snippet, StoreError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, title, content, created, expires
                     FROM snippets
                     WHERE expires > ?1 AND id = ?2",
                    (format_ts(Utc::now()), id),
                    row_to_snippet,
                )
                .optional()?;

            match row {
                Some(row) => snippet_from_row(row),
                None => Err(StoreError::NoRecord),
            }
        })
    }

    fn latest(&self, limit: u32) -> Result<Vec<Snippet>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, content, created, expires
                 FROM snippets
                 WHERE expires > ?1
                 ORDER BY created DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map((format_ts(Utc::now()), limit), row_to_snippet)?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(snippet_from_row).collect()
        })
    }
}

/// Raw row, timestamps still text. Parsed into the shared type afterwards
/// so rusqlite's row callback stays infallible on our side.
struct SnippetRow {
    id: i64,
    title: String,
    content: String,
    created: String,
    expires: String,
}

fn row_to_snippet(row: &Row<'_>) -> rusqlite::Result<SnippetRow> {
    Ok(SnippetRow {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        created: row.get(3)?,
        expires: row.get(4)?,
    })
}

fn snippet_from_row(row: SnippetRow) -> Result<Snippet, StoreError> {
    Ok(Snippet {
        id: row.id,
        title: row.title,
        content: row.content,
        created: parse_ts(&row.created)?,
        expires: parse_ts(&row.expires)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteSnippets {
        SqliteSnippets::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn insert_then_get() {
        let store = store();
        let id = store.insert("O snail", "Climb Mount Fuji", 7).unwrap();
        assert!(id >= 1);

        let snippet = store.get(id).unwrap();
        assert_eq!(snippet.title, "O snail");
        assert_eq!(snippet.content, "Climb Mount Fuji");
        assert!(snippet.expires > snippet.created);
    }

    #[test]
    fn get_missing_is_no_record() {
        let store = store();
        assert!(matches!(store.get(42), Err(StoreError::NoRecord)));
    }

    #[test]
    fn expired_snippets_are_invisible() {
        let store = store();
        let id = store.insert("gone", "already expired", 7).unwrap();

        // Backdate the expiry directly; the store itself never updates rows.
        store
            .db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE snippets SET expires = ?1 WHERE id = ?2",
                    (format_ts(Utc::now() - Duration::hours(1)), id),
                )?;
                Ok(())
            })
            .unwrap();

        assert!(matches!(store.get(id), Err(StoreError::NoRecord)));
        assert!(store.latest(10).unwrap().is_empty());
    }

    #[test]
    fn latest_is_newest_first_and_limited() {
        let store = store();
        for i in 0..5i64 {
            let id = store.insert(&format!("s{}", i), "body", 1).unwrap();
            // Spread the created timestamps so the ordering is deterministic.
            store
                .db
                .with_conn(|conn| {
                    conn.execute(
                        "UPDATE snippets SET created = ?1 WHERE id = ?2",
                        (format_ts(Utc::now() - Duration::minutes(10 - i)), id),
                    )?;
                    Ok(())
                })
                .unwrap();
        }

        let latest = store.latest(3).unwrap();
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].title, "s4");
        assert_eq!(latest[2].title, "s2");
    }
}
