//! SQLite-backed event store.
//!
//! Owns the durable `events` table. Payload and tags are stored as JSON
//! text columns; timestamps are RFC3339 strings, which sort correctly as
//! text, so ordering happens in SQL.

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use cradle_common::CareEvent;
use rusqlite::{params, Connection, Row};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Thread-safe handle over a single SQLite connection.
pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    /// Open or create the database at the given path.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // WAL for better behavior with concurrent readers.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                source TEXT NOT NULL,
                category TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                tags_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_occurred_at ON events(occurred_at);
            CREATE INDEX IF NOT EXISTS idx_events_category ON events(category);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                source TEXT NOT NULL,
                category TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                tags_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("event store lock poisoned"))
    }

    pub fn insert(&self, event: &CareEvent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO events (
                id, type, occurred_at, source, category,
                payload_json, tags_json, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.id,
                event.kind,
                event.occurred_at,
                event.source,
                event.category,
                serde_json::to_string(&event.payload)?,
                serde_json::to_string(&event.tags)?,
                event.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, event_id: &str) -> Result<Option<CareEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM events WHERE id = ?1")?;
        let mut rows = stmt.query(params![event_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_event(row)?)),
            None => Ok(None),
        }
    }

    pub fn update_payload(&self, event_id: &str, payload: &Value) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE events SET payload_json = ?1 WHERE id = ?2",
            params![serde_json::to_string(payload)?, event_id],
        )?;
        Ok(())
    }

    /// Most recent events by occurrence time, newest first.
    pub fn list_recent(&self, limit: u32, since: Option<DateTime<Utc>>) -> Result<Vec<CareEvent>> {
        let conn = self.conn()?;
        let mut events = Vec::new();
        match since {
            Some(cutoff) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM events WHERE occurred_at >= ?1
                     ORDER BY occurred_at DESC LIMIT ?2",
                )?;
                let mut rows = stmt.query(params![to_iso(cutoff), limit])?;
                while let Some(row) = rows.next()? {
                    events.push(row_to_event(row)?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM events ORDER BY occurred_at DESC LIMIT ?1")?;
                let mut rows = stmt.query(params![limit])?;
                while let Some(row) = rows.next()? {
                    events.push(row_to_event(row)?);
                }
            }
        }
        Ok(events)
    }

    pub fn list_by_category(&self, category: &str) -> Result<Vec<CareEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM events WHERE category = ?1 ORDER BY occurred_at DESC")?;
        let mut rows = stmt.query(params![category])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(row_to_event(row)?);
        }
        Ok(events)
    }

    pub fn list_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<CareEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM events WHERE occurred_at >= ?1 ORDER BY occurred_at DESC",
        )?;
        let mut rows = stmt.query(params![to_iso(cutoff)])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(row_to_event(row)?);
        }
        Ok(events)
    }
}

fn to_iso(when: DateTime<Utc>) -> String {
    when.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_event(row: &Row<'_>) -> Result<CareEvent> {
    let payload_json: String = row.get("payload_json")?;
    let tags_json: String = row.get("tags_json")?;
    // Malformed stored JSON degrades to empty, never fails a read.
    let payload = serde_json::from_str(&payload_json).unwrap_or_else(|_| Value::Object(Default::default()));
    let tags = serde_json::from_str(&tags_json).unwrap_or_default();
    Ok(CareEvent {
        id: row.get("id")?,
        kind: row.get("type")?,
        occurred_at: row.get("occurred_at")?,
        source: row.get("source")?,
        category: row.get("category")?,
        payload,
        tags,
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use cradle_common::{iso_now, new_event_id};
    use serde_json::json;

    fn make_event(category: &str, occurred_at: &str) -> CareEvent {
        CareEvent {
            id: new_event_id(),
            kind: "manual".into(),
            occurred_at: occurred_at.into(),
            source: "parent".into(),
            category: category.into(),
            payload: json!({"note": "test"}),
            tags: vec!["tag".into()],
            created_at: iso_now(),
        }
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let store = EventStore::open_in_memory().unwrap();
        let event = make_event("feeding", "2026-02-08T10:00:00Z");
        store.insert(&event).unwrap();

        let fetched = store.get(&event.id).unwrap().unwrap();
        assert_eq!(fetched.category, "feeding");
        assert_eq!(fetched.payload["note"], json!("test"));
        assert_eq!(fetched.tags, vec!["tag".to_string()]);
        assert!(store.get("evt_missing").unwrap().is_none());
    }

    #[test]
    fn test_update_payload() {
        let store = EventStore::open_in_memory().unwrap();
        let event = make_event("crying", "2026-02-08T10:00:00Z");
        store.insert(&event).unwrap();

        store
            .update_payload(&event.id, &json!({"ai_guidance": {"confidence_level": "high"}}))
            .unwrap();
        let fetched = store.get(&event.id).unwrap().unwrap();
        assert_eq!(fetched.payload["ai_guidance"]["confidence_level"], json!("high"));
    }

    #[test]
    fn test_list_recent_ordering_and_limit() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert(&make_event("a", "2026-02-08T08:00:00Z")).unwrap();
        store.insert(&make_event("b", "2026-02-08T10:00:00Z")).unwrap();
        store.insert(&make_event("c", "2026-02-08T09:00:00Z")).unwrap();

        let events = store.list_recent(2, None).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].category, "b");
        assert_eq!(events[1].category, "c");
    }

    #[test]
    fn test_list_since_and_by_category() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert(&make_event("crying", "2026-02-08T08:00:00Z")).unwrap();
        store.insert(&make_event("crying", "2026-02-08T10:00:00Z")).unwrap();
        store.insert(&make_event("sleep", "2026-02-08T10:30:00Z")).unwrap();

        let cutoff = cradle_common::parse_iso("2026-02-08T09:00:00Z").unwrap();
        assert_eq!(store.list_since(cutoff).unwrap().len(), 2);
        assert_eq!(store.list_by_category("crying").unwrap().len(), 2);

        let since = Some(cutoff - Duration::hours(12));
        assert_eq!(store.list_recent(50, since).unwrap().len(), 3);
    }
}
