//! Collection/document primitives.
//!
//! Free functions take a `&Connection` so they compose inside a
//! `rusqlite::Transaction` (which derefs to `Connection`) as well as on the
//! plain connection.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::models::DocumentRow;
use crate::{StoreError, timestamp};

pub(crate) const SELECT_COLUMNS: &str = "SELECT collection, id, data, created_at, updated_at FROM documents";

pub fn get(conn: &Connection, collection: &str, id: &str) -> Result<Option<DocumentRow>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE collection = ?1 AND id = ?2",
        SELECT_COLUMNS
    ))?;
    let mut rows = stmt.query_map([collection, id], map_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row??)),
        None => Ok(None),
    }
}

/// Fetch and deserialize a document.
pub fn get_as<T: DeserializeOwned>(
    conn: &Connection,
    collection: &str,
    id: &str,
) -> Result<Option<T>> {
    match get(conn, collection, id)? {
        Some(row) => Ok(Some(decode(&row)?)),
        None => Ok(None),
    }
}

/// Write a document, replacing any existing one at the same key.
/// `created_at` is kept from the first write.
pub fn set<T: Serialize>(conn: &Connection, collection: &str, id: &str, data: &T) -> Result<()> {
    let json = serde_json::to_string(data)?;
    let now = timestamp(Utc::now());
    conn.execute(
        "INSERT INTO documents (collection, id, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(collection, id) DO UPDATE
            SET data = excluded.data, updated_at = excluded.updated_at",
        rusqlite::params![collection, id, json, now],
    )?;
    Ok(())
}

/// Insert only if nothing exists at the key. Returns `true` if inserted.
pub fn create_if_absent<T: Serialize>(
    conn: &Connection,
    collection: &str,
    id: &str,
    data: &T,
) -> Result<bool> {
    let json = serde_json::to_string(data)?;
    let now = timestamp(Utc::now());
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO documents (collection, id, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        rusqlite::params![collection, id, json, now],
    )?;
    Ok(inserted == 1)
}

/// Append a document under a fresh id and return the id.
pub fn add<T: Serialize>(conn: &Connection, collection: &str, data: &T) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    insert_with_time(conn, collection, &id, data, &timestamp(Utc::now()))?;
    Ok(id)
}

/// Insert with an explicit creation time so the column matches a timestamp
/// carried inside the document.
pub fn insert_with_time<T: Serialize>(
    conn: &Connection,
    collection: &str,
    id: &str,
    data: &T,
    created_at: &str,
) -> Result<()> {
    let json = serde_json::to_string(data)?;
    conn.execute(
        "INSERT INTO documents (collection, id, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        rusqlite::params![collection, id, json, created_at],
    )?;
    Ok(())
}

/// Apply an RFC 7396 merge patch to an existing document.
/// Fails with `StoreError::NotFound` when the document is missing.
pub fn merge(
    conn: &Connection,
    collection: &str,
    id: &str,
    patch: &serde_json::Value,
) -> Result<()> {
    let now = timestamp(Utc::now());
    let changed = conn.execute(
        "UPDATE documents SET data = json_patch(data, ?3), updated_at = ?4
         WHERE collection = ?1 AND id = ?2",
        rusqlite::params![collection, id, patch.to_string(), now],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn count(conn: &Connection, collection: &str) -> Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE collection = ?1",
        [collection],
        |r| r.get(0),
    )?;
    Ok(n)
}

pub fn decode<T: DeserializeOwned>(row: &DocumentRow) -> Result<T> {
    serde_json::from_value(row.data.clone()).map_err(|e| {
        StoreError::Corrupt {
            collection: row.collection.clone(),
            id: row.id.clone(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Row mapper for `SELECT_COLUMNS`. JSON parse errors are returned in the
/// inner result so they keep the document key.
pub(crate) fn map_row(row: &Row<'_>) -> rusqlite::Result<Result<DocumentRow>> {
    let collection: String = row.get(0)?;
    let id: String = row.get(1)?;
    let raw: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;

    Ok(match serde_json::from_str(&raw) {
        Ok(data) => Ok(DocumentRow {
            collection,
            id,
            data,
            created_at,
            updated_at,
        }),
        Err(e) => Err(StoreError::Corrupt {
            collection,
            id,
            reason: e.to_string(),
        }
        .into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use serde_json::json;

    #[test]
    fn set_overwrites_and_keeps_created_at() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            set(conn, "things", "a", &json!({ "v": 1 }))?;
            let first = get(conn, "things", "a")?.unwrap();

            set(conn, "things", "a", &json!({ "v": 2 }))?;
            let second = get(conn, "things", "a")?.unwrap();

            assert_eq!(second.data, json!({ "v": 2 }));
            assert_eq!(second.created_at, first.created_at);
            assert_eq!(count(conn, "things")?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn create_if_absent_inserts_once() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            assert!(create_if_absent(conn, "things", "k", &json!({ "n": "first" }))?);
            assert!(!create_if_absent(conn, "things", "k", &json!({ "n": "second" }))?);

            let row = get(conn, "things", "k")?.unwrap();
            assert_eq!(row.data["n"], "first");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn merge_patches_fields_and_reports_missing() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            set(conn, "things", "a", &json!({ "keep": true, "status": "old" }))?;
            merge(conn, "things", "a", &json!({ "status": "new" }))?;

            let row = get(conn, "things", "a")?.unwrap();
            assert_eq!(row.data, json!({ "keep": true, "status": "new" }));

            let err = merge(conn, "things", "missing", &json!({ "x": 1 })).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<StoreError>(),
                Some(StoreError::NotFound { .. })
            ));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn collections_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            add(conn, "orders/1/deliveries", &json!({}))?;
            add(conn, "orders/2/deliveries", &json!({}))?;
            add(conn, "orders/2/deliveries", &json!({}))?;

            assert_eq!(count(conn, "orders/1/deliveries")?, 1);
            assert_eq!(count(conn, "orders/2/deliveries")?, 2);
            Ok(())
        })
        .unwrap();
    }
}
