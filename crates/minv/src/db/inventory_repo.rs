//! Inventory repository: collections, locations, index files and records.
//!
//! Functions taking a `&Connection` are meant to run inside
//! `Database::transaction` so that an index file and its records are
//! written atomically.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRow {
    pub id: i64,
    pub mission: String,
    pub file_type: String,
}

impl CollectionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            mission: row.get("mission")?,
            file_type: row.get("file_type")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationRow {
    pub id: i64,
    pub collection_id: i64,
    pub url: String,
    pub location_type: String,
}

impl LocationRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            collection_id: row.get("collection_id")?,
            url: row.get("url")?,
            location_type: row.get("location_type")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexFileRow {
    pub id: i64,
    pub location_id: i64,
    pub filename: String,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub insertion_time: DateTime<Utc>,
}

impl IndexFileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            location_id: row.get("location_id")?,
            filename: row.get("filename")?,
            begin_time: row.get("begin_time")?,
            end_time: row.get("end_time")?,
            update_time: row.get("update_time")?,
            insertion_time: row.get("insertion_time")?,
        })
    }
}

/// Values of an index file about to be inserted.
#[derive(Debug, Clone)]
pub struct NewIndexFile {
    pub location_id: i64,
    pub filename: String,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub insertion_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordRow {
    pub id: i64,
    pub location_id: i64,
    pub index_file_id: i64,
    pub filename: String,
    pub metadata: serde_json::Value,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let metadata: String = row.get("metadata")?;
        let metadata = serde_json::from_str(&metadata).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;
        Ok(Self {
            id: row.get("id")?,
            location_id: row.get("location_id")?,
            index_file_id: row.get("index_file_id")?,
            filename: row.get("filename")?,
            metadata,
        })
    }
}

/// Returns the id of the collection, creating it if needed.
pub fn ensure_collection(
    db: &Database,
    mission: &str,
    file_type: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO collections (mission, file_type) VALUES (?1, ?2)",
            params![mission, file_type],
        )?;
        let id = conn.query_row(
            "SELECT id FROM collections WHERE mission = ?1 AND file_type = ?2",
            params![mission, file_type],
            |r| r.get(0),
        )?;
        Ok(id)
    })
}

pub fn find_collection(
    db: &Database,
    mission: &str,
    file_type: &str,
) -> Result<Option<CollectionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM collections WHERE mission = ?1 AND file_type = ?2",
                params![mission, file_type],
                CollectionRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

pub fn list_collections(db: &Database) -> Result<Vec<CollectionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM collections ORDER BY mission, file_type")?;
        let rows = stmt
            .query_map([], CollectionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Adds a location to a collection and returns its id. Adding an existing
/// URL again returns the existing id and leaves its type untouched.
pub fn add_location(
    db: &Database,
    collection_id: i64,
    url: &str,
    location_type: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO locations (collection_id, url, location_type)
             VALUES (?1, ?2, ?3)",
            params![collection_id, url, location_type],
        )?;
        let id = conn.query_row(
            "SELECT id FROM locations WHERE collection_id = ?1 AND url = ?2",
            params![collection_id, url],
            |r| r.get(0),
        )?;
        Ok(id)
    })
}

pub fn find_location(
    db: &Database,
    collection_id: i64,
    url: &str,
) -> Result<Option<LocationRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM locations WHERE collection_id = ?1 AND url = ?2",
                params![collection_id, url],
                LocationRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

pub fn list_locations(db: &Database, collection_id: i64) -> Result<Vec<LocationRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM locations WHERE collection_id = ?1 ORDER BY url")?;
        let rows = stmt
            .query_map(params![collection_id], LocationRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Filenames of every index file known for a location.
pub fn index_filenames(db: &Database, location_id: i64) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT filename FROM index_files WHERE location_id = ?1 ORDER BY filename")?;
        let rows = stmt
            .query_map(params![location_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    })
}

pub fn find_index_file(
    db: &Database,
    location_id: i64,
    filename: &str,
) -> Result<Option<IndexFileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM index_files WHERE location_id = ?1 AND filename = ?2",
                params![location_id, filename],
                IndexFileRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Deletes an index file together with its records.
pub fn delete_index_file(
    db: &Database,
    location_id: i64,
    filename: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM index_files WHERE location_id = ?1 AND filename = ?2",
            params![location_id, filename],
        )?;
        Ok(changed > 0)
    })
}

pub fn insert_index_file(conn: &Connection, file: &NewIndexFile) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO index_files (location_id, filename, begin_time, end_time, update_time,
         insertion_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            file.location_id,
            file.filename,
            file.begin_time,
            file.end_time,
            file.update_time,
            file.insertion_time,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Bulk-inserts `(filename, metadata)` records of one index file.
pub fn insert_records(
    conn: &Connection,
    location_id: i64,
    index_file_id: i64,
    records: &[(String, serde_json::Value)],
) -> Result<usize, DatabaseError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO records (location_id, index_file_id, filename, metadata)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (filename, metadata) in records {
        let metadata = serde_json::to_string(metadata).map_err(|e| DatabaseError::Json {
            column: "metadata",
            source: e,
        })?;
        stmt.execute(params![location_id, index_file_id, filename, metadata])?;
    }
    Ok(records.len())
}

pub fn records_for_index_file(
    db: &Database,
    index_file_id: i64,
) -> Result<Vec<RecordRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM records WHERE index_file_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![index_file_id], RecordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_records(db: &Database, location_id: i64) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE location_id = ?1",
            params![location_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn new_file(location_id: i64, filename: &str) -> NewIndexFile {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        NewIndexFile {
            location_id,
            filename: filename.to_string(),
            begin_time: t,
            end_time: t,
            update_time: t,
            insertion_time: t,
        }
    }

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let collection_id = ensure_collection(&db, "S1", "SAR").unwrap();
        let location_id = add_location(&db, collection_id, "http://a/", "oads").unwrap();
        (db, location_id)
    }

    #[test]
    fn test_ensure_collection_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let a = ensure_collection(&db, "S1", "SAR").unwrap();
        let b = ensure_collection(&db, "S1", "SAR").unwrap();
        assert_eq!(a, b);
        assert_eq!(list_collections(&db).unwrap().len(), 1);
        assert!(find_collection(&db, "S2", "MSI").unwrap().is_none());
    }

    #[test]
    fn test_locations() {
        let db = Database::open_in_memory().unwrap();
        let collection_id = ensure_collection(&db, "S1", "SAR").unwrap();
        let a = add_location(&db, collection_id, "http://a/", "oads").unwrap();
        let again = add_location(&db, collection_id, "http://a/", "nga").unwrap();
        assert_eq!(a, again);
        add_location(&db, collection_id, "http://b/", "nga").unwrap();

        let locations = list_locations(&db, collection_id).unwrap();
        assert_eq!(locations.len(), 2);
        let found = find_location(&db, collection_id, "http://a/").unwrap().unwrap();
        assert_eq!(found.location_type, "oads");
    }

    #[test]
    fn test_index_file_unique_per_location() {
        let (db, location_id) = setup();
        let name = "20200101-000000_20200102-000000_20200103-000000.index";
        db.transaction(|tx| insert_index_file(tx, &new_file(location_id, name)))
            .unwrap();
        let second: Result<i64, DatabaseError> =
            db.transaction(|tx| insert_index_file(tx, &new_file(location_id, name)));
        assert!(second.is_err());
        assert_eq!(index_filenames(&db, location_id).unwrap(), vec![name]);
    }

    #[test]
    fn test_records_cascade_with_index_file() {
        let (db, location_id) = setup();
        let name = "20200101-000000_20200102-000000_20200103-000000.index";
        let index_file_id = db
            .transaction(|tx| {
                let id = insert_index_file(tx, &new_file(location_id, name))?;
                insert_records(
                    tx,
                    location_id,
                    id,
                    &[
                        ("a.SAFE".to_string(), json!({"filename": "a.SAFE"})),
                        ("b.SAFE".to_string(), json!({"filename": "b.SAFE", "orbit_number": 7})),
                    ],
                )?;
                Ok::<_, DatabaseError>(id)
            })
            .unwrap();

        let records = records_for_index_file(&db, index_file_id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].metadata["orbit_number"], 7);
        assert_eq!(count_records(&db, location_id).unwrap(), 2);

        assert!(delete_index_file(&db, location_id, name).unwrap());
        assert_eq!(count_records(&db, location_id).unwrap(), 0);
        assert!(find_index_file(&db, location_id, name).unwrap().is_none());
    }
}
