use crate::models::ImageRow;
use crate::Database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

/// Same shape SQLite's column default produces.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

impl Database {
    // -- Writes --

    /// Store an approved image. The timestamp defaults to write time.
    /// Duplicate URLs are accepted; nothing is deduplicated.
    pub fn create_image(&self, url: &str) -> Result<ImageRow> {
        self.with_conn_mut(|conn| {
            conn.execute("INSERT INTO images (url) VALUES (?1)", [url])?;
            let id = conn.last_insert_rowid();
            query_image_by_id(conn, id)
        })
    }

    /// Store an image with an explicit timestamp.
    pub fn create_image_at(&self, url: &str, timestamp: DateTime<Utc>) -> Result<ImageRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO images (url, timestamp) VALUES (?1, ?2)",
                (url, timestamp.format(TIMESTAMP_FORMAT).to_string()),
            )?;
            let id = conn.last_insert_rowid();
            query_image_by_id(conn, id)
        })
    }

    /// Remove the most recent image with this URL. Returns rows removed (0 or 1).
    pub fn delete_by_url(&self, url: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM images WHERE id = (
                     SELECT id FROM images WHERE url = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT 1
                 )",
                [url],
            )?;
            Ok(removed)
        })
    }

    pub fn delete_all(&self) -> Result<usize> {
        self.with_conn_mut(|conn| Ok(conn.execute("DELETE FROM images", [])?))
    }

    // -- Reads --

    /// Newest first, at most `limit` rows.
    pub fn find_latest(&self, limit: u32) -> Result<Vec<ImageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, url, timestamp FROM images
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?1",
            )?;

            let rows = stmt
                .query_map([limit], image_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn find_by_url(&self, url: &str) -> Result<Option<ImageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, url, timestamp FROM images WHERE url = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT 1",
                    [url],
                    image_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
            Ok(u64::try_from(n)?)
        })
    }
}

fn query_image_by_id(conn: &Connection, id: i64) -> Result<ImageRow> {
    let row = conn.query_row(
        "SELECT id, url, timestamp FROM images WHERE id = ?1",
        [id],
        image_from_row,
    )?;
    Ok(row)
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRow> {
    Ok(ImageRow {
        id: row.get(0)?,
        url: row.get(1)?,
        timestamp: row.get(2)?,
    })
}
