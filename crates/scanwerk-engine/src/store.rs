// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Session store: page records persisted to `session.db` in the session
// directory, so a crashed session can be reloaded. The image files
// themselves stay where they are.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use scanwerk_core::bbox::BboxTree;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{Page, PageId, Resolution};

use crate::collection::PageRow;

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS pages (
        position INTEGER NOT NULL,
        number INTEGER NOT NULL,
        id TEXT PRIMARY KEY,
        filename TEXT NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        resolution TEXT NOT NULL,
        text_layer TEXT,
        annotations TEXT,
        dirty_time TEXT NOT NULL,
        analyse_time TEXT,
        ocr_time TEXT,
        saved INTEGER NOT NULL DEFAULT 0,
        mean TEXT,
        std_dev TEXT
    )
"#;

/// Page records of one session, backed by SQLite.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    /// Open (or create) the store at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ScanwerkError::Database(format!("open: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| ScanwerkError::Database(format!("WAL pragma: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| ScanwerkError::Database(format!("create table: {e}")))?;
        info!("session store opened");
        Ok(Self { conn })
    }

    /// Open an in-memory store (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ScanwerkError::Database(format!("open in-memory: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| ScanwerkError::Database(format!("create table: {e}")))?;
        debug!("in-memory session store opened");
        Ok(Self { conn })
    }

    // -- Writing --------------------------------------------------------------

    /// Replace the stored pages with `rows`.
    #[instrument(skip_all, fields(pages = rows.len()))]
    pub fn save_pages(&mut self, rows: &[PageRow]) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| ScanwerkError::Database(format!("begin: {e}")))?;
        tx.execute("DELETE FROM pages", [])
            .map_err(|e| ScanwerkError::Database(format!("clear pages: {e}")))?;
        {
            let mut insert = tx
                .prepare(
                    "INSERT INTO pages (position, number, id, filename, width, height, resolution,
                     text_layer, annotations, dirty_time, analyse_time, ocr_time, saved, mean, std_dev)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                )
                .map_err(|e| ScanwerkError::Database(format!("prepare insert: {e}")))?;
            for (position, row) in rows.iter().enumerate() {
                let page = &row.page;
                let resolution = serde_json::to_string(&page.resolution)?;
                let text_layer = page.text_layer.as_ref().map(BboxTree::to_json).transpose()?;
                let annotations = page.annotations.as_ref().map(BboxTree::to_json).transpose()?;
                let mean = page.mean.as_ref().map(serde_json::to_string).transpose()?;
                let std_dev = page.std_dev.as_ref().map(serde_json::to_string).transpose()?;
                insert
                    .execute(params![
                        position as i64,
                        row.number,
                        page.id.to_string(),
                        page.filename.to_string_lossy().into_owned(),
                        page.width,
                        page.height,
                        resolution,
                        text_layer,
                        annotations,
                        page.dirty_time.to_rfc3339(),
                        page.analyse_time.map(|t| t.to_rfc3339()),
                        page.ocr_time.map(|t| t.to_rfc3339()),
                        page.saved,
                        mean,
                        std_dev,
                    ])
                    .map_err(|e| ScanwerkError::Database(format!("insert page: {e}")))?;
            }
        }
        tx.commit()
            .map_err(|e| ScanwerkError::Database(format!("commit: {e}")))?;
        info!("session saved");
        Ok(())
    }

    // -- Reading --------------------------------------------------------------

    /// Every stored page, in collection order.
    pub fn load_pages(&self) -> Result<Vec<PageRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT number, id, filename, width, height, resolution, text_layer, annotations,
                 dirty_time, analyse_time, ocr_time, saved, mean, std_dev
                 FROM pages ORDER BY position",
            )
            .map_err(|e| ScanwerkError::Database(format!("prepare load_pages: {e}")))?;
        let rows = stmt
            .query_map([], row_to_page_row)
            .map_err(|e| ScanwerkError::Database(format!("query load_pages: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ScanwerkError::Database(format!("collect rows: {e}")))?;
        debug!(count = rows.len(), "loaded pages");
        Ok(rows)
    }
}

fn conversion(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn optional_json<T: serde::de::DeserializeOwned>(idx: usize, text: Option<String>) -> rusqlite::Result<Option<T>> {
    text.map(|json| serde_json::from_str(&json).map_err(|e| conversion(idx, e)))
        .transpose()
}

/// Map a `pages` row to a [`PageRow`].
fn row_to_page_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PageRow> {
    let number: u32 = row.get(0)?;
    let id_str: String = row.get(1)?;
    let filename: String = row.get(2)?;
    let width: u32 = row.get(3)?;
    let height: u32 = row.get(4)?;
    let resolution_json: String = row.get(5)?;
    let text_layer: Option<String> = row.get(6)?;
    let annotations: Option<String> = row.get(7)?;
    let dirty_time: String = row.get(8)?;
    let analyse_time: Option<String> = row.get(9)?;
    let ocr_time: Option<String> = row.get(10)?;
    let saved: bool = row.get(11)?;
    let mean: Option<String> = row.get(12)?;
    let std_dev: Option<String> = row.get(13)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion(1, e))?;
    let resolution: Resolution = serde_json::from_str(&resolution_json).map_err(|e| conversion(5, e))?;

    let page = Page {
        id: PageId(id),
        filename: PathBuf::from(filename),
        width,
        height,
        resolution,
        text_layer: optional_json(6, text_layer)?,
        annotations: optional_json(7, annotations)?,
        dirty_time: timestamp(8, &dirty_time)?,
        analyse_time: analyse_time.as_deref().map(|t| timestamp(9, t)).transpose()?,
        ocr_time: ocr_time.as_deref().map(|t| timestamp(10, t)).transpose()?,
        saved,
        mean: optional_json(12, mean)?,
        std_dev: optional_json(13, std_dev)?,
    };
    Ok(PageRow { number, page })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(number: u32, name: &str) -> PageRow {
        PageRow {
            number,
            page: Page::new(format!("/tmp/{name}"), 100, 200, Resolution::ppi(300.0)),
        }
    }

    #[test]
    fn pages_survive_save_and_load() {
        let mut store = SessionStore::open_in_memory().expect("open in-memory db");
        let mut first = row(1, "a.png");
        first.page.text_layer = Some(BboxTree::from_text("hello", 100, 200));
        first.page.ocr_time = Some(Utc::now());
        first.page.mean = Some(vec![127.5]);
        first.page.saved = true;
        let second = row(3, "b.png");

        store.save_pages(&[first.clone(), second.clone()]).expect("save");
        let loaded = store.load_pages().expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].number, 1);
        assert_eq!(loaded[0].page.id, first.page.id);
        assert_eq!(loaded[0].page.text_layer, first.page.text_layer);
        assert_eq!(loaded[0].page.mean, Some(vec![127.5]));
        assert!(loaded[0].page.saved);
        assert_eq!(loaded[1].number, 3);
        assert_eq!(loaded[1].page.filename, second.page.filename);
        assert!(loaded[1].page.ocr_time.is_none());
    }

    #[test]
    fn saving_replaces_previous_contents() {
        let mut store = SessionStore::open_in_memory().expect("open in-memory db");
        store.save_pages(&[row(1, "a.png"), row(2, "b.png")]).expect("save");
        let only = row(1, "c.png");
        store.save_pages(std::slice::from_ref(&only)).expect("save again");
        let loaded = store.load_pages().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].page.id, only.page.id);
    }

    #[test]
    fn store_on_disk_reopens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.db");
        let saved = row(1, "a.png");
        {
            let mut store = SessionStore::open(&path).expect("open");
            store.save_pages(std::slice::from_ref(&saved)).expect("save");
        }
        let store = SessionStore::open(&path).expect("reopen");
        assert_eq!(store.load_pages().expect("load")[0].page.id, saved.page.id);
    }
}
