use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

/// A stored OCR result for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullText {
    pub id: Uuid,
    pub content: String,
    pub name: String,
    pub created_at: String,
}

/// A stored extraction result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionText {
    pub id: Uuid,
    pub full_text_id: Uuid,
    pub section_content: String,
    pub filename: String,
    pub page_number: Option<i64>,
    pub gazette_notice_number: Option<String>,
    pub name_of_holder: Vec<String>,
    pub registration_number: Vec<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewSectionText<'a> {
    pub full_text_id: Uuid,
    pub content: &'a str,
    pub filename: &'a str,
    pub page_no: Option<i64>,
    pub notice_no: Option<&'a str>,
    pub holder_names: &'a [String],
    pub registration_numbers: &'a [String],
    pub location: Option<&'a str>,
}

/// Persistence used by the pipeline.
pub trait DocumentStore {
    fn insert_full_text(&self, id: Uuid, content: &str, name: &str) -> Result<Uuid>;
    fn insert_section_text(&self, section: &NewSectionText<'_>) -> Result<Uuid>;
    fn get_full_text_by_id(&self, id: Uuid) -> Result<Option<FullText>>;
    fn get_sections_by_doc_id(&self, id: Uuid) -> Result<Vec<SectionText>>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database named by `db_url`: a file path,
    /// optionally prefixed with `sqlite://`, or `:memory:`.
    pub fn open(db_url: &str) -> Result<Self> {
        let path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database dir: {}", parent.display()))?;
            }
            Connection::open(path).with_context(|| format!("database error opening {}", path))?
        };
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    #[cfg(test)]
    pub fn full_text_count(&self) -> Result<usize> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM full_texts", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS full_texts (
                id         TEXT PRIMARY KEY,
                content    TEXT NOT NULL,
                name       TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS section_texts (
                id                    TEXT PRIMARY KEY,
                full_text_id          TEXT NOT NULL REFERENCES full_texts(id),
                section_content       TEXT NOT NULL,
                filename              TEXT NOT NULL,
                page_number           INTEGER,
                gazette_notice_number TEXT,
                name_of_holder        TEXT NOT NULL DEFAULT '[]',
                registration_number   TEXT NOT NULL DEFAULT '[]',
                location              TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_section_texts_full_text ON section_texts(full_text_id);
            ",
        ).context("database error creating schema")?;
        Ok(())
    }
}

fn parse_uuid(text: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_list(text: String) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

impl DocumentStore for SqliteStore {
    fn insert_full_text(&self, id: Uuid, content: &str, name: &str) -> Result<Uuid> {
        let created_at = chrono::Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO full_texts (id, content, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), content, name, created_at],
            )
            .context("database error inserting full text")?;
        Ok(id)
    }

    fn insert_section_text(&self, s: &NewSectionText<'_>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                "INSERT INTO section_texts (id, full_text_id, section_content, filename, page_number,
                    gazette_notice_number, name_of_holder, registration_number, location)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id.to_string(),
                    s.full_text_id.to_string(),
                    s.content,
                    s.filename,
                    s.page_no,
                    s.notice_no,
                    serde_json::to_string(s.holder_names)?,
                    serde_json::to_string(s.registration_numbers)?,
                    s.location,
                ],
            )
            .context("database error inserting section text")?;
        Ok(id)
    }

    fn get_full_text_by_id(&self, id: Uuid) -> Result<Option<FullText>> {
        self.conn
            .query_row(
                "SELECT id, content, name, created_at FROM full_texts WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(FullText {
                        id: parse_uuid(row.get(0)?)?,
                        content: row.get(1)?,
                        name: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("database error reading full text")
    }

    fn get_sections_by_doc_id(&self, id: Uuid) -> Result<Vec<SectionText>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, full_text_id, section_content, filename, page_number, gazette_notice_number,
                    name_of_holder, registration_number, location
             FROM section_texts WHERE full_text_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok(SectionText {
                id: parse_uuid(row.get(0)?)?,
                full_text_id: parse_uuid(row.get(1)?)?,
                section_content: row.get(2)?,
                filename: row.get(3)?,
                page_number: row.get(4)?,
                gazette_notice_number: row.get(5)?,
                name_of_holder: parse_list(row.get(6)?)?,
                registration_number: parse_list(row.get(7)?)?,
                location: row.get(8)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("database error reading sections")
    }
}

pub fn parse_doc_id(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text.trim()).with_context(|| format!("invalid document id: {}", text))
}
