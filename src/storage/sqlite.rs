//! SQLite storage implementation.
//!
//! This module provides a SQLite-based implementation of the `PaperStorage` trait
//! using rusqlite. The database runs in WAL mode so any number of readers can
//! proceed while one writer commits; every operation opens its own connection
//! on the blocking thread pool and commits before returning.
//!
//! List-valued columns (authors, categories, frameworks) are stored as JSON
//! arrays. That encoding never leaves this module.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{PaperFilter, PaperStorage, StorageError, StorageResult};
use crate::models::{
    Benchmark, Chunk, ChunkHit, EmbeddingConfig, NewChunk, NewPaper, NewTechnique, Paper,
    PaperStatus, PaperSummary, Repo, RepoRecord, RepoStatus, StoreStats, Technique,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const EMBEDDING_CONFIG_KEY: &str = "embedding_config";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS papers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    arxiv_id TEXT UNIQUE NOT NULL,
    title TEXT NOT NULL,
    authors TEXT,
    abstract TEXT,
    categories TEXT,
    published TEXT,
    updated TEXT,
    pdf_path TEXT,
    full_text_path TEXT,
    summary TEXT,
    status TEXT NOT NULL DEFAULT 'new',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    paper_id INTEGER NOT NULL REFERENCES papers(id),
    section TEXT,
    chunk_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    token_count INTEGER,
    faiss_id INTEGER,
    embedding_model TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS techniques (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    category TEXT,
    description TEXT,
    first_paper_id INTEGER REFERENCES papers(id),
    status TEXT NOT NULL DEFAULT 'promising',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS benchmarks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    paper_id INTEGER REFERENCES papers(id),
    technique_id INTEGER REFERENCES techniques(id),
    dataset TEXT,
    metric TEXT,
    value REAL,
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS repos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT UNIQUE NOT NULL,
    paper_id INTEGER REFERENCES papers(id),
    stars INTEGER NOT NULL DEFAULT 0,
    last_commit TEXT,
    languages TEXT,
    frameworks TEXT,
    status TEXT NOT NULL DEFAULT 'discovered',
    clone_path TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS paper_techniques (
    paper_id INTEGER REFERENCES papers(id),
    technique_id INTEGER REFERENCES techniques(id),
    PRIMARY KEY (paper_id, technique_id)
);

CREATE INDEX IF NOT EXISTS idx_chunks_paper_id ON chunks(paper_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_paper_chunk ON chunks(paper_id, chunk_index);
CREATE INDEX IF NOT EXISTS idx_chunks_faiss_id ON chunks(faiss_id);
CREATE INDEX IF NOT EXISTS idx_papers_status ON papers(status);
CREATE INDEX IF NOT EXISTS idx_papers_published ON papers(published);
CREATE INDEX IF NOT EXISTS idx_benchmarks_paper_id ON benchmarks(paper_id);
CREATE INDEX IF NOT EXISTS idx_benchmarks_technique_id ON benchmarks(technique_id);
CREATE INDEX IF NOT EXISTS idx_repos_paper_id ON repos(paper_id);
"#;

const PAPER_COLUMNS: &str = "id, arxiv_id, title, authors, abstract, categories, published, \
     updated, pdf_path, full_text_path, summary, status, created_at, updated_at";

const CHUNK_COLUMNS: &str =
    "c.id, c.paper_id, c.section, c.chunk_index, c.text, c.token_count, c.faiss_id, c.embedding_model";

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::QueryError(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

/// SQLite-based paper storage.
///
/// Holds only the database path; connections are opened per operation so the
/// handle is cheap to share between the ingestion pipeline and search engine.
///
/// # Schema
/// - `config`: key/value settings (embedding model identity)
/// - `papers`, `chunks`, `techniques`, `benchmarks`, `repos`
/// - `paper_techniques`: paper ↔ technique join table
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    /// Path to the SQLite database file
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance.
    ///
    /// Nothing touches the disk until [`PaperStorage::initialize`] or the first query.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `op` against a fresh connection on the blocking pool.
    async fn run<T, F>(&self, read_only: bool, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&path, read_only)?;
            op(&mut conn)
        })
        .await
        .map_err(|e| StorageError::Other(format!("Storage task failed: {}", e)))?
    }
}

/// Open a connection in WAL mode with a bounded busy wait.
fn open_connection(path: &Path, read_only: bool) -> StorageResult<Connection> {
    if !read_only {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::ConnectionError(format!(
                        "Cannot create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
    }

    let conn = Connection::open(path)
        .map_err(|e| StorageError::ConnectionError(format!("{}: {}", path.display(), e)))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    if read_only {
        conn.pragma_update(None, "query_only", true)?;
    }
    Ok(conn)
}

fn to_json(list: &[String]) -> StorageResult<String> {
    Ok(serde_json::to_string(list)?)
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

/// Decode a JSON array column. NULL decodes to an empty list.
fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(Vec::new()),
        Some(text) => serde_json::from_str(&text).map_err(|e| conversion_error(idx, e)),
    }
}

fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion_error(idx, e))
}

fn paper_from_row(row: &Row<'_>) -> rusqlite::Result<Paper> {
    Ok(Paper {
        id: row.get(0)?,
        arxiv_id: row.get(1)?,
        title: row.get(2)?,
        authors: json_list(row, 3)?,
        abstract_text: row.get(4)?,
        categories: json_list(row, 5)?,
        published: row.get(6)?,
        updated: row.get(7)?,
        pdf_path: row.get(8)?,
        full_text_path: row.get(9)?,
        summary: row.get(10)?,
        status: parse_column(row, 11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        paper_id: row.get(1)?,
        section: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        chunk_index: row.get(3)?,
        text: row.get(4)?,
        token_count: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        faiss_id: row.get(6)?,
        embedding_model: row.get(7)?,
    })
}

fn technique_from_row(row: &Row<'_>) -> rusqlite::Result<Technique> {
    Ok(Technique {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        description: row.get(3)?,
        first_paper_id: row.get(4)?,
        status: parse_column(row, 5)?,
    })
}

fn benchmark_from_row(row: &Row<'_>) -> rusqlite::Result<Benchmark> {
    Ok(Benchmark {
        paper_id: row.get(0)?,
        technique_id: row.get(1)?,
        dataset: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        metric: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        value: row.get::<_, Option<f64>>(4)?.unwrap_or_default(),
        notes: row.get(5)?,
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn count(conn: &Connection, sql: &str) -> StorageResult<usize> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as usize)
}

#[async_trait]
impl PaperStorage for SqliteStorage {
    async fn initialize(&self) -> StorageResult<()> {
        self.run(false, |conn| {
            conn.execute_batch(SCHEMA_SQL)
                .map_err(|e| StorageError::SchemaError(e.to_string()))?;
            debug!("Schema initialised");
            Ok(())
        })
        .await
    }

    async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()> {
        let value = serde_json::to_string(config)?;
        self.run(false, move |conn| {
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![EMBEDDING_CONFIG_KEY, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        let raw = self
            .run(true, |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM config WHERE key = ?1",
                        params![EMBEDDING_CONFIG_KEY],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;

        raw.map(|value| serde_json::from_str(&value).map_err(StorageError::from))
            .transpose()
    }

    async fn insert_paper(&self, paper: &NewPaper) -> StorageResult<i64> {
        let paper = paper.clone();
        let authors = to_json(&paper.authors)?;
        let categories = to_json(&paper.categories)?;
        self.run(false, move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO papers (arxiv_id, title, authors, abstract, categories,
                                     published, updated, pdf_path, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(arxiv_id) DO NOTHING",
                params![
                    paper.arxiv_id,
                    paper.title,
                    authors,
                    paper.abstract_text,
                    categories,
                    paper.published,
                    paper.updated,
                    paper.pdf_path,
                    paper.status.as_str(),
                ],
            )?;
            let id: i64 = tx.query_row(
                "SELECT id FROM papers WHERE arxiv_id = ?1",
                params![paper.arxiv_id],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn get_paper(&self, arxiv_id: &str) -> StorageResult<Option<Paper>> {
        let arxiv_id = arxiv_id.to_string();
        self.run(true, move |conn| {
            let sql = format!("SELECT {} FROM papers WHERE arxiv_id = ?1", PAPER_COLUMNS);
            Ok(conn
                .query_row(&sql, params![arxiv_id], paper_from_row)
                .optional()?)
        })
        .await
    }

    async fn get_paper_by_id(&self, id: i64) -> StorageResult<Paper> {
        self.run(true, move |conn| {
            let sql = format!("SELECT {} FROM papers WHERE id = ?1", PAPER_COLUMNS);
            conn.query_row(&sql, params![id], paper_from_row)
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("paper id {}", id)))
        })
        .await
    }

    async fn search_papers(&self, filter: &PaperFilter) -> StorageResult<Vec<Paper>> {
        let filter = filter.clone();
        self.run(true, move |conn| {
            let mut conditions: Vec<&str> = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some(text) = &filter.text {
                conditions.push(
                    "(title LIKE ? COLLATE NOCASE OR abstract LIKE ? COLLATE NOCASE)",
                );
                let pattern = format!("%{}%", text);
                values.push(Value::Text(pattern.clone()));
                values.push(Value::Text(pattern));
            }
            if let Some(category) = &filter.category {
                // Matches the quoted element inside the JSON array text
                conditions.push("categories LIKE ?");
                values.push(Value::Text(format!("%\"{}\"%", category)));
            }
            if let Some(status) = filter.status {
                conditions.push("status = ?");
                values.push(Value::Text(status.as_str().to_string()));
            }

            let where_clause = if conditions.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", conditions.join(" AND "))
            };
            let sql = format!(
                "SELECT {} FROM papers {} ORDER BY published DESC, id DESC LIMIT ?",
                PAPER_COLUMNS, where_clause
            );
            values.push(Value::Integer(filter.limit as i64));

            let mut stmt = conn.prepare(&sql)?;
            let papers = stmt
                .query_map(params_from_iter(values), paper_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(papers)
        })
        .await
    }

    async fn papers_with_status(
        &self,
        statuses: &[PaperStatus],
        only_unsummarized: bool,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Paper>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut values: Vec<Value> = statuses
            .iter()
            .map(|s| Value::Text(s.as_str().to_string()))
            .collect();
        // SQLite treats a negative LIMIT as unbounded
        values.push(Value::Integer(limit.map(|l| l as i64).unwrap_or(-1)));
        let summary_clause = if only_unsummarized {
            " AND summary IS NULL"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {} FROM papers WHERE status IN ({}){} ORDER BY id LIMIT ?",
            PAPER_COLUMNS,
            placeholders(statuses.len()),
            summary_clause
        );

        self.run(true, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let papers = stmt
                .query_map(params_from_iter(values), paper_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(papers)
        })
        .await
    }

    async fn set_paper_status(&self, paper_id: i64, status: PaperStatus) -> StorageResult<()> {
        self.run(false, move |conn| {
            let updated = conn.execute(
                "UPDATE papers SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![status.as_str(), paper_id],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound(format!("paper id {}", paper_id)));
            }
            Ok(())
        })
        .await
    }

    async fn set_pdf_path(&self, paper_id: i64, pdf_path: &str) -> StorageResult<()> {
        let pdf_path = pdf_path.to_string();
        self.run(false, move |conn| {
            conn.execute(
                "UPDATE papers SET pdf_path = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![pdf_path, paper_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn store_summary(&self, paper_id: i64, summary: &PaperSummary) -> StorageResult<()> {
        let summary_json = serde_json::to_string(summary)?;
        self.run(false, move |conn| {
            let updated = conn.execute(
                "UPDATE papers SET summary = ?1, status = ?2, updated_at = datetime('now')
                 WHERE id = ?3",
                params![summary_json, PaperStatus::Summarized.as_str(), paper_id],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound(format!("paper id {}", paper_id)));
            }
            Ok(())
        })
        .await
    }

    async fn replace_chunks(&self, paper_id: i64, chunks: &[NewChunk]) -> StorageResult<Vec<i64>> {
        let chunks = chunks.to_vec();
        self.run(false, move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM chunks WHERE paper_id = ?1", params![paper_id])?;
            if removed > 0 {
                debug!(paper_id, removed, "Superseded previous chunks");
            }

            let mut ids = Vec::with_capacity(chunks.len());
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO chunks (paper_id, section, chunk_index, text, token_count)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for chunk in &chunks {
                    stmt.execute(params![
                        paper_id,
                        chunk.section,
                        chunk.chunk_index as i64,
                        chunk.text,
                        chunk.token_count as i64,
                    ])?;
                    ids.push(tx.last_insert_rowid());
                }
            }
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    async fn mark_chunks_indexed(
        &self,
        assignments: &[(i64, i64)],
        embedding_model: &str,
    ) -> StorageResult<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        let assignments = assignments.to_vec();
        let model = embedding_model.to_string();
        self.run(false, move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "UPDATE chunks SET faiss_id = ?1, embedding_model = ?2 WHERE id = ?3",
                )?;
                for (chunk_id, position) in &assignments {
                    stmt.execute(params![position, model, chunk_id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_chunks_for_paper(&self, paper_id: i64) -> StorageResult<Vec<Chunk>> {
        self.run(true, move |conn| {
            let sql = format!(
                "SELECT {} FROM chunks c WHERE c.paper_id = ?1 ORDER BY c.chunk_index",
                CHUNK_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let chunks = stmt
                .query_map(params![paper_id], chunk_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(chunks)
        })
        .await
    }

    async fn get_chunks_by_ids(&self, chunk_ids: &[i64]) -> StorageResult<Vec<ChunkHit>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let chunk_ids = chunk_ids.to_vec();
        self.run(true, move |conn| {
            let sql = format!(
                "SELECT {}, p.arxiv_id, p.title, p.authors
                 FROM chunks c JOIN papers p ON c.paper_id = p.id
                 WHERE c.id IN ({})",
                CHUNK_COLUMNS,
                placeholders(chunk_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let hits = stmt
                .query_map(params_from_iter(chunk_ids.iter()), |row| {
                    Ok(ChunkHit {
                        chunk: chunk_from_row(row)?,
                        arxiv_id: row.get(8)?,
                        paper_title: row.get(9)?,
                        authors: json_list(row, 10)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hits)
        })
        .await
    }

    async fn insert_technique(&self, technique: &NewTechnique) -> StorageResult<i64> {
        let technique = technique.clone();
        self.run(false, move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO techniques (name, category, description, first_paper_id, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO NOTHING",
                params![
                    technique.name,
                    technique.category,
                    technique.description,
                    technique.first_paper_id,
                    technique.status.as_str(),
                ],
            )?;
            let id: i64 = tx.query_row(
                "SELECT id FROM techniques WHERE name = ?1",
                params![technique.name],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn get_technique(&self, name: &str) -> StorageResult<Option<Technique>> {
        let name = name.to_string();
        self.run(true, move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, category, description, first_paper_id, status
                     FROM techniques WHERE name = ?1",
                    params![name],
                    technique_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn link_paper_technique(&self, paper_id: i64, technique_id: i64) -> StorageResult<()> {
        self.run(false, move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO paper_techniques (paper_id, technique_id) VALUES (?1, ?2)",
                params![paper_id, technique_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn promote_techniques_to_sota(&self, technique_ids: &[i64]) -> StorageResult<()> {
        if technique_ids.is_empty() {
            return Ok(());
        }
        let technique_ids = technique_ids.to_vec();
        self.run(false, move |conn| {
            let sql = format!(
                "UPDATE techniques SET status = 'sota' WHERE status != 'sota' AND id IN ({})",
                placeholders(technique_ids.len())
            );
            conn.execute(&sql, params_from_iter(technique_ids.iter()))?;
            Ok(())
        })
        .await
    }

    async fn insert_benchmark(&self, benchmark: &Benchmark) -> StorageResult<i64> {
        let benchmark = benchmark.clone();
        self.run(false, move |conn| {
            conn.execute(
                "INSERT INTO benchmarks (paper_id, technique_id, dataset, metric, value, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    benchmark.paper_id,
                    benchmark.technique_id,
                    benchmark.dataset,
                    benchmark.metric,
                    benchmark.value,
                    benchmark.notes,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn benchmarks_for_paper(&self, paper_id: i64) -> StorageResult<Vec<Benchmark>> {
        self.run(true, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT paper_id, technique_id, dataset, metric, value, notes
                 FROM benchmarks WHERE paper_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![paper_id], benchmark_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn upsert_repo(&self, paper_id: i64, repo: &RepoRecord) -> StorageResult<i64> {
        let repo = repo.clone();
        let frameworks: Vec<String> = repo.framework.iter().cloned().collect();
        let frameworks = to_json(&frameworks)?;
        let status = if repo.is_official {
            RepoStatus::Official
        } else {
            RepoStatus::Discovered
        };
        self.run(false, move |conn| {
            let tx = conn.transaction()?;
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM repos WHERE url = ?1",
                    params![repo.url],
                    |row| row.get(0),
                )
                .optional()?;

            let id = match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE repos SET stars = ?1 WHERE id = ?2 AND stars < ?1",
                        params![repo.stars, id],
                    )?;
                    if status == RepoStatus::Official {
                        tx.execute(
                            "UPDATE repos SET status = 'official' WHERE id = ?1",
                            params![id],
                        )?;
                    }
                    id
                }
                None => {
                    tx.execute(
                        "INSERT INTO repos (url, paper_id, stars, frameworks, status)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![repo.url, paper_id, repo.stars, frameworks, status.as_str()],
                    )?;
                    tx.last_insert_rowid()
                }
            };
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn list_repos(&self, limit: usize) -> StorageResult<Vec<Repo>> {
        self.run(true, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.url, r.paper_id, r.stars, r.frameworks, r.status,
                        p.arxiv_id, p.title
                 FROM repos r JOIN papers p ON r.paper_id = p.id
                 ORDER BY r.stars DESC, r.id
                 LIMIT ?1",
            )?;
            let repos = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(Repo {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        paper_id: row.get(2)?,
                        stars: row.get(3)?,
                        frameworks: json_list(row, 4)?,
                        status: parse_column(row, 5)?,
                        arxiv_id: row.get(6)?,
                        paper_title: row.get(7)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(repos)
        })
        .await
    }

    async fn stats(&self) -> StorageResult<StoreStats> {
        self.run(true, |conn| {
            Ok(StoreStats {
                papers: count(conn, "SELECT count(*) FROM papers")?,
                chunks: count(conn, "SELECT count(*) FROM chunks")?,
                indexed_chunks: count(
                    conn,
                    "SELECT count(*) FROM chunks WHERE faiss_id IS NOT NULL",
                )?,
                techniques: count(conn, "SELECT count(*) FROM techniques")?,
                benchmarks: count(conn, "SELECT count(*) FROM benchmarks")?,
                repos: count(conn, "SELECT count(*) FROM repos")?,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TechniqueStatus;
    use tempfile::TempDir;

    async fn create_test_storage() -> (TempDir, SqliteStorage) {
        let dir = TempDir::new().expect("tempdir");
        let storage = SqliteStorage::new(dir.path().join("test.db"));
        storage.initialize().await.expect("initialize");
        (dir, storage)
    }

    fn create_test_paper(arxiv_id: &str, title: &str) -> NewPaper {
        NewPaper {
            arxiv_id: arxiv_id.to_string(),
            title: title.to_string(),
            authors: vec!["Alice".to_string(), "Bob".to_string()],
            abstract_text: Some("A test abstract.".to_string()),
            categories: vec!["cs.CV".to_string()],
            published: Some("2024-01-01".to_string()),
            updated: None,
            pdf_path: None,
            status: PaperStatus::New,
        }
    }

    fn create_test_chunks(n: usize) -> Vec<NewChunk> {
        (0..n)
            .map(|i| NewChunk {
                section: "Introduction".to_string(),
                chunk_index: i,
                text: format!("chunk number {}", i),
                token_count: 3,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (_dir, storage) = create_test_storage().await;
        storage.initialize().await.unwrap();
        assert_eq!(storage.stats().await.unwrap(), StoreStats::default());
    }

    #[tokio::test]
    async fn test_list_columns_round_trip_in_order() {
        let (_dir, storage) = create_test_storage().await;
        let mut paper = create_test_paper("test.0000", "Test Paper");
        paper.authors = vec!["Zed".to_string(), "Alice".to_string(), "Zed".to_string()];
        storage.insert_paper(&paper).await.unwrap();

        let stored = storage.get_paper("test.0000").await.unwrap().unwrap();
        assert_eq!(stored.authors, vec!["Zed", "Alice", "Zed"]);
        assert_eq!(stored.categories, vec!["cs.CV"]);
        assert_eq!(stored.status, PaperStatus::New);
    }

    #[tokio::test]
    async fn test_insert_paper_is_upsert_by_external_id() {
        let (_dir, storage) = create_test_storage().await;
        let first = storage
            .insert_paper(&create_test_paper("2401.00001", "Original Title"))
            .await
            .unwrap();
        let second = storage
            .insert_paper(&create_test_paper("2401.00001", "Different Title"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(storage.stats().await.unwrap().papers, 1);
        let stored = storage.get_paper_by_id(first).await.unwrap();
        assert_eq!(stored.title, "Original Title");
    }

    #[tokio::test]
    async fn test_get_paper_by_id_not_found() {
        let (_dir, storage) = create_test_storage().await;
        let result = storage.get_paper_by_id(42).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_embedding_config_round_trip() {
        let (_dir, storage) = create_test_storage().await;
        assert!(storage.get_config().await.unwrap().is_none());

        let config = EmbeddingConfig {
            model_name: "test-model".to_string(),
            dimension: 8,
        };
        storage.store_config(&config).await.unwrap();
        assert_eq!(storage.get_config().await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn test_replace_chunks_preserves_order_and_supersedes() {
        let (_dir, storage) = create_test_storage().await;
        let paper_id = storage
            .insert_paper(&create_test_paper("2401.00002", "Chunky"))
            .await
            .unwrap();

        let first_ids = storage
            .replace_chunks(paper_id, &create_test_chunks(3))
            .await
            .unwrap();
        assert_eq!(first_ids.len(), 3);

        let second_ids = storage
            .replace_chunks(paper_id, &create_test_chunks(2))
            .await
            .unwrap();
        assert_eq!(second_ids.len(), 2);

        let chunks = storage.get_chunks_for_paper(paper_id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(chunks.iter().map(|c| c.id).collect::<Vec<_>>(), second_ids);
        assert!(chunks.iter().all(|c| !c.is_indexed()));
    }

    #[tokio::test]
    async fn test_mark_chunks_indexed_and_join_with_paper() {
        let (_dir, storage) = create_test_storage().await;
        let paper_id = storage
            .insert_paper(&create_test_paper("2401.00003", "Joined"))
            .await
            .unwrap();
        let ids = storage
            .replace_chunks(paper_id, &create_test_chunks(2))
            .await
            .unwrap();

        storage
            .mark_chunks_indexed(&[(ids[0], 10), (ids[1], 11)], "test-model")
            .await
            .unwrap();

        let hits = storage
            .get_chunks_by_ids(&[ids[1], 9999, ids[0]])
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        for hit in &hits {
            assert_eq!(hit.arxiv_id, "2401.00003");
            assert_eq!(hit.paper_title, "Joined");
            assert_eq!(hit.authors, vec!["Alice", "Bob"]);
            assert_eq!(hit.chunk.embedding_model.as_deref(), Some("test-model"));
        }
        let positions: Vec<_> = {
            let mut p: Vec<_> = hits.iter().filter_map(|h| h.chunk.faiss_id).collect();
            p.sort();
            p
        };
        assert_eq!(positions, vec![10, 11]);
        assert_eq!(storage.stats().await.unwrap().indexed_chunks, 2);
    }

    #[tokio::test]
    async fn test_technique_upsert_is_case_sensitive() {
        let (_dir, storage) = create_test_storage().await;
        let paper_id = storage
            .insert_paper(&create_test_paper("2401.00004", "Tech"))
            .await
            .unwrap();

        let a = storage
            .insert_technique(&NewTechnique::discovered("NeRF", paper_id))
            .await
            .unwrap();
        let b = storage
            .insert_technique(&NewTechnique::discovered("NeRF", paper_id))
            .await
            .unwrap();
        let c = storage
            .insert_technique(&NewTechnique::discovered("nerf", paper_id))
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(storage.stats().await.unwrap().techniques, 2);

        storage.link_paper_technique(paper_id, a).await.unwrap();
        storage.link_paper_technique(paper_id, a).await.unwrap();

        storage.promote_techniques_to_sota(&[a]).await.unwrap();
        let nerf = storage.get_technique("NeRF").await.unwrap().unwrap();
        assert_eq!(nerf.status, TechniqueStatus::Sota);
        assert_eq!(nerf.first_paper_id, Some(paper_id));
    }

    #[tokio::test]
    async fn test_benchmarks_are_not_unique() {
        let (_dir, storage) = create_test_storage().await;
        let paper_id = storage
            .insert_paper(&create_test_paper("2401.00005", "Bench"))
            .await
            .unwrap();
        let tech = storage
            .insert_technique(&NewTechnique::discovered("3DGS", paper_id))
            .await
            .unwrap();

        for (metric, value) in [("PSNR", 30.5), ("SSIM", 0.95), ("PSNR", 31.0)] {
            storage
                .insert_benchmark(&Benchmark {
                    paper_id,
                    technique_id: tech,
                    dataset: "ScanNet".to_string(),
                    metric: metric.to_string(),
                    value,
                    notes: None,
                })
                .await
                .unwrap();
        }

        let rows = storage.benchmarks_for_paper(paper_id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].value, 31.0);
    }

    #[tokio::test]
    async fn test_repo_stars_only_increase() {
        let (_dir, storage) = create_test_storage().await;
        let paper_id = storage
            .insert_paper(&create_test_paper("2401.00006", "Repo"))
            .await
            .unwrap();
        let record = |stars: i64| RepoRecord {
            url: "https://github.com/org/repo".to_string(),
            stars,
            framework: Some("pytorch".to_string()),
            is_official: false,
        };

        let a = storage.upsert_repo(paper_id, &record(50)).await.unwrap();
        let b = storage.upsert_repo(paper_id, &record(0)).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(storage.list_repos(10).await.unwrap()[0].stars, 50);

        storage.upsert_repo(paper_id, &record(75)).await.unwrap();
        let repos = storage.list_repos(10).await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].stars, 75);
        assert_eq!(repos[0].frameworks, vec!["pytorch"]);
        assert_eq!(repos[0].status, RepoStatus::Discovered);
        assert_eq!(repos[0].arxiv_id, "2401.00006");
    }

    #[tokio::test]
    async fn test_search_papers_filters() {
        let (_dir, storage) = create_test_storage().await;
        storage
            .insert_paper(&create_test_paper("a.1", "Gaussian Splatting Revisited"))
            .await
            .unwrap();
        let mut other = create_test_paper("a.2", "Robot Planning");
        other.categories = vec!["cs.RO".to_string()];
        storage.insert_paper(&other).await.unwrap();

        let by_text = storage
            .search_papers(&PaperFilter {
                text: Some("gaussian".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_text.len(), 1);
        assert_eq!(by_text[0].arxiv_id, "a.1");

        let by_category = storage
            .search_papers(&PaperFilter {
                category: Some("cs.RO".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_category.len(), 1);
        assert_eq!(by_category[0].arxiv_id, "a.2");
    }

    #[tokio::test]
    async fn test_store_summary_and_status_listing() {
        let (_dir, storage) = create_test_storage().await;
        let a = storage
            .insert_paper(&create_test_paper("s.1", "One"))
            .await
            .unwrap();
        let b = storage
            .insert_paper(&create_test_paper("s.2", "Two"))
            .await
            .unwrap();
        storage.set_paper_status(a, PaperStatus::Indexed).await.unwrap();
        storage.set_paper_status(b, PaperStatus::Indexed).await.unwrap();

        let summary = PaperSummary {
            problem: "p".to_string(),
            ..Default::default()
        };
        storage.store_summary(a, &summary).await.unwrap();

        let pending = storage
            .papers_with_status(&[PaperStatus::Indexed], true, None)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b);

        let summarized = storage.get_paper_by_id(a).await.unwrap();
        assert_eq!(summarized.status, PaperStatus::Summarized);
        assert_eq!(summarized.parsed_summary(), Some(summary));
    }

    #[tokio::test]
    async fn test_set_status_on_missing_paper_fails() {
        let (_dir, storage) = create_test_storage().await;
        let result = storage.set_paper_status(7, PaperStatus::Indexed).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
