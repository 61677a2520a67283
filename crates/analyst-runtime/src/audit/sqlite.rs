//! SQLite-backed audit store.
//!
//! ## Architecture
//!
//! One background thread owns the connection and applies commands in
//! arrival order. Async callers send a command over a channel and await the
//! reply, so writes never block the runtime and ids come straight from
//! `AUTOINCREMENT` without any cross-connection coordination.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::{mpsc, oneshot};

use super::{AuditError, AuditRecord, AuditStore, AuditSummary, NewAuditRecord};

/// Pending commands before senders wait.
const COMMAND_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, AuditError>>;

enum Command {
    Record {
        record: NewAuditRecord,
        reply: Reply<i64>,
    },
    Recent {
        limit: usize,
        reply: Reply<Vec<AuditSummary>>,
    },
    Get {
        id: i64,
        reply: Reply<Option<AuditRecord>>,
    },
    Ping {
        reply: Reply<()>,
    },
}

/// Handle to the audit database. Cheap to clone; all clones share one writer.
#[derive(Debug, Clone)]
pub struct SqliteAuditStore {
    commands: mpsc::Sender<Command>,
    path: Option<PathBuf>,
}

impl SqliteAuditStore {
    /// Open (creating if missing) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::start(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::start(Connection::open_in_memory()?, None)
    }

    /// Database file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn start(conn: Connection, path: Option<PathBuf>) -> Result<Self, AuditError> {
        init_schema(&conn)?;

        let (commands, mut inbox) = mpsc::channel::<Command>(COMMAND_BUFFER);

        std::thread::Builder::new()
            .name("analyst-audit".to_string())
            .spawn(move || {
                // Exits once every handle is dropped
                while let Some(command) = inbox.blocking_recv() {
                    handle(&conn, command);
                }
                tracing::debug!("Audit writer stopped");
            })
            .map_err(|e| AuditError::Storage(format!("failed to start audit writer: {}", e)))?;

        tracing::debug!(path = ?path, "Audit store opened");
        Ok(Self { commands, path })
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, AuditError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| AuditError::Unavailable)?;
        response.await.map_err(|_| AuditError::Unavailable)?
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn record(&self, record: NewAuditRecord) -> Result<i64, AuditError> {
        self.call(|reply| Command::Record { record, reply }).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditSummary>, AuditError> {
        self.call(|reply| Command::Recent { limit, reply }).await
    }

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>, AuditError> {
        self.call(|reply| Command::Get { id, reply }).await
    }

    async fn ping(&self) -> Result<(), AuditError> {
        self.call(|reply| Command::Ping { reply }).await
    }
}

fn init_schema(conn: &Connection) -> Result<(), AuditError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            model TEXT NOT NULL,
            output_format TEXT NOT NULL,
            input_preview TEXT NOT NULL,
            raw_output TEXT NOT NULL,
            parse_status TEXT NOT NULL,
            prompt_chars INTEGER NOT NULL,
            error_detail TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log(created_at);",
    )?;
    Ok(())
}

fn handle(conn: &Connection, command: Command) {
    // A dropped reply receiver means the caller gave up; nothing to do
    match command {
        Command::Record { record, reply } => {
            let _ = reply.send(insert(conn, record));
        }
        Command::Recent { limit, reply } => {
            let _ = reply.send(recent(conn, limit));
        }
        Command::Get { id, reply } => {
            let _ = reply.send(get(conn, id));
        }
        Command::Ping { reply } => {
            let result = conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(AuditError::from);
            let _ = reply.send(result);
        }
    }
}

fn insert(conn: &Connection, record: NewAuditRecord) -> Result<i64, AuditError> {
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    conn.execute(
        "INSERT INTO audit_log
            (created_at, model, output_format, input_preview, raw_output, parse_status, prompt_chars, error_detail)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            created_at,
            record.model,
            record.output_format.as_str(),
            record.input_preview,
            record.raw_output,
            record.parse_status.as_str(),
            record.prompt_chars as i64,
            record.error_detail,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn recent(conn: &Connection, limit: usize) -> Result<Vec<AuditSummary>, AuditError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, created_at, model, output_format, input_preview
         FROM audit_log ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(AuditSummary {
            id: row.get(0)?,
            created_at: timestamp_column(row, 1)?,
            model: row.get(2)?,
            output_format: text_column(row, 3)?,
            input_preview: row.get(4)?,
        })
    })?;
    let summaries = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(summaries)
}

fn get(conn: &Connection, id: i64) -> Result<Option<AuditRecord>, AuditError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, created_at, model, output_format, input_preview, raw_output,
                parse_status, prompt_chars, error_detail
         FROM audit_log WHERE id = ?1",
    )?;
    let record = stmt
        .query_row(params![id], |row| {
            Ok(AuditRecord {
                id: row.get(0)?,
                created_at: timestamp_column(row, 1)?,
                model: row.get(2)?,
                output_format: text_column(row, 3)?,
                input_preview: row.get(4)?,
                raw_output: row.get(5)?,
                parse_status: text_column(row, 6)?,
                prompt_chars: row.get::<_, i64>(7)? as usize,
                error_detail: row.get(8)?,
            })
        })
        .optional()?;
    Ok(record)
}

/// Decode a TEXT column through `FromStr`.
fn text_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
