//! SQLite-backed task source.
//!
//! Reads the desktop app's `tasks` table. Due times are stored as ISO-8601
//! text, so the due filter is a plain string comparison against "now".

use std::path::Path;
use std::sync::Mutex;

use chrono::{Local, NaiveDateTime};
use rusqlite::{Connection, Row, params};

use crate::domain::{Task, TaskId};
use crate::error::{Result, TaskyError};
use crate::source::TaskSource;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Task source over the `tasks` table of a SQLite database.
pub struct SqliteTaskSource {
    db: Mutex<Connection>,
}

impl SqliteTaskSource {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path)?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                due_date TEXT NOT NULL,
                completed BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Insert a task and return its new id. `task.id` is ignored.
    pub fn insert(&self, task: &Task) -> Result<TaskId> {
        let db = self.lock()?;
        db.execute(
            "INSERT INTO tasks (title, description, due_date, completed, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task.title,
                task.description,
                task.due_time.format(ISO_FORMAT).to_string(),
                task.completed,
                Local::now().naive_local().format(ISO_FORMAT).to_string(),
            ],
        )?;
        Ok(TaskId(db.last_insert_rowid()))
    }

    /// Update title, description, due time and completion. Returns whether a row matched.
    pub fn update(&self, task: &Task) -> Result<bool> {
        let db = self.lock()?;
        let changed = db.execute(
            "UPDATE tasks SET title = ?1, description = ?2, due_date = ?3, completed = ?4 WHERE id = ?5",
            params![
                task.title,
                task.description,
                task.due_time.format(ISO_FORMAT).to_string(),
                task.completed,
                task.id.0,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Mark a task completed or not. Returns whether a row matched.
    pub fn set_completed(&self, id: TaskId, completed: bool) -> Result<bool> {
        let db = self.lock()?;
        let changed = db.execute(
            "UPDATE tasks SET completed = ?1 WHERE id = ?2",
            params![completed, id.0],
        )?;
        Ok(changed > 0)
    }

    /// Due tasks relative to an explicit `now`.
    pub fn list_due_at(&self, now: NaiveDateTime) -> Result<Vec<Task>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(
            "SELECT id, title, description, due_date, completed FROM tasks
             WHERE completed = 0 AND replace(due_date, ' ', 'T') <= ?1
             ORDER BY replace(due_date, ' ', 'T') ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![now.format(ISO_FORMAT).to_string()], row_to_raw)?;
        collect_tasks(rows)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| TaskyError::Source("database connection lock poisoned".to_string()))
    }
}

impl TaskSource for SqliteTaskSource {
    fn list_due_tasks(&self) -> Result<Vec<Task>> {
        self.list_due_at(Local::now().naive_local())
    }

    fn list_all_tasks(&self) -> Result<Vec<Task>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(
            "SELECT id, title, description, due_date, completed FROM tasks ORDER BY replace(due_date, ' ', 'T') ASC, id ASC",
        )?;
        let rows = stmt.query_map([], row_to_raw)?;
        collect_tasks(rows)
    }
}

type RawRow = (i64, String, Option<String>, String, bool);

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn collect_tasks(rows: impl Iterator<Item = rusqlite::Result<RawRow>>) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for row in rows {
        let (id, title, description, due_date, completed) = row?;
        tasks.push(Task {
            id: TaskId(id),
            title,
            description: description.unwrap_or_default(),
            due_time: parse_timestamp(&due_date)?,
            completed,
        });
    }
    Ok(tasks)
}

/// Accepts `T`- or space-separated ISO timestamps, with or without fractional seconds.
fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    raw.parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .map_err(|e| TaskyError::Source(format!("invalid due_date '{}': {}", raw, e)))
}
