// Local task store using JSONL + SQLite

use crate::filter::Query;
use crate::jsonl::{self, Entry};
use crate::models::{NewTask, PriorityUpdate, Task, TaskPatch, now_ms};
use chrono::NaiveDate;
use eyre::{Context, Result, eyre};
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CURRENT_VERSION: u32 = 1;
const COLLECTION: &str = "tasks";
const DATE_FORMAT: &str = "%Y-%m-%d";
/// Longest accepted title, in characters
pub const MAX_TITLE_LEN: usize = 1024;
const MAX_OWNER_LEN: usize = 256;

const TASK_COLUMNS: &str = "id, owner_id, title, due_date, is_complete, priority, created_at, updated_at";

/// Persistent task store with SQLite cache and JSONL source of truth
pub struct Store {
    base_path: PathBuf,
    db: Connection,
    last_timestamp: i64,
    observed_mtime: Option<i64>,
}

impl Store {
    /// Open or create a store in the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();

        fs::create_dir_all(&base_path).context("Failed to create store directory")?;

        let db_path = base_path.join("todolist.db");
        let db = Connection::open(&db_path).context("Failed to open SQLite database")?;

        let mut store = Self {
            base_path,
            db,
            last_timestamp: 0,
            observed_mtime: None,
        };

        store.create_schema()?;
        store.write_version()?;

        if store.is_stale()? {
            info!("Database is stale, syncing from JSONL log");
            store.sync()?;
        }

        store.last_timestamp = store
            .db
            .query_row("SELECT COALESCE(MAX(updated_at), 0) FROM tasks", [], |row| row.get(0))?;
        store.observed_mtime = store.log_mtime()?;

        Ok(store)
    }

    /// Path of the JSONL log
    pub fn log_path(&self) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", COLLECTION))
    }

    fn create_schema(&self) -> Result<()> {
        debug!("Creating database schema");

        self.db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                due_date TEXT,
                is_complete INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_owner_created ON tasks(owner_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_owner_due ON tasks(owner_id, due_date);
            CREATE INDEX IF NOT EXISTS idx_tasks_owner_priority ON tasks(owner_id, priority);

            -- Sync metadata for staleness detection
            CREATE TABLE IF NOT EXISTS sync_metadata (
                collection TEXT PRIMARY KEY,
                last_sync_time INTEGER NOT NULL,
                file_mtime INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    fn write_version(&self) -> Result<()> {
        let version_path = self.base_path.join(".version");
        if !version_path.exists() {
            fs::write(version_path, CURRENT_VERSION.to_string())?;
        }
        Ok(())
    }

    /// Check if the cache needs rebuilding from the log
    ///
    /// True when the log was modified after the last recorded sync point,
    /// or when a log exists that has never been synced.
    pub fn is_stale(&self) -> Result<bool> {
        let Some(file_mtime) = self.log_mtime()? else {
            return Ok(false);
        };

        let stored_mtime: Option<i64> = self
            .db
            .query_row(
                "SELECT file_mtime FROM sync_metadata WHERE collection = ?1",
                [COLLECTION],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match stored_mtime {
            None => true,
            Some(mtime) => file_mtime > mtime,
        })
    }

    fn log_mtime(&self) -> Result<Option<i64>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(None);
        }
        let mtime = fs::metadata(&path)?
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Ok(Some(mtime))
    }

    /// True when the log changed since this handle last wrote or synced it
    pub fn has_external_changes(&self) -> Result<bool> {
        Ok(self.log_mtime()? != self.observed_mtime)
    }

    /// Mark the current log state as seen by this handle
    pub fn acknowledge_external_changes(&mut self) -> Result<()> {
        self.observed_mtime = self.log_mtime()?;
        Ok(())
    }

    fn record_sync_point(&mut self) -> Result<()> {
        self.observed_mtime = self.log_mtime()?;
        if let Some(file_mtime) = self.observed_mtime {
            self.db.execute(
                "INSERT OR REPLACE INTO sync_metadata (collection, last_sync_time, file_mtime)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![COLLECTION, now_ms(), file_mtime],
            )?;
        }
        Ok(())
    }

    /// Server-side clock; strictly increasing within this store
    fn next_timestamp(&mut self) -> i64 {
        let ts = now_ms().max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }

    // ========================================================================
    // Task API
    // ========================================================================

    /// Insert a new task, assigning id and timestamps
    pub fn insert(&mut self, new_task: NewTask) -> Result<Task> {
        Self::validate_owner(&new_task.owner_id)?;
        let title = Self::validate_title(&new_task.title)?;

        let now = self.next_timestamp();
        let task = Task {
            id: uuid::Uuid::now_v7().to_string(),
            owner_id: new_task.owner_id,
            title,
            due_date: new_task.due_date,
            is_complete: new_task.is_complete,
            priority: new_task.priority,
            created_at: now,
            updated_at: now,
        };

        let log_path = self.log_path();
        let tx = self.db.transaction()?;
        Self::upsert_tx(&tx, &task)?;
        jsonl::append_entries(&log_path, &[Entry::Live(task.clone())])?;
        tx.commit()?;
        self.record_sync_point()?;

        debug!(id = %task.id, owner = %task.owner_id, "Inserted task");
        Ok(task)
    }

    /// Get a task by id, regardless of owner
    pub fn get(&self, id: &str) -> Result<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
        let task = self
            .db
            .query_row(&sql, [id], Self::read_task_row)
            .optional()?
            .transpose()?;
        Ok(task)
    }

    /// Get a task by id if it belongs to the given owner
    pub fn get_owned(&self, owner_id: &str, id: &str) -> Result<Option<Task>> {
        Ok(self.get(id)?.filter(|t| t.owner_id == owner_id))
    }

    /// Apply a patch to an owned task. Returns `None` if no such task.
    pub fn update(&mut self, owner_id: &str, id: &str, patch: &TaskPatch) -> Result<Option<Task>> {
        let Some(mut task) = self.get_owned(owner_id, id)? else {
            return Ok(None);
        };

        if let Some(title) = &patch.title {
            Self::validate_title(title)?;
        }

        patch.apply(&mut task);
        task.title = task.title.trim().to_string();
        task.updated_at = self.next_timestamp();

        let log_path = self.log_path();
        let tx = self.db.transaction()?;
        Self::upsert_tx(&tx, &task)?;
        jsonl::append_entries(&log_path, &[Entry::Live(task.clone())])?;
        tx.commit()?;
        self.record_sync_point()?;

        debug!(id, owner = owner_id, "Updated task");
        Ok(Some(task))
    }

    /// Delete an owned task. Returns the removed task, or `None` if absent.
    pub fn delete(&mut self, owner_id: &str, id: &str) -> Result<Option<Task>> {
        let Some(task) = self.get_owned(owner_id, id)? else {
            return Ok(None);
        };

        let tombstone = Entry::tombstone(id, self.next_timestamp());

        let log_path = self.log_path();
        let tx = self.db.transaction()?;
        tx.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        jsonl::append_entries(&log_path, &[tombstone])?;
        tx.commit()?;
        self.record_sync_point()?;

        debug!(id, owner = owner_id, "Deleted task");
        Ok(Some(task))
    }

    /// Set priorities for several owned tasks in one transaction.
    ///
    /// Either every update applies or none does. Returns the updated tasks.
    pub fn update_priorities(&mut self, owner_id: &str, updates: &[PriorityUpdate]) -> Result<Vec<Task>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.next_timestamp();
        let log_path = self.log_path();
        let tx = self.db.transaction()?;

        let mut changed = Vec::with_capacity(updates.len());
        for update in updates {
            let affected = tx.execute(
                "UPDATE tasks SET priority = ?1, updated_at = ?2 WHERE id = ?3 AND owner_id = ?4",
                rusqlite::params![update.priority, now, &update.id, owner_id],
            )?;
            if affected != 1 {
                // Dropping tx rolls back the earlier updates
                return Err(eyre!("Task not found: {}", update.id));
            }

            let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
            let task = tx.query_row(&sql, [&update.id], Self::read_task_row)??;
            changed.push(task);
        }

        let entries: Vec<Entry> = changed.iter().cloned().map(Entry::Live).collect();
        jsonl::append_entries(&log_path, &entries)?;
        tx.commit()?;
        self.record_sync_point()?;

        debug!(owner = owner_id, count = changed.len(), "Updated priorities");
        Ok(changed)
    }

    /// List an owner's tasks in the query's order
    pub fn query(&self, query: &Query) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE owner_id = ?1 {}",
            TASK_COLUMNS,
            query.order_clause()
        );

        let mut stmt = self.db.prepare(&sql)?;
        let rows = stmt.query_map([&query.owner_id], Self::read_task_row)?;

        let mut results = Vec::new();
        for row_result in rows {
            results.push(row_result??);
        }
        Ok(results)
    }

    /// Number of tasks across all owners
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self.db.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ========================================================================
    // Helper methods
    // ========================================================================

    fn upsert_tx(tx: &Transaction, task: &Task) -> Result<()> {
        tx.execute(
            "INSERT OR REPLACE INTO tasks (id, owner_id, title, due_date, is_complete, priority, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                &task.id,
                &task.owner_id,
                &task.title,
                task.due_date.map(|d| d.format(DATE_FORMAT).to_string()),
                task.is_complete,
                task.priority,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Decode a row; the outer rusqlite error is for column access, the
    /// inner report for malformed stored dates.
    fn read_task_row(row: &Row) -> rusqlite::Result<Result<Task>> {
        let due_date: Option<String> = row.get(3)?;
        let due_date = match due_date {
            Some(s) => match NaiveDate::parse_from_str(&s, DATE_FORMAT) {
                Ok(d) => Some(d),
                Err(e) => return Ok(Err(eyre!("Invalid due_date {:?}: {}", s, e))),
            },
            None => None,
        };

        Ok(Ok(Task {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            due_date,
            is_complete: row.get(4)?,
            priority: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        }))
    }

    fn validate_owner(owner_id: &str) -> Result<()> {
        if owner_id.trim().is_empty() {
            return Err(eyre!("Owner id cannot be empty"));
        }
        let len = owner_id.chars().count();
        if len > MAX_OWNER_LEN {
            return Err(eyre!("Owner id too long: {} chars (max {})", len, MAX_OWNER_LEN));
        }
        Ok(())
    }

    fn validate_title(title: &str) -> Result<String> {
        let title = title.trim();
        if title.is_empty() {
            return Err(eyre!("Task title cannot be empty or whitespace-only"));
        }
        let len = title.chars().count();
        if len > MAX_TITLE_LEN {
            return Err(eyre!("Task title too long: {} chars (max {})", len, MAX_TITLE_LEN));
        }
        Ok(title.to_string())
    }

    // ========================================================================
    // Sync operations
    // ========================================================================

    /// Rebuild the SQLite cache from the JSONL log. Returns the live task count.
    pub fn sync(&mut self) -> Result<usize> {
        info!("Syncing database from JSONL log");

        let tasks = jsonl::read_live_tasks(&self.log_path())?;

        let tx = self.db.transaction()?;
        tx.execute("DELETE FROM tasks", [])?;
        for task in &tasks {
            Self::upsert_tx(&tx, task)?;
        }
        tx.commit()?;

        if let Some(max_ts) = tasks.iter().map(|t| t.updated_at.max(t.created_at)).max() {
            self.last_timestamp = self.last_timestamp.max(max_ts);
        }
        self.record_sync_point()?;

        info!(count = tasks.len(), "Sync complete");
        Ok(tasks.len())
    }
}
