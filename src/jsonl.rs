// JSONL append log for tasks

use crate::models::Task;
use eyre::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{info, warn};

/// One line of the log: a full task snapshot or a deletion marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    Tombstone(Tombstone),
    Live(Task),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: String,
    pub deleted: bool,
    pub updated_at: i64,
}

impl Entry {
    pub fn tombstone(id: &str, updated_at: i64) -> Self {
        Entry::Tombstone(Tombstone {
            id: id.to_string(),
            deleted: true,
            updated_at,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Entry::Tombstone(t) => &t.id,
            Entry::Live(t) => &t.id,
        }
    }

    pub fn updated_at(&self) -> i64 {
        match self {
            Entry::Tombstone(t) => t.updated_at,
            Entry::Live(t) => t.updated_at,
        }
    }
}

/// Append entries to a JSONL file under an exclusive lock.
///
/// All entries go out in a single write so a batch lands contiguously.
pub fn append_entries(path: &Path, entries: &[Entry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open JSONL file for appending")?;

    file.lock_exclusive().context("Failed to acquire file lock")?;

    let mut buf = String::new();
    for entry in entries {
        buf.push_str(&serde_json::to_string(entry).context("Failed to serialize log entry")?);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())?;
    file.sync_all()?; // Ensure data is flushed to disk

    // Lock is released when file is dropped
    Ok(())
}

/// Read the log, returning the latest entry per task id.
///
/// The entry with the highest `updated_at` wins; on equal timestamps the
/// later line wins. Unreadable or malformed lines are skipped.
pub fn read_latest(path: &Path) -> Result<HashMap<String, Entry>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let file = File::open(path).context("Failed to open JSONL file")?;
    let reader = BufReader::new(file);
    let mut entries: HashMap<String, Entry> = HashMap::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!(
                    file = ?path,
                    line = line_num + 1,
                    error = ?e,
                    "Failed to read line, skipping"
                );
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let entry: Entry = match serde_json::from_str(&line) {
            Ok(e) => e,
            Err(e) => {
                warn!(
                    file = ?path,
                    line = line_num + 1,
                    error = ?e,
                    "Failed to parse JSON, skipping"
                );
                continue;
            }
        };

        match entries.get(entry.id()) {
            Some(existing) if existing.updated_at() > entry.updated_at() => {}
            _ => {
                entries.insert(entry.id().to_string(), entry);
            }
        }
    }

    info!(file = ?path, count = entries.len(), "Loaded latest entries from JSONL");

    Ok(entries)
}

/// Live tasks from the log, tombstoned ids removed
pub fn read_live_tasks(path: &Path) -> Result<Vec<Task>> {
    Ok(read_latest(path)?
        .into_values()
        .filter_map(|entry| match entry {
            Entry::Live(task) => Some(task),
            Entry::Tombstone(_) => None,
        })
        .collect())
}
