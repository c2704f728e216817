//! Resumable progress checkpoints for long multi-region scans
//!
//! One JSON snapshot file per operation name. Saves go through a temp file
//! in the same directory followed by an atomic rename, so an interrupt can
//! never leave a partial checkpoint behind; the next run resumes from the
//! last good snapshot. A corrupt or unreadable file loads as a fresh start
//! rather than failing, because losing a checkpoint only costs re-running
//! idempotent describe calls.
//!
//! Concurrent writers sharing one operation name are undefined: the store
//! assumes a single owning process per name (last write wins).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default: save at most once per this many completed items...
const SAVE_EVERY_ITEMS: u64 = 25;
/// ...unless this much time has passed since the last save.
const SAVE_INTERVAL: Duration = Duration::from_secs(30);

/// Persisted checkpoint snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Snapshot {
    #[serde(default)]
    operation: String,
    #[serde(default)]
    total_items: u64,
    #[serde(default)]
    completed_index: u64,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    complete: bool,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Persists and resumes progress for one named long-running operation.
pub struct CheckpointStore {
    name: String,
    path: PathBuf,
    snapshot: Snapshot,
    last_saved: Option<Instant>,
    last_saved_index: u64,
    save_every_items: u64,
    save_interval: Duration,
}

impl CheckpointStore {
    /// Open (or start) the checkpoint for an operation in the default
    /// checkpoint directory.
    pub fn open(operation_name: &str, total_items: u64) -> Result<Self> {
        Self::open_in(&default_dir(), operation_name, total_items)
    }

    /// Open (or start) the checkpoint for an operation in a specific
    /// directory.
    pub fn open_in(dir: &Path, operation_name: &str, total_items: u64) -> Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| {
            format!("Failed to create checkpoint directory {}", dir.display())
        })?;
        let path = dir.join(format!("{}.json", sanitize_name(operation_name)));

        let snapshot = match std::fs::read_to_string(&path) {
            // Corrupt content resumes from scratch, never fatal.
            Ok(content) => match serde_json::from_str::<Snapshot>(&content) {
                Ok(snapshot) => {
                    tracing::info!(
                        operation = operation_name,
                        completed = snapshot.completed_index,
                        complete = snapshot.complete,
                        "Loaded existing checkpoint"
                    );
                    snapshot
                }
                Err(e) => {
                    tracing::warn!(
                        operation = operation_name,
                        "Checkpoint file unreadable ({e}), starting over"
                    );
                    Snapshot::default()
                }
            },
            Err(_) => Snapshot::default(),
        };

        let last_saved_index = snapshot.completed_index;
        Ok(Self {
            name: operation_name.to_string(),
            path,
            snapshot: Snapshot {
                operation: operation_name.to_string(),
                total_items,
                ..snapshot
            },
            last_saved: None,
            last_saved_index,
            save_every_items: SAVE_EVERY_ITEMS,
            save_interval: SAVE_INTERVAL,
        })
    }

    /// Override the default save cadence (item count and elapsed interval).
    pub fn with_cadence(mut self, every_items: u64, interval: Duration) -> Self {
        self.save_every_items = every_items;
        self.save_interval = interval;
        self
    }

    /// True iff a prior run marked this operation complete.
    pub fn is_complete(&self) -> bool {
        self.snapshot.complete
    }

    /// Index to resume from; 0 when nothing was persisted.
    pub fn completed_count(&self) -> u64 {
        self.snapshot.completed_index
    }

    /// Resumption payload stored by the last save.
    pub fn payload(&self) -> &Value {
        &self.snapshot.payload
    }

    pub fn total_items(&self) -> u64 {
        self.snapshot.total_items
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether enough progress or time has accumulated to justify the I/O of
    /// another save. Callers use this to avoid writing per item.
    pub fn should_save(&self, current_index: u64) -> bool {
        if current_index <= self.last_saved_index {
            return false;
        }
        if current_index - self.last_saved_index >= self.save_every_items {
            return true;
        }
        match self.last_saved {
            Some(at) => at.elapsed() >= self.save_interval,
            // Nothing saved yet this run: take the first opportunity.
            None => true,
        }
    }

    /// Persist progress atomically. The completed index never decreases
    /// within a run; a lower index is clamped and logged.
    pub fn save(&mut self, current_index: u64, payload: Value) -> Result<()> {
        if current_index < self.snapshot.completed_index {
            tracing::warn!(
                operation = %self.name,
                current_index,
                persisted = self.snapshot.completed_index,
                "Checkpoint index went backwards, keeping persisted value"
            );
        }
        self.snapshot.completed_index = self.snapshot.completed_index.max(current_index);
        self.snapshot.payload = payload;
        self.snapshot.updated_at = Some(Utc::now());
        self.persist()?;
        self.last_saved = Some(Instant::now());
        self.last_saved_index = self.snapshot.completed_index;
        Ok(())
    }

    /// Flip the persisted state to complete. Idempotent; keeps the file so a
    /// restart before export cleanup still sees a finished scan.
    pub fn mark_complete(&mut self) -> Result<()> {
        if self.snapshot.complete {
            return Ok(());
        }
        self.snapshot.complete = true;
        self.snapshot.updated_at = Some(Utc::now());
        self.persist()
    }

    /// Remove the checkpoint file. Called after a successful export; a file
    /// already gone is fine.
    pub fn cleanup(self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to remove checkpoint {}", self.path.display())
            }),
        }
    }

    // Write-to-temp-then-rename in the checkpoint directory, so the rename
    // stays on one filesystem and replaces the file atomically.
    fn persist(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .context("Checkpoint path has no parent directory")?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .context("Failed to create checkpoint temp file")?;
        let content = serde_json::to_string_pretty(&self.snapshot)?;
        tmp.write_all(content.as_bytes())
            .context("Failed to write checkpoint")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace checkpoint {}", self.path.display()))?;
        Ok(())
    }
}

/// Default checkpoint directory, shared process-wide and keyed by operation
/// name inside it.
pub fn default_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("stratus").join("checkpoints");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".stratus").join("checkpoints");
    }
    PathBuf::from("checkpoints")
}

/// Make an operation name safe to use as a file name.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => c,
            _ => '_',
        })
        .collect()
}
