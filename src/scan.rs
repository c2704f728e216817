//! Checkpointed multi-region scan driver
//!
//! Ties the core together the way every export script uses it: resolve the
//! partition, iterate regions one at a time, wrap each collection call in an
//! [`ErrorBoundary`] so a single failing region is skipped and logged rather
//! than aborting the scan, and persist progress through a [`CheckpointStore`]
//! at a bounded cadence. Saves carry the accumulated records in the
//! checkpoint payload, and the checkpoint is only removed after the export
//! is written, so an interrupt anywhere resumes from the last good snapshot
//! without losing what was already collected.
//!
//! Strictly sequential: one region in flight at a time, no fan-out.

use anyhow::Result;
use serde_json::{json, Value};
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::boundary::ErrorBoundary;
use crate::checkpoint::CheckpointStore;
use crate::export::writer::RecordWriter;
use crate::export::{
    prepare, sanitize, validate, PrepareOptions, Record, SanitizePatterns, DEFAULT_MASK,
};

/// A named, resumable scan over a region list.
pub struct RegionScan {
    operation: String,
    service: String,
    checkpoint_dir: Option<PathBuf>,
}

impl RegionScan {
    pub fn new(operation: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            service: service.into(),
            checkpoint_dir: None,
        }
    }

    /// Keep checkpoints somewhere other than the default data directory.
    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    /// Run the collector once per region, resuming from the last checkpoint.
    ///
    /// Per-region failures are classified and skipped (the collector's
    /// region simply contributes no records); credential failures abort the
    /// whole run. Each save carries the records accumulated so far in the
    /// checkpoint payload, so a resumed run restores them and still exports
    /// the full inventory. A checkpoint whose records cannot be restored
    /// restarts from region zero rather than exporting a partial set.
    /// Re-processing regions collected after the last save is safe because
    /// collectors only make idempotent describe/list calls.
    pub async fn run<F, Fut>(&self, regions: &[String], mut collect: F) -> Result<ScanOutcome>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Vec<Record>>>,
    {
        let mut checkpoint = self.open_checkpoint(regions.len() as u64)?;

        if checkpoint.is_complete() {
            // A finished scan whose export never cleaned up is a stale
            // snapshot; re-collect rather than exporting old data.
            tracing::info!(
                operation = %self.operation,
                "Previous run completed without export cleanup, restarting scan"
            );
            checkpoint.cleanup()?;
            checkpoint = self.open_checkpoint(regions.len() as u64)?;
        }

        let mut resumed_from = checkpoint.completed_count() as usize;
        let mut records: Vec<Record> = Vec::new();

        if resumed_from > 0 {
            match restore_records(checkpoint.payload()) {
                Some(saved) => {
                    tracing::info!(
                        operation = %self.operation,
                        resumed_from,
                        total = regions.len(),
                        restored = saved.len(),
                        "Resuming scan from checkpoint"
                    );
                    records = saved;
                }
                None => {
                    // Without the saved records a resumed run would export a
                    // partial inventory; starting over is the safe choice.
                    tracing::warn!(
                        operation = %self.operation,
                        "Checkpoint carries no restorable records, restarting scan"
                    );
                    checkpoint.cleanup()?;
                    checkpoint = self.open_checkpoint(regions.len() as u64)?;
                    resumed_from = 0;
                }
            }
        }

        let mut regions_failed = 0usize;

        for (index, region) in regions.iter().enumerate().skip(resumed_from) {
            let boundary = ErrorBoundary::new(&self.operation)
                .service(&self.service)
                .region(region);

            let batch = boundary
                .run_async(None, async { collect(region.clone()).await.map(Some) })
                .await?;

            match batch {
                Some(items) => {
                    tracing::debug!(region = %region, count = items.len(), "Collected records");
                    records.extend(items);
                }
                None => regions_failed += 1,
            }

            let completed = (index + 1) as u64;
            if checkpoint.should_save(completed) {
                checkpoint.save(
                    completed,
                    json!({ "last_region": region, "records": &records }),
                )?;
            }
        }

        checkpoint.save(
            regions.len() as u64,
            json!({ "last_region": regions.last(), "records": &records }),
        )?;
        checkpoint.mark_complete()?;

        Ok(ScanOutcome {
            records,
            resumed_from,
            regions_failed,
            checkpoint,
        })
    }

    fn open_checkpoint(&self, total: u64) -> Result<CheckpointStore> {
        match &self.checkpoint_dir {
            Some(dir) => CheckpointStore::open_in(dir, &self.operation, total),
            None => CheckpointStore::open(&self.operation, total),
        }
    }
}

/// Pull the accumulated records back out of a checkpoint payload.
fn restore_records(payload: &Value) -> Option<Vec<Record>> {
    serde_json::from_value(payload.get("records")?.clone()).ok()
}

/// What a completed scan hands to the export step.
pub struct ScanOutcome {
    /// Every collected record, including those restored from the checkpoint
    /// on a resumed run.
    pub records: Vec<Record>,
    /// Region index this run resumed from (0 for a fresh run).
    pub resumed_from: usize,
    /// Regions skipped by the error boundary; gaps are in the logs.
    pub regions_failed: usize,
    checkpoint: CheckpointStore,
}

impl ScanOutcome {
    /// Run the export tail: prepare, sanitize, validate, write, and only
    /// then remove the checkpoint. A failed validation or a dry run leaves
    /// the checkpoint in place and writes nothing.
    pub fn export(
        self,
        request: &ExportRequest,
        writer: &dyn RecordWriter,
        path: &Path,
    ) -> Result<Option<PathBuf>> {
        let prepared = prepare(&self.records, &request.options);
        let cleaned = sanitize(&prepared, &request.patterns, &request.mask);

        let required: Vec<&str> = request
            .required_columns
            .iter()
            .map(String::as_str)
            .collect();
        let validation = validate(&cleaned, &request.resource_type, &required, request.dry_run);

        if !validation.ok {
            tracing::warn!("Export validation failed: {}", validation.message);
            return Ok(None);
        }
        tracing::info!("{}", validation.message);

        if request.dry_run {
            return Ok(None);
        }

        let written = writer.write(&cleaned, &request.sheet, path)?;
        self.checkpoint.cleanup()?;
        Ok(Some(written))
    }
}

/// How to shape and label one export.
pub struct ExportRequest {
    pub resource_type: String,
    pub sheet: String,
    pub required_columns: Vec<String>,
    pub dry_run: bool,
    pub options: PrepareOptions,
    pub patterns: SanitizePatterns,
    pub mask: String,
}

impl ExportRequest {
    pub fn new(resource_type: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        Self {
            sheet: resource_type.clone(),
            resource_type,
            required_columns: Vec::new(),
            dry_run: false,
            options: PrepareOptions::default(),
            patterns: SanitizePatterns::default(),
            mask: DEFAULT_MASK.to_string(),
        }
    }

    pub fn sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = sheet.into();
        self
    }

    pub fn required_columns(mut self, columns: &[&str]) -> Self {
        self.required_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn options(mut self, options: PrepareOptions) -> Self {
        self.options = options;
        self
    }
}
