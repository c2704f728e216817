//! Static cost estimates and optimization advice
//!
//! Pure lookups against a versioned price table embedded at build time
//! (swappable at runtime so price updates don't require code changes), plus
//! rule-based advisory strings over a resource's static attributes. No I/O,
//! no side effects; estimates are rough monthly figures for triage, not
//! billing.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::export::Record;

/// Embedded price table (compiled into the binary).
const PRICE_TABLE_JSON: &str = include_str!("resources/prices.json");

static DEFAULT_TABLE: OnceLock<PriceTable> = OnceLock::new();

/// Instance classes superseded by cheaper current generations.
const PREVIOUS_GENERATIONS: &[&str] = &["t2.", "m3.", "m4.", "c3.", "c4.", "r3.", "r4."];

/// Days an instance can sit stopped before we suggest letting it go.
const STOPPED_DAYS_THRESHOLD: f64 = 30.0;

/// Versioned monthly price data.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceTable {
    pub version: String,
    pub hours_per_month: f64,
    pub multi_az_multiplier: f64,
    pub instance_hourly: HashMap<String, f64>,
    pub storage_gb_month: HashMap<String, f64>,
}

/// Get the embedded price table (parsed on first access).
pub fn default_table() -> &'static PriceTable {
    DEFAULT_TABLE.get_or_init(|| {
        serde_json::from_str(PRICE_TABLE_JSON)
            .unwrap_or_else(|e| panic!("Failed to parse embedded price table: {}", e))
    })
}

/// Deterministic monthly cost estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct CostBreakdown {
    pub compute: f64,
    pub storage: f64,
    pub total: f64,
    /// Gaps in the estimate (unknown instance class or storage type).
    pub notes: Vec<String>,
}

/// Price-table lookups for instance and storage costs.
#[derive(Debug, Clone)]
pub struct CostEstimator {
    table: PriceTable,
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self {
            table: default_table().clone(),
        }
    }
}

impl CostEstimator {
    /// Use a custom price table (newer data, different region multipliers).
    pub fn with_table(table: PriceTable) -> Self {
        Self { table }
    }

    pub fn table_version(&self) -> &str {
        &self.table.version
    }

    /// Monthly estimate for an instance plus its attached storage.
    /// Multi-AZ doubles both compute and storage, matching how AWS bills
    /// standby replicas.
    pub fn estimate_instance(
        &self,
        instance_class: &str,
        storage_gb: f64,
        storage_type: &str,
        multi_az: bool,
    ) -> CostBreakdown {
        let mut notes = Vec::new();
        let multiplier = if multi_az {
            self.table.multi_az_multiplier
        } else {
            1.0
        };

        let compute = match self.table.instance_hourly.get(instance_class) {
            Some(hourly) => hourly * self.table.hours_per_month * multiplier,
            None => {
                notes.push(format!("no price data for instance class {}", instance_class));
                0.0
            }
        };

        let storage_only = self.estimate_storage(storage_gb, storage_type);
        notes.extend(storage_only.notes);
        let storage = storage_only.storage * multiplier;

        CostBreakdown {
            compute,
            storage,
            total: compute + storage,
            notes,
        }
    }

    /// Monthly estimate for storage alone.
    pub fn estimate_storage(&self, storage_gb: f64, storage_type: &str) -> CostBreakdown {
        let mut notes = Vec::new();
        let storage = match self.table.storage_gb_month.get(storage_type) {
            Some(rate) => rate * storage_gb,
            None => {
                notes.push(format!("no price data for storage type {}", storage_type));
                0.0
            }
        };

        CostBreakdown {
            compute: 0.0,
            storage,
            total: storage,
            notes,
        }
    }
}

/// Rule-based advisory strings for one resource, in rule order.
///
/// Expected attributes per resource type (absent attributes skip the rule):
/// - `"ec2"`: `State`, `StoppedDays`, `InstanceType`
/// - `"ebs"`: `State`, `VolumeType`
/// - `"rds"`: `MultiAZ`, `StorageType`, `InstanceClass`
pub fn generate_recommendations(resource_type: &str, state: &Record) -> Vec<String> {
    let mut recommendations = Vec::new();

    match resource_type {
        "ec2" => {
            if str_attr(state, "State") == Some("stopped") {
                if let Some(days) = num_attr(state, "StoppedDays") {
                    if days >= STOPPED_DAYS_THRESHOLD {
                        recommendations.push(format!(
                            "Instance stopped for {} days; consider terminating it (EBS volumes still bill while stopped)",
                            days as i64
                        ));
                    }
                }
            }
            if let Some(class) = str_attr(state, "InstanceType") {
                if PREVIOUS_GENERATIONS.iter().any(|p| class.starts_with(p)) {
                    recommendations.push(format!(
                        "Instance class {} is previous-generation; the current equivalent is cheaper per vCPU",
                        class
                    ));
                }
            }
        }
        "ebs" => {
            if str_attr(state, "State") == Some("available") {
                recommendations.push(
                    "Volume is unattached; snapshot and delete it if no longer needed".to_string(),
                );
            }
            if str_attr(state, "VolumeType") == Some("gp2") {
                recommendations.push(
                    "gp2 volume; migrating to gp3 saves ~20% at the same baseline performance"
                        .to_string(),
                );
            }
        }
        "rds" => {
            if bool_attr(state, "MultiAZ") == Some(false) {
                recommendations.push(
                    "Single-AZ database; enable Multi-AZ before relying on it in production"
                        .to_string(),
                );
            }
            if matches!(str_attr(state, "StorageType"), Some("standard") | Some("magnetic")) {
                recommendations
                    .push("Magnetic database storage; migrate to gp3".to_string());
            }
            if let Some(class) = str_attr(state, "InstanceClass") {
                let generation = class.strip_prefix("db.").unwrap_or(class);
                if PREVIOUS_GENERATIONS.iter().any(|p| generation.starts_with(p)) {
                    recommendations.push(format!(
                        "Database class {} is previous-generation; upgrading reduces cost",
                        class
                    ));
                }
            }
        }
        _ => {}
    }

    recommendations
}

fn str_attr<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

fn num_attr(record: &Record, key: &str) -> Option<f64> {
    record.get(key).and_then(Value::as_f64)
}

fn bool_attr(record: &Record, key: &str) -> Option<bool> {
    record.get(key).and_then(Value::as_bool)
}
