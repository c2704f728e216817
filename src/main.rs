use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use stratus::aws::{ClientFactory, Credentials, PartitionResolver, StsIdentity};
use stratus::config::ScanConfig;
use stratus::export::writer::{export_filename, output_dir, CsvWriter};
use stratus::export::Record;
use stratus::scan::{ExportRequest, RegionScan};

/// Multi-region AWS inventory export
#[derive(Parser, Debug)]
#[command(name = "stratus", version = stratus::VERSION, about, long_about = None)]
struct Args {
    /// Service to scan (Query-protocol services: ec2, rds, ...)
    #[arg(short, long, default_value = "ec2")]
    service: String,

    /// Describe/list action to call per region
    #[arg(short, long, default_value = "DescribeRegions")]
    action: String,

    /// Dot path to the item list inside the response JSON
    #[arg(long, default_value = "DescribeRegionsResponse.regionInfo.item")]
    items_path: String,

    /// Resource label used in the export filename and sheet name
    #[arg(long)]
    resource: Option<String>,

    /// Comma-separated region list (defaults to the partition's regions)
    #[arg(short, long)]
    regions: Option<String>,

    /// Path to the scan configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Account name used in the export filename
    #[arg(long, default_value = "UNKNOWN-ACCOUNT")]
    account_name: String,

    /// Directory the output/ folder is created under
    #[arg(short, long, default_value = ".")]
    output_root: PathBuf,

    /// Checkpoint directory override
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Validate and report without writing the export
    #[arg(long)]
    dry_run: bool,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn setup_logging(log_file: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stratus=info"));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .expect("Failed to open log file");
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = setup_logging(args.log_file.as_ref());

    let config = match &args.config {
        Some(path) => ScanConfig::load(path),
        None => ScanConfig::default(),
    };

    if !config.service_enabled(&args.service) {
        anyhow::bail!("Service '{}' is disabled in the configuration", args.service);
    }

    // Credential problems stop everything before any region is touched.
    let credentials = Credentials::resolve().context("No usable AWS credentials")?;

    let identity = StsIdentity::commercial()?.with_credentials(&credentials);
    let mut resolver = PartitionResolver::new(Arc::new(identity));
    let region_override = args
        .regions
        .as_ref()
        .map(|list| {
            list.split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect::<Vec<_>>()
        })
        .or_else(|| config.default_regions.clone());
    if let Some(regions) = region_override {
        resolver = resolver.with_region_override(regions);
    }
    let resolver = Arc::new(resolver);

    let partition = resolver.detect().await;
    let regions = resolver.regions().await;
    tracing::info!(
        "Environment: {} | scanning {} region(s)",
        partition.display_name(),
        regions.len()
    );

    let factory = ClientFactory::new(resolver.clone(), credentials)?;

    let resource = args.resource.clone().unwrap_or_else(|| args.service.clone());
    let operation = format!("{}-{}", args.service, args.action);
    let mut scan = RegionScan::new(&operation, &args.service);
    if let Some(dir) = &args.checkpoint_dir {
        scan = scan.checkpoint_dir(dir);
    }

    let service = args.service.clone();
    let action = args.action.clone();
    let items_path = args.items_path.clone();
    let factory_ref = &factory;

    let outcome = scan
        .run(&regions, |region| {
            let service = service.clone();
            let action = action.clone();
            let items_path = items_path.clone();
            async move {
                let client = factory_ref.get_client(&service, &region).await?;
                let response = client.call(&action, &[]).await?;
                Ok(to_records(&response, &items_path, &region))
            }
        })
        .await?;

    tracing::info!(
        records = outcome.records.len(),
        resumed_from = outcome.resumed_from,
        regions_failed = outcome.regions_failed,
        "Scan finished"
    );

    let filename = export_filename(&args.account_name, &resource, None, "csv", None);
    let path = output_dir(&args.output_root)?.join(filename);

    let request = ExportRequest::new(&resource)
        .sheet(&resource)
        .dry_run(args.dry_run);

    match outcome.export(&request, &CsvWriter, &path)? {
        Some(written) => println!("Data successfully exported to: {}", written.display()),
        None => println!("No export written (dry run or validation failure)"),
    }

    Ok(())
}

/// Pull the item list out of a response and flatten each item to a row,
/// tagging every row with its region.
fn to_records(response: &Value, items_path: &str, region: &str) -> Vec<Record> {
    extract_items(response, items_path)
        .into_iter()
        .map(|item| {
            let mut record = match item {
                Value::Object(map) => map,
                other => {
                    let mut map = Record::new();
                    map.insert("Value".to_string(), other);
                    map
                }
            };
            record.insert("Region".to_string(), Value::String(region.to_string()));
            record
        })
        .collect()
}

/// Walk a dot-notation path into the response and return the array there.
fn extract_items(response: &Value, path: &str) -> Vec<Value> {
    if path.is_empty() {
        return response.as_array().cloned().unwrap_or_default();
    }

    let mut current = response;
    for part in path.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return vec![],
        };
    }

    match current {
        Value::Array(items) => items.clone(),
        // Some responses hold a single object where a list is expected.
        Value::Object(_) => vec![current.clone()],
        _ => vec![],
    }
}
