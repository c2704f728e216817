//! Partition detection and region metadata
//!
//! AWS deploys into isolated partitions (commercial, GovCloud) with distinct
//! ARN prefixes, region sets, and service coverage. Endpoints, ARNs, and
//! region iteration all key off the partition, so a [`PartitionResolver`]
//! resolves it once from the caller's identity and caches it for its
//! lifetime. A lookup failure falls back to the commercial partition rather
//! than aborting a scan before it starts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::credentials::Credentials;

/// Marker present in every GovCloud ARN.
pub const GOVCLOUD_ARN_MARKER: &str = ":aws-us-gov:";

/// STS API version for GetCallerIdentity.
const STS_API_VERSION: &str = "2011-06-15";

/// Default regions scanned in the commercial partition, in scan order.
const COMMERCIAL_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "eu-west-1",
    "eu-west-2",
    "eu-central-1",
    "eu-north-1",
    "ap-south-1",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "sa-east-1",
];

/// All regions that exist in the GovCloud partition.
const GOVCLOUD_REGIONS: &[&str] = &["us-gov-west-1", "us-gov-east-1"];

/// Billing and global-edge services AWS does not offer under GovCloud.
const GOVCLOUD_UNAVAILABLE: &[&str] = &[
    "ce",
    "cur",
    "billingconductor",
    "lightsail",
    "amplify",
    "apprunner",
];

/// An AWS deployment partition.
///
/// `#[non_exhaustive]` leaves room for other realms (China, ISO) without a
/// breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Partition {
    Commercial,
    GovCloud,
}

impl Partition {
    /// The partition identifier used as the ARN prefix (`arn:<id>:...`).
    pub fn id(self) -> &'static str {
        match self {
            Partition::Commercial => "aws",
            Partition::GovCloud => "aws-us-gov",
        }
    }

    /// Human-readable name for banners and logs.
    pub fn display_name(self) -> &'static str {
        match self {
            Partition::Commercial => "AWS Commercial",
            Partition::GovCloud => "AWS GovCloud (US)",
        }
    }

    /// Ordered default region list for this partition.
    pub fn default_regions(self) -> &'static [&'static str] {
        match self {
            Partition::Commercial => COMMERCIAL_REGIONS,
            Partition::GovCloud => GOVCLOUD_REGIONS,
        }
    }

    /// Classify a partition from an identity ARN.
    pub fn from_arn(arn: &str) -> Self {
        if arn.contains(GOVCLOUD_ARN_MARKER) {
            Partition::GovCloud
        } else {
            Partition::Commercial
        }
    }

    /// Classify a partition from a region name.
    pub fn from_region(region: &str) -> Self {
        if region.starts_with("us-gov-") {
            Partition::GovCloud
        } else {
            Partition::Commercial
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Source of the caller's identity ARN.
///
/// Kept as a trait so tests (and configs that pin the partition) can supply
/// identities without touching the network.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn caller_arn(&self) -> Result<String>;
}

/// Identity provider backed by STS `GetCallerIdentity`.
pub struct StsIdentity {
    http: reqwest::Client,
    endpoint: String,
    session_token: Option<String>,
}

impl StsIdentity {
    /// Create a provider against a specific STS endpoint.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create STS HTTP client")?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            session_token: None,
        })
    }

    /// Create a provider against the commercial global STS endpoint.
    pub fn commercial() -> Result<Self> {
        Self::new("https://sts.amazonaws.com")
    }

    /// Forward the session token header on identity calls.
    pub fn with_credentials(mut self, credentials: &Credentials) -> Self {
        self.session_token = credentials.session_token().map(str::to_string);
        self
    }
}

#[async_trait]
impl IdentityProvider for StsIdentity {
    async fn caller_arn(&self) -> Result<String> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("Action", "GetCallerIdentity"), ("Version", STS_API_VERSION)]);

        if let Some(token) = &self.session_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request
            .send()
            .await
            .context("Failed to reach STS endpoint")?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse STS response")?;

        if !status.is_success() {
            return Err(anyhow::anyhow!("GetCallerIdentity failed: {}", status));
        }

        body.pointer("/GetCallerIdentityResponse/GetCallerIdentityResult/Arn")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .context("STS response did not contain a caller ARN")
    }
}

/// Fixed identity, for tests and configurations that pin the partition.
pub struct StaticIdentity(pub String);

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn caller_arn(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Resolves and caches the deployment partition for one scan context.
///
/// Explicitly constructed (no process globals) so one test process can hold
/// resolvers for both partitions side by side.
pub struct PartitionResolver {
    identity: Arc<dyn IdentityProvider>,
    region_override: Option<Vec<String>>,
    cached: RwLock<Option<Partition>>,
}

impl PartitionResolver {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            identity,
            region_override: None,
            cached: RwLock::new(None),
        }
    }

    /// Use a configured region list instead of the partition defaults.
    pub fn with_region_override(mut self, regions: Vec<String>) -> Self {
        self.region_override = Some(regions);
        self
    }

    /// Detect the partition from the caller's identity ARN.
    ///
    /// The identity provider is consulted at most once; the result is cached
    /// for this resolver's lifetime. A failed lookup resolves to the
    /// commercial partition so a scan can still start with ambient
    /// region configuration.
    pub async fn detect(&self) -> Partition {
        {
            let cache = self.cached.read().await;
            if let Some(partition) = *cache {
                return partition;
            }
        }

        let resolved = match self.identity.caller_arn().await {
            Ok(arn) => {
                let partition = Partition::from_arn(&arn);
                tracing::info!("Detected partition {} from caller identity", partition);
                partition
            }
            Err(e) => {
                tracing::warn!(
                    "Caller identity lookup failed ({e:#}), assuming commercial partition"
                );
                Partition::Commercial
            }
        };

        let mut cache = self.cached.write().await;
        *cache.get_or_insert(resolved)
    }

    /// Regions to scan: the configured override if present, else the
    /// partition's default list.
    pub fn regions_for(&self, partition: Partition) -> Vec<String> {
        if let Some(regions) = &self.region_override {
            return regions.clone();
        }
        partition
            .default_regions()
            .iter()
            .map(|r| r.to_string())
            .collect()
    }

    /// Detect the partition and return its scan regions.
    pub async fn regions(&self) -> Vec<String> {
        let partition = self.detect().await;
        self.regions_for(partition)
    }

    /// Whether a service can be called at all in a partition.
    pub fn is_available(&self, service: &str, partition: Partition) -> bool {
        match partition {
            Partition::GovCloud => !GOVCLOUD_UNAVAILABLE.contains(&service),
            _ => true,
        }
    }

    /// Format a partition-correct ARN.
    pub fn build_arn(
        &self,
        service: &str,
        resource: &str,
        region: &str,
        account_id: &str,
        partition: Partition,
    ) -> String {
        format!(
            "arn:{}:{}:{}:{}:{}",
            partition.id(),
            service,
            region,
            account_id,
            resource
        )
    }
}
