//! AWS API interaction module
//!
//! This module provides the pieces every export script shares when talking to
//! AWS: credential resolution, partition detection, and the resilient client
//! factory that binds a service to a region with retry/backoff policy.
//!
//! # Module Structure
//!
//! - [`credentials`] - Credential resolution from the environment and shared files
//! - [`partition`] - Partition (commercial vs. GovCloud) detection and region metadata
//! - [`client`] - Per-(service, region) API clients with retry/backoff/timeouts
//!
//! # Example
//!
//! ```ignore
//! use stratus::aws::{ClientFactory, Credentials, PartitionResolver, StsIdentity};
//! use std::sync::Arc;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let credentials = Credentials::resolve()?;
//!     let resolver = Arc::new(PartitionResolver::new(Arc::new(StsIdentity::commercial()?)));
//!     let factory = ClientFactory::new(resolver, credentials)?;
//!     let ec2 = factory.get_client("ec2", "us-east-1").await?;
//!     let regions = ec2.call("DescribeRegions", &[]).await?;
//!     let _ = regions;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod credentials;
pub mod partition;

pub use client::{ApiClient, ClientFactory, RetryPolicy};
pub use credentials::Credentials;
pub use partition::{IdentityProvider, Partition, PartitionResolver, StaticIdentity, StsIdentity};
