//! Resilient AWS API clients
//!
//! [`ClientFactory`] hands out per-(service, region) clients bound to the
//! detected partition. Each client speaks the Query protocol with a JSON
//! accept header and carries the retry policy: throttling responses, 5xx
//! statuses, and connect/timeout failures are retried with capped
//! exponential backoff; other service rejections surface immediately with
//! their error code. Construction failures (bad region, unavailable
//! service, broken HTTP stack) always propagate.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::credentials::Credentials;
use super::partition::{Partition, PartitionResolver};
use crate::boundary::ScanError;

/// Query API versions for the services the scanner calls most. Services not
/// listed here must pass an explicit `Version` parameter.
const API_VERSIONS: &[(&str, &str)] = &[
    ("autoscaling", "2011-01-01"),
    ("cloudformation", "2010-05-15"),
    ("cloudwatch", "2010-08-01"),
    ("ec2", "2016-11-15"),
    ("elasticloadbalancing", "2015-12-01"),
    ("iam", "2010-05-08"),
    ("rds", "2014-10-31"),
    ("sns", "2010-03-31"),
    ("sqs", "2012-11-05"),
    ("sts", "2011-06-15"),
];

/// Error codes AWS uses for throttling, all retryable.
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "RequestThrottled",
    "SlowDown",
];

/// Error codes that indicate broken credentials, never retryable.
const CREDENTIAL_CODES: &[&str] = &[
    "AuthFailure",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "ExpiredToken",
    "ExpiredTokenException",
    "MissingAuthenticationToken",
    "SignatureDoesNotMatch",
];

/// Retry and timeout policy applied to every client the factory builds.
///
/// Worst case the retry train waits 0.4 + 0.8 + 1.6 + 3.2 s between the five
/// attempts, keeping a dead endpoint from stalling a multi-region scan for
/// minutes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based attempt that just failed).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << (attempt - 1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(u32::try_from(factor).unwrap_or(u32::MAX));
        delay.min(self.max_delay)
    }
}

/// Builds partition-correct, retry-wrapped clients per (service, region).
pub struct ClientFactory {
    resolver: Arc<PartitionResolver>,
    credentials: Credentials,
    policy: RetryPolicy,
    http: reqwest::Client,
    endpoint_override: Option<String>,
    cache: Mutex<HashMap<(String, String), ApiClient>>,
}

impl ClientFactory {
    pub fn new(resolver: Arc<PartitionResolver>, credentials: Credentials) -> Result<Self> {
        Self::with_policy(resolver, credentials, RetryPolicy::default())
    }

    pub fn with_policy(
        resolver: Arc<PartitionResolver>,
        credentials: Credentials,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("stratus/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(policy.connect_timeout)
            .timeout(policy.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            resolver,
            credentials,
            policy,
            http,
            endpoint_override: None,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Route every client at a fixed base URL (tests, LocalStack-style
    /// gateways). The service/region binding is unchanged.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    /// Build (or reuse) the client for a service in a region.
    ///
    /// Fails fast when the service does not exist in the detected partition
    /// or the region belongs to the other partition; those are caller bugs,
    /// not conditions to retry.
    pub async fn get_client(&self, service: &str, region: &str) -> Result<ApiClient> {
        let partition = self.resolver.detect().await;

        if !self.resolver.is_available(service, partition) {
            return Err(ScanError::ServiceUnavailable {
                service: service.to_string(),
                partition: partition.id().to_string(),
            }
            .into());
        }

        if Partition::from_region(region) != partition {
            return Err(ScanError::RegionMismatch {
                region: region.to_string(),
                partition: partition.id().to_string(),
            }
            .into());
        }

        let key = (service.to_string(), region.to_string());
        let mut cache = self.cache.lock().await;
        if let Some(client) = cache.get(&key) {
            return Ok(client.clone());
        }

        let endpoint = match &self.endpoint_override {
            Some(base) => base.clone(),
            None => format!("https://{}.{}.amazonaws.com", service, region),
        };

        tracing::debug!(service, region, %endpoint, "Building API client");

        let client = ApiClient {
            service: key.0.clone(),
            region: key.1.clone(),
            partition,
            endpoint,
            http: self.http.clone(),
            credentials: self.credentials.clone(),
            policy: self.policy.clone(),
        };
        cache.insert(key, client.clone());
        Ok(client)
    }
}

/// A configured API client bound to (service, region, partition).
#[derive(Debug, Clone)]
pub struct ApiClient {
    service: String,
    region: String,
    partition: Partition,
    endpoint: String,
    http: reqwest::Client,
    credentials: Credentials,
    policy: RetryPolicy,
}

impl ApiClient {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Partition-correct ARN for a resource owned by this client's binding.
    pub fn arn_for(&self, resource: &str, account_id: &str) -> String {
        format!(
            "arn:{}:{}:{}:{}:{}",
            self.partition.id(),
            self.service,
            self.region,
            account_id,
            resource
        )
    }

    /// Make one Query-protocol call, retrying transient failures.
    pub async fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<Value> {
        let mut form: Vec<(String, String)> =
            vec![("Action".to_string(), action.to_string())];
        if !params.iter().any(|(k, _)| *k == "Version") {
            if let Some((_, version)) = API_VERSIONS.iter().find(|(s, _)| *s == self.service) {
                form.push(("Version".to_string(), version.to_string()));
            }
        }
        for (key, value) in params {
            form.push((key.to_string(), value.to_string()));
        }

        let mut last_error = String::new();
        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let delay = self.policy.backoff(attempt - 1);
                tracing::debug!(
                    service = %self.service,
                    region = %self.region,
                    action,
                    attempt,
                    "Retrying after {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .http
                .post(&self.endpoint)
                .header(reqwest::header::ACCEPT, "application/json")
                .form(&form);
            if let Some(token) = self.credentials.session_token() {
                request = request.header("x-amz-security-token", token);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    tracing::warn!(
                        service = %self.service,
                        region = %self.region,
                        action,
                        "Network failure: {e}"
                    );
                    last_error = e.to_string();
                    continue;
                }
                Err(e) => return Err(e).context("Failed to send request"),
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                return serde_json::from_str(&body).context("Failed to parse response JSON");
            }

            let (code, message) = extract_error(&body, status);

            if CREDENTIAL_CODES.contains(&code.as_str()) {
                return Err(ScanError::Credential(format!("{}: {}", code, message)).into());
            }

            let retryable = status.as_u16() == 429
                || status.is_server_error()
                || THROTTLING_CODES.contains(&code.as_str());
            if retryable {
                tracing::warn!(
                    service = %self.service,
                    region = %self.region,
                    action,
                    %status,
                    code,
                    "Retryable API error"
                );
                last_error = format!("{}: {}", code, message);
                continue;
            }

            return Err(ScanError::Api {
                service: self.service.clone(),
                code,
                message,
            }
            .into());
        }

        Err(ScanError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last_error,
        }
        .into())
    }
}

/// Pull the error code and message out of an AWS error body.
///
/// Query services answer either `{"Error": {...}}` or a wrapped
/// `{"ErrorResponse": {"Error": {...}}}`; anything unparseable falls back to
/// the HTTP status.
fn extract_error(body: &str, status: reqwest::StatusCode) -> (String, String) {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| {
        v.get("Error")
            .or_else(|| v.pointer("/ErrorResponse/Error"))
            .or_else(|| v.pointer("/Response/Errors/Error"))
    });

    let code = error
        .and_then(|e| e.get("Code"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Http{}", status.as_u16()));
    let message = error
        .and_then(|e| e.get("Message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string());

    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(2), Duration::from_millis(800));
        assert_eq!(policy.backoff(3), Duration::from_millis(1600));
        assert_eq!(policy.backoff(10), Duration::from_secs(10));
    }

    #[test]
    fn extracts_flat_error_body() {
        let body = r#"{"Error":{"Code":"Throttling","Message":"Rate exceeded"},"RequestId":"x"}"#;
        let (code, message) = extract_error(body, reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(code, "Throttling");
        assert_eq!(message, "Rate exceeded");
    }

    #[test]
    fn extracts_wrapped_error_body() {
        let body = r#"{"ErrorResponse":{"Error":{"Code":"AccessDenied","Message":"no"}}}"#;
        let (code, _) = extract_error(body, reqwest::StatusCode::FORBIDDEN);
        assert_eq!(code, "AccessDenied");
    }

    #[test]
    fn unparseable_error_falls_back_to_status() {
        let (code, _) = extract_error("<html>bad gateway</html>", reqwest::StatusCode::BAD_GATEWAY);
        assert_eq!(code, "Http502");
    }

    #[test]
    fn version_table_covers_core_services() {
        for service in ["ec2", "rds", "sts", "iam"] {
            assert!(API_VERSIONS.iter().any(|(s, _)| *s == service));
        }
    }
}
