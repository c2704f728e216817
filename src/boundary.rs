//! Standardized error classification and recovery
//!
//! Every external call an export script makes goes through one of the two
//! [`ErrorBoundary`] adapters. Both delegate to a single classify-and-log
//! routine so the taxonomy lives in exactly one place: credential problems
//! always abort the run, everything else is logged with operation/service/
//! region context and either replaced by a configured default or re-raised.
//!
//! All wrapped operations are read-only describe/list calls, so there is no
//! rollback to perform on failure.

use anyhow::Result;
use std::future::Future;
use thiserror::Error;

/// Error taxonomy for AWS calls made through the client factory.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("missing or invalid credentials: {0}")]
    Credential(String),

    #[error("{service} rejected the call: {code}: {message}")]
    Api {
        service: String,
        code: String,
        message: String,
    },

    #[error("service {service} is not available in partition {partition}")]
    ServiceUnavailable { service: String, partition: String },

    #[error("region {region} does not belong to partition {partition}")]
    RegionMismatch { region: String, partition: String },

    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Recovery-relevant classification of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing/invalid credentials. Fatal, never swallowed.
    Credential,
    /// The service rejected the call with a specific code.
    Client(String),
    /// Connection/timeout failure that did not survive retries in flight.
    Transient,
    /// Anything else, including exhausted retry trains.
    Unknown,
}

/// Classify an error into the recovery taxonomy.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    if let Some(scan_err) = err.downcast_ref::<ScanError>() {
        return match scan_err {
            ScanError::Credential(_) => ErrorClass::Credential,
            ScanError::Api { code, .. } => ErrorClass::Client(code.clone()),
            // A bypassed availability check surfaces as a generic client error.
            ScanError::ServiceUnavailable { .. } => {
                ErrorClass::Client("ServiceUnavailable".to_string())
            }
            ScanError::RegionMismatch { .. } => ErrorClass::Client("InvalidRegion".to_string()),
            ScanError::Transient(_) => ErrorClass::Transient,
            ScanError::RetriesExhausted { .. } => ErrorClass::Unknown,
        };
    }

    if let Some(req_err) = err.downcast_ref::<reqwest::Error>() {
        if req_err.is_connect() || req_err.is_timeout() {
            return ErrorClass::Transient;
        }
    }

    ErrorClass::Unknown
}

/// A labelled recovery policy around one logical operation.
///
/// On success the wrapped call is untouched. On failure the error is
/// classified and logged; credential errors always propagate, other errors
/// propagate only when `reraise` is set, otherwise the configured default
/// takes their place.
#[derive(Debug, Clone)]
pub struct ErrorBoundary {
    operation: String,
    service: Option<String>,
    region: Option<String>,
    reraise: bool,
}

impl ErrorBoundary {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            service: None,
            region: None,
            reraise: false,
        }
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn reraise(mut self, reraise: bool) -> Self {
        self.reraise = reraise;
        self
    }

    /// Wrapper adapter for a synchronous call.
    pub fn run<T>(&self, default: T, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.absorb(f(), default)
    }

    /// Wrapper adapter for an async call.
    pub async fn run_async<T, F>(&self, default: T, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.absorb(fut.await, default)
    }

    /// Scoped adapter: apply the boundary's disposition to a result the
    /// caller already produced.
    pub fn absorb<T>(&self, result: Result<T>, default: T) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => self.dispose(err, default),
        }
    }

    // The single classify-log-recover routine both adapters feed into.
    fn dispose<T>(&self, err: anyhow::Error, default: T) -> Result<T> {
        let class = classify(&err);
        let service = self.service.as_deref().unwrap_or("-");
        let region = self.region.as_deref().unwrap_or("-");

        match &class {
            ErrorClass::Credential => {
                tracing::error!(
                    operation = %self.operation,
                    service,
                    region,
                    "Credential failure, aborting: {err:#}"
                );
                Err(err)
            }
            ErrorClass::Client(code) => {
                tracing::warn!(
                    operation = %self.operation,
                    service,
                    region,
                    code = %code,
                    "Service rejected call: {err:#}"
                );
                self.default_or_raise(err, default)
            }
            ErrorClass::Transient => {
                tracing::warn!(
                    operation = %self.operation,
                    service,
                    region,
                    "Transient failure: {err:#}"
                );
                self.default_or_raise(err, default)
            }
            ErrorClass::Unknown => {
                tracing::error!(
                    operation = %self.operation,
                    service,
                    region,
                    "Unclassified failure: {err:#}"
                );
                self.default_or_raise(err, default)
            }
        }
    }

    fn default_or_raise<T>(&self, err: anyhow::Error, default: T) -> Result<T> {
        if self.reraise {
            Err(err)
        } else {
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: &str) -> anyhow::Error {
        ScanError::Api {
            service: "ec2".to_string(),
            code: code.to_string(),
            message: "denied".to_string(),
        }
        .into()
    }

    #[test]
    fn success_is_referentially_transparent() {
        let boundary = ErrorBoundary::new("describe-instances");
        let result = boundary.run(0, || Ok(42)).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn failure_returns_default_when_not_reraising() {
        let boundary = ErrorBoundary::new("describe-instances")
            .service("ec2")
            .region("us-east-1");
        let result: Vec<String> = boundary
            .run(Vec::new(), || Err(api_error("AccessDenied")))
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn failure_reraises_when_configured() {
        let boundary = ErrorBoundary::new("describe-instances").reraise(true);
        let result: Result<i32> = boundary.run(0, || Err(api_error("AccessDenied")));
        assert!(result.is_err());
    }

    #[test]
    fn credential_errors_always_propagate() {
        let boundary = ErrorBoundary::new("describe-instances").reraise(false);
        let result: Result<i32> = boundary.run(0, || {
            Err(ScanError::Credential("no keys".to_string()).into())
        });
        assert!(result.is_err());
    }

    #[test]
    fn absorb_matches_run() {
        let boundary = ErrorBoundary::new("list-buckets");
        let absorbed = boundary.absorb(Err(api_error("Throttling")), 7).unwrap();
        let wrapped = boundary.run(7, || Err(api_error("Throttling"))).unwrap();
        assert_eq!(absorbed, wrapped);
    }

    #[tokio::test]
    async fn async_adapter_applies_same_policy() {
        let boundary = ErrorBoundary::new("describe-volumes");
        let value = boundary
            .run_async(5, async { Err(api_error("ValidationError")) })
            .await
            .unwrap();
        assert_eq!(value, 5);

        let ok = boundary.run_async(0, async { Ok(9) }).await.unwrap();
        assert_eq!(ok, 9);
    }

    #[test]
    fn classification_taxonomy() {
        assert_eq!(
            classify(&ScanError::Credential("x".to_string()).into()),
            ErrorClass::Credential
        );
        assert_eq!(
            classify(&api_error("Throttling")),
            ErrorClass::Client("Throttling".to_string())
        );
        assert_eq!(
            classify(&ScanError::Transient("reset".to_string()).into()),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(
                &ScanError::RetriesExhausted {
                    attempts: 5,
                    last_error: "timeout".to_string()
                }
                .into()
            ),
            ErrorClass::Unknown
        );
        assert_eq!(
            classify(
                &ScanError::ServiceUnavailable {
                    service: "ce".to_string(),
                    partition: "aws-us-gov".to_string()
                }
                .into()
            ),
            ErrorClass::Client("ServiceUnavailable".to_string())
        );
        assert_eq!(classify(&anyhow::anyhow!("mystery")), ErrorClass::Unknown);
    }
}
