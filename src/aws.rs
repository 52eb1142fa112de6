//! AWS client configuration and SDK error classification.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use tracing::debug;

use crate::error::RemoteError;

/// Service error codes that indicate throttling or a temporary outage.
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "SlowDown",
    "RequestTimeout",
    "RequestTimeoutException",
    "InternalError",
    "InternalFailure",
    "ServiceUnavailable",
];

/// Region and profile used to build the shared SDK configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsClientConfig {
    /// Region override; the default provider chain applies when unset.
    pub region: Option<String>,
    /// Named profile from the shared config files.
    pub profile: Option<String>,
}

impl AwsClientConfig {
    /// Creates a client configuration.
    #[must_use]
    pub const fn new(region: Option<String>, profile: Option<String>) -> Self {
        Self { region, profile }
    }

    /// Loads the SDK configuration shared by every client of one run.
    pub async fn load(&self) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }

        let config = loader.load().await;
        debug!(
            "Loaded AWS configuration (region: {})",
            config.region().map_or("<default>", |r| r.as_ref())
        );
        config
    }
}

/// Returns true for service error codes worth retrying.
#[must_use]
pub fn is_transient_code(code: &str) -> bool {
    TRANSIENT_CODES.contains(&code)
}

/// Maps an SDK error to a [`RemoteError`].
///
/// Timeouts, dispatch failures, unparseable responses and throttling codes
/// are transient; everything else is a service error carrying the code.
pub fn classify_sdk_error<E, R>(operation: &str, err: &SdkError<E, R>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(err).to_string();
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            RemoteError::transient(operation, message)
        }
        _ => {
            let service = err.as_service_error();
            let code = service.and_then(|e| e.code()).unwrap_or("Unknown");
            let text = service
                .and_then(|e| e.message())
                .map_or(message, str::to_string);
            if is_transient_code(code) {
                RemoteError::transient(operation, text)
            } else {
                RemoteError::service(operation, code, text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_codes() {
        assert!(is_transient_code("Throttling"));
        assert!(is_transient_code("SlowDown"));
        assert!(!is_transient_code("ValidationError"));
        assert!(!is_transient_code("AccessDenied"));
    }

    #[test]
    fn test_client_config_defaults() {
        let config = AwsClientConfig::default();
        assert!(config.region.is_none());
        assert!(config.profile.is_none());
        let config = AwsClientConfig::new(Some(String::from("eu-west-1")), None);
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
    }
}
