//! Failure taxonomy for calls to the remote service.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The remote confirmed the resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, timeout or 5xx.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The payload did not have the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Only produced by write actions.
    #[error("authentication required")]
    AuthRequired,

    #[error("throttled by remote")]
    Throttled,

    #[error("operation cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether trying again later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Transient(_) | FetchError::Malformed(_) | FetchError::Throttled
        )
    }

    pub fn from_status(status: reqwest::StatusCode, url: &str) -> Self {
        match status.as_u16() {
            404 => FetchError::NotFound(url.to_string()),
            401 | 403 => FetchError::AuthRequired,
            429 => FetchError::Throttled,
            code => FetchError::Transient(format!("HTTP {} from {}", code, url)),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return FetchError::Malformed(err.to_string());
        }
        if let Some(status) = err.status() {
            let url = err.url().map(|u| u.as_str()).unwrap_or_default();
            return FetchError::from_status(status, url);
        }
        FetchError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_codes_are_classified() {
        assert!(matches!(
            FetchError::from_status(StatusCode::NOT_FOUND, "u"),
            FetchError::NotFound(_)
        ));
        assert_eq!(
            FetchError::from_status(StatusCode::FORBIDDEN, "u"),
            FetchError::AuthRequired
        );
        assert_eq!(
            FetchError::from_status(StatusCode::TOO_MANY_REQUESTS, "u"),
            FetchError::Throttled
        );
        assert!(FetchError::from_status(StatusCode::BAD_GATEWAY, "u").is_transient());
    }

    #[test]
    fn not_found_and_cancelled_are_not_transient() {
        assert!(!FetchError::NotFound("x".into()).is_transient());
        assert!(!FetchError::Cancelled.is_transient());
        let bad: FetchError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(bad, FetchError::Malformed(_)));
    }
}
