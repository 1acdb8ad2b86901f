//! Error types for the gateway
//!
//! `Error` is the only error type that crosses the request-handling boundary.
//! Module-level errors (`RoutingError`, `SelectorError`, `IdentityError`,
//! `DirectoryError`) are translated into it before a response is produced.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::identity::IdentityError;
use crate::policy::SelectorError;
use crate::routing::RoutingError;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller is not allowed in (no email, disabled account, role or mint failure)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is identified but must not be served (ambiguous account)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Account could not be found and was not provisioned
    #[error("not found: {0}")]
    NotFound(String),

    /// No director matched and no root route exists
    #[error("no route: {0}")]
    NoRoute(String),

    /// Failed to forward the request to the backend
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error (directory outage, provisioning or signer failure)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status code for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::NoRoute(_) | Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        // Details stay in the log, the caller only sees the status
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request denied");
        }

        status.into_response()
    }
}

impl From<IdentityError> for Error {
    fn from(e: IdentityError) -> Self {
        let message = e.to_string();
        match e {
            IdentityError::MissingEmail { .. }
            | IdentityError::AccountDisabled { .. }
            | IdentityError::RoleLookupFailed { .. }
            | IdentityError::TokenMintFailed(_) => Error::Unauthorized(message),
            IdentityError::AmbiguousAccount { .. } => Error::Forbidden(message),
            IdentityError::AccountNotFound { .. } => Error::NotFound(message),
            IdentityError::DirectoryUnavailable { .. }
            | IdentityError::ProvisioningFailed { .. }
            | IdentityError::TokenManagerInitFailed => Error::Internal(message),
        }
    }
}

impl From<RoutingError> for Error {
    fn from(e: RoutingError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<SelectorError> for Error {
    fn from(e: SelectorError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Upstream(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(Error::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(Error::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::NoRoute("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(Error::Upstream("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            Error::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_identity_error_mapping() {
        let cases = [
            (
                IdentityError::MissingEmail {
                    preferred_username: "alice".into(),
                },
                StatusCode::UNAUTHORIZED,
            ),
            (
                IdentityError::AccountDisabled {
                    account_id: "1".into(),
                },
                StatusCode::UNAUTHORIZED,
            ),
            (
                IdentityError::RoleLookupFailed {
                    account_id: "1".into(),
                    message: "down".into(),
                },
                StatusCode::UNAUTHORIZED,
            ),
            (
                IdentityError::AmbiguousAccount {
                    email: "a@x.com".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                IdentityError::AccountNotFound {
                    email: "a@x.com".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                IdentityError::DirectoryUnavailable {
                    email: "a@x.com".into(),
                    message: "down".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                IdentityError::ProvisioningFailed {
                    email: "a@x.com".into(),
                    message: "down".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                IdentityError::TokenManagerInitFailed,
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (identity_error, status) in cases {
            assert_eq!(Error::from(identity_error).status(), status);
        }
    }

    #[tokio::test]
    async fn test_response_has_no_body() {
        let response = Error::Internal("secret detail".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        // StatusCode::into_response renders an empty body
        assert!(!String::from_utf8_lossy(&body).contains("secret detail"));
    }
}
