//! Management API error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::broker::error::{
    INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, UNAUTHORIZED, USER_REJECTED,
};
use crate::broker::{ApprovalError, ProviderError};
use crate::session::SessionError;
use crate::blockchain::TransactionError;
use crate::vault::KeyStoreError;

/// A `{ "error": {code, message} }` body with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: ProviderError,
}

impl ApiError {
    pub fn new(status: StatusCode, error: ProviderError) -> Self {
        Self { status, error }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ProviderError::invalid_params(message))
    }
}

impl From<ProviderError> for ApiError {
    fn from(error: ProviderError) -> Self {
        let status = match error.code {
            USER_REJECTED => StatusCode::CONFLICT,
            UNAUTHORIZED => StatusCode::FORBIDDEN,
            METHOD_NOT_FOUND => StatusCode::NOT_FOUND,
            INVALID_PARAMS => StatusCode::BAD_REQUEST,
            INTERNAL_ERROR => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error)
    }
}

impl From<ApprovalError> for ApiError {
    fn from(e: ApprovalError) -> Self {
        match e {
            ApprovalError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, e.into()),
            ApprovalError::LockedOut(_) => Self::new(StatusCode::TOO_MANY_REQUESTS, e.into()),
            other => ProviderError::from(other).into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::LockedOut { .. } => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, e.into())
            }
            other => ProviderError::from(other).into(),
        }
    }
}

impl From<KeyStoreError> for ApiError {
    fn from(e: KeyStoreError) -> Self {
        ProviderError::from(e).into()
    }
}

impl From<TransactionError> for ApiError {
    fn from(e: TransactionError) -> Self {
        ProviderError::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(ApprovalError::NotFound(Uuid::nil())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ApprovalError::IncorrectPassword).status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(SessionError::LockedOut { remaining_secs: 5 }).status,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from(ProviderError::internal("boom")).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
