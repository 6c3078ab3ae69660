//! HTTP error mapping
//!
//! Every error leaves the node as `{"code": "...", "message": "..."}` with a
//! stable string code and a status derived from its [`ErrorClass`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tessera_intents::IntentError;
use tessera_sequencer::SequencerError;
use tessera_types::ErrorClass;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Intent(#[from] IntentError),

    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Intent(e) => match e {
                IntentError::Invalid(_) | IntentError::InternalAction { .. } => "invalid_intention",
                IntentError::NotController { .. } => "not_controller",
                IntentError::UnknownVault { .. } => "unknown_vault",
                IntentError::NoMatchingDeposit { .. } => "no_matching_deposit",
                IntentError::Contended { .. } => "contended",
                IntentError::Sequencer(e) => sequencer_code(e),
                other => class_code(other.class()),
            },
            Self::Sequencer(e) => sequencer_code(e),
            Self::NotFound(_) => "not_found",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Intent(IntentError::NotController { .. }) => StatusCode::FORBIDDEN,
            Self::Intent(IntentError::UnknownVault { .. }) => StatusCode::NOT_FOUND,
            Self::Intent(IntentError::Sequencer(SequencerError::BundleNotFound { .. }))
            | Self::Sequencer(SequencerError::BundleNotFound { .. })
            | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Intent(e) => class_status(e.class()),
            Self::Sequencer(e) => class_status(e.class()),
        }
    }
}

fn sequencer_code(e: &SequencerError) -> &'static str {
    match e {
        SequencerError::Busy => "busy",
        SequencerError::BundleNotFound { .. } => "bundle_not_found",
        other => class_code(other.class()),
    }
}

fn class_code(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Validation => "validation",
        ErrorClass::Business => "rejected",
        ErrorClass::Conflict => "conflict",
        ErrorClass::Transient => "unavailable",
        ErrorClass::FatalConfig => "internal",
    }
}

fn class_status(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Validation => StatusCode::BAD_REQUEST,
        ErrorClass::Business => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorClass::Conflict => StatusCode::CONFLICT,
        ErrorClass::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::FatalConfig => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::{Address, Amount, VaultId};

    #[test]
    fn test_status_mapping() {
        let busy = ApiError::from(SequencerError::Busy);
        assert_eq!(busy.status_code(), StatusCode::CONFLICT);
        assert_eq!(busy.code(), "busy");

        let missing = ApiError::from(SequencerError::BundleNotFound { nonce: 3 });
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let rejected = ApiError::from(IntentError::NoMatchingDeposit {
            input_index: 0,
            requested: Amount::zero(),
            available: Amount::zero(),
        });
        assert_eq!(rejected.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(rejected.code(), "no_matching_deposit");

        let forbidden = ApiError::from(IntentError::NotController {
            controller: Address::zero(),
            vault_id: VaultId(1),
        });
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);

        let invalid = ApiError::from(IntentError::invalid("bad"));
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

        let missing = ApiError::NotFound("bundle 9".to_string());
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(missing.code(), "not_found");
    }
}
