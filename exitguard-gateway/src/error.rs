//! Gateway error taxonomy and its HTTP mapping.
//!
//! Messages returned to devices are fixed strings or validation text about the
//! device's own request. Storage errors and auth details are logged server-side
//! only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use exitguard_core::{LedgerError, PositionError, ReconcileError};
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::AuthError;
use crate::wire::ErrorBody;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Auth(AuthError),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::Auth(_) => "auth_failure",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::Validation(_) => "validation",
            GatewayError::Internal(_) => "internal",
        }
    }

    fn public_message(&self) -> String {
        match self {
            GatewayError::Auth(_) => "request could not be authenticated".to_string(),
            GatewayError::NotFound(what) => format!("{what} not found"),
            GatewayError::Conflict(msg) | GatewayError::Validation(msg) => msg.clone(),
            GatewayError::Internal(_) => "internal error".to_string(),
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        if err.is_internal() {
            GatewayError::Internal(err.to_string())
        } else {
            GatewayError::Auth(err)
        }
    }
}

impl From<LedgerError> for GatewayError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::CommandNotFound(_) => GatewayError::NotFound("close command"),
            LedgerError::PositionNotFound(_) => GatewayError::NotFound("position"),
            LedgerError::Conflict { status, .. } => GatewayError::Conflict(format!(
                "close command is already {status} with a different outcome"
            )),
            LedgerError::PositionClosed(_) => {
                GatewayError::Conflict("position is already closed".to_string())
            }
            LedgerError::ActiveCommandExists { .. } => GatewayError::Conflict(
                "position already has an active close command".to_string(),
            ),
            LedgerError::InvalidOutcome(msg) => GatewayError::Validation(msg.to_string()),
            LedgerError::InvalidPrice => GatewayError::Validation("invalid price".to_string()),
            LedgerError::Store(e) => GatewayError::Internal(e.to_string()),
        }
    }
}

impl From<ReconcileError> for GatewayError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::NotFound(_) => GatewayError::NotFound("position"),
            ReconcileError::Conflict(_) => GatewayError::Conflict(
                "entry fill already recorded with different values".to_string(),
            ),
            ReconcileError::Invalid(msg) => GatewayError::Validation(msg.to_string()),
            ReconcileError::Store(e) => GatewayError::Internal(e.to_string()),
        }
    }
}

impl From<PositionError> for GatewayError {
    fn from(err: PositionError) -> Self {
        match err {
            PositionError::NotFound(_) => GatewayError::NotFound("position"),
            PositionError::Invalid(msg) => GatewayError::Validation(msg.to_string()),
            PositionError::UnknownDevice(_) => GatewayError::NotFound("device"),
            PositionError::Store(e) => GatewayError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            GatewayError::Internal(detail) => error!(%detail, "gateway request failed"),
            GatewayError::Auth(reason) => warn!(%reason, "rejected unauthenticated request"),
            other => warn!(category = other.category(), error = %other, "request rejected"),
        }

        let body = ErrorBody {
            ok: false,
            error: self.category().to_string(),
            message: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exitguard_core::domain::{CommandId, CommandStatus};

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (GatewayError::Auth(AuthError::BadSignature), StatusCode::UNAUTHORIZED),
            (GatewayError::NotFound("close command"), StatusCode::NOT_FOUND),
            (GatewayError::Conflict("x".into()), StatusCode::CONFLICT),
            (GatewayError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (GatewayError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status);
        }
    }

    #[test]
    fn auth_reason_is_not_disclosed() {
        let err = GatewayError::from(AuthError::RevokedDevice);
        assert_eq!(err.public_message(), "request could not be authenticated");
    }

    #[test]
    fn ledger_conflict_maps_to_conflict() {
        let err = GatewayError::from(LedgerError::Conflict {
            command_id: CommandId::new(),
            status: CommandStatus::Executed,
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.public_message().contains("EXECUTED"));
    }

    #[test]
    fn internal_detail_is_hidden() {
        let err = GatewayError::Internal("sqlite error: disk I/O error at /var/lib".into());
        assert_eq!(err.public_message(), "internal error");
    }
}
