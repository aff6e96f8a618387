//! HTTP error envelope.
//!
//! Every failure leaves the API as `{"success": false, "error":
//! {"code", "message", "details"?}}` with a stable machine code.
//! Business-rule outcomes (duplicate, out of stock, validation) log at
//! info; only genuine faults log at error, and their message is
//! replaced with a generic one so no database or driver text leaks to
//! callers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::IngestError;
use crate::store::StoreError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub(crate) fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn unauthorized() -> Self {
        // One generic message for missing and malformed credentials.
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "invalid API key")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::info!(%message, "bad request");
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn unprocessable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Envelope<'a> {
            success: bool,
            error: ErrorBody<'a>,
        }

        #[derive(Serialize)]
        struct ErrorBody<'a> {
            code: &'a str,
            message: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<&'a serde_json::Value>,
        }

        (
            self.status,
            Json(Envelope {
                success: false,
                error: ErrorBody {
                    code: self.code,
                    message: &self.message,
                    details: self.details.as_ref(),
                },
            }),
        )
            .into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::ProductNotFound { .. } => {
                tracing::info!(error = %err, "submission rejected");
                Self::new(StatusCode::NOT_FOUND, "PRODUCT_NOT_FOUND", err.to_string())
            }
            IngestError::ProductInactive { .. } => {
                tracing::info!(error = %err, "submission rejected");
                Self::unprocessable("PRODUCT_INACTIVE", err.to_string())
            }
            IngestError::InsufficientStock { .. } => {
                tracing::info!(error = %err, "submission rejected");
                Self::unprocessable("INSUFFICIENT_STOCK", err.to_string())
            }
            IngestError::Duplicate { conflict } => {
                tracing::info!("submission rejected as duplicate");
                let base = Self::conflict(
                    "DUPLICATE_LEAD",
                    "a lead with this phone number was already submitted today",
                );
                match conflict.and_then(|c| serde_json::to_value(c).ok()) {
                    Some(details) => base.with_details(details),
                    None => base,
                }
            }
            IngestError::Validation { report } => {
                tracing::info!(summary = %report.summary(), "submission failed validation");
                let details = serde_json::json!({
                    "errors": report.errors,
                    "warnings": report.warnings,
                });
                Self::new(
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    "submission failed validation",
                )
                .with_details(details)
            }
            IngestError::Store(err) => err.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicatePhone { .. } => {
                tracing::info!(error = %err, "persistence guard rejected duplicate");
                Self::conflict(
                    "DUPLICATE_LEAD",
                    "a lead with this phone number was already submitted today",
                )
            }
            StoreError::OutOfStock { ref sku, requested } => {
                tracing::info!(error = %err, "stock exhausted during persistence");
                Self::unprocessable(
                    "INSUFFICIENT_STOCK",
                    format!("insufficient stock for '{sku}'. Requested: {requested}"),
                )
            }
            StoreError::NotFound { what } => Self::not_found(format!("{what} not found")),
            StoreError::Database(err) => Self::internal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;
    use crate::pipeline::{ValidationIssue, ValidationReport};

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn envelope_carries_success_flag_code_and_message() {
        let (status, json) = body_json(ApiError::unauthorized()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["success"], serde_json::json!(false));
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");
        assert_eq!(json["error"]["message"], "invalid API key");
        assert!(json["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn insufficient_stock_maps_to_422_with_counts_in_message() {
        let err = IngestError::InsufficientStock {
            sku: "CURSO-MKT-001".into(),
            available: 147,
            requested: 200,
        };
        let (status, json) = body_json(err.into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"]["code"], "INSUFFICIENT_STOCK");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Available: 147, Requested: 200"));
    }

    #[tokio::test]
    async fn validation_failure_lists_issues_in_details() {
        let report = ValidationReport {
            errors: vec![ValidationIssue {
                code: "INVALID_CUSTOMER_NAME",
                message: "too short".to_string(),
            }],
            warnings: Vec::new(),
        };
        let (status, json) = body_json(IngestError::Validation { report }.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(
            json["error"]["details"]["errors"][0]["code"],
            "INVALID_CUSTOMER_NAME"
        );
    }

    #[tokio::test]
    async fn database_errors_never_leak_driver_text() {
        let (status, json) =
            body_json(StoreError::Database(sqlx::Error::PoolClosed).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["message"], "internal error");
    }
}
