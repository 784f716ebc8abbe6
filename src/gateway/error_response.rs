//! HTTP rendering of dispatch errors
//!
//! Gives the transport layer one consistent JSON error body and status
//! mapping for every rejection the dispatch pipeline can produce.

use super::types::{DispatchError, FailureKind};
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::{header, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Standard error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Request ID for correlation
    pub request_id: Option<String>,
    /// Structured context such as the blocking rule or the upstream status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
            details: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convert to HTTP response with the request id echoed as a header
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        let request_id = self.request_id.clone();
        let mut response = (status, Json(self)).into_response();

        if let Some(id) = request_id {
            if let Ok(header_value) = HeaderValue::from_str(&id) {
                response
                    .headers_mut()
                    .insert(REQUEST_ID_HEADER, header_value);
            }
        }

        response
    }
}

/// Extension trait for consistent error formatting
pub trait ErrorResponseExt {
    fn to_error_response(&self) -> ErrorResponse;

    fn status_code(&self) -> StatusCode;
}

impl ErrorResponseExt for DispatchError {
    fn to_error_response(&self) -> ErrorResponse {
        use DispatchError::*;

        match self {
            ResidencyViolation { region } => ErrorResponse::new(
                "RESIDENCY_VIOLATION",
                "No provider is certified to process data for your region",
            )
            .with_details(serde_json::json!({ "region": region })),
            Blocked { rule_id, reason } => {
                ErrorResponse::new("REQUEST_BLOCKED", "Request blocked by routing policy")
                    .with_details(serde_json::json!({ "rule_id": rule_id, "reason": reason }))
            }
            ConcurrencyExhausted { retry_after, .. } => ErrorResponse::new(
                "CONCURRENCY_LIMIT",
                "Too many concurrent requests for this tenant",
            )
            .with_details(serde_json::json!({ "retry_after_secs": retry_after.as_secs() })),
            NoProvider { model } => ErrorResponse::new(
                "NO_PROVIDER",
                format!("No provider available for model {model}"),
            ),
            Failed(failure) => {
                let code = match failure.kind {
                    FailureKind::Upstream => "UPSTREAM_ERROR",
                    FailureKind::Timeout => "UPSTREAM_TIMEOUT",
                    FailureKind::Ledger => "INSUFFICIENT_CREDIT",
                    FailureKind::Abandoned => "REQUEST_ABANDONED",
                };
                let mut response = ErrorResponse::new(code, failure.message.clone());
                if let Some(status) = failure.status {
                    response = response.with_details(serde_json::json!({
                        "provider": failure.provider,
                        "upstream_status": status,
                    }));
                }
                response
            }
        }
    }

    fn status_code(&self) -> StatusCode {
        use DispatchError::*;

        match self {
            ResidencyViolation { .. } | Blocked { .. } => StatusCode::FORBIDDEN,
            ConcurrencyExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            NoProvider { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Failed(failure) => match failure.kind {
                FailureKind::Upstream => StatusCode::BAD_GATEWAY,
                FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                FailureKind::Ledger => StatusCode::PAYMENT_REQUIRED,
                FailureKind::Abandoned => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }
}

impl DispatchError {
    /// Render with the caller's request id for correlation
    pub fn into_response_for(self, request_id: impl Into<String>) -> Response {
        let status = self.status_code();
        let mut response = self
            .to_error_response()
            .with_request_id(request_id)
            .into_response_with_status(status);
        self.apply_retry_after(&mut response);
        response
    }

    fn apply_retry_after(&self, response: &mut Response) {
        if let DispatchError::ConcurrencyExhausted { retry_after, .. } = self {
            let secs = retry_after.as_secs().max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = self
            .to_error_response()
            .into_response_with_status(status);
        self.apply_retry_after(&mut response);
        response
    }
}
