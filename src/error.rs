//! Provider error surface and its HTTP mapping.
//!
//! Every failure that can cross the HTTP boundary maps to a sanitized
//! [`ErrorBody`]: a stable short message plus the machine-readable code.
//! Store internals, RPC errors, and handler panics stay in the logs.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use ivxp_types::error::{CodedError, ErrorBody, ErrorCode};
use ivxp_types::network::Network;
use ivxp_types::order::{OrderId, OrderStatus};

use crate::store::StoreError;

/// Represents all possible errors the provider runtime surfaces.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The request body was malformed or failed field validation.
    #[error("Invalid request")]
    InvalidRequest,
    /// Required fields are absent from the request body.
    #[error("Missing required fields: {0}")]
    MissingFields(String),
    /// The request body exceeds the 64 KiB limit.
    #[error("Request body too large")]
    RequestTooLarge,
    /// The requested service type is not in the catalog.
    #[error("Unknown service: {0}")]
    ServiceNotFound(String),
    /// No order with the given id.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),
    /// The order is not in the status the operation requires.
    #[error("Order {order_id} is {actual}, expected {expected}")]
    InvalidOrderStatus {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },
    /// The payment proof names a different network than this provider.
    #[error("Payment network {actual} does not match provider network {expected}")]
    NetworkMismatch { expected: Network, actual: Network },
    /// The signed message does not bind to the order being paid.
    #[error("Signed message does not reference the order")]
    InvalidSignedMessage,
    /// On-chain verification failed, or the tx hash was already used.
    #[error("Payment verification failed")]
    PaymentVerificationFailed,
    /// The signature does not verify against the order's client address.
    #[error("Signature verification failed")]
    SignatureVerificationFailed,
    /// The order was already confirmed; idempotent for clients.
    #[error("Order already confirmed")]
    OrderAlreadyConfirmed,
    /// No deliverable has been stored for the order yet.
    #[error("Deliverable not ready")]
    DeliverableNotReady,
    /// The push-delivery target is not an acceptable URL.
    #[error("Invalid delivery URL: {0}")]
    InvalidDeliveryUrl(String),
    /// The provider configuration is unusable.
    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),
    /// A store operation failed.
    #[error("Store operation failed")]
    Store(#[from] StoreError),
    /// Anything unexpected; details stay server-side.
    #[error("Internal error")]
    Internal(String),
}

impl CodedError for ProviderError {
    fn code(&self) -> ErrorCode {
        match self {
            ProviderError::InvalidRequest => ErrorCode::InvalidRequestParams,
            ProviderError::MissingFields(_) => ErrorCode::InvalidRequestParams,
            ProviderError::RequestTooLarge => ErrorCode::RequestTooLarge,
            ProviderError::ServiceNotFound(_) => ErrorCode::ServiceNotFound,
            ProviderError::OrderNotFound(_) => ErrorCode::OrderNotFound,
            ProviderError::InvalidOrderStatus { .. } => ErrorCode::InvalidOrderStatus,
            ProviderError::NetworkMismatch { .. } => ErrorCode::NetworkMismatch,
            ProviderError::InvalidSignedMessage => ErrorCode::InvalidSignedMessage,
            ProviderError::PaymentVerificationFailed => ErrorCode::PaymentVerificationFailed,
            ProviderError::SignatureVerificationFailed => ErrorCode::SignatureVerificationFailed,
            ProviderError::OrderAlreadyConfirmed => ErrorCode::OrderAlreadyConfirmed,
            ProviderError::DeliverableNotReady => ErrorCode::DeliverableNotReady,
            ProviderError::InvalidDeliveryUrl(_) => ErrorCode::InvalidDeliveryUrl,
            ProviderError::InvalidConfig(_) => ErrorCode::InvalidProviderConfig,
            ProviderError::Store(e) => e.code(),
            ProviderError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl ProviderError {
    /// The HTTP status this failure maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProviderError::InvalidRequest
            | ProviderError::MissingFields(_)
            | ProviderError::InvalidOrderStatus { .. }
            | ProviderError::NetworkMismatch { .. }
            | ProviderError::InvalidSignedMessage
            | ProviderError::PaymentVerificationFailed
            | ProviderError::SignatureVerificationFailed
            | ProviderError::OrderAlreadyConfirmed
            | ProviderError::InvalidDeliveryUrl(_)
            | ProviderError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            ProviderError::ServiceNotFound(_)
            | ProviderError::OrderNotFound(_)
            | ProviderError::DeliverableNotReady => StatusCode::NOT_FOUND,
            ProviderError::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProviderError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ProviderError::Store(_) | ProviderError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The sanitized short message that crosses the wire.
    ///
    /// Internal variants collapse to a generic message; nothing from a
    /// store, handler, or RPC error leaks.
    fn wire_message(&self) -> String {
        match self {
            ProviderError::Store(_) | ProviderError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ProviderError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        } else {
            tracing::warn!(error = %self, code = %self.code(), "Request rejected");
        }
        let body = ErrorBody::new(self.code(), self.wire_message());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProviderError::InvalidRequest.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProviderError::OrderNotFound(OrderId::generate()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProviderError::DeliverableNotReady.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProviderError::RequestTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ProviderError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_do_not_leak() {
        let error = ProviderError::Internal("db: connection to 10.0.0.3 failed".to_string());
        assert_eq!(error.wire_message(), "Internal server error");
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            ProviderError::PaymentVerificationFailed.code(),
            ErrorCode::PaymentVerificationFailed
        );
        assert_eq!(
            ProviderError::OrderAlreadyConfirmed.code(),
            ErrorCode::OrderAlreadyConfirmed
        );
        assert!(!ProviderError::PaymentVerificationFailed.recoverable());
    }
}
