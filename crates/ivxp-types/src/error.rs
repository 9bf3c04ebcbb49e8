//! The coded error taxonomy shared across the IVXP runtime.
//!
//! Every failure surfaced by the provider runtime or the client SDK carries
//! one of the codes below. Switching on [`ErrorCode`] is the only
//! discrimination callers need; each code has a fixed recoverability
//! classification, and error values chain their cause through `source()`.
//!
//! On the wire the provider returns a sanitized [`ErrorBody`]; internal
//! details never cross the HTTP boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;

/// Machine-readable error codes of the IVXP runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation
    InvalidProviderUrl,
    InvalidRequestParams,
    InvalidProviderConfig,
    InvalidPrivateKey,
    InvalidSignedMessage,
    InvalidDeliveryUrl,
    RequestTooLarge,
    InvalidMessage,
    InvalidSignature,
    InvalidAddress,
    // Protocol semantics
    ServiceNotFound,
    OrderNotFound,
    InvalidOrderStatus,
    NetworkMismatch,
    OrderIdMismatch,
    OrderAlreadyConfirmed,
    DeliverableAlreadyExists,
    DeliverableNotReady,
    // Verification
    PaymentVerificationFailed,
    SignatureVerificationFailed,
    HashMismatch,
    // Transport
    NetworkError,
    ProviderUnavailable,
    RequestFailed,
    InvalidResponse,
    MaxPollAttempts,
    SseExhausted,
    // Composite
    BudgetExceeded,
    PartialSuccess,
    Timeout,
    DeliveryFailed,
    Cancelled,
    InternalError,
}

impl ErrorCode {
    /// Whether a failure with this code is worth retrying or resuming.
    ///
    /// Transport failures are transient by nature; `PARTIAL_SUCCESS` and
    /// `TIMEOUT` carry enough state for the caller to pick the flow back
    /// up. Everything else will fail the same way again.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::ProviderUnavailable
                | ErrorCode::RequestFailed
                | ErrorCode::InvalidResponse
                | ErrorCode::MaxPollAttempts
                | ErrorCode::SseExhausted
                | ErrorCode::PartialSuccess
                | ErrorCode::Timeout
        )
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).expect("ErrorCode serialization");
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// An error with a machine-readable code.
///
/// Implemented by every error enum in the workspace; `recoverable()` is
/// derived from the code unless a type has a reason to override it.
pub trait CodedError: std::error::Error {
    /// The code identifying this failure class.
    fn code(&self) -> ErrorCode;

    /// Whether the failure is worth retrying or resuming.
    fn recoverable(&self) -> bool {
        self.code().recoverable()
    }
}

/// Sanitized error payload returned by the provider over HTTP.
///
/// Carries a stable short message and the code; stack traces, store
/// internals, and upstream RPC errors never leave the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The failure class.
    pub code: ErrorCode,
    /// A stable, generic human-readable message.
    pub error: String,
}

impl ErrorBody {
    /// Build a wire error body.
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        ErrorBody {
            code,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_are_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::PaymentVerificationFailed).unwrap(),
            "\"PAYMENT_VERIFICATION_FAILED\""
        );
        assert_eq!(ErrorCode::OrderNotFound.to_string(), "ORDER_NOT_FOUND");
        assert_eq!(ErrorCode::SseExhausted.to_string(), "SSE_EXHAUSTED");
        let code: ErrorCode = serde_json::from_str("\"BUDGET_EXCEEDED\"").unwrap();
        assert_eq!(code, ErrorCode::BudgetExceeded);
    }

    #[test]
    fn test_recoverability_classes() {
        assert!(ErrorCode::NetworkError.recoverable());
        assert!(ErrorCode::PartialSuccess.recoverable());
        assert!(ErrorCode::Timeout.recoverable());
        assert!(ErrorCode::MaxPollAttempts.recoverable());

        assert!(!ErrorCode::InvalidPrivateKey.recoverable());
        assert!(!ErrorCode::BudgetExceeded.recoverable());
        assert!(!ErrorCode::PaymentVerificationFailed.recoverable());
        assert!(!ErrorCode::HashMismatch.recoverable());
    }

    #[test]
    fn test_error_body_roundtrip() {
        let body = ErrorBody::new(ErrorCode::OrderNotFound, "Order not found");
        let json = serde_json::to_string(&body).unwrap();
        let back: ErrorBody = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, ErrorCode::OrderNotFound);
        assert_eq!(back.error, "Order not found");
    }
}
