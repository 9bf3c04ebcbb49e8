//! Client-side errors.
//!
//! Every failure carries an [`ErrorCode`] through [`CodedError`], and the
//! composite variants carry the state a caller needs to recover:
//! `PartialSuccess` holds the on-chain hash when the transfer landed but
//! the provider never heard about it, and `Timeout` names the step it
//! interrupted plus any partial state.

use std::fmt;
use std::fmt::Display;

use ivxp_evm::crypto::CryptoError;
use ivxp_evm::payment::PaymentError;
use ivxp_types::amount::UsdcAmount;
use ivxp_types::error::{CodedError, ErrorCode};
use ivxp_types::hash::ContentHash;
use ivxp_types::order::{OrderId, TxHash};

/// The orchestration step an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Quote,
    Payment,
    Wait,
    Download,
    Confirm,
}

impl Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Quote => "quote",
            Step::Payment => "payment",
            Step::Wait => "wait",
            Step::Download => "download",
            Step::Confirm => "confirm",
        };
        write!(f, "{s}")
    }
}

/// Represents all failures the client SDK surfaces.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The provider URL is not an http(s) URL.
    #[error("Invalid provider URL: {0}")]
    InvalidProviderUrl(String),
    /// A request parameter failed validation before any side effect.
    #[error("Invalid request parameters: {0}")]
    InvalidRequestParams(String),
    /// The quoted price exceeds the configured budget. Raised before any
    /// on-chain action.
    #[error("Quoted price {price_usdc} USDC exceeds budget {budget_usdc} USDC")]
    BudgetExceeded {
        price_usdc: UsdcAmount,
        budget_usdc: UsdcAmount,
    },
    /// The on-chain transfer went through but the provider was never
    /// successfully notified. Recoverable: re-notify or verify with the
    /// carried hash.
    #[error("Payment {tx_hash} sent on-chain but provider notification failed")]
    PartialSuccess {
        tx_hash: TxHash,
        #[source]
        source: Box<ClientError>,
    },
    /// The overall timeout fired. `tx_hash` is populated when an on-chain
    /// send had already returned.
    #[error("Timed out during {step}")]
    Timeout {
        step: Step,
        tx_hash: Option<TxHash>,
    },
    /// The caller's cancellation fired.
    #[error("Operation cancelled")]
    Cancelled,
    /// The provider answered a download with a different order's data.
    #[error("Provider returned order {returned}, requested {requested}")]
    OrderIdMismatch {
        requested: OrderId,
        returned: OrderId,
    },
    /// The downloaded content does not hash to the declared value. The
    /// content is discarded.
    #[error("Content hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch {
        declared: ContentHash,
        computed: ContentHash,
    },
    /// The provider rejected the request; carries the wire code when the
    /// provider sent one.
    #[error("Provider rejected {step}: {message}")]
    Provider {
        step: Step,
        status: u16,
        code: Option<ErrorCode>,
        message: String,
    },
    /// The provider could not be reached at all.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The connection failed mid-flight.
    #[error("Network error: {0}")]
    Network(String),
    /// The provider's response did not match the wire schema.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
    /// Polling gave up after the attempt budget.
    #[error("Gave up polling after {attempts} attempts")]
    MaxPollAttempts { attempts: u32 },
    /// The SSE stream's reconnect budget ran out.
    #[error("SSE stream exhausted after {retries} retries")]
    SseExhausted { retries: u32 },
    /// Signing or signature handling failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// The on-chain send failed before returning a hash.
    #[error(transparent)]
    Payment(#[from] PaymentError),
    /// Writing the deliverable to the caller's path failed.
    #[error("Could not persist deliverable: {0}")]
    Persist(String),
}

impl CodedError for ClientError {
    fn code(&self) -> ErrorCode {
        match self {
            ClientError::InvalidProviderUrl(_) => ErrorCode::InvalidProviderUrl,
            ClientError::InvalidRequestParams(_) => ErrorCode::InvalidRequestParams,
            ClientError::BudgetExceeded { .. } => ErrorCode::BudgetExceeded,
            ClientError::PartialSuccess { .. } => ErrorCode::PartialSuccess,
            ClientError::Timeout { .. } => ErrorCode::Timeout,
            ClientError::Cancelled => ErrorCode::Cancelled,
            ClientError::OrderIdMismatch { .. } => ErrorCode::OrderIdMismatch,
            ClientError::HashMismatch { .. } => ErrorCode::HashMismatch,
            // A provider-reported code wins over the generic classification.
            ClientError::Provider { code, .. } => code.unwrap_or(ErrorCode::RequestFailed),
            ClientError::ProviderUnavailable(_) => ErrorCode::ProviderUnavailable,
            ClientError::Network(_) => ErrorCode::NetworkError,
            ClientError::InvalidResponse(_) => ErrorCode::InvalidResponse,
            ClientError::MaxPollAttempts { .. } => ErrorCode::MaxPollAttempts,
            ClientError::SseExhausted { .. } => ErrorCode::SseExhausted,
            ClientError::Crypto(e) => e.code(),
            ClientError::Payment(e) => e.code(),
            ClientError::Persist(_) => ErrorCode::InternalError,
        }
    }
}

impl ClientError {
    /// Whether the provider reported the given wire code for this failure.
    pub fn is_provider_code(&self, expected: ErrorCode) -> bool {
        matches!(self, ClientError::Provider { code: Some(code), .. } if *code == expected)
    }

    /// Whether this is an HTTP 404 from the provider, the trigger for the
    /// canonical-to-legacy endpoint fallback.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Provider { status: 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exceeded_carries_both_amounts() {
        let error = ClientError::BudgetExceeded {
            price_usdc: UsdcAmount::from_usdc(50),
            budget_usdc: UsdcAmount::from_usdc(10),
        };
        assert_eq!(error.code(), ErrorCode::BudgetExceeded);
        assert!(!error.recoverable());
        assert!(error.to_string().contains("50.000000"));
        assert!(error.to_string().contains("10.000000"));
    }

    #[test]
    fn test_partial_success_is_recoverable_and_chains() {
        let error = ClientError::PartialSuccess {
            tx_hash: TxHash(alloy_primitives::B256::repeat_byte(0xde)),
            source: Box::new(ClientError::Network("connection reset".to_string())),
        };
        assert_eq!(error.code(), ErrorCode::PartialSuccess);
        assert!(error.recoverable());
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_provider_code_passthrough() {
        let error = ClientError::Provider {
            step: Step::Confirm,
            status: 400,
            code: Some(ErrorCode::OrderAlreadyConfirmed),
            message: "Order already confirmed".to_string(),
        };
        assert!(error.is_provider_code(ErrorCode::OrderAlreadyConfirmed));
        assert_eq!(error.code(), ErrorCode::OrderAlreadyConfirmed);
    }

    #[test]
    fn test_transport_recoverability() {
        assert!(ClientError::Network("reset".to_string()).recoverable());
        assert!(ClientError::ProviderUnavailable("refused".to_string()).recoverable());
        assert!(ClientError::MaxPollAttempts { attempts: 20 }.recoverable());
        assert!(
            !ClientError::HashMismatch {
                declared: ContentHash::of_str("a"),
                computed: ContentHash::of_str("b"),
            }
            .recoverable()
        );
    }
}
