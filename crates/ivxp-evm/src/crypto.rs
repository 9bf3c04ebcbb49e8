//! EIP-191 personal-message signing and verification.
//!
//! Every IVXP authorization is an EIP-191 `personal_sign` signature: the
//! message is prefixed with `"\x19Ethereum Signed Message:\n" + len`,
//! keccak-256 hashed, and signed with secp256k1. Verification recovers the
//! signer address from the signature and compares it to the expected
//! address, so no public key ever travels on the wire.

use alloy_primitives::Signature;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use std::str::FromStr;

use ivxp_types::error::{CodedError, ErrorCode};
use ivxp_types::order::EthAddress;

/// Message signing and verification over a held key.
///
/// The default implementation is [`EvmCryptoService`]; runtimes that keep
/// keys elsewhere (KMS, hardware wallet) provide their own.
#[async_trait]
pub trait CryptoService: Send + Sync {
    /// Sign a message with EIP-191 personal_sign; returns the 65-byte
    /// signature as 0x-prefixed hex. Deterministic for the same
    /// (key, message) pair.
    async fn sign(&self, message: &str) -> Result<String, CryptoError>;

    /// Verify an EIP-191 signature against an expected signer address.
    ///
    /// Returns `Ok(false)` for a well-formed signature that recovers to a
    /// different address; malformed inputs are errors.
    fn verify(
        &self,
        message: &str,
        signature: &str,
        expected: &EthAddress,
    ) -> Result<bool, CryptoError>;

    /// The address derived from the held key.
    fn address(&self) -> EthAddress;
}

/// Errors from signing or verifying messages.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The private key is not `0x` followed by 64 hex characters, or does
    /// not decode to a valid secp256k1 scalar.
    #[error("Invalid private key: expected 0x followed by 64 hex characters")]
    InvalidPrivateKey,
    /// The message is empty.
    #[error("Invalid message: must not be empty")]
    InvalidMessage,
    /// The signature is not 65 bytes of 0x-prefixed hex.
    #[error("Invalid signature: expected 0x followed by 130 hex characters")]
    InvalidSignature,
    /// The expected address is malformed.
    #[error("Invalid address")]
    InvalidAddress,
    /// The underlying signer failed.
    #[error("Signing failed")]
    SigningFailed(#[source] alloy_signer::Error),
}

impl CodedError for CryptoError {
    fn code(&self) -> ErrorCode {
        match self {
            CryptoError::InvalidPrivateKey => ErrorCode::InvalidPrivateKey,
            CryptoError::InvalidMessage => ErrorCode::InvalidMessage,
            CryptoError::InvalidSignature => ErrorCode::InvalidSignature,
            CryptoError::InvalidAddress => ErrorCode::InvalidAddress,
            CryptoError::SigningFailed(_) => ErrorCode::InternalError,
        }
    }
}

/// [`CryptoService`] over a local secp256k1 private key.
#[derive(Debug, Clone)]
pub struct EvmCryptoService {
    signer: PrivateKeySigner,
}

impl EvmCryptoService {
    /// Build a service from a `0x`-prefixed 64-hex-character private key.
    pub fn from_private_key(private_key: &str) -> Result<Self, CryptoError> {
        validate_private_key_shape(private_key)?;
        let signer =
            PrivateKeySigner::from_str(private_key).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(EvmCryptoService { signer })
    }

    /// The underlying signer, for wallet composition.
    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

#[async_trait]
impl CryptoService for EvmCryptoService {
    async fn sign(&self, message: &str) -> Result<String, CryptoError> {
        if message.is_empty() {
            return Err(CryptoError::InvalidMessage);
        }
        let signature = self
            .signer
            .sign_message(message.as_bytes())
            .await
            .map_err(CryptoError::SigningFailed)?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    fn verify(
        &self,
        message: &str,
        signature: &str,
        expected: &EthAddress,
    ) -> Result<bool, CryptoError> {
        verify_eip191(message, signature, expected)
    }

    fn address(&self) -> EthAddress {
        EthAddress(self.signer.address())
    }
}

/// Standalone EIP-191 verification, usable without holding any key.
pub fn verify_eip191(
    message: &str,
    signature: &str,
    expected: &EthAddress,
) -> Result<bool, CryptoError> {
    if message.is_empty() {
        return Err(CryptoError::InvalidMessage);
    }
    let signature = parse_signature(signature)?;
    match signature.recover_address_from_msg(message.as_bytes()) {
        Ok(recovered) => Ok(recovered == expected.0),
        // Well-formed bytes that do not recover (bad r/s/v combination)
        // are a verification failure, not a caller error.
        Err(_) => Ok(false),
    }
}

fn validate_private_key_shape(private_key: &str) -> Result<(), CryptoError> {
    let hex_part = private_key
        .strip_prefix("0x")
        .ok_or(CryptoError::InvalidPrivateKey)?;
    if hex_part.len() != 64 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CryptoError::InvalidPrivateKey);
    }
    Ok(())
}

fn parse_signature(signature: &str) -> Result<Signature, CryptoError> {
    let hex_part = signature
        .strip_prefix("0x")
        .ok_or(CryptoError::InvalidSignature)?;
    if hex_part.len() != 130 {
        return Err(CryptoError::InvalidSignature);
    }
    let bytes = hex::decode(hex_part).map_err(|_| CryptoError::InvalidSignature)?;
    Signature::from_raw(&bytes).map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known local development key; never holds funds.
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const TEST_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn service() -> EvmCryptoService {
        EvmCryptoService::from_private_key(TEST_KEY).unwrap()
    }

    #[test]
    fn test_address_derivation_is_stable() {
        let service = service();
        assert_eq!(service.address().to_string(), TEST_ADDRESS);
        assert_eq!(service.address(), service.address());
    }

    #[test]
    fn test_private_key_shape_validation() {
        assert!(matches!(
            EvmCryptoService::from_private_key("deadbeef").unwrap_err(),
            CryptoError::InvalidPrivateKey
        ));
        assert!(matches!(
            EvmCryptoService::from_private_key("0x1234").unwrap_err(),
            CryptoError::InvalidPrivateKey
        ));
        assert!(matches!(
            EvmCryptoService::from_private_key(&format!("0x{}", "zz".repeat(32))).unwrap_err(),
            CryptoError::InvalidPrivateKey
        ));
    }

    #[tokio::test]
    async fn test_sign_verify_roundtrip() {
        let service = service();
        let message = "Order: ivxp-abc | Payment: 0xdead | Timestamp: 2026-01-15T12:00:00.000Z";
        let signature = service.sign(message).await.unwrap();
        assert!(signature.starts_with("0x"));
        assert_eq!(signature.len(), 132);
        assert!(service
            .verify(message, &signature, &service.address())
            .unwrap());
    }

    #[tokio::test]
    async fn test_sign_is_deterministic() {
        let service = service();
        let a = service.sign("same message").await.unwrap();
        let b = service.sign("same message").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_signer() {
        let service = service();
        let other = EvmCryptoService::from_private_key(OTHER_KEY).unwrap();
        let signature = service.sign("hello").await.unwrap();
        assert!(!service
            .verify("hello", &signature, &other.address())
            .unwrap());
    }

    #[tokio::test]
    async fn test_verify_rejects_tampered_message() {
        let service = service();
        let signature = service.sign("hello").await.unwrap();
        assert!(!service
            .verify("hello!", &signature, &service.address())
            .unwrap());
    }

    #[tokio::test]
    async fn test_shape_violations_are_errors() {
        let service = service();
        assert!(matches!(
            service.sign("").await.unwrap_err(),
            CryptoError::InvalidMessage
        ));
        assert!(matches!(
            service
                .verify("msg", "not-hex", &service.address())
                .unwrap_err(),
            CryptoError::InvalidSignature
        ));
        assert!(matches!(
            service
                .verify("msg", "0x1234", &service.address())
                .unwrap_err(),
            CryptoError::InvalidSignature
        ));
    }
}
