//! USDC transfers and on-chain payment verification.
//!
//! A payment claim is only accepted when the named transaction's receipt
//! carries a successful `Transfer` log on the configured USDC contract that
//! matches the expected sender, recipient, and amount exactly. Anything
//! less (missing receipt, reverted transaction, different token, different
//! parties, different amount) verifies as `false` rather than an error.

use alloy_network::EthereumWallet;
use alloy_primitives::U256;
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::sol;
use async_trait::async_trait;
use url::Url;

use ivxp_types::amount::UsdcAmount;
use ivxp_types::error::{CodedError, ErrorCode};
use ivxp_types::network::{Network, UsdcDeployment};
use ivxp_types::order::{EthAddress, TxHash};

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract Usdc {
        event Transfer(address indexed from, address indexed to, uint256 value);
        function transfer(address to, uint256 value) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }
}

/// The three fields an on-chain transfer must match to count as payment.
#[derive(Debug, Clone)]
pub struct ExpectedPayment {
    /// Who must have paid.
    pub from: EthAddress,
    /// The wallet the transfer must reach.
    pub to: EthAddress,
    /// The exact amount.
    pub amount: UsdcAmount,
}

/// Sending and verifying USDC payments.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Transfer USDC to `to`; resolves to the transaction hash once mined.
    async fn send(&self, to: &EthAddress, amount: &UsdcAmount) -> Result<TxHash, PaymentError>;

    /// Check that `tx_hash` is a successful USDC transfer matching
    /// `expected` in sender, recipient, and amount.
    async fn verify(
        &self,
        tx_hash: &TxHash,
        expected: &ExpectedPayment,
    ) -> Result<bool, PaymentError>;

    /// USDC balance of an address.
    async fn balance_of(&self, address: &EthAddress) -> Result<UsdcAmount, PaymentError>;
}

/// Errors from the payment path.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The RPC endpoint could not be reached or rejected the request.
    #[error("RPC transport failure: {0}")]
    Rpc(String),
    /// A contract call failed.
    #[error("Contract call failed: {0}")]
    ContractCall(String),
    /// A token amount does not fit the USDC range.
    #[error("Token amount out of USDC range")]
    AmountOutOfRange,
}

impl CodedError for PaymentError {
    fn code(&self) -> ErrorCode {
        match self {
            PaymentError::Rpc(_) => ErrorCode::NetworkError,
            PaymentError::ContractCall(_) => ErrorCode::NetworkError,
            PaymentError::AmountOutOfRange => ErrorCode::InvalidRequestParams,
        }
    }
}

/// [`PaymentService`] against a real EVM RPC endpoint.
///
/// Holds an erased alloy provider composed with the caller's wallet, and
/// the known USDC deployment for the configured network.
#[derive(Debug, Clone)]
pub struct UsdcPaymentService {
    provider: DynProvider,
    usdc: &'static UsdcDeployment,
}

impl UsdcPaymentService {
    /// Connect a payment service for `network` through `rpc_url`, sending
    /// from `signer`'s address.
    pub fn connect(signer: PrivateKeySigner, rpc_url: Url, network: Network) -> Self {
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(rpc_url)
            .erased();
        UsdcPaymentService {
            provider,
            usdc: UsdcDeployment::by_network(network),
        }
    }
}

#[async_trait]
impl PaymentService for UsdcPaymentService {
    #[tracing::instrument(skip_all, fields(to = %to, amount = %amount))]
    async fn send(&self, to: &EthAddress, amount: &UsdcAmount) -> Result<TxHash, PaymentError> {
        let contract = Usdc::new(self.usdc.address, self.provider.clone());
        let value = U256::from(amount.micros());
        let pending = contract
            .transfer(to.0, value)
            .send()
            .await
            .map_err(|e| PaymentError::ContractCall(e.to_string()))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| PaymentError::Rpc(e.to_string()))?;
        tracing::info!(tx = %receipt.transaction_hash, "USDC transfer mined");
        Ok(TxHash(receipt.transaction_hash))
    }

    #[tracing::instrument(skip_all, fields(tx = %tx_hash))]
    async fn verify(
        &self,
        tx_hash: &TxHash,
        expected: &ExpectedPayment,
    ) -> Result<bool, PaymentError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash.0)
            .await
            .map_err(|e| PaymentError::Rpc(e.to_string()))?;
        let Some(receipt) = receipt else {
            tracing::warn!("No receipt for claimed payment transaction");
            return Ok(false);
        };
        if !receipt.status() {
            tracing::warn!("Claimed payment transaction reverted");
            return Ok(false);
        }
        let expected_value = U256::from(expected.amount.micros());
        let matched = receipt.logs().iter().any(|log| {
            if log.address() != self.usdc.address {
                return false;
            }
            match log.log_decode::<Usdc::Transfer>() {
                Ok(decoded) => {
                    let transfer = decoded.inner.data;
                    transfer.from == expected.from.0
                        && transfer.to == expected.to.0
                        && transfer.value == expected_value
                }
                Err(_) => false,
            }
        });
        if !matched {
            tracing::warn!("Transaction has no matching USDC Transfer log");
        }
        Ok(matched)
    }

    async fn balance_of(&self, address: &EthAddress) -> Result<UsdcAmount, PaymentError> {
        let contract = Usdc::new(self.usdc.address, self.provider.clone());
        let balance = contract
            .balanceOf(address.0)
            .call()
            .await
            .map_err(|e| PaymentError::ContractCall(e.to_string()))?;
        let micros: u64 = balance.try_into().map_err(|_| PaymentError::AmountOutOfRange)?;
        Ok(UsdcAmount::from_micros(micros))
    }
}

pub mod mock {
    //! An in-process ledger standing in for the chain.
    //!
    //! Test scenarios need to count `send` calls, make verification agree
    //! with what was actually sent, and inject failures. The mock records
    //! every transfer keyed by a deterministic transaction hash and
    //! verifies claims against that record, the way the real service
    //! verifies against receipt logs.

    use super::*;
    use alloy_primitives::B256;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// A recorded transfer.
    #[derive(Debug, Clone)]
    pub struct RecordedTransfer {
        pub from: EthAddress,
        pub to: EthAddress,
        pub amount: UsdcAmount,
    }

    /// Deterministic [`PaymentService`] double backed by a transfer ledger.
    #[derive(Debug)]
    pub struct MockPaymentService {
        sender: EthAddress,
        transfers: DashMap<TxHash, RecordedTransfer>,
        send_count: AtomicU64,
        fail_next_send: AtomicBool,
        force_verify_failure: AtomicBool,
    }

    impl MockPaymentService {
        /// A mock whose sends originate from `sender`.
        pub fn new(sender: EthAddress) -> Self {
            MockPaymentService {
                sender,
                transfers: DashMap::new(),
                send_count: AtomicU64::new(0),
                fail_next_send: AtomicBool::new(false),
                force_verify_failure: AtomicBool::new(false),
            }
        }

        /// How many transfers have been sent.
        pub fn send_count(&self) -> u64 {
            self.send_count.load(Ordering::SeqCst)
        }

        /// Make the next `send` fail with an RPC error.
        pub fn fail_next_send(&self) {
            self.fail_next_send.store(true, Ordering::SeqCst);
        }

        /// Make every `verify` return `false` regardless of the ledger.
        pub fn force_verify_failure(&self) {
            self.force_verify_failure.store(true, Ordering::SeqCst);
        }

        /// Record a transfer under an externally chosen hash, as if some
        /// other wallet had paid on-chain.
        pub fn seed_transfer(&self, tx_hash: TxHash, transfer: RecordedTransfer) {
            self.transfers.insert(tx_hash, transfer);
        }
    }

    #[async_trait]
    impl PaymentService for MockPaymentService {
        async fn send(
            &self,
            to: &EthAddress,
            amount: &UsdcAmount,
        ) -> Result<TxHash, PaymentError> {
            if self.fail_next_send.swap(false, Ordering::SeqCst) {
                return Err(PaymentError::Rpc("injected send failure".to_string()));
            }
            let seq = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;
            let tx_hash = TxHash(deterministic_hash(seq));
            self.transfers.insert(
                tx_hash,
                RecordedTransfer {
                    from: self.sender,
                    to: *to,
                    amount: *amount,
                },
            );
            Ok(tx_hash)
        }

        async fn verify(
            &self,
            tx_hash: &TxHash,
            expected: &ExpectedPayment,
        ) -> Result<bool, PaymentError> {
            if self.force_verify_failure.load(Ordering::SeqCst) {
                return Ok(false);
            }
            Ok(self
                .transfers
                .get(tx_hash)
                .map(|t| {
                    t.from == expected.from && t.to == expected.to && t.amount == expected.amount
                })
                .unwrap_or(false))
        }

        async fn balance_of(&self, _address: &EthAddress) -> Result<UsdcAmount, PaymentError> {
            Ok(UsdcAmount::from_usdc(1_000))
        }
    }

    fn deterministic_hash(seq: u64) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&seq.to_be_bytes());
        B256::from(bytes)
    }
}
