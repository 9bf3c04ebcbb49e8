//! EVM integration for the IVXP protocol.
//!
//! Two services live here, both behind traits so runtimes can inject
//! alternates (hardware signers, test doubles):
//!
//! - [`crypto`] — EIP-191 personal-message signing and verification over a
//!   held secp256k1 private key. All IVXP payment and confirmation messages
//!   are signed this way.
//! - [`payment`] — USDC transfers and on-chain verification that a given
//!   transaction actually moved the expected amount between the expected
//!   addresses, via the token's `Transfer` log.

pub mod crypto;
pub mod payment;

pub use crypto::{CryptoService, EvmCryptoService};
pub use payment::{ExpectedPayment, PaymentService, UsdcPaymentService};
