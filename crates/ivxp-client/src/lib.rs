//! Client SDK for the [IVXP/1.0 protocol](https://ivxp.dev).
//!
//! The SDK drives a provider through the full order lifecycle in one call:
//! quote → pay → wait → download → confirm, with a budget guard before any
//! on-chain action, exponential-backoff status polling with SSE fallback,
//! client-side content-hash verification, partial-success recovery, and an
//! optional callback server for push delivery.
//!
//! # Quickstart
//!
//! ```rust,ignore
//! use ivxp_client::{ClientConfig, IvxpClient, RequestServiceParams};
//! use ivxp_types::amount::UsdcAmount;
//! use ivxp_types::network::Network;
//!
//! let config = ClientConfig::new("0x...", Network::BaseSepolia)
//!     .with_rpc_url("https://sepolia.base.org".parse()?);
//! let client = IvxpClient::builder(config).build()?;
//!
//! let outcome = client
//!     .request_service(
//!         RequestServiceParams::new(
//!             "http://provider.example.com".parse()?,
//!             "echo",
//!             "say it back",
//!             UsdcAmount::from_usdc(10),
//!         ),
//!         Default::default(),
//!     )
//!     .await?;
//! println!("confirmed order {}", outcome.order_id);
//! ```
//!
//! # Modules
//!
//! - [`callback`] — HTTP endpoint receiving push deliveries, with hash verification
//! - [`client`] — The orchestrator and the five individual step operations
//! - [`error`] — Coded client errors, including budget/partial-success/timeout composites
//! - [`events`] — Typed, failure-isolated in-process event bus
//! - [`http`] — JSON transport with error classification
//! - [`poll`] — Exponential backoff + jitter + cancellation polling engine
//! - [`sse`] — Reconnecting server-sent-events consumer with a retry budget

pub mod callback;
pub mod client;
pub mod error;
pub mod events;
pub mod http;
pub mod poll;
pub mod sse;

pub use client::{
    ClientConfig, IvxpClient, IvxpClientBuilder, PaymentReceipt, ProgressCallbacks,
    RequestServiceParams, ServiceOutcome,
};
pub use error::{ClientError, Step};
pub use events::{Event, EventEmitter, EventType};
