//! Provider runtime for the [IVXP/1.0 protocol](https://ivxp.dev).
//!
//! This crate implements the provider side of IVXP: an HTTP server that
//! advertises services, quotes prices, verifies USDC payments on-chain,
//! executes registered service handlers, and delivers the hashed output by
//! pull (download endpoint) or push (client callback).
//!
//! # Overview
//!
//! A client drives an order through a fixed lifecycle:
//!
//! ```text
//! quoted --(valid pay+sig)--> paid --(handler start)--> processing
//!   processing --(ok, no push || push 2xx)--> delivered
//!   processing --(handler error || push non-2xx || SSRF reject)--> delivery_failed
//! delivered --(valid confirm sig)--> confirmed    (terminal)
//! delivery_failed                                 (terminal)
//! ```
//!
//! The runtime owns all order and deliverable state through pluggable
//! stores, keeps a process-wide used-tx-hash set for replay protection, and
//! processes each paid order on its own background task.
//!
//! # Modules
//!
//! - [`config`] — Provider configuration: wallet, services, network, binding.
//! - [`error`] — Provider error surface and HTTP status mapping.
//! - [`handler`] — The [`ServiceHandler`](handler::ServiceHandler) trait and registry.
//! - [`http`] — Axum routes for the IVXP/1.0 HTTP surface.
//! - [`provider`] — Order lifecycle: quoting, payment acceptance, processing, delivery.
//! - [`server`] — Listener binding and graceful shutdown.
//! - [`ssrf`] — Push-delivery target hardening.
//! - [`store`] — Order and deliverable store traits with in-memory defaults.
//!
//! # Example
//!
//! ```rust,ignore
//! use ivxp_rs::config::{ProviderConfig, ServiceDefinition};
//! use ivxp_rs::handler::EchoHandler;
//! use ivxp_rs::provider::Provider;
//! use ivxp_rs::server::ProviderServer;
//!
//! let config = ProviderConfig::from_env()?;
//! let provider = Provider::builder(config)
//!     .handler("echo", EchoHandler)
//!     .build()?;
//! let server = ProviderServer::start(provider.into()).await?;
//! println!("IVXP provider at http://{}", server.local_addr());
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod provider;
pub mod server;
pub mod ssrf;
pub mod store;
