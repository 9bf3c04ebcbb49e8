//! Core types for the IVXP/1.0 protocol.
//!
//! This crate provides the foundational types shared by the IVXP provider
//! runtime and the client SDK: wire message definitions, the order and
//! deliverable data model, fixed-point USDC amounts, ISO-8601 timestamps,
//! SHA-256 content hashing, and the coded error taxonomy.
//!
//! # Overview
//!
//! IVXP (the Inter-agent Value Exchange Protocol) lets a paying **Client**
//! drive a **Provider** through a quote → pay → execute → deliver → confirm
//! lifecycle. Payments settle in USDC on an EVM L2, authorization messages
//! are EIP-191 signed, and deliverables are bound to their order through a
//! SHA-256 content hash.
//!
//! # Modules
//!
//! - [`amount`] - Fixed-point USDC amounts with the 6-fractional-digit wire format
//! - [`error`] - The coded error taxonomy shared across the runtime
//! - [`hash`] - SHA-256 content hashing, including canonical-JSON hashing
//! - [`network`] - Supported networks and known USDC deployments
//! - [`order`] - Orders, order ids, status state machine, deliverables
//! - [`proto`] - IVXP/1.0 wire messages and signed-message formats
//! - [`timestamp`] - ISO-8601 timestamps with offset-tolerant parsing
//! - [`util`] - Helper types (base64 payloads, literal string markers)

pub mod amount;
pub mod error;
pub mod hash;
pub mod network;
pub mod order;
pub mod proto;
pub mod timestamp;
pub mod util;
