//! Utility types shared across the IVXP crates.

pub mod b64;
pub mod lit_str;

pub use b64::Base64Bytes;
