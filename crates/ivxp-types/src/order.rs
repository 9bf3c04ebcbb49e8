//! Orders, deliverables, and the order status state machine.
//!
//! The provider exclusively owns [`Order`] and [`Deliverable`] state; the
//! client only ever holds a projection derived from wire replies. Status
//! moves over a fixed DAG, and every transition outside it is rejected by
//! the stores.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

use crate::amount::UsdcAmount;
use crate::hash::ContentHash;
use crate::network::Network;
use crate::timestamp::Timestamp;

/// An opaque order identifier in the form `ivxp-<UUIDv4>`.
///
/// Order ids are embedded verbatim into pipe-delimited signed messages, so
/// an id may never be empty or contain the `|` separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderId(String);

impl OrderId {
    /// Generate a fresh globally unique order id.
    pub fn generate() -> Self {
        OrderId(format!("ivxp-{}", Uuid::new_v4()))
    }

    /// Validate and wrap an externally supplied order id.
    pub fn new(id: impl Into<String>) -> Result<Self, OrderIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(OrderIdError::Empty);
        }
        if id.contains('|') {
            return Err(OrderIdError::PipeCharacter);
        }
        Ok(OrderId(id))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Errors for malformed order ids.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderIdError {
    /// The id is the empty string.
    #[error("Order id must not be empty")]
    Empty,
    /// The id contains the `|` signed-message separator.
    #[error("Order id must not contain '|'")]
    PipeCharacter,
}

impl Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = OrderIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderId::new(s)
    }
}

impl Serialize for OrderId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for OrderId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        OrderId::new(s).map_err(serde::de::Error::custom)
    }
}

/// A 20-byte EVM address, serialized as its EIP-55 checksummed hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EthAddress(pub Address);

impl EthAddress {
    /// Whether this is the all-zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == Address::ZERO
    }
}

/// Error returned when parsing a malformed EVM address.
#[derive(Debug, thiserror::Error)]
#[error("Invalid EVM address: expected 0x followed by 40 hex characters")]
pub struct EthAddressError;

impl FromStr for EthAddress {
    type Err = EthAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with("0x") || s.len() != 42 {
            return Err(EthAddressError);
        }
        s.parse::<Address>().map(EthAddress).map_err(|_| EthAddressError)
    }
}

impl Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_checksum(None))
    }
}

impl From<Address> for EthAddress {
    fn from(address: Address) -> Self {
        EthAddress(address)
    }
}

impl From<EthAddress> for Address {
    fn from(address: EthAddress) -> Self {
        address.0
    }
}

impl Serialize for EthAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EthAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32-byte transaction hash, serialized as lowercase `0x`-prefixed hex.
///
/// Parsing is case-insensitive; the canonical form is lowercase, which is
/// what the replay-protection set folds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub B256);

/// Error returned when parsing a malformed transaction hash.
#[derive(Debug, thiserror::Error)]
#[error("Invalid transaction hash: expected 0x followed by 64 hex characters")]
pub struct TxHashError;

impl FromStr for TxHash {
    type Err = TxHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with("0x") || s.len() != 66 {
            return Err(TxHashError);
        }
        s.parse::<B256>().map(TxHash).map_err(|_| TxHashError)
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<B256> for TxHash {
    fn from(hash: B256) -> Self {
        TxHash(hash)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle status of an order.
///
/// ```text
/// quoted --(valid pay+sig)--> paid --(handler start)--> processing
///   processing --(ok, no push || push 2xx)--> delivered
///   processing --(handler error || push non-2xx || SSRF reject)--> delivery_failed
/// delivered --(valid confirm sig)--> confirmed    (terminal)
/// delivery_failed                                 (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order created, awaiting payment.
    Quoted,
    /// Payment verified, awaiting processing.
    Paid,
    /// The service handler is running.
    Processing,
    /// Deliverable produced and (if requested) pushed successfully.
    Delivered,
    /// Handler error or push failure; any stored deliverable stays pullable.
    DeliveryFailed,
    /// Client signed off on the delivery.
    Confirmed,
}

impl OrderStatus {
    /// Whether the status admits no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::DeliveryFailed)
    }

    /// Whether the state machine admits a transition from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Quoted, Paid)
                | (Paid, Processing)
                | (Processing, Delivered)
                | (Processing, DeliveryFailed)
                | (Delivered, Confirmed)
        )
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Quoted => "quoted",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Delivered => "delivered",
            OrderStatus::DeliveryFailed => "delivery_failed",
            OrderStatus::Confirmed => "confirmed",
        };
        write!(f, "{s}")
    }
}

/// The provider-side record of a single service transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Immutable globally unique id, `ivxp-<UUIDv4>`.
    pub id: OrderId,
    /// The requested service type.
    pub service_type: String,
    /// The paying client's wallet address.
    pub client_address: EthAddress,
    /// The provider wallet payment must reach.
    pub payment_address: EthAddress,
    /// Quoted price.
    pub price_usdc: UsdcAmount,
    /// Settlement network.
    pub network: Network,
    /// Creation time.
    pub created_at: Timestamp,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// On-chain payment hash; set exactly once at `paid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    /// Hash of the stored deliverable; set when and only when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
    /// Client callback for push delivery, stashed at `paid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_endpoint: Option<Url>,
    /// Set on the `delivered → confirmed` transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<Timestamp>,
}

/// Deliverable content, textual or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// UTF-8 text (including serialized JSON).
    Text(String),
    /// Raw bytes; base64-encoded on the wire.
    Binary(Vec<u8>),
}

impl Content {
    /// The content's byte representation, as hashed and transported.
    pub fn as_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Content::Text(text) => Cow::Borrowed(text.as_bytes()),
            Content::Binary(bytes) => Cow::Borrowed(bytes),
        }
    }

    /// Whether the content needs base64 transport encoding.
    pub fn is_binary(&self) -> bool {
        matches!(self, Content::Binary(_))
    }

    /// SHA-256 of the content bytes.
    pub fn hash(&self) -> ContentHash {
        ContentHash::of_bytes(&self.as_bytes())
    }
}

/// The produced output bound to an order. Immutable after insertion.
#[derive(Debug, Clone)]
pub struct Deliverable {
    /// The produced content.
    pub content: Content,
    /// MIME type of the content.
    pub content_type: String,
    /// SHA-256 of the content bytes.
    pub content_hash: ContentHash,
    /// Insertion time.
    pub created_at: Timestamp,
}

impl Deliverable {
    /// Build a deliverable from content, computing its hash.
    pub fn new(content: Content, content_type: impl Into<String>) -> Self {
        let content_hash = content.hash();
        Deliverable {
            content,
            content_type: content_type.into(),
            content_hash,
            created_at: Timestamp::now(),
        }
    }
}
