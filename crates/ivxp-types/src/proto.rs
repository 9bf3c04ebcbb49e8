//! IVXP/1.0 wire messages.
//!
//! Every message carries `protocol: "IVXP/1.0"`, a `message_type`, and an
//! ISO-8601 `timestamp`. Keys are snake_case on the wire; the structs below
//! are the single schema layer where validation happens, so internal code
//! only ever sees the typed domain representation.
//!
//! # Signed message formats
//!
//! Two strings are signed with EIP-191 personal_sign and re-verified by the
//! provider, byte-for-byte:
//!
//! - Payment: `Order: {order_id} | Payment: {tx_hash} | Timestamp: {timestamp}`
//! - Confirmation: `Confirm delivery: {order_id} | Timestamp: {timestamp}`
//!
//! Built by [`payment_message`] and [`confirmation_message`]; never
//! reassemble them ad hoc.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::amount::UsdcAmount;
use crate::hash::ContentHash;
use crate::lit_str;
use crate::network::Network;
use crate::order::{Content, Deliverable, EthAddress, OrderId, OrderStatus, TxHash};
use crate::timestamp::Timestamp;
use crate::util::Base64Bytes;

lit_str!(ProtocolVersion, "IVXP/1.0");
lit_str!(AcceptedStatus, "accepted");
lit_str!(ConfirmedStatus, "confirmed");

/// Discriminator carried in every message's `message_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ServiceCatalog,
    ServiceRequest,
    ServiceQuote,
    DeliveryRequest,
    DeliveryAccepted,
    OrderStatus,
    DeliveryResponse,
    DeliveryPush,
    DeliveryConfirmation,
    ConfirmationResponse,
}

/// The exact string a client signs to prove a payment.
pub fn payment_message(order_id: &OrderId, tx_hash: &TxHash, timestamp: &Timestamp) -> String {
    format!("Order: {order_id} | Payment: {tx_hash} | Timestamp: {timestamp}")
}

/// The exact string a client signs to confirm a delivery.
pub fn confirmation_message(order_id: &OrderId, timestamp: &Timestamp) -> String {
    format!("Confirm delivery: {order_id} | Timestamp: {timestamp}")
}

/// One advertised service in a provider's catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceListing {
    /// The service type key clients request by.
    #[serde(rename = "type")]
    pub service_type: String,
    /// Price before any per-request adjustment.
    pub base_price_usdc: UsdcAmount,
    /// Estimated hours until delivery.
    pub estimated_delivery_hours: u32,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `GET /ivxp/catalog` response: the provider's advertised services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCatalog {
    pub protocol: ProtocolVersion,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    /// Provider display name.
    pub provider: String,
    /// Provider wallet receiving payments.
    pub wallet_address: EthAddress,
    /// Advertised services.
    pub services: Vec<ServiceListing>,
}

/// The requesting agent's identity inside a [`ServiceRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAgent {
    pub name: String,
    /// The wallet that will pay; also the address signatures verify against.
    pub wallet_address: EthAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_endpoint: Option<Url>,
}

/// What the client wants done, inside a [`ServiceRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequestBody {
    /// The service type to quote.
    #[serde(rename = "type")]
    pub service_type: String,
    /// Free-form task description for the handler.
    pub description: String,
    /// The client's spending ceiling; quotes above it are refused client-side.
    pub budget_usdc: UsdcAmount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Timestamp>,
}

/// `POST /ivxp/request` body: ask the provider for a quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub protocol: ProtocolVersion,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    pub client_agent: ClientAgent,
    pub service_request: ServiceRequestBody,
}

/// The quoting agent's identity inside a [`ServiceQuote`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAgent {
    pub name: String,
    pub wallet_address: EthAddress,
}

/// Price and payment terms inside a [`ServiceQuote`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteBody {
    pub price_usdc: UsdcAmount,
    /// When the provider expects to deliver.
    pub estimated_delivery: Timestamp,
    /// Where the USDC transfer must go.
    pub payment_address: EthAddress,
    pub network: Network,
}

/// `POST /ivxp/request` response: a priced offer bound to a fresh order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceQuote {
    pub protocol: ProtocolVersion,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    pub order_id: OrderId,
    pub provider_agent: ProviderAgent,
    pub quote: QuoteBody,
}

/// On-chain evidence inside a [`DeliveryRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProof {
    pub tx_hash: TxHash,
    /// The sender the transfer log must name.
    pub from_address: EthAddress,
    pub network: Network,
}

/// `POST /ivxp/orders/{id}/payment` body: claim an order as paid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub protocol: ProtocolVersion,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    pub order_id: OrderId,
    pub payment_proof: PaymentProof,
    /// EIP-191 signature over `signed_message`, 0x-prefixed hex.
    pub signature: String,
    /// The exact payment message that was signed.
    pub signed_message: String,
    /// Optional push-delivery callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_endpoint: Option<Url>,
}

/// Payment acceptance reply; processing continues asynchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAccepted {
    pub protocol: ProtocolVersion,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    pub order_id: OrderId,
    pub status: AcceptedStatus,
    pub message: String,
    /// SSE stream for status updates, when the provider offers one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<Url>,
}

/// `GET /ivxp/orders/{id}` response: the order as the provider sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusMessage {
    pub protocol: ProtocolVersion,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    pub order_id: OrderId,
    pub status: OrderStatus,
    /// The order's service type.
    pub service: String,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
}

/// Transport encoding marker for binary deliverable content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    Base64,
}

/// `GET /ivxp/orders/{id}/deliverable` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResponse {
    pub protocol: ProtocolVersion,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    pub order_id: OrderId,
    /// The content; base64 when `content_encoding` says so.
    pub content: String,
    pub content_type: String,
    pub content_hash: ContentHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<ContentEncoding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl DeliveryResponse {
    /// Build a response from a stored deliverable, base64-encoding binary.
    pub fn from_deliverable(order_id: OrderId, deliverable: &Deliverable) -> Self {
        let (content, content_encoding) = encode_content(&deliverable.content);
        DeliveryResponse {
            protocol: ProtocolVersion,
            message_type: MessageType::DeliveryResponse,
            timestamp: Timestamp::now(),
            order_id,
            content,
            content_type: deliverable.content_type.clone(),
            content_hash: deliverable.content_hash.clone(),
            content_encoding,
            file_name: None,
        }
    }

    /// Recover the transported content, decoding base64 when flagged.
    pub fn decode_content(&self) -> Result<Content, base64::DecodeError> {
        decode_content(&self.content, self.content_encoding)
    }
}

/// The deliverable envelope inside a [`DeliveryPush`].
///
/// The callback contract requires `content_hash` and `format`; the hash is
/// recomputed receiver-side over the decoded content before anything else
/// happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushDeliverable {
    /// The content; base64 when `content_encoding` says so.
    pub content: String,
    /// MIME type of the content.
    pub format: String,
    pub content_hash: ContentHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<ContentEncoding>,
}

/// `POST {delivery_endpoint}` body: push delivery to the client callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPush {
    pub protocol: ProtocolVersion,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    pub order_id: OrderId,
    pub deliverable: PushDeliverable,
}

impl DeliveryPush {
    /// Build a push body from a stored deliverable, base64-encoding binary.
    pub fn from_deliverable(order_id: OrderId, deliverable: &Deliverable) -> Self {
        let (content, content_encoding) = encode_content(&deliverable.content);
        DeliveryPush {
            protocol: ProtocolVersion,
            message_type: MessageType::DeliveryPush,
            timestamp: Timestamp::now(),
            order_id,
            deliverable: PushDeliverable {
                content,
                format: deliverable.content_type.clone(),
                content_hash: deliverable.content_hash.clone(),
                content_encoding,
            },
        }
    }
}

impl PushDeliverable {
    /// Recover the transported content, decoding base64 when flagged.
    pub fn decode_content(&self) -> Result<Content, base64::DecodeError> {
        decode_content(&self.content, self.content_encoding)
    }
}

/// Signed confirmation inside a [`DeliveryConfirmation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationBody {
    /// The exact confirmation message that was signed.
    pub message: String,
    /// EIP-191 signature over `message`, 0x-prefixed hex.
    pub signature: String,
    /// The address that signed; must match the order's client.
    pub signer: EthAddress,
}

/// `POST /ivxp/orders/{id}/confirm` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfirmation {
    pub protocol: ProtocolVersion,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    pub order_id: OrderId,
    pub confirmation: ConfirmationBody,
}

/// `POST /ivxp/orders/{id}/confirm` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub protocol: ProtocolVersion,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    pub status: ConfirmedStatus,
    pub confirmed_at: Timestamp,
}

fn encode_content(content: &Content) -> (String, Option<ContentEncoding>) {
    match content {
        Content::Text(text) => (text.clone(), None),
        Content::Binary(bytes) => (
            Base64Bytes::encode(bytes).to_string(),
            Some(ContentEncoding::Base64),
        ),
    }
}

fn decode_content(
    content: &str,
    encoding: Option<ContentEncoding>,
) -> Result<Content, base64::DecodeError> {
    match encoding {
        None => Ok(Content::Text(content.to_string())),
        Some(ContentEncoding::Base64) => {
            let bytes = Base64Bytes(content.as_bytes().into()).decode()?;
            Ok(Content::Binary(bytes))
        }
    }
}
