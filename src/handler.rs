//! Service handlers: the pluggable work behind each advertised service.
//!
//! A provider registers one handler per service type. When an order reaches
//! `paid`, the runtime invokes the handler on a background task; whatever it
//! returns is hashed, stored, and delivered. A handler error marks the
//! order `delivery_failed` and never takes the provider down.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use ivxp_types::order::{Content, Order};

/// What a handler produced for an order.
#[derive(Debug, Clone)]
pub struct HandlerOutput {
    /// The deliverable content.
    pub content: Content,
    /// MIME type of the content.
    pub content_type: String,
}

impl HandlerOutput {
    /// Convenience for JSON outputs.
    pub fn json(value: &serde_json::Value) -> Self {
        HandlerOutput {
            content: Content::Text(value.to_string()),
            content_type: "application/json".to_string(),
        }
    }
}

/// Error raised by a service handler.
///
/// The message is logged server-side only; clients observe a
/// `delivery_failed` order.
#[derive(Debug, thiserror::Error)]
#[error("Handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError(message.into())
    }
}

/// The work behind a service type.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Produce the deliverable for a paid order.
    async fn execute(&self, order: &Order) -> Result<HandlerOutput, HandlerError>;
}

/// Registry mapping service types to their handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a service type, replacing any previous one.
    pub fn register<H>(&mut self, service_type: impl Into<String>, handler: H)
    where
        H: ServiceHandler + 'static,
    {
        self.handlers.insert(service_type.into(), Arc::new(handler));
    }

    /// Look up the handler for a service type.
    pub fn get(&self, service_type: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers.get(service_type).cloned()
    }

    /// Registered service types.
    pub fn service_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Built-in handler that echoes the order back as JSON.
///
/// Useful for smoke tests and as the reference handler shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl ServiceHandler for EchoHandler {
    async fn execute(&self, order: &Order) -> Result<HandlerOutput, HandlerError> {
        let body = json!({
            "echo": order.service_type,
            "orderId": order.id.as_str(),
        });
        Ok(HandlerOutput::json(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivxp_types::amount::UsdcAmount;
    use ivxp_types::network::Network;
    use ivxp_types::order::{EthAddress, OrderId, OrderStatus};
    use ivxp_types::timestamp::Timestamp;

    fn paid_order() -> Order {
        Order {
            id: OrderId::generate(),
            service_type: "echo".to_string(),
            client_address: EthAddress(alloy_primitives::Address::repeat_byte(0x11)),
            payment_address: EthAddress(alloy_primitives::Address::repeat_byte(0x22)),
            price_usdc: UsdcAmount::from_usdc(5),
            network: Network::BaseSepolia,
            created_at: Timestamp::now(),
            status: OrderStatus::Paid,
            tx_hash: None,
            content_hash: None,
            delivery_endpoint: None,
            confirmed_at: None,
        }
    }

    #[tokio::test]
    async fn test_echo_handler_output() {
        let order = paid_order();
        let output = EchoHandler.execute(&order).await.unwrap();
        assert_eq!(output.content_type, "application/json");
        let Content::Text(text) = &output.content else {
            panic!("echo output should be text");
        };
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["echo"], "echo");
        assert_eq!(value["orderId"], order.id.as_str());
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", EchoHandler);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("translate").is_none());
        assert_eq!(registry.service_types().collect::<Vec<_>>(), vec!["echo"]);
    }
}
