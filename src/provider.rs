//! The provider order lifecycle.
//!
//! [`Provider`] owns all order and deliverable state and exposes one method
//! per protocol operation. The payment acceptance pipeline is the security
//! boundary of the runtime: every check must pass, in order, before any
//! state changes, and a failed request leaves nothing behind.
//!
//! Paid orders are processed on background tasks tracked by a
//! [`TaskTracker`], so shutdown can drain in-flight work. All mutation of a
//! single order happens either in the accepting request or on that order's
//! task, serialized through the store.

use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use ivxp_evm::crypto::{CryptoService, EvmCryptoService};
use ivxp_evm::payment::{ExpectedPayment, PaymentService, UsdcPaymentService};
use ivxp_types::order::{Deliverable, EthAddress, Order, OrderId, OrderStatus, TxHash};
use ivxp_types::proto::{
    AcceptedStatus, ConfirmationResponse, ConfirmedStatus, DeliveryAccepted, DeliveryConfirmation,
    DeliveryPush, DeliveryRequest, DeliveryResponse, MessageType, OrderStatusMessage,
    ProtocolVersion, ProviderAgent, QuoteBody, ServiceCatalog, ServiceListing, ServiceQuote,
    ServiceRequest,
};
use ivxp_types::timestamp::Timestamp;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::handler::{HandlerRegistry, ServiceHandler};
use crate::ssrf::validate_delivery_url;
use crate::store::{
    DeliverableStore, InMemoryDeliverableStore, InMemoryOrderStore, OrderPatch, OrderStore,
};

/// The provider runtime. Construct through [`Provider::builder`].
pub struct Provider {
    config: ProviderConfig,
    crypto: Arc<dyn CryptoService>,
    payments: Arc<dyn PaymentService>,
    orders: Arc<dyn OrderStore>,
    deliverables: Arc<dyn DeliverableStore>,
    handlers: HandlerRegistry,
    used_tx_hashes: DashSet<TxHash>,
    push_client: reqwest::Client,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

/// Wires a [`Provider`] with injectable services and stores.
pub struct ProviderBuilder {
    config: ProviderConfig,
    crypto: Option<Arc<dyn CryptoService>>,
    payments: Option<Arc<dyn PaymentService>>,
    orders: Option<Arc<dyn OrderStore>>,
    deliverables: Option<Arc<dyn DeliverableStore>>,
    handlers: HandlerRegistry,
}

impl Provider {
    /// Start building a provider from its configuration.
    pub fn builder(config: ProviderConfig) -> ProviderBuilder {
        ProviderBuilder {
            config,
            crypto: None,
            payments: None,
            orders: None,
            deliverables: None,
            handlers: HandlerRegistry::new(),
        }
    }
}

impl ProviderBuilder {
    /// Inject a crypto service instead of deriving one from the config key.
    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoService>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// Inject a payment service instead of connecting to the config RPC.
    pub fn with_payments(mut self, payments: Arc<dyn PaymentService>) -> Self {
        self.payments = Some(payments);
        self
    }

    /// Inject an order store instead of the in-memory default.
    pub fn with_order_store(mut self, orders: Arc<dyn OrderStore>) -> Self {
        self.orders = Some(orders);
        self
    }

    /// Inject a deliverable store instead of the in-memory default.
    pub fn with_deliverable_store(mut self, deliverables: Arc<dyn DeliverableStore>) -> Self {
        self.deliverables = Some(deliverables);
        self
    }

    /// Register the handler executing a service type.
    pub fn handler<H>(mut self, service_type: impl Into<String>, handler: H) -> Self
    where
        H: ServiceHandler + 'static,
    {
        self.handlers.register(service_type, handler);
        self
    }

    /// Validate the configuration and assemble the runtime.
    pub fn build(self) -> Result<Provider, ProviderError> {
        self.config.validate()?;
        let crypto: Arc<dyn CryptoService> = match self.crypto {
            Some(crypto) => crypto,
            None => Arc::new(
                EvmCryptoService::from_private_key(&self.config.private_key)
                    .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?,
            ),
        };
        let payments: Arc<dyn PaymentService> = match self.payments {
            Some(payments) => payments,
            None => {
                let rpc_url = self.config.rpc_url.clone().ok_or_else(|| {
                    ProviderError::InvalidConfig(
                        "rpc_url is required unless a payment service is injected".to_string(),
                    )
                })?;
                let signer = EvmCryptoService::from_private_key(&self.config.private_key)
                    .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?
                    .signer()
                    .clone();
                Arc::new(UsdcPaymentService::connect(
                    signer,
                    rpc_url,
                    self.config.network,
                ))
            }
        };
        for service in &self.config.services {
            if self.handlers.get(&service.service_type).is_none() {
                return Err(ProviderError::InvalidConfig(format!(
                    "no handler registered for advertised service '{}'",
                    service.service_type
                )));
            }
        }
        Ok(Provider {
            config: self.config,
            crypto,
            payments,
            orders: self
                .orders
                .unwrap_or_else(|| Arc::new(InMemoryOrderStore::new())),
            deliverables: self
                .deliverables
                .unwrap_or_else(|| Arc::new(InMemoryDeliverableStore::new())),
            handlers: self.handlers,
            used_tx_hashes: DashSet::new(),
            push_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }
}

impl Provider {
    /// The provider wallet address payments must reach.
    pub fn wallet_address(&self) -> EthAddress {
        self.crypto.address()
    }

    /// The runtime configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Tracker for background order tasks; the server waits on it at stop.
    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Token cancelled when the server shuts down.
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// `GET /ivxp/catalog`: the advertised services.
    pub fn catalog(&self) -> ServiceCatalog {
        ServiceCatalog {
            protocol: ProtocolVersion,
            message_type: MessageType::ServiceCatalog,
            timestamp: Timestamp::now(),
            provider: self.config.provider_name.clone(),
            wallet_address: self.wallet_address(),
            services: self
                .config
                .services
                .iter()
                .map(|s| ServiceListing {
                    service_type: s.service_type.clone(),
                    base_price_usdc: s.base_price_usdc,
                    estimated_delivery_hours: s.estimated_delivery_hours,
                    description: s.description.clone(),
                })
                .collect(),
        }
    }

    /// `POST /ivxp/request`: price a service request and open an order.
    #[tracing::instrument(skip_all, fields(service = %request.service_request.service_type))]
    pub async fn request_quote(
        &self,
        request: ServiceRequest,
    ) -> Result<ServiceQuote, ProviderError> {
        let service_type = request.service_request.service_type.as_str();
        if service_type.is_empty() {
            return Err(ProviderError::MissingFields(
                "service_request.type".to_string(),
            ));
        }
        let service = self
            .config
            .service(service_type)
            .ok_or_else(|| ProviderError::ServiceNotFound(service_type.to_string()))?;

        let now = Timestamp::now();
        let order = Order {
            id: OrderId::generate(),
            service_type: service.service_type.clone(),
            client_address: request.client_agent.wallet_address,
            payment_address: self.wallet_address(),
            price_usdc: service.base_price_usdc,
            network: self.config.network,
            created_at: now,
            status: OrderStatus::Quoted,
            tx_hash: None,
            content_hash: None,
            delivery_endpoint: None,
            confirmed_at: None,
        };
        let order = self.orders.create(order).await?;
        tracing::info!(order_id = %order.id, price = %order.price_usdc, "Order quoted");

        Ok(ServiceQuote {
            protocol: ProtocolVersion,
            message_type: MessageType::ServiceQuote,
            timestamp: now,
            order_id: order.id,
            provider_agent: ProviderAgent {
                name: self.config.provider_name.clone(),
                wallet_address: self.wallet_address(),
            },
            quote: QuoteBody {
                price_usdc: service.base_price_usdc,
                estimated_delivery: now
                    .plus_seconds(i64::from(service.estimated_delivery_hours) * 3600),
                payment_address: self.wallet_address(),
                network: self.config.network,
            },
        })
    }

    /// `POST /ivxp/orders/{id}/payment` (and the legacy `POST /ivxp/deliver`):
    /// accept a payment claim and start processing.
    ///
    /// The pipeline, all of which must pass before any state changes:
    ///
    /// 1. the order exists and is `quoted`;
    /// 2. the signed message references the order id;
    /// 3. the proof names this provider's network;
    /// 4. the tx hash has never been accepted before;
    /// 5. the on-chain transfer matches (from, to, amount);
    /// 6. the signature verifies against the order's client address.
    #[tracing::instrument(skip_all, fields(order_id = %request.order_id))]
    pub async fn accept_payment(
        &self,
        path_id: Option<&OrderId>,
        request: DeliveryRequest,
    ) -> Result<DeliveryAccepted, ProviderError> {
        let order_id = request.order_id.clone();
        if let Some(path_id) = path_id {
            if *path_id != order_id {
                return Err(ProviderError::InvalidRequest);
            }
        }
        let order = self
            .orders
            .get(&order_id)
            .await?
            .ok_or_else(|| ProviderError::OrderNotFound(order_id.clone()))?;
        if order.status != OrderStatus::Quoted {
            return Err(ProviderError::InvalidOrderStatus {
                order_id,
                expected: OrderStatus::Quoted,
                actual: order.status,
            });
        }
        if !request.signed_message.contains(order_id.as_str()) {
            return Err(ProviderError::InvalidSignedMessage);
        }
        if request.payment_proof.network != self.config.network {
            return Err(ProviderError::NetworkMismatch {
                expected: self.config.network,
                actual: request.payment_proof.network,
            });
        }
        // Reserve the hash before the expensive checks; concurrent claims
        // for the same hash must not both pass. Released on any later
        // failure so a rejected request leaves no state.
        let tx_hash = request.payment_proof.tx_hash;
        if !self.used_tx_hashes.insert(tx_hash) {
            tracing::warn!(tx = %tx_hash, "Replayed payment transaction");
            return Err(ProviderError::PaymentVerificationFailed);
        }
        if let Err(error) = self.verify_payment_claim(&order, &request).await {
            self.used_tx_hashes.remove(&tx_hash);
            return Err(error);
        }

        let mut patch = OrderPatch::status(OrderStatus::Paid);
        patch.tx_hash = Some(tx_hash);
        patch.delivery_endpoint = request.delivery_endpoint.clone();
        let paid = match self.orders.update(&order_id, patch).await {
            Ok(paid) => paid,
            Err(error) => {
                self.used_tx_hashes.remove(&tx_hash);
                return Err(error.into());
            }
        };
        tracing::info!(tx = %tx_hash, "Order paid");

        let pipeline = self.pipeline();
        self.tasks.spawn(async move {
            pipeline.process_order(paid).await;
        });

        Ok(DeliveryAccepted {
            protocol: ProtocolVersion,
            message_type: MessageType::DeliveryAccepted,
            timestamp: Timestamp::now(),
            order_id: request.order_id,
            status: AcceptedStatus,
            message: "Payment verified, processing started".to_string(),
            stream_url: None,
        })
    }

    async fn verify_payment_claim(
        &self,
        order: &Order,
        request: &DeliveryRequest,
    ) -> Result<(), ProviderError> {
        let expected = ExpectedPayment {
            from: request.payment_proof.from_address,
            to: order.payment_address,
            amount: order.price_usdc,
        };
        let payment_ok = self
            .payments
            .verify(&request.payment_proof.tx_hash, &expected)
            .await
            .map_err(|e| ProviderError::Internal(e.to_string()))?;
        if !payment_ok {
            return Err(ProviderError::PaymentVerificationFailed);
        }
        let signature_ok = self
            .crypto
            .verify(
                &request.signed_message,
                &request.signature,
                &order.client_address,
            )
            .unwrap_or(false);
        if !signature_ok {
            return Err(ProviderError::SignatureVerificationFailed);
        }
        Ok(())
    }

    /// The owned slice of the runtime a background order task needs.
    fn pipeline(&self) -> DeliveryPipeline {
        DeliveryPipeline {
            orders: Arc::clone(&self.orders),
            deliverables: Arc::clone(&self.deliverables),
            handlers: self.handlers.clone(),
            push_client: self.push_client.clone(),
            allow_private_delivery_urls: self.config.allow_private_delivery_urls,
        }
    }

    /// `GET /ivxp/orders/{id}`: the order status projection.
    pub async fn order_status(&self, id: &OrderId) -> Result<OrderStatusMessage, ProviderError> {
        let order = self
            .orders
            .get(id)
            .await?
            .ok_or_else(|| ProviderError::OrderNotFound(id.clone()))?;
        Ok(OrderStatusMessage {
            protocol: ProtocolVersion,
            message_type: MessageType::OrderStatus,
            timestamp: Timestamp::now(),
            order_id: order.id,
            status: order.status,
            service: order.service_type,
            created_at: order.created_at,
            content_hash: order.content_hash,
        })
    }

    /// `GET /ivxp/orders/{id}/deliverable`: pull delivery.
    pub async fn download(&self, id: &OrderId) -> Result<DeliveryResponse, ProviderError> {
        let order = self
            .orders
            .get(id)
            .await?
            .ok_or_else(|| ProviderError::OrderNotFound(id.clone()))?;
        let deliverable = self
            .deliverables
            .get(&order.id)
            .await?
            .ok_or(ProviderError::DeliverableNotReady)?;
        Ok(DeliveryResponse::from_deliverable(order.id, &deliverable))
    }

    /// `POST /ivxp/orders/{id}/confirm`: the client's signed sign-off.
    ///
    /// Re-confirming is reported as `ORDER_ALREADY_CONFIRMED` so clients
    /// can treat it as idempotent success.
    #[tracing::instrument(skip_all, fields(order_id = %id))]
    pub async fn confirm(
        &self,
        id: &OrderId,
        request: DeliveryConfirmation,
    ) -> Result<ConfirmationResponse, ProviderError> {
        if request.order_id != *id {
            return Err(ProviderError::InvalidRequest);
        }
        let order = self
            .orders
            .get(id)
            .await?
            .ok_or_else(|| ProviderError::OrderNotFound(id.clone()))?;
        match order.status {
            OrderStatus::Confirmed => return Err(ProviderError::OrderAlreadyConfirmed),
            OrderStatus::Delivered => {}
            actual => {
                return Err(ProviderError::InvalidOrderStatus {
                    order_id: id.clone(),
                    expected: OrderStatus::Delivered,
                    actual,
                });
            }
        }
        // The message must have the canonical confirmation shape for this
        // order: the fixed prefix followed by a parseable timestamp.
        let well_formed = request
            .confirmation
            .message
            .strip_prefix(&format!("Confirm delivery: {id} | Timestamp: "))
            .is_some_and(|rest| Timestamp::parse(rest).is_ok());
        if !well_formed {
            return Err(ProviderError::InvalidSignedMessage);
        }
        let signature_ok = self
            .crypto
            .verify(
                &request.confirmation.message,
                &request.confirmation.signature,
                &order.client_address,
            )
            .unwrap_or(false);
        if !signature_ok {
            return Err(ProviderError::SignatureVerificationFailed);
        }

        let confirmed_at = Timestamp::now();
        let mut patch = OrderPatch::status(OrderStatus::Confirmed);
        patch.confirmed_at = Some(confirmed_at);
        self.orders.update(id, patch).await?;
        tracing::info!("Order confirmed");

        Ok(ConfirmationResponse {
            protocol: ProtocolVersion,
            message_type: MessageType::ConfirmationResponse,
            timestamp: confirmed_at,
            status: ConfirmedStatus,
            confirmed_at,
        })
    }
}

/// The background half of the runtime: everything a paid order's task
/// touches, detached from the `Provider` so the task owns its handles.
struct DeliveryPipeline {
    orders: Arc<dyn OrderStore>,
    deliverables: Arc<dyn DeliverableStore>,
    handlers: HandlerRegistry,
    push_client: reqwest::Client,
    allow_private_delivery_urls: bool,
}

impl DeliveryPipeline {
    /// Background processing of a paid order. Never panics the runtime;
    /// every failure ends in `delivery_failed`.
    async fn process_order(self, order: Order) {
        let order_id = order.id.clone();
        if let Err(error) = self
            .orders
            .update(&order_id, OrderPatch::status(OrderStatus::Processing))
            .await
        {
            tracing::error!(%order_id, %error, "Could not move order to processing");
            return;
        }
        let final_status = self.run(&order).await;
        match self
            .orders
            .update(&order_id, OrderPatch::status(final_status))
            .await
        {
            Ok(_) => tracing::info!(%order_id, status = %final_status, "Order processed"),
            Err(error) => {
                tracing::error!(%order_id, %error, "Could not record final order status")
            }
        }
    }

    /// Execute the handler, store the hashed deliverable, then deliver.
    async fn run(&self, order: &Order) -> OrderStatus {
        let order_id = &order.id;
        let Some(handler) = self.handlers.get(&order.service_type) else {
            tracing::error!(%order_id, service = %order.service_type, "No handler for service");
            return OrderStatus::DeliveryFailed;
        };
        let output = match handler.execute(order).await {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(%order_id, %error, "Handler failed");
                return OrderStatus::DeliveryFailed;
            }
        };
        let deliverable = Deliverable::new(output.content, output.content_type);
        let content_hash = deliverable.content_hash.clone();
        if let Err(error) = self.deliverables.set(order_id, deliverable.clone()).await {
            tracing::error!(%order_id, %error, "Could not store deliverable");
            return OrderStatus::DeliveryFailed;
        }
        let patch = OrderPatch {
            content_hash: Some(content_hash),
            ..Default::default()
        };
        if let Err(error) = self.orders.update(order_id, patch).await {
            tracing::error!(%order_id, %error, "Could not record content hash");
            return OrderStatus::DeliveryFailed;
        }

        match &order.delivery_endpoint {
            // Pull-only order: the deliverable is ready to download.
            None => OrderStatus::Delivered,
            Some(endpoint) => self.push(order_id, endpoint, &deliverable).await,
        }
    }

    /// POST the deliverable to the client callback. The deliverable stays
    /// downloadable whatever happens here.
    async fn push(
        &self,
        order_id: &OrderId,
        endpoint: &url::Url,
        deliverable: &Deliverable,
    ) -> OrderStatus {
        if let Err(error) = validate_delivery_url(endpoint, self.allow_private_delivery_urls) {
            tracing::warn!(%order_id, %error, "Rejected push-delivery target");
            return OrderStatus::DeliveryFailed;
        }
        let push = DeliveryPush::from_deliverable(order_id.clone(), deliverable);
        match self
            .push_client
            .post(endpoint.clone())
            .json(&push)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::info!(%order_id, "Deliverable pushed");
                OrderStatus::Delivered
            }
            Ok(response) => {
                tracing::warn!(%order_id, status = %response.status(), "Push delivery rejected");
                OrderStatus::DeliveryFailed
            }
            Err(error) => {
                tracing::warn!(%order_id, %error, "Push delivery failed");
                OrderStatus::DeliveryFailed
            }
        }
    }
}
