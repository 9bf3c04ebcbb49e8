//! The client orchestrator.
//!
//! [`IvxpClient::request_service`] drives the full flow in one call:
//!
//! 1. **Quote** — POST the service request; refuse quotes over budget
//!    before any on-chain action.
//! 2. **Pay** — send USDC, sign the canonical payment message, notify the
//!    provider (canonical route, legacy fallback on 404). A transfer that
//!    lands on-chain but fails to notify surfaces as `PARTIAL_SUCCESS`
//!    carrying the hash; it is never silently dropped or rolled back.
//! 3. **Wait** — subscribe to the provider's SSE stream when offered,
//!    transparently falling back to exponential-backoff polling when the
//!    stream's retry budget runs out.
//! 4. **Download** — fetch the deliverable, require the echoed order id to
//!    match, and recompute the content hash before trusting a byte.
//! 5. **Confirm** — sign the confirmation message (on by default);
//!    `ORDER_ALREADY_CONFIRMED` counts as success.
//!
//! Each step also exists as an individual method with the same validation
//! and error contract. A single timeout covers the whole call; firing it
//! yields `TIMEOUT` tagged with the interrupted step and any on-chain hash
//! already obtained.

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use ivxp_evm::crypto::{CryptoService, EvmCryptoService};
use ivxp_evm::payment::{PaymentService, UsdcPaymentService};
use ivxp_types::amount::UsdcAmount;
use ivxp_types::error::{CodedError, ErrorCode};
use ivxp_types::network::Network;
use ivxp_types::order::{Content, OrderId, OrderStatus, TxHash};
use ivxp_types::proto::{
    ClientAgent, ConfirmationBody, DeliveryAccepted, DeliveryConfirmation, DeliveryRequest,
    DeliveryResponse, MessageType, OrderStatusMessage, PaymentProof, ProtocolVersion,
    ServiceQuote, ServiceRequest, ServiceRequestBody, confirmation_message, payment_message,
};
use ivxp_types::timestamp::Timestamp;

use crate::error::{ClientError, Step};
use crate::events::{EventEmitter, EventType};
use crate::http::JsonHttpClient;
use crate::poll::{PollOptions, poll};
use crate::sse::{SseEvent, SseOptions, SseSubscription};

/// Client SDK configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client wallet private key, `0x` + 64 hex chars.
    pub private_key: String,
    /// Settlement network; must match the provider's.
    pub network: Network,
    /// EVM RPC endpoint for sending USDC.
    pub rpc_url: Option<Url>,
    /// Agent name sent in service requests.
    pub agent_name: String,
}

impl ClientConfig {
    pub fn new(private_key: impl Into<String>, network: Network) -> Self {
        ClientConfig {
            private_key: private_key.into(),
            network,
            rpc_url: None,
            agent_name: "ivxp-client".to_string(),
        }
    }

    pub fn with_rpc_url(mut self, rpc_url: Url) -> Self {
        self.rpc_url = Some(rpc_url);
        self
    }

    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = name.into();
        self
    }
}

/// Parameters for one service request.
#[derive(Clone)]
pub struct RequestServiceParams {
    pub provider_url: Url,
    pub service_type: String,
    pub description: String,
    pub budget_usdc: UsdcAmount,
    pub delivery_format: Option<String>,
    pub deadline: Option<Timestamp>,
    /// Callback URL for push delivery (see [`crate::callback`]).
    pub delivery_endpoint: Option<Url>,
    /// Persist the verified deliverable bytes here.
    pub save_to: Option<PathBuf>,
    /// Sign a delivery confirmation at the end. On by default.
    pub confirm: bool,
    /// Overall deadline for the whole call.
    pub timeout: Option<Duration>,
    pub poll: PollOptions,
    pub sse: SseOptions,
}

impl RequestServiceParams {
    pub fn new(
        provider_url: Url,
        service_type: impl Into<String>,
        description: impl Into<String>,
        budget_usdc: UsdcAmount,
    ) -> Self {
        RequestServiceParams {
            provider_url,
            service_type: service_type.into(),
            description: description.into(),
            budget_usdc,
            delivery_format: None,
            deadline: None,
            delivery_endpoint: None,
            save_to: None,
            confirm: true,
            timeout: None,
            poll: PollOptions::default(),
            sse: SseOptions::default(),
        }
    }

    pub fn with_delivery_endpoint(mut self, endpoint: Url) -> Self {
        self.delivery_endpoint = Some(endpoint);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_save_to(mut self, path: PathBuf) -> Self {
        self.save_to = Some(path);
        self
    }

    pub fn without_confirmation(mut self) -> Self {
        self.confirm = false;
        self
    }

    pub fn with_poll_options(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }
}

/// Hooks invoked synchronously at the end of each successful step.
#[derive(Default)]
pub struct ProgressCallbacks {
    pub on_quote: Option<Box<dyn Fn(&ServiceQuote) + Send + Sync>>,
    pub on_payment: Option<Box<dyn Fn(&PaymentReceipt) + Send + Sync>>,
    pub on_delivered: Option<Box<dyn Fn(&DeliveryResponse) + Send + Sync>>,
    pub on_confirmed: Option<Box<dyn Fn(&ConfirmationResult) + Send + Sync>>,
}

/// Outcome of the payment step.
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub order_id: OrderId,
    pub tx_hash: TxHash,
    pub status: OrderStatus,
    /// SSE stream offered by the provider, if any.
    pub stream_url: Option<Url>,
}

/// Outcome of the confirmation step.
#[derive(Debug, Clone)]
pub struct ConfirmationResult {
    pub confirmed_at: Timestamp,
    /// Whether the provider had already recorded the confirmation.
    pub already_confirmed: bool,
}

/// Outcome of a full [`IvxpClient::request_service`] call.
#[derive(Debug)]
pub struct ServiceOutcome {
    pub order_id: OrderId,
    pub tx_hash: TxHash,
    /// Final provider-side status.
    pub status: OrderStatus,
    pub deliverable: DeliveryResponse,
    /// The hash-verified content.
    pub content: Content,
    pub confirmed_at: Option<Timestamp>,
}

/// Builds an [`IvxpClient`] with injectable services.
pub struct IvxpClientBuilder {
    config: ClientConfig,
    crypto: Option<Arc<dyn CryptoService>>,
    payments: Option<Arc<dyn PaymentService>>,
    http: Option<JsonHttpClient>,
}

impl IvxpClientBuilder {
    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoService>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn with_payments(mut self, payments: Arc<dyn PaymentService>) -> Self {
        self.payments = Some(payments);
        self
    }

    pub fn with_http(mut self, http: JsonHttpClient) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<IvxpClient, ClientError> {
        let crypto: Arc<dyn CryptoService> = match self.crypto {
            Some(crypto) => crypto,
            None => Arc::new(EvmCryptoService::from_private_key(&self.config.private_key)?),
        };
        let payments: Arc<dyn PaymentService> = match self.payments {
            Some(payments) => payments,
            None => {
                let rpc_url = self.config.rpc_url.clone().ok_or_else(|| {
                    ClientError::InvalidRequestParams(
                        "rpc_url is required unless a payment service is injected".to_string(),
                    )
                })?;
                let signer = EvmCryptoService::from_private_key(&self.config.private_key)?
                    .signer()
                    .clone();
                Arc::new(UsdcPaymentService::connect(
                    signer,
                    rpc_url,
                    self.config.network,
                ))
            }
        };
        Ok(IvxpClient {
            config: self.config,
            http: self.http.unwrap_or_default(),
            crypto,
            payments,
            events: EventEmitter::new(),
        })
    }
}

/// The IVXP client SDK.
pub struct IvxpClient {
    config: ClientConfig,
    http: JsonHttpClient,
    crypto: Arc<dyn CryptoService>,
    payments: Arc<dyn PaymentService>,
    events: EventEmitter,
}

impl IvxpClient {
    /// Start building a client from its configuration.
    pub fn builder(config: ClientConfig) -> IvxpClientBuilder {
        IvxpClientBuilder {
            config,
            crypto: None,
            payments: None,
            http: None,
        }
    }

    /// The event bus; subscribe with [`EventEmitter::on`].
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Launch a push-delivery callback server wired to this client's event
    /// bus. Hand its [`url`](crate::callback::CallbackServer::url) to
    /// [`RequestServiceParams::with_delivery_endpoint`].
    pub async fn start_callback_server(
        &self,
        config: crate::callback::CallbackConfig,
    ) -> Result<crate::callback::CallbackServer, ClientError> {
        crate::callback::CallbackServer::start(config, self.events.clone()).await
    }

    /// The client wallet address.
    pub fn wallet_address(&self) -> ivxp_types::order::EthAddress {
        self.crypto.address()
    }

    /// One-call flow: quote, pay, wait, download, confirm.
    pub async fn request_service(
        &self,
        params: RequestServiceParams,
        callbacks: ProgressCallbacks,
    ) -> Result<ServiceOutcome, ClientError> {
        validate_provider_url(&params.provider_url)?;
        let cancellation = CancellationToken::new();
        let _deadline = params.timeout.map(|timeout| {
            let token = cancellation.clone();
            AbortOnDrop(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            }))
        });

        let tx_slot: Mutex<Option<TxHash>> = Mutex::new(None);
        let step_slot: Mutex<Step> = Mutex::new(Step::Quote);
        let result = self
            .run_flow(&params, &callbacks, &cancellation, &tx_slot, &step_slot)
            .await;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(ClientError::Cancelled) => {
                let error = ClientError::Timeout {
                    step: *step_slot.lock().expect("step slot lock"),
                    tx_hash: *tx_slot.lock().expect("tx slot lock"),
                };
                self.emit_error(&error);
                Err(error)
            }
            Err(error) => {
                self.emit_error(&error);
                Err(error)
            }
        }
    }

    async fn run_flow(
        &self,
        params: &RequestServiceParams,
        callbacks: &ProgressCallbacks,
        cancellation: &CancellationToken,
        tx_slot: &Mutex<Option<TxHash>>,
        step_slot: &Mutex<Step>,
    ) -> Result<ServiceOutcome, ClientError> {
        let set_step = |step: Step| *step_slot.lock().expect("step slot lock") = step;

        set_step(Step::Quote);
        let quote = with_cancel(cancellation, self.request_quote(params)).await?;
        if let Some(on_quote) = &callbacks.on_quote {
            on_quote(&quote);
        }

        set_step(Step::Payment);
        let receipt = with_cancel(
            cancellation,
            self.submit_payment_recording(params, &quote, tx_slot),
        )
        .await?;
        if let Some(on_payment) = &callbacks.on_payment {
            on_payment(&receipt);
        }

        set_step(Step::Wait);
        let status = self
            .wait_for_delivery(
                &params.provider_url,
                &receipt.order_id,
                receipt.stream_url.as_ref(),
                &params.poll,
                &params.sse,
                cancellation,
            )
            .await?;

        set_step(Step::Download);
        let (deliverable, content) = with_cancel(
            cancellation,
            self.download_deliverable(
                &params.provider_url,
                &receipt.order_id,
                params.save_to.as_deref(),
            ),
        )
        .await?;
        if let Some(on_delivered) = &callbacks.on_delivered {
            on_delivered(&deliverable);
        }

        // A delivery_failed order has nothing to confirm; the verified
        // pull is the outcome.
        let confirmed_at = if params.confirm && status.status == OrderStatus::Delivered {
            set_step(Step::Confirm);
            let confirmation = with_cancel(
                cancellation,
                self.confirm_delivery(&params.provider_url, &receipt.order_id),
            )
            .await?;
            if let Some(on_confirmed) = &callbacks.on_confirmed {
                on_confirmed(&confirmation);
            }
            Some(confirmation.confirmed_at)
        } else {
            None
        };

        Ok(ServiceOutcome {
            order_id: receipt.order_id,
            tx_hash: receipt.tx_hash,
            status: if confirmed_at.is_some() {
                OrderStatus::Confirmed
            } else {
                status.status
            },
            deliverable,
            content,
            confirmed_at,
        })
    }

    /// Step 1: request a quote and apply the budget guard.
    ///
    /// The guard compares integer micro-USDC and fails with
    /// `BUDGET_EXCEEDED` before anything touches the chain.
    #[tracing::instrument(skip_all, fields(service = %params.service_type))]
    pub async fn request_quote(
        &self,
        params: &RequestServiceParams,
    ) -> Result<ServiceQuote, ClientError> {
        validate_provider_url(&params.provider_url)?;
        if params.service_type.is_empty() {
            return Err(ClientError::InvalidRequestParams(
                "service type must not be empty".to_string(),
            ));
        }
        let request = ServiceRequest {
            protocol: ProtocolVersion,
            message_type: MessageType::ServiceRequest,
            timestamp: Timestamp::now(),
            client_agent: ClientAgent {
                name: self.config.agent_name.clone(),
                wallet_address: self.crypto.address(),
                contact_endpoint: None,
            },
            service_request: ServiceRequestBody {
                service_type: params.service_type.clone(),
                description: params.description.clone(),
                budget_usdc: params.budget_usdc,
                delivery_format: params.delivery_format.clone(),
                deadline: params.deadline,
            },
        };
        let url = endpoint(&params.provider_url, "/ivxp/request")?;
        let quote: ServiceQuote = self.http.post_json(url, &request, Step::Quote).await?;

        if quote.quote.price_usdc.micros() > params.budget_usdc.micros() {
            return Err(ClientError::BudgetExceeded {
                price_usdc: quote.quote.price_usdc,
                budget_usdc: params.budget_usdc,
            });
        }
        tracing::info!(order_id = %quote.order_id, price = %quote.quote.price_usdc, "Quote received");
        self.events.emit(
            EventType::OrderQuoted,
            json!({
                "order_id": quote.order_id,
                "price_usdc": quote.quote.price_usdc,
                "estimated_delivery": quote.quote.estimated_delivery,
            }),
        );
        Ok(quote)
    }

    /// Step 2: pay the quote and notify the provider.
    pub async fn submit_payment(
        &self,
        params: &RequestServiceParams,
        quote: &ServiceQuote,
    ) -> Result<PaymentReceipt, ClientError> {
        let tx_slot = Mutex::new(None);
        self.submit_payment_recording(params, quote, &tx_slot).await
    }

    /// Payment with the on-chain hash mirrored into `tx_slot` the moment
    /// it exists, so a timeout racing this future still learns it.
    #[tracing::instrument(skip_all, fields(order_id = %quote.order_id))]
    async fn submit_payment_recording(
        &self,
        params: &RequestServiceParams,
        quote: &ServiceQuote,
        tx_slot: &Mutex<Option<TxHash>>,
    ) -> Result<PaymentReceipt, ClientError> {
        if quote.quote.price_usdc.is_zero() {
            return Err(ClientError::InvalidRequestParams(
                "quoted price must be positive".to_string(),
            ));
        }
        if quote.quote.payment_address.is_zero() {
            return Err(ClientError::InvalidRequestParams(
                "payment address must not be the zero address".to_string(),
            ));
        }

        let tx_hash = self
            .payments
            .send(&quote.quote.payment_address, &quote.quote.price_usdc)
            .await?;
        *tx_slot.lock().expect("tx slot lock") = Some(tx_hash);
        tracing::info!(tx = %tx_hash, "USDC payment sent");
        self.events.emit(
            EventType::PaymentSent,
            json!({ "order_id": quote.order_id, "tx_hash": tx_hash }),
        );

        // From here on the transfer is on-chain; any failure must carry
        // the hash out as PARTIAL_SUCCESS, never report a clean failure.
        let accepted = match self.notify_provider(params, quote, tx_hash).await {
            Ok(accepted) => accepted,
            Err(source) => {
                return Err(ClientError::PartialSuccess {
                    tx_hash,
                    source: Box::new(source),
                });
            }
        };

        self.events.emit(
            EventType::PaymentConfirmed,
            json!({ "order_id": quote.order_id, "tx_hash": tx_hash }),
        );
        self.events.emit(
            EventType::OrderPaid,
            json!({ "order_id": quote.order_id, "tx_hash": tx_hash }),
        );
        Ok(PaymentReceipt {
            order_id: quote.order_id.clone(),
            tx_hash,
            status: OrderStatus::Paid,
            stream_url: accepted.stream_url,
        })
    }

    async fn notify_provider(
        &self,
        params: &RequestServiceParams,
        quote: &ServiceQuote,
        tx_hash: TxHash,
    ) -> Result<DeliveryAccepted, ClientError> {
        let timestamp = Timestamp::now();
        let signed_message = payment_message(&quote.order_id, &tx_hash, &timestamp);
        let signature = self.crypto.sign(&signed_message).await?;
        let request = DeliveryRequest {
            protocol: ProtocolVersion,
            message_type: MessageType::DeliveryRequest,
            timestamp,
            order_id: quote.order_id.clone(),
            payment_proof: PaymentProof {
                tx_hash,
                from_address: self.crypto.address(),
                network: self.config.network,
            },
            signature,
            signed_message,
            delivery_endpoint: params.delivery_endpoint.clone(),
        };

        let canonical = endpoint(
            &params.provider_url,
            &format!("/ivxp/orders/{}/payment", quote.order_id),
        )?;
        match self
            .http
            .post_json::<_, DeliveryAccepted>(canonical, &request, Step::Payment)
            .await
        {
            Ok(accepted) => Ok(accepted),
            // Older providers only expose the flat route.
            Err(error) if error.is_not_found() => {
                tracing::debug!("Canonical payment route missing, falling back to /ivxp/deliver");
                let legacy = endpoint(&params.provider_url, "/ivxp/deliver")?;
                self.http.post_json(legacy, &request, Step::Payment).await
            }
            Err(error) => Err(error),
        }
    }

    /// Step 3: wait until the order reaches `delivered` or
    /// `delivery_failed`, via SSE when offered, else polling.
    pub async fn wait_for_delivery(
        &self,
        provider_url: &Url,
        order_id: &OrderId,
        stream_url: Option<&Url>,
        poll_options: &PollOptions,
        sse_options: &SseOptions,
        cancellation: &CancellationToken,
    ) -> Result<OrderStatusMessage, ClientError> {
        if let Some(stream_url) = stream_url {
            if let Some(status) = self
                .wait_via_sse(provider_url, order_id, stream_url, sse_options, cancellation)
                .await?
            {
                return Ok(status);
            }
            tracing::info!(%order_id, "SSE exhausted, falling back to polling");
            self.events
                .emit(EventType::SseFallback, json!({ "order_id": order_id }));
        }
        self.poll_order_until_terminal(provider_url, order_id, poll_options, cancellation)
            .await
    }

    /// SSE wait. `Ok(None)` means the stream gave out and the caller
    /// should fall back to polling.
    async fn wait_via_sse(
        &self,
        provider_url: &Url,
        order_id: &OrderId,
        stream_url: &Url,
        sse_options: &SseOptions,
        cancellation: &CancellationToken,
    ) -> Result<Option<OrderStatusMessage>, ClientError> {
        enum Signal {
            Event(SseEvent),
            Exhausted,
        }
        let (signal_tx, mut signal_rx) = tokio::sync::mpsc::unbounded_channel();
        let event_tx = signal_tx.clone();
        let subscription: SseSubscription = crate::sse::connect(
            self.http.inner().clone(),
            stream_url.clone(),
            sse_options.clone(),
            cancellation,
            move |event| {
                let _ = event_tx.send(Signal::Event(event));
            },
            move |_| {
                let _ = signal_tx.send(Signal::Exhausted);
            },
        );

        let mut last_status: Option<OrderStatus> = None;
        let result = loop {
            let signal = tokio::select! {
                _ = cancellation.cancelled() => break Err(ClientError::Cancelled),
                signal = signal_rx.recv() => signal,
            };
            match signal {
                None | Some(Signal::Exhausted) => break Ok(None),
                Some(Signal::Event(SseEvent::StatusUpdate(status))) => {
                    if last_status != Some(status) {
                        last_status = Some(status);
                        self.events.emit(
                            EventType::OrderStatusChanged,
                            json!({ "order_id": order_id, "status": status }),
                        );
                    }
                }
                Some(Signal::Event(SseEvent::Progress(_))) => {}
                Some(Signal::Event(SseEvent::Completed | SseEvent::Failed)) => {
                    // The stream only hints; the status endpoint is
                    // authoritative.
                    let status = self.fetch_status(provider_url, order_id).await?;
                    break Ok(Some(status));
                }
            }
        };
        subscription.unsubscribe();
        result
    }

    /// Poll the status endpoint until a terminal-for-waiting status.
    pub async fn poll_order_until_terminal(
        &self,
        provider_url: &Url,
        order_id: &OrderId,
        poll_options: &PollOptions,
        cancellation: &CancellationToken,
    ) -> Result<OrderStatusMessage, ClientError> {
        let last_status: Mutex<Option<OrderStatus>> = Mutex::new(None);
        let last_status = &last_status;
        poll(
            move || async move {
                let status = self.fetch_status(provider_url, order_id).await?;
                {
                    let mut last = last_status.lock().expect("status lock");
                    if *last != Some(status.status) {
                        *last = Some(status.status);
                        self.events.emit(
                            EventType::OrderStatusChanged,
                            json!({ "order_id": order_id, "status": status.status }),
                        );
                    }
                }
                if matches!(
                    status.status,
                    OrderStatus::Delivered | OrderStatus::DeliveryFailed | OrderStatus::Confirmed
                ) {
                    Ok(Some(status))
                } else {
                    Ok(None)
                }
            },
            poll_options,
            cancellation,
        )
        .await
    }

    async fn fetch_status(
        &self,
        provider_url: &Url,
        order_id: &OrderId,
    ) -> Result<OrderStatusMessage, ClientError> {
        let canonical = endpoint(provider_url, &format!("/ivxp/orders/{order_id}"))?;
        match self
            .http
            .get_json::<OrderStatusMessage>(canonical, Step::Wait)
            .await
        {
            // A bare 404 is a missing route, not a missing order.
            Err(error)
                if error.is_not_found() && !error.is_provider_code(ErrorCode::OrderNotFound) =>
            {
                let legacy = endpoint(provider_url, &format!("/ivxp/status/{order_id}"))?;
                self.http.get_json(legacy, Step::Wait).await
            }
            other => other,
        }
    }

    /// Step 4: download and verify the deliverable.
    ///
    /// The returned order id must match the requested one, and the content
    /// must hash to the declared value; otherwise no content reaches the
    /// caller.
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn download_deliverable(
        &self,
        provider_url: &Url,
        order_id: &OrderId,
        save_to: Option<&Path>,
    ) -> Result<(DeliveryResponse, Content), ClientError> {
        let canonical = endpoint(provider_url, &format!("/ivxp/orders/{order_id}/deliverable"))?;
        let response: DeliveryResponse = match self
            .http
            .get_json::<DeliveryResponse>(canonical, Step::Download)
            .await
        {
            Err(error)
                if error.is_not_found()
                    && !error.is_provider_code(ErrorCode::OrderNotFound)
                    && !error.is_provider_code(ErrorCode::DeliverableNotReady) =>
            {
                let legacy = endpoint(provider_url, &format!("/ivxp/download/{order_id}"))?;
                self.http.get_json(legacy, Step::Download).await?
            }
            other => other?,
        };

        if response.order_id != *order_id {
            return Err(ClientError::OrderIdMismatch {
                requested: order_id.clone(),
                returned: response.order_id,
            });
        }
        let content = response
            .decode_content()
            .map_err(|e| ClientError::InvalidResponse(format!("content encoding: {e}")))?;
        let computed = content.hash();
        if computed != response.content_hash {
            return Err(ClientError::HashMismatch {
                declared: response.content_hash.clone(),
                computed,
            });
        }
        if let Some(path) = save_to {
            tokio::fs::write(path, content.as_bytes())
                .await
                .map_err(|e| ClientError::Persist(e.to_string()))?;
        }
        tracing::info!(content_hash = %computed, "Deliverable verified");
        self.events.emit(
            EventType::OrderDelivered,
            json!({ "order_id": order_id, "content_hash": computed }),
        );
        Ok((response, content))
    }

    /// Step 5: sign and submit the delivery confirmation.
    ///
    /// A provider answering `ORDER_ALREADY_CONFIRMED` counts as success
    /// with the local timestamp.
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn confirm_delivery(
        &self,
        provider_url: &Url,
        order_id: &OrderId,
    ) -> Result<ConfirmationResult, ClientError> {
        let timestamp = Timestamp::now();
        let message = confirmation_message(order_id, &timestamp);
        let signature = self.crypto.sign(&message).await?;
        let request = DeliveryConfirmation {
            protocol: ProtocolVersion,
            message_type: MessageType::DeliveryConfirmation,
            timestamp,
            order_id: order_id.clone(),
            confirmation: ConfirmationBody {
                message,
                signature,
                signer: self.crypto.address(),
            },
        };
        let url = endpoint(provider_url, &format!("/ivxp/orders/{order_id}/confirm"))?;
        let result = match self
            .http
            .post_json::<_, ivxp_types::proto::ConfirmationResponse>(url, &request, Step::Confirm)
            .await
        {
            Ok(response) => ConfirmationResult {
                confirmed_at: response.confirmed_at,
                already_confirmed: false,
            },
            Err(error) if error.is_provider_code(ErrorCode::OrderAlreadyConfirmed) => {
                ConfirmationResult {
                    confirmed_at: Timestamp::now(),
                    already_confirmed: true,
                }
            }
            Err(error) => return Err(error),
        };
        tracing::info!("Delivery confirmed");
        self.events.emit(
            EventType::OrderConfirmed,
            json!({ "order_id": order_id, "confirmed_at": result.confirmed_at }),
        );
        Ok(result)
    }

    fn emit_error(&self, error: &ClientError) {
        self.events.emit(
            EventType::Error,
            json!({
                "code": error.code(),
                "message": error.to_string(),
                "recoverable": error.recoverable(),
            }),
        );
    }
}

fn validate_provider_url(url: &Url) -> Result<(), ClientError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ClientError::InvalidProviderUrl(format!(
            "scheme '{other}' is not supported"
        ))),
    }
}

fn endpoint(provider_url: &Url, path: &str) -> Result<Url, ClientError> {
    provider_url
        .join(path)
        .map_err(|e| ClientError::InvalidProviderUrl(e.to_string()))
}

async fn with_cancel<T>(
    cancellation: &CancellationToken,
    operation: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ClientError> {
    tokio::select! {
        _ = cancellation.cancelled() => Err(ClientError::Cancelled),
        result = operation => result,
    }
}

/// Aborts the wrapped task when dropped; keeps the timeout watchdog from
/// outliving the call it guards.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
