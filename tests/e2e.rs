//! End-to-end flows over a real listener: the full client SDK driving the
//! full provider runtime through HTTP, with the mock payment ledger shared
//! between both sides standing in for the chain.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use serde_json::json;

use ivxp_client::callback::{CallbackConfig, CallbackServer};
use ivxp_client::poll::PollOptions;
use ivxp_client::sse::SseOptions;
use ivxp_client::{
    ClientConfig, ClientError, EventType, IvxpClient, ProgressCallbacks, RequestServiceParams,
};
use ivxp_evm::crypto::{CryptoService, EvmCryptoService};
use ivxp_evm::payment::PaymentService;
use ivxp_evm::payment::mock::MockPaymentService;
use ivxp_rs::config::{ProviderConfig, ServiceDefinition};
use ivxp_rs::handler::EchoHandler;
use ivxp_rs::provider::Provider;
use ivxp_rs::server::ProviderServer;
use ivxp_types::amount::UsdcAmount;
use ivxp_types::error::ErrorCode;
use ivxp_types::hash::ContentHash;
use ivxp_types::network::Network;
use ivxp_types::order::{Content, OrderStatus};
use ivxp_types::proto::payment_message;
use ivxp_types::timestamp::Timestamp;

// Well-known local development keys; never hold funds.
const PROVIDER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const CLIENT_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

struct Harness {
    server: ProviderServer,
    client: IvxpClient,
    payments: Arc<MockPaymentService>,
    client_crypto: EvmCryptoService,
}

impl Harness {
    async fn start(price_usdc: u64) -> Self {
        let client_crypto = EvmCryptoService::from_private_key(CLIENT_KEY).unwrap();
        let payments = Arc::new(MockPaymentService::new(client_crypto.address()));

        let mut config = ProviderConfig::new(
            PROVIDER_KEY,
            vec![ServiceDefinition {
                service_type: "echo".to_string(),
                base_price_usdc: UsdcAmount::from_usdc(price_usdc),
                estimated_delivery_hours: 1,
                description: Some("echo test service".to_string()),
            }],
        );
        config.port = 0;
        // Tests push to loopback callback servers.
        config.allow_private_delivery_urls = true;

        let provider = Arc::new(
            Provider::builder(config)
                .with_payments(payments.clone() as Arc<dyn PaymentService>)
                .handler("echo", EchoHandler)
                .build()
                .unwrap(),
        );
        let server = ProviderServer::start(provider).await.unwrap();

        let client = IvxpClient::builder(ClientConfig::new(CLIENT_KEY, Network::BaseSepolia))
            .with_payments(payments.clone() as Arc<dyn PaymentService>)
            .build()
            .unwrap();

        Harness {
            server,
            client,
            payments,
            client_crypto,
        }
    }

    fn params(&self, budget_usdc: u64) -> RequestServiceParams {
        RequestServiceParams::new(
            self.server.base_url(),
            "echo",
            "say it back",
            UsdcAmount::from_usdc(budget_usdc),
        )
        .with_poll_options(fast_poll())
    }
}

fn fast_poll() -> PollOptions {
    PollOptions {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        max_attempts: 100,
        jitter: 0.2,
    }
}

#[tokio::test]
async fn happy_pull_flow() {
    let harness = Harness::start(5).await;

    let observed_events = Arc::new(Mutex::new(Vec::new()));
    for event_type in [
        EventType::OrderQuoted,
        EventType::PaymentSent,
        EventType::OrderPaid,
        EventType::OrderStatusChanged,
        EventType::OrderDelivered,
        EventType::OrderConfirmed,
    ] {
        let observed = Arc::clone(&observed_events);
        harness.client.events().on(event_type, move |event| {
            observed.lock().unwrap().push(event.event_type);
        });
    }

    let outcome = harness
        .client
        .request_service(harness.params(10), ProgressCallbacks::default())
        .await
        .unwrap();

    assert!(outcome.order_id.as_str().starts_with("ivxp-"));
    assert_eq!(outcome.status, OrderStatus::Confirmed);
    assert!(outcome.confirmed_at.is_some());
    assert_eq!(outcome.deliverable.content_type, "application/json");

    let Content::Text(text) = &outcome.content else {
        panic!("echo content should be text");
    };
    let value: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(value["echo"], "echo");
    assert_eq!(value["orderId"], outcome.order_id.as_str());
    assert_eq!(ContentHash::of_str(text), outcome.deliverable.content_hash);

    // Pipeline ordering: payment.sent strictly before order.paid, and the
    // quote before either.
    let events = observed_events.lock().unwrap();
    let position = |t: EventType| events.iter().position(|e| *e == t).unwrap();
    assert!(position(EventType::OrderQuoted) < position(EventType::PaymentSent));
    assert!(position(EventType::PaymentSent) < position(EventType::OrderPaid));
    assert!(position(EventType::OrderDelivered) < position(EventType::OrderConfirmed));

    harness.server.stop().await;
}

#[tokio::test]
async fn happy_push_flow() {
    let harness = Harness::start(5).await;

    let callback = CallbackServer::start(
        CallbackConfig::default(),
        harness.client.events().clone(),
    )
    .await
    .unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let received = Arc::clone(&received);
        harness
            .client
            .events()
            .on(EventType::DeliveryReceived, move |event| {
                received.lock().unwrap().push(event.payload.clone());
            });
    }

    let params = harness.params(10).with_delivery_endpoint(callback.url());
    let outcome = harness
        .client
        .request_service(params, ProgressCallbacks::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, OrderStatus::Confirmed);
    // Exactly one push, hash-verified at the callback.
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["order_id"], outcome.order_id.as_str());

    callback.stop().await;
    harness.server.stop().await;
}

#[tokio::test]
async fn push_failure_falls_back_to_pull() {
    let harness = Harness::start(5).await;

    // A callback endpoint that always refuses the push.
    let failing = Router::new().route(
        "/ivxp/callback",
        post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let failing_url = format!("http://{}/ivxp/callback", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, failing).await.unwrap();
    });

    let params = harness
        .params(10)
        .with_delivery_endpoint(failing_url.parse().unwrap());
    let outcome = harness
        .client
        .request_service(params, ProgressCallbacks::default())
        .await
        .unwrap();

    // Push failed, but the stored deliverable is still pullable and its
    // hash verifies; confirmation is skipped for a failed delivery.
    assert_eq!(outcome.status, OrderStatus::DeliveryFailed);
    assert!(outcome.confirmed_at.is_none());
    let Content::Text(text) = &outcome.content else {
        panic!("echo content should be text");
    };
    assert_eq!(ContentHash::of_str(text), outcome.deliverable.content_hash);

    harness.server.stop().await;
}

#[tokio::test]
async fn budget_guard_blocks_payment() {
    let harness = Harness::start(50).await;

    let err = harness
        .client
        .request_service(harness.params(10), ProgressCallbacks::default())
        .await
        .unwrap_err();

    let ClientError::BudgetExceeded {
        price_usdc,
        budget_usdc,
    } = err
    else {
        panic!("expected BudgetExceeded, got {err:?}");
    };
    assert_eq!(price_usdc, UsdcAmount::from_usdc(50));
    assert_eq!(budget_usdc, UsdcAmount::from_usdc(10));
    assert_eq!(harness.payments.send_count(), 0);

    harness.server.stop().await;
}

#[tokio::test]
async fn partial_success_when_provider_goes_away() {
    let harness = Harness::start(5).await;

    let params = harness.params(10);
    let quote = harness.client.request_quote(&params).await.unwrap();

    // The provider disappears between quote and payment notification.
    harness.server.stop().await;

    let err = harness
        .client
        .submit_payment(&params, &quote)
        .await
        .unwrap_err();
    let ClientError::PartialSuccess { tx_hash, .. } = err else {
        panic!("expected PartialSuccess, got {err:?}");
    };
    // The transfer really happened; the hash lets the caller recover.
    assert_eq!(harness.payments.send_count(), 1);
    assert!(tx_hash.to_string().starts_with("0x"));
}

#[tokio::test]
async fn replayed_tx_hash_rejected_over_http() {
    let harness = Harness::start(5).await;
    let http = reqwest::Client::new();

    // First order paid normally through the SDK steps.
    let params = harness.params(10);
    let first_quote = harness.client.request_quote(&params).await.unwrap();
    let receipt = harness
        .client
        .submit_payment(&params, &first_quote)
        .await
        .unwrap();

    // Second order, same transaction hash, fresh valid signature.
    let second_quote = harness.client.request_quote(&params).await.unwrap();
    let timestamp = Timestamp::now();
    let signed_message = payment_message(&second_quote.order_id, &receipt.tx_hash, &timestamp);
    let signature = harness.client_crypto.sign(&signed_message).await.unwrap();
    let body = json!({
        "protocol": "IVXP/1.0",
        "message_type": "delivery_request",
        "timestamp": timestamp,
        "order_id": second_quote.order_id,
        "payment_proof": {
            "tx_hash": receipt.tx_hash,
            "from_address": harness.client_crypto.address(),
            "network": "base-sepolia",
        },
        "signature": signature,
        "signed_message": signed_message,
    });
    let response = http
        .post(format!(
            "{}ivxp/orders/{}/payment",
            harness.server.base_url(),
            second_quote.order_id
        ))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["code"], "PAYMENT_VERIFICATION_FAILED");

    // No state change on the second order.
    let status: serde_json::Value = http
        .get(format!(
            "{}ivxp/orders/{}",
            harness.server.base_url(),
            second_quote.order_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "quoted");

    harness.server.stop().await;
}

#[tokio::test]
async fn sse_fallback_to_polling_completes_the_flow() {
    let harness = Harness::start(5).await;

    let fallbacks = Arc::new(Mutex::new(0u32));
    {
        let fallbacks = Arc::clone(&fallbacks);
        harness
            .client
            .events()
            .on(EventType::SseFallback, move |_| {
                *fallbacks.lock().unwrap() += 1;
            });
    }

    let params = harness.params(10);
    let quote = harness.client.request_quote(&params).await.unwrap();
    let receipt = harness.client.submit_payment(&params, &quote).await.unwrap();

    // Pretend the provider offered a stream it cannot actually serve; the
    // wait must exhaust it, emit sse_fallback, and finish by polling.
    let dead_stream: url::Url = "http://127.0.0.1:1/ivxp/stream".parse().unwrap();
    let sse = SseOptions {
        max_retries: 2,
        backoff: PollOptions {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 5,
            jitter: 0.0,
        },
    };
    let status = harness
        .client
        .wait_for_delivery(
            &params.provider_url,
            &receipt.order_id,
            Some(&dead_stream),
            &fast_poll(),
            &sse,
            &tokio_util::sync::CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(status.status, OrderStatus::Delivered);
    assert_eq!(*fallbacks.lock().unwrap(), 1);

    harness.server.stop().await;
}

#[tokio::test]
async fn http_surface_contract() {
    let harness = Harness::start(5).await;
    let http = reqwest::Client::new();
    let base = harness.server.base_url();

    // Unknown route: 404.
    let response = http
        .get(format!("{base}ivxp/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    // Wrong method on a known route: 405.
    let response = http
        .get(format!("{base}ivxp/request"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);

    // Trailing slash is normalized away.
    let response = http
        .get(format!("{base}ivxp/catalog/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let catalog: serde_json::Value = response.json().await.unwrap();
    assert_eq!(catalog["protocol"], "IVXP/1.0");
    assert_eq!(catalog["services"][0]["type"], "echo");

    // Malformed JSON: 400 with the stable generic message.
    let response = http
        .post(format!("{base}ivxp/request"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["error"], "Invalid request");

    // Missing required fields: 400 naming the field.
    let response = http
        .post(format!("{base}ivxp/request"))
        .json(&json!({ "protocol": "IVXP/1.0" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let error: serde_json::Value = response.json().await.unwrap();
    assert!(
        error["error"]
            .as_str()
            .unwrap()
            .starts_with("Missing required fields:")
    );

    // Oversize body: 413 before parsing.
    let huge = "x".repeat(65 * 1024);
    let response = http
        .post(format!("{base}ivxp/request"))
        .header("content-type", "application/json")
        .body(huge)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);

    // Unknown order: 404 with the wire code.
    let response = http
        .get(format!("{base}ivxp/orders/ivxp-does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["code"], "ORDER_NOT_FOUND");

    // Deliverable not ready: 404 with its own code.
    let params = harness.params(10);
    let quote = harness.client.request_quote(&params).await.unwrap();
    let response = http
        .get(format!("{base}ivxp/orders/{}/deliverable", quote.order_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["code"], "DELIVERABLE_NOT_READY");

    harness.server.stop().await;
}

#[tokio::test]
async fn legacy_routes_serve_the_same_orders() {
    let harness = Harness::start(5).await;
    let http = reqwest::Client::new();
    let base = harness.server.base_url();

    let outcome = harness
        .client
        .request_service(harness.params(10), ProgressCallbacks::default())
        .await
        .unwrap();

    let legacy_status: serde_json::Value = http
        .get(format!("{base}ivxp/status/{}", outcome.order_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(legacy_status["status"], "confirmed");

    let legacy_download: serde_json::Value = http
        .get(format!("{base}ivxp/download/{}", outcome.order_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        legacy_download["content_hash"],
        outcome.deliverable.content_hash.as_str()
    );

    harness.server.stop().await;
}

#[tokio::test]
async fn wrong_network_payment_is_rejected() {
    let harness = Harness::start(5).await;
    let http = reqwest::Client::new();

    let params = harness.params(10);
    let quote = harness.client.request_quote(&params).await.unwrap();
    let tx_hash = harness
        .payments
        .send(&quote.quote.payment_address, &quote.quote.price_usdc)
        .await
        .unwrap();
    let timestamp = Timestamp::now();
    let signed_message = payment_message(&quote.order_id, &tx_hash, &timestamp);
    let signature = harness.client_crypto.sign(&signed_message).await.unwrap();

    let body = json!({
        "protocol": "IVXP/1.0",
        "message_type": "delivery_request",
        "timestamp": timestamp,
        "order_id": quote.order_id,
        "payment_proof": {
            "tx_hash": tx_hash,
            "from_address": harness.client_crypto.address(),
            "network": "base-mainnet",
        },
        "signature": signature,
        "signed_message": signed_message,
    });
    let response = http
        .post(format!(
            "{}ivxp/orders/{}/payment",
            harness.server.base_url(),
            quote.order_id
        ))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        error["code"],
        serde_json::to_value(ErrorCode::NetworkMismatch).unwrap()
    );

    harness.server.stop().await;
}
