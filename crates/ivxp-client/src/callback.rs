//! Push-delivery callback server.
//!
//! When a client opts into push delivery it hands the provider a callback
//! URL; this server is that endpoint. Every received deliverable has its
//! content hash recomputed before anything else happens: a match fires
//! `delivery.received` and answers 200, a mismatch fires
//! `delivery.rejected` and answers 400 so the provider records the push as
//! failed.
//!
//! Binds loopback with an OS-assigned port by default; `stop` drains
//! in-flight requests and is idempotent.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use ivxp_types::proto::DeliveryPush;

use crate::error::ClientError;
use crate::events::{EventEmitter, EventType};

/// Binding for the callback listener.
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    pub host: IpAddr,
    /// `0` asks the OS for a port.
    pub port: u16,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        CallbackConfig {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 0,
        }
    }
}

/// A running callback listener.
pub struct CallbackServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackServer {
    /// Bind and start serving `POST /ivxp/callback`.
    ///
    /// Delivery outcomes are published on `emitter` as
    /// `delivery.received` / `delivery.rejected`.
    pub async fn start(
        config: CallbackConfig,
        emitter: EventEmitter,
    ) -> Result<Self, ClientError> {
        let addr = SocketAddr::new(config.host, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ClientError::InvalidRequestParams(format!("cannot bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ClientError::InvalidRequestParams(e.to_string()))?;

        let app = Router::new()
            .route("/ivxp/callback", post(post_callback))
            .with_state(emitter);

        let shutdown = CancellationToken::new();
        let graceful_token = shutdown.clone();
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful_token.cancelled().await });
        let handle = tokio::spawn(async move {
            if let Err(error) = server.await {
                tracing::error!(%error, "Callback server exited with error");
            }
        });
        tracing::debug!("Callback server listening at http://{local_addr}");

        Ok(CallbackServer {
            local_addr,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The URL to hand the provider as `delivery_endpoint`.
    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/ivxp/callback", self.local_addr))
            .expect("bound address is a valid URL")
    }

    /// Stop listening and drain in-flight requests. Safe to call twice.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().expect("callback handle lock").take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::error!(%error, "Callback server task panicked");
            }
        }
    }
}

/// `POST /ivxp/callback`: verify and acknowledge one pushed deliverable.
async fn post_callback(
    State(emitter): State<EventEmitter>,
    payload: Result<Json<DeliveryPush>, JsonRejection>,
) -> Response {
    let Ok(Json(push)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        )
            .into_response();
    };
    let declared = push.deliverable.content_hash.clone();
    let Ok(content) = push.deliverable.decode_content() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        )
            .into_response();
    };
    let computed = content.hash();
    if computed == declared {
        tracing::info!(order_id = %push.order_id, "Push delivery verified");
        emitter.emit(
            EventType::DeliveryReceived,
            json!({
                "order_id": push.order_id,
                "content_hash": computed,
                "format": push.deliverable.format,
            }),
        );
        (StatusCode::OK, Json(json!({ "status": "received" }))).into_response()
    } else {
        tracing::warn!(
            order_id = %push.order_id,
            expected = %declared,
            computed = %computed,
            "Push delivery hash mismatch"
        );
        emitter.emit(
            EventType::DeliveryRejected,
            json!({
                "order_id": push.order_id,
                "reason": "HASH_MISMATCH",
                "expected_hash": declared,
                "computed_hash": computed,
            }),
        );
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": "HASH_MISMATCH", "error": "Content hash mismatch" })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivxp_types::order::{Content, Deliverable, OrderId};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn start() -> (CallbackServer, EventEmitter) {
        let emitter = EventEmitter::new();
        let server = CallbackServer::start(CallbackConfig::default(), emitter.clone())
            .await
            .unwrap();
        (server, emitter)
    }

    fn sample_push() -> DeliveryPush {
        let deliverable = Deliverable::new(
            Content::Text("{\"echo\":\"echo\"}".to_string()),
            "application/json",
        );
        DeliveryPush::from_deliverable(OrderId::generate(), &deliverable)
    }

    #[tokio::test]
    async fn test_valid_push_accepted() {
        let (server, emitter) = start().await;
        let received = Arc::new(AtomicUsize::new(0));
        {
            let received = Arc::clone(&received);
            emitter.on(EventType::DeliveryReceived, move |_| {
                received.fetch_add(1, Ordering::SeqCst);
            });
        }

        let response = reqwest::Client::new()
            .post(server.url())
            .json(&sample_push())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(received.load(Ordering::SeqCst), 1);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_tampered_content_rejected() {
        let (server, emitter) = start().await;
        let rejected = Arc::new(AtomicUsize::new(0));
        {
            let rejected = Arc::clone(&rejected);
            emitter.on(EventType::DeliveryRejected, move |event| {
                assert_eq!(event.payload["reason"], "HASH_MISMATCH");
                rejected.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut push = sample_push();
        push.deliverable.content = "{\"echo\":\"tampered\"}".to_string();
        let response = reqwest::Client::new()
            .post(server.url())
            .json(&push)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_missing_fields_rejected() {
        let (server, _emitter) = start().await;
        let response = reqwest::Client::new()
            .post(server.url())
            .json(&json!({ "order_id": "ivxp-abc" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (server, _emitter) = start().await;
        server.stop().await;
        server.stop().await;
    }
}
