//! Listener binding and graceful shutdown for the provider.
//!
//! [`ProviderServer::start`] binds the configured address (port 0 asks the
//! OS for one), layers tracing, CORS, and trailing-slash normalization over
//! the routes, and serves until [`ProviderServer::stop`] fires the
//! cancellation token. Stopping drains both in-flight HTTP handlers and
//! the background order-processing tasks, and is idempotent.

use axum::ServiceExt;
use axum::extract::Request;
use axum::http::Method;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::Layer;
use tower_http::cors;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::error::ProviderError;
use crate::http;
use crate::provider::Provider;

/// A running IVXP provider listener.
pub struct ProviderServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProviderServer {
    /// Bind the provider's configured address and start serving.
    pub async fn start(provider: Arc<Provider>) -> Result<Self, ProviderError> {
        let addr = SocketAddr::new(provider.config().host, provider.config().port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProviderError::Internal(format!("failed to bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ProviderError::Internal(e.to_string()))?;

        let shutdown = provider.shutdown_token().clone();
        let tasks = provider.tasks().clone();

        let router = http::routes(provider)
            .layer(TraceLayer::new_for_http())
            .layer(
                cors::CorsLayer::new()
                    .allow_origin(cors::Any)
                    .allow_methods([Method::GET, Method::POST])
                    .allow_headers(cors::Any),
            );
        // Trailing-slash normalization has to wrap the router itself so it
        // runs before route matching.
        let app = NormalizePathLayer::trim_trailing_slash().layer(router);

        let graceful_token = shutdown.clone();
        let server = axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .with_graceful_shutdown(async move { graceful_token.cancelled().await });
        let handle = tokio::spawn(async move {
            if let Err(error) = server.await {
                tracing::error!(%error, "Provider server exited with error");
            }
        });
        tracing::info!("IVXP provider listening at http://{local_addr}");

        Ok(ProviderServer {
            local_addr,
            shutdown,
            tasks,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The provider's base URL for clients.
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}", self.local_addr)).expect("bound address is a valid URL")
    }

    /// Stop accepting requests, drain in-flight handlers and background
    /// order tasks. Safe to call more than once.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().expect("server handle lock").take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::error!(%error, "Provider server task panicked");
            }
        }
        self.tasks.close();
        self.tasks.wait().await;
    }
}
