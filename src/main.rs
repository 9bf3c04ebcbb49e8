//! IVXP provider HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server exposing the IVXP/1.0
//! provider surface: catalog, quoting, payment acceptance with on-chain
//! verification, order status, deliverable download, and confirmation.
//!
//! Endpoints:
//! - `GET /ivxp/catalog` – Advertised services
//! - `POST /ivxp/request` – Quote a service request (opens an order)
//! - `POST /ivxp/orders/{id}/payment` – Accept a payment claim
//! - `GET /ivxp/orders/{id}` – Order status
//! - `GET /ivxp/orders/{id}/deliverable` – Pull delivery
//! - `POST /ivxp/orders/{id}/confirm` – Signed delivery confirmation
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `IVXP_PRIVATE_KEY`, `IVXP_RPC_URL`, `IVXP_NETWORK` configure the wallet and chain
//! - `HOST`, `PORT` control the binding address
//! - `RUST_LOG` controls log verbosity

use dotenvy::dotenv;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ivxp_rs::config::{ProviderConfig, ServiceDefinition};
use ivxp_rs::handler::EchoHandler;
use ivxp_rs::provider::Provider;
use ivxp_rs::server::ProviderServer;
use ivxp_types::amount::UsdcAmount;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ProviderConfig::from_env()?.with_service(ServiceDefinition {
        service_type: "echo".to_string(),
        base_price_usdc: UsdcAmount::from_usdc(5),
        estimated_delivery_hours: 1,
        description: Some("Echo the request back as JSON".to_string()),
    });

    let provider = Arc::new(
        Provider::builder(config)
            .handler("echo", EchoHandler)
            .build()?,
    );
    let server = ProviderServer::start(provider).await?;

    shutdown_signal().await;
    tracing::info!("Shutting down, draining in-flight orders");
    server.stop().await;

    Ok(())
}

/// Resolves on SIGTERM or SIGINT.
async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("SIGTERM handler registration");
    tokio::select! {
        _ = sigterm.recv() => {},
        _ = tokio::signal::ctrl_c() => {},
    }
}
