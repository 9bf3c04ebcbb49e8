//! HTTP endpoints implemented by the IVXP **provider**.
//!
//! These are the server-side handlers for the IVXP/1.0 surface. Canonical
//! routes live under `/ivxp/orders/{id}`; the legacy flat routes
//! (`/ivxp/deliver`, `/ivxp/status/{id}`, `/ivxp/download/{id}`) remain
//! routed to the same handlers until the cut-over date is fixed.
//!
//! Request bodies are JSON, UTF-8, at most 64 KiB. Malformed JSON and
//! missing fields come back as 400 with a stable generic message; no
//! internal detail crosses the boundary.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use ivxp_types::order::OrderId;
use ivxp_types::proto::{
    ConfirmationResponse, DeliveryAccepted, DeliveryConfirmation, DeliveryRequest,
    DeliveryResponse, OrderStatusMessage, ServiceCatalog, ServiceQuote, ServiceRequest,
};

use crate::error::ProviderError;
use crate::provider::Provider;

/// Request bodies above this size fail with 413 before parsing completes.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// The full IVXP provider router.
pub fn routes(provider: Arc<Provider>) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/ivxp/catalog", get(get_catalog))
        .route("/ivxp/health", get(get_health))
        .route("/ivxp/request", post(post_request))
        .route("/ivxp/orders/{id}/payment", post(post_payment))
        .route("/ivxp/deliver", post(post_deliver_legacy))
        .route("/ivxp/orders/{id}", get(get_order_status))
        .route("/ivxp/status/{id}", get(get_order_status))
        .route("/ivxp/orders/{id}/deliverable", get(get_deliverable))
        .route("/ivxp/download/{id}", get(get_deliverable))
        .route("/ivxp/orders/{id}/confirm", post(post_confirm))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(provider)
}

/// `GET /`: a simple greeting from the provider.
#[instrument(skip_all)]
async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /ivxp/catalog`: the provider's advertised services.
#[instrument(skip_all)]
async fn get_catalog(State(provider): State<Arc<Provider>>) -> Json<ServiceCatalog> {
    Json(provider.catalog())
}

/// `GET /ivxp/health`: liveness plus a summary for operators.
#[instrument(skip_all)]
async fn get_health(State(provider): State<Arc<Provider>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "provider": provider.config().provider_name,
        "network": provider.config().network,
        "services": provider.config().services.len(),
    }))
}

/// `POST /ivxp/request`: quote a service request.
#[instrument(skip_all)]
async fn post_request(
    State(provider): State<Arc<Provider>>,
    payload: Result<Json<ServiceRequest>, JsonRejection>,
) -> Result<Json<ServiceQuote>, ProviderError> {
    let Json(request) = payload.map_err(map_json_rejection)?;
    provider.request_quote(request).await.map(Json)
}

/// `POST /ivxp/orders/{id}/payment`: the canonical payment route.
#[instrument(skip_all)]
async fn post_payment(
    State(provider): State<Arc<Provider>>,
    Path(id): Path<String>,
    payload: Result<Json<DeliveryRequest>, JsonRejection>,
) -> Result<Json<DeliveryAccepted>, ProviderError> {
    let id = parse_order_id(&id)?;
    let Json(request) = payload.map_err(map_json_rejection)?;
    provider.accept_payment(Some(&id), request).await.map(Json)
}

/// `POST /ivxp/deliver`: the legacy payment route; the order id comes from
/// the body alone.
#[instrument(skip_all)]
async fn post_deliver_legacy(
    State(provider): State<Arc<Provider>>,
    payload: Result<Json<DeliveryRequest>, JsonRejection>,
) -> Result<Json<DeliveryAccepted>, ProviderError> {
    let Json(request) = payload.map_err(map_json_rejection)?;
    provider.accept_payment(None, request).await.map(Json)
}

/// `GET /ivxp/orders/{id}` and legacy `GET /ivxp/status/{id}`.
#[instrument(skip_all)]
async fn get_order_status(
    State(provider): State<Arc<Provider>>,
    Path(id): Path<String>,
) -> Result<Json<OrderStatusMessage>, ProviderError> {
    let id = parse_order_id(&id)?;
    provider.order_status(&id).await.map(Json)
}

/// `GET /ivxp/orders/{id}/deliverable` and legacy `GET /ivxp/download/{id}`.
#[instrument(skip_all)]
async fn get_deliverable(
    State(provider): State<Arc<Provider>>,
    Path(id): Path<String>,
) -> Result<Json<DeliveryResponse>, ProviderError> {
    let id = parse_order_id(&id)?;
    provider.download(&id).await.map(Json)
}

/// `POST /ivxp/orders/{id}/confirm`: the client's signed sign-off.
#[instrument(skip_all)]
async fn post_confirm(
    State(provider): State<Arc<Provider>>,
    Path(id): Path<String>,
    payload: Result<Json<DeliveryConfirmation>, JsonRejection>,
) -> Result<Json<ConfirmationResponse>, ProviderError> {
    let id = parse_order_id(&id)?;
    let Json(request) = payload.map_err(map_json_rejection)?;
    provider.confirm(&id, request).await.map(Json)
}

/// Unknown paths: 404 with a minimal body. Wrong methods on known paths
/// get axum's 405.
async fn fallback() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

fn parse_order_id(raw: &str) -> Result<OrderId, ProviderError> {
    OrderId::new(raw).map_err(|_| ProviderError::InvalidRequest)
}

/// Collapse axum's JSON rejections onto the provider error surface: 413
/// for oversize bodies, 400 with `Missing required fields: …` when serde
/// names an absent field, 400 `Invalid request` for everything else.
fn map_json_rejection(rejection: JsonRejection) -> ProviderError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ProviderError::RequestTooLarge;
    }
    match &rejection {
        JsonRejection::JsonDataError(e) => match missing_field_name(&e.body_text()) {
            Some(field) => ProviderError::MissingFields(field),
            None => ProviderError::InvalidRequest,
        },
        _ => ProviderError::InvalidRequest,
    }
}

/// Pull the field name out of serde's `missing field `name`` message.
fn missing_field_name(message: &str) -> Option<String> {
    let rest = message.split("missing field `").nth(1)?;
    let name = rest.split('`').next()?;
    Some(name.to_string())
}
