//! JSON transport with error classification.
//!
//! A thin wrapper over `reqwest` that turns transport failures into the
//! coded client errors the orchestrator needs to make decisions: refused
//! connections become `PROVIDER_UNAVAILABLE`, mid-flight failures
//! `NETWORK_ERROR`, non-2xx replies carry the provider's wire code (when
//! the body holds one) plus the HTTP status, and schema mismatches become
//! `INVALID_RESPONSE`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use ivxp_types::error::ErrorBody;

use crate::error::{ClientError, Step};

/// JSON request/response transport.
#[derive(Debug, Clone)]
pub struct JsonHttpClient {
    inner: reqwest::Client,
}

impl Default for JsonHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonHttpClient {
    pub fn new() -> Self {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client construction");
        JsonHttpClient { inner }
    }

    /// Wrap a caller-provided reqwest client.
    pub fn from_client(inner: reqwest::Client) -> Self {
        JsonHttpClient { inner }
    }

    /// The underlying reqwest client, shared with the SSE consumer.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// POST a JSON body and decode a JSON reply.
    pub async fn post_json<B, T>(&self, url: Url, body: &B, step: Step) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.inner.post(url).json(body);
        self.execute(request, step).await
    }

    /// GET a JSON reply.
    pub async fn get_json<T>(&self, url: Url, step: Step) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let request = self.inner.get(url);
        self.execute(request, step).await
    }

    async fn execute<T>(
        &self,
        request: reqwest::RequestBuilder,
        step: Step,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
            return Err(ClientError::Provider {
                step,
                status: status.as_u16(),
                code: parsed.as_ref().map(|b| b.code),
                message: parsed
                    .map(|b| b.error)
                    .unwrap_or_else(|| format!("HTTP {status}")),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

fn classify_transport(error: reqwest::Error) -> ClientError {
    if error.is_connect() {
        ClientError::ProviderUnavailable(error.to_string())
    } else {
        ClientError::Network(error.to_string())
    }
}
