//! Reconnecting server-sent-events consumer.
//!
//! Some providers stream order progress over `text/event-stream`. This
//! consumer dispatches the typed events below, reconnects on any transport
//! failure with the same backoff schedule as the polling engine, and
//! signals exhaustion once the retry budget is spent so the orchestrator
//! can fall back to polling.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use ivxp_types::order::OrderStatus;

use crate::poll::{PollOptions, backoff_delay};

/// Typed events carried on an IVXP progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// The order moved to a new status.
    StatusUpdate(OrderStatus),
    /// Free-form progress payload.
    Progress(serde_json::Value),
    /// Processing finished; fetch the authoritative status.
    Completed,
    /// Processing failed; fetch the authoritative status.
    Failed,
}

/// Tuning for the reconnect loop.
#[derive(Debug, Clone)]
pub struct SseOptions {
    /// Reconnect attempts before signaling exhaustion.
    pub max_retries: u32,
    /// Reconnect delay schedule, shared with the polling engine.
    pub backoff: PollOptions,
}

impl Default for SseOptions {
    fn default() -> Self {
        SseOptions {
            max_retries: 5,
            backoff: PollOptions::default(),
        }
    }
}

/// Handle detaching a running subscription. Dropping it does not stop the
/// stream; `unsubscribe` (idempotent) does.
#[derive(Debug, Clone)]
pub struct SseSubscription {
    cancel: CancellationToken,
}

impl SseSubscription {
    /// Stop the stream and any pending reconnect attempt.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

/// Subscribe to an event stream.
///
/// `on_event` fires for every parsed frame. `on_exhausted` fires exactly
/// once, with the spent retry budget, if reconnection gives up; it never
/// fires after `unsubscribe` or parent cancellation.
pub fn connect<FEvent, FExhausted>(
    client: reqwest::Client,
    url: Url,
    options: SseOptions,
    cancellation: &CancellationToken,
    on_event: FEvent,
    on_exhausted: FExhausted,
) -> SseSubscription
where
    FEvent: Fn(SseEvent) + Send + Sync + 'static,
    FExhausted: FnOnce(u32) + Send + 'static,
{
    let cancel = cancellation.child_token();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut retries = 0u32;
        let mut on_exhausted = Some(on_exhausted);
        loop {
            if task_cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = task_cancel.cancelled() => return,
                _ = run_stream(&client, &url, &on_event) => {}
            }
            if task_cancel.is_cancelled() {
                return;
            }
            retries += 1;
            if retries > options.max_retries {
                tracing::warn!(%url, retries = options.max_retries, "SSE stream exhausted");
                if let Some(exhausted) = on_exhausted.take() {
                    exhausted(options.max_retries);
                }
                return;
            }
            tracing::debug!(%url, retry = retries, "SSE stream dropped, reconnecting");
            let delay = backoff_delay(retries - 1, &options.backoff);
            tokio::select! {
                _ = task_cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    });
    SseSubscription { cancel }
}

/// One connection attempt: open the stream and dispatch frames until it
/// ends or fails.
async fn run_stream<FEvent>(client: &reqwest::Client, url: &Url, on_event: &FEvent)
where
    FEvent: Fn(SseEvent),
{
    let response = match client
        .get(url.clone())
        .header(http::header::ACCEPT, "text/event-stream")
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            tracing::debug!(%url, status = %response.status(), "SSE endpoint rejected connection");
            return;
        }
        Err(error) => {
            tracing::debug!(%url, %error, "SSE connection failed");
            return;
        }
    };

    let mut buffer = String::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else {
            break;
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(frame_end) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..frame_end + 2).collect();
            if let Some(event) = parse_frame(&frame) {
                on_event(event);
            }
        }
    }
}

/// Parse one `event:`/`data:` frame into a typed event.
fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event_name = "message";
    let mut data_lines = Vec::new();
    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("event:") {
            event_name = value.trim();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // Comment lines (leading ':') and unknown fields are ignored.
    }
    let data = data_lines.join("\n");
    match event_name {
        "status_update" => {
            #[derive(serde::Deserialize)]
            struct StatusData {
                status: OrderStatus,
            }
            let parsed: StatusData = serde_json::from_str(&data).ok()?;
            Some(SseEvent::StatusUpdate(parsed.status))
        }
        "progress" => {
            let value = serde_json::from_str(&data).unwrap_or(serde_json::Value::Null);
            Some(SseEvent::Progress(value))
        }
        "completed" => Some(SseEvent::Completed),
        "failed" => Some(SseEvent::Failed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn tiny_backoff() -> SseOptions {
        SseOptions {
            max_retries: 2,
            backoff: PollOptions {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                max_attempts: 5,
                jitter: 0.0,
            },
        }
    }

    async fn spawn_sse_server(body: &'static str) -> Url {
        let app = Router::new().route(
            "/stream",
            get(move || async move {
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    body,
                )
                    .into_response()
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/stream")).unwrap()
    }

    #[test]
    fn test_parse_frames() {
        assert_eq!(
            parse_frame("event: status_update\ndata: {\"status\":\"processing\"}\n\n"),
            Some(SseEvent::StatusUpdate(OrderStatus::Processing))
        );
        assert_eq!(
            parse_frame("event: completed\ndata: {}\n\n"),
            Some(SseEvent::Completed)
        );
        assert_eq!(
            parse_frame("event: failed\ndata: {}\n\n"),
            Some(SseEvent::Failed)
        );
        assert_eq!(parse_frame(": keep-alive\n\n"), None);
        assert_eq!(parse_frame("event: unknown\ndata: {}\n\n"), None);
    }

    #[tokio::test]
    async fn test_receives_events_then_exhausts() {
        let url = spawn_sse_server(
            "event: status_update\ndata: {\"status\":\"processing\"}\n\nevent: completed\ndata: {}\n\n",
        )
        .await;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (exhausted_tx, mut exhausted_rx) = mpsc::unbounded_channel();
        let cancellation = CancellationToken::new();
        let _subscription = connect(
            reqwest::Client::new(),
            url,
            tiny_backoff(),
            &cancellation,
            move |event| {
                let _ = event_tx.send(event);
            },
            move |retries| {
                let _ = exhausted_tx.send(retries);
            },
        );

        assert_eq!(
            event_rx.recv().await,
            Some(SseEvent::StatusUpdate(OrderStatus::Processing))
        );
        assert_eq!(event_rx.recv().await, Some(SseEvent::Completed));
        // The finite body keeps ending the stream; the budget runs out.
        let retries = tokio::time::timeout(Duration::from_secs(5), exhausted_rx.recv())
            .await
            .expect("exhaustion signal");
        assert_eq!(retries, Some(2));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_stops_exhaustion() {
        let url = Url::parse("http://127.0.0.1:1/stream").unwrap();
        let (exhausted_tx, mut exhausted_rx) = mpsc::unbounded_channel::<u32>();
        let cancellation = CancellationToken::new();
        let subscription = connect(
            reqwest::Client::new(),
            url,
            SseOptions {
                max_retries: 100,
                backoff: PollOptions {
                    initial_delay: Duration::from_millis(5),
                    max_delay: Duration::from_millis(10),
                    max_attempts: 5,
                    jitter: 0.0,
                },
            },
            &cancellation,
            |_| {},
            move |retries| {
                let _ = exhausted_tx.send(retries);
            },
        );
        subscription.unsubscribe();
        subscription.unsubscribe();
        // No exhaustion after detaching.
        let outcome =
            tokio::time::timeout(Duration::from_millis(200), exhausted_rx.recv()).await;
        assert!(outcome.is_err() || outcome.unwrap().is_none());
    }
}
