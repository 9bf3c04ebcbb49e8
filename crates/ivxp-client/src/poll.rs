//! Exponential backoff + jitter + cancellation polling.
//!
//! Drives an arbitrary async predicate until it yields a value, the
//! attempt budget runs out, or the cancellation token fires. The delay
//! schedule is `min(initial · 2^k, max)` perturbed by uniform jitter of
//! `±jitter · delay`, floored at the initial delay.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

/// Tuning for a polling loop.
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// First delay between attempts.
    pub initial_delay: Duration,
    /// Ceiling for the exponential schedule.
    pub max_delay: Duration,
    /// Attempts before giving up with `MAX_POLL_ATTEMPTS`.
    pub max_attempts: u32,
    /// Jitter fraction in `[0, 1]`; each delay is perturbed by up to this
    /// share of itself in either direction.
    pub jitter: f64,
}

impl Default for PollOptions {
    fn default() -> Self {
        PollOptions {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 20,
            jitter: 0.2,
        }
    }
}

/// The delay before attempt `attempt + 1`, jittered and clamped.
///
/// Exposed so the SSE reconnect loop shares the exact same schedule.
pub fn backoff_delay(attempt: u32, options: &PollOptions) -> Duration {
    let initial = options.initial_delay.as_secs_f64();
    let max = options.max_delay.as_secs_f64();
    let base = (initial * 2f64.powi(attempt as i32)).min(max);
    let jittered = if options.jitter > 0.0 {
        let factor = rand::rng().random_range(-options.jitter..=options.jitter);
        base * (1.0 + factor)
    } else {
        base
    };
    Duration::from_secs_f64(jittered.clamp(initial, max * (1.0 + options.jitter)))
}

/// Poll `predicate` until it yields a value.
///
/// The predicate returns `Ok(Some(value))` to finish, `Ok(None)` to keep
/// going, or an error to abort immediately. Cancellation is checked before
/// every predicate call and raced against every sleep; a fired token fails
/// the poll with [`ClientError::Cancelled`].
pub async fn poll<T, F, Fut>(
    mut predicate: F,
    options: &PollOptions,
    cancellation: &CancellationToken,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ClientError>>,
{
    for attempt in 0..options.max_attempts {
        if cancellation.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        if let Some(value) = predicate().await? {
            return Ok(value);
        }
        if attempt + 1 == options.max_attempts {
            break;
        }
        let delay = backoff_delay(attempt, options);
        tokio::select! {
            _ = cancellation.cancelled() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
    Err(ClientError::MaxPollAttempts {
        attempts: options.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_options(max_attempts: u32) -> PollOptions {
        PollOptions {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts,
            jitter: 0.2,
        }
    }

    #[tokio::test]
    async fn test_resolves_when_predicate_yields() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let value = poll(
            move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                        Ok(Some(42))
                    } else {
                        Ok(None)
                    }
                }
            },
            &fast_options(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempt_budget() {
        let result: Result<(), _> = poll(
            || async { Ok(None) },
            &fast_options(3),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            result.unwrap_err(),
            ClientError::MaxPollAttempts { attempts: 3 }
        ));
    }

    #[tokio::test]
    async fn test_predicate_error_aborts() {
        let result: Result<(), _> = poll(
            || async { Err(ClientError::Network("boom".to_string())) },
            &fast_options(10),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result.unwrap_err(), ClientError::Network(_)));
    }

    #[tokio::test]
    async fn test_cancellation_checked_before_predicate() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let result: Result<(), _> = poll(
            move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            },
            &fast_options(10),
            &token,
        )
        .await;
        assert!(matches!(result.unwrap_err(), ClientError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_sleep() {
        let options = PollOptions {
            initial_delay: Duration::from_secs(60),
            ..Default::default()
        };
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let started = std::time::Instant::now();
        let result: Result<(), _> = poll(|| async { Ok(None) }, &options, &token).await;
        assert!(matches!(result.unwrap_err(), ClientError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_schedule_bounds() {
        let options = PollOptions::default();
        let mut previous_base = 0f64;
        for attempt in 0..10 {
            let delay = backoff_delay(attempt, &options);
            // Within [initial, max·(1+jitter)].
            assert!(delay >= options.initial_delay);
            assert!(delay.as_secs_f64() <= options.max_delay.as_secs_f64() * 1.2 + f64::EPSILON);
            // Monotone non-decreasing up to the cap, modulo jitter.
            let base = (options.initial_delay.as_secs_f64() * 2f64.powi(attempt as i32))
                .min(options.max_delay.as_secs_f64());
            assert!(base >= previous_base);
            previous_base = base;
        }
    }

    #[test]
    fn test_backoff_without_jitter_is_exact() {
        let options = PollOptions {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(backoff_delay(0, &options), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, &options), Duration::from_secs(2));
        assert_eq!(backoff_delay(4, &options), Duration::from_secs(16));
        // Capped at max_delay from attempt 5 on.
        assert_eq!(backoff_delay(5, &options), Duration::from_secs(30));
        assert_eq!(backoff_delay(9, &options), Duration::from_secs(30));
    }
}
