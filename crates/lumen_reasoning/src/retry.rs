//! Retry with exponential backoff for HTTP model calls.
//!
//! Retries 5xx, 408 and network errors. 429 is NOT retried here: it is
//! surfaced as `LlmError::RateLimited` so the circuit breaker can lock the
//! model and the caller can move to the next tier.

use crate::error::LlmError;
use reqwest::{Response, StatusCode};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
}

/// Run `operation` until it yields a 2xx response, a non-retryable status,
/// or `max_attempts` is used up.
pub async fn with_retry<F, Fut>(
    config: &RetryConfig,
    model: &str,
    operation: F,
) -> Result<Response, LlmError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = reqwest::Result<Response>>,
{
    let mut delay = config.initial_delay;
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}", model, attempt);
                    }
                    return Ok(response);
                }

                let body = response.text().await.unwrap_or_default();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(LlmError::RateLimited {
                        model: model.to_string(),
                        message: body,
                    });
                }
                if !is_retryable_status(status) {
                    return Err(LlmError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }

                tracing::warn!(
                    "{} returned {} on attempt {}/{}: {}",
                    model,
                    status,
                    attempt,
                    config.max_attempts,
                    body.chars().take(200).collect::<String>()
                );
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    body,
                });
            }
            Err(e) => {
                tracing::warn!(
                    "{} network error on attempt {}/{}: {}",
                    model,
                    attempt,
                    config.max_attempts,
                    e
                );
                last_error = Some(LlmError::Other(anyhow::Error::new(e)));
            }
        }

        if attempt < config.max_attempts {
            let sleep_time = delay + Duration::from_millis(rand_jitter());
            tracing::info!(
                "{} retrying in {:.1}s (attempt {}/{})",
                model,
                sleep_time.as_secs_f64(),
                attempt + 1,
                config.max_attempts
            );
            tokio::time::sleep(sleep_time).await;
            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * config.backoff_factor).min(config.max_delay.as_secs_f64()),
            );
        }
    }

    Err(last_error.unwrap_or_else(|| {
        LlmError::Other(anyhow::anyhow!(
            "All {} retry attempts exhausted",
            config.max_attempts
        ))
    }))
}

/// 0-500ms from the clock's sub-second nanos.
fn rand_jitter() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 500) as u64
}
