//! Per-model circuit breaker.
//!
//! A 429 from upstream locks that model until the wait hint in the error text
//! has passed. Every tiered model call checks the table first. Entries expire
//! lazily on the next check.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Used when the upstream error carries no usable wait hint.
pub const DEFAULT_LOCK: Duration = Duration::from_secs(60);
/// Added on top of a parsed wait hint.
pub const SAFETY_BUFFER: Duration = Duration::from_secs(5);

// Millisecond hints come first so the "m" of "250ms" is never read as minutes
static RETRY_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)try again in (?:(\d+(?:\.\d+)?)ms|(\d+)m(?:(\d+(?:\.\d+)?)s)?|(\d+(?:\.\d+)?)s)")
        .expect("static regex is valid")
});

/// Parse "try again in 1m30s" / "7.5s" / "250ms" style hints.
/// Returns `None` when there is no hint or it amounts to zero.
pub fn parse_retry_hint(text: &str) -> Option<Duration> {
    let caps = RETRY_HINT.captures(text)?;
    let number = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let total = number(1) / 1000.0 + number(2) * 60.0 + number(3) + number(4);
    if total > 0.0 {
        Duration::try_from_secs_f64(total).ok()
    } else {
        None
    }
}

/// Shared model lock table. Cheap to check; clone the `Arc` into every
/// component that calls a model.
#[derive(Debug, Default)]
pub struct TokenBudget {
    locks: Mutex<HashMap<String, Instant>>,
}

impl TokenBudget {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // A poisoned table still holds valid instants
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// False while `model` is locked. Removes the entry once it has expired.
    pub fn can_use(&self, model: &str) -> bool {
        let mut table = self.table();
        match table.get(model) {
            Some(unlock_at) if *unlock_at > Instant::now() => false,
            Some(_) => {
                table.remove(model);
                tracing::info!("Circuit breaker released for {}", model);
                true
            }
            None => true,
        }
    }

    /// Lock `model` based on the wait hint in `error_text`. Returns the lock length.
    pub fn report_429(&self, model: &str, error_text: &str) -> Duration {
        let wait = match parse_retry_hint(error_text) {
            Some(hint) => hint + SAFETY_BUFFER,
            None => DEFAULT_LOCK,
        };
        self.table().insert(model.to_string(), Instant::now() + wait);
        tracing::warn!(
            "Circuit breaker tripped for {}: locked for {:.1}s",
            model,
            wait.as_secs_f64()
        );
        metrics::counter!("lumen_circuit_breaker_trips_total", "model" => model.to_string())
            .increment(1);
        wait
    }

    /// Remaining lock time in seconds, never negative.
    pub fn get_lock_duration(&self, model: &str) -> f64 {
        self.table()
            .get(model)
            .map(|unlock_at| {
                unlock_at
                    .saturating_duration_since(Instant::now())
                    .as_secs_f64()
            })
            .unwrap_or(0.0)
    }

    pub fn is_tracked(&self, model: &str) -> bool {
        self.table().contains_key(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_hint_forms() {
        assert_eq!(
            parse_retry_hint("Please try again in 1m30s."),
            Some(Duration::from_secs(90))
        );
        assert_eq!(
            parse_retry_hint("Rate limit reached. Please try again in 7.5s"),
            Some(Duration::from_secs_f64(7.5))
        );
        assert_eq!(parse_retry_hint("try again in 2m"), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_hint("Please try again in 250ms."),
            Some(Duration::from_millis(250))
        );
        assert_eq!(parse_retry_hint("quota exceeded"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_budget_allows_everything() {
        let budget = TokenBudget::new();
        assert!(budget.can_use("llama-3.3-70b-versatile"));
        assert_eq!(budget.get_lock_duration("llama-3.3-70b-versatile"), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_from_hint_then_lazy_expiry() {
        let budget = TokenBudget::new();
        let wait = budget.report_429("m", "Rate limit reached ... try again in 1m30s");
        assert_eq!(wait, Duration::from_secs(95));
        assert!(!budget.can_use("m"));
        let remaining = budget.get_lock_duration("m");
        assert!((remaining - 95.0).abs() <= 1.0, "remaining was {}", remaining);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!budget.can_use("m"));

        tokio::time::advance(Duration::from_secs(36)).await;
        assert!(budget.can_use("m"));
        assert!(!budget.is_tracked("m"));
        assert_eq!(budget.get_lock_duration("m"), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_millisecond_hint_locks_briefly() {
        let budget = TokenBudget::new();
        let wait = budget.report_429("m", "Rate limit reached. Please try again in 250ms.");
        assert_eq!(wait, Duration::from_millis(250) + SAFETY_BUFFER);
        assert!(budget.get_lock_duration("m") < 6.0);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(budget.can_use("m"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparsable_hint_uses_default() {
        let budget = TokenBudget::new();
        assert_eq!(budget.report_429("m", "429 Too Many Requests"), DEFAULT_LOCK);
        assert!(!budget.can_use("m"));
        // Other models are unaffected
        assert!(budget.can_use("other"));
    }
}
