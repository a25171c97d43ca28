//! Fixed-window rate limiting shared by the admission gate and the gateway.
//!
//! Windows are keyed strings (`tool:<name>`, `conversation:<id>`,
//! `caller:<addr>`). Each key holds a count and a reset timestamp; a key whose
//! reset time has passed is reopened on its next check. This approximates a
//! sliding window with fixed buckets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Window length used for every per-minute ceiling.
pub const ONE_MINUTE: Duration = Duration::from_secs(60);

pub fn tool_key(tool_name: &str) -> String {
    format!("tool:{tool_name}")
}

pub fn conversation_key(conversation_id: &str) -> String {
    format!("conversation:{conversation_id}")
}

pub fn caller_key(address: &str) -> String {
    format!("caller:{address}")
}

// ── Clock ─────────────────────────────────────────────────────

/// Time source, injected so tests can step time deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += to_delta(by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn to_delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { count: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed counter store. Implementations must be safe for concurrent turns.
pub trait RateLimitStore: Send + Sync {
    /// Count one attempt against `key`, allowing at most `ceiling` per `window`.
    fn check(&self, key: &str, ceiling: u32, window: Duration) -> Result<RateDecision, RateLimitError>;

    /// Current window for `key`, if one exists (expired or not).
    fn window(&self, key: &str) -> Option<RateLimitWindow>;

    /// Drop windows whose reset time has passed. Returns how many were removed.
    fn sweep(&self) -> usize;

    /// Clear every window. Test isolation only.
    fn reset(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<String, RateLimitWindow>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<String, RateLimitWindow>> {
        match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn check(&self, key: &str, ceiling: u32, window: Duration) -> Result<RateDecision, RateLimitError> {
        let now = self.clock.now();
        let mut windows = self.windows();

        match windows.get_mut(key) {
            Some(current) if now < current.reset_at => {
                if current.count < ceiling {
                    current.count += 1;
                    Ok(RateDecision::Allowed { count: current.count })
                } else {
                    let retry_after = (current.reset_at - now).to_std().unwrap_or_default();
                    Ok(RateDecision::Limited { retry_after })
                }
            }
            _ => {
                windows.insert(
                    key.to_string(),
                    RateLimitWindow {
                        count: 1,
                        reset_at: now + to_delta(window),
                    },
                );
                Ok(RateDecision::Allowed { count: 1 })
            }
        }
    }

    fn window(&self, key: &str) -> Option<RateLimitWindow> {
        self.windows().get(key).copied()
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows();
        let before = windows.len();
        windows.retain(|_, w| now < w.reset_at);
        before - windows.len()
    }

    fn reset(&self) {
        self.windows().clear();
    }

    fn len(&self) -> usize {
        self.windows().len()
    }
}

/// Periodically sweep expired windows until the task is aborted.
pub fn spawn_sweeper(store: Arc<dyn RateLimitStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = store.sweep();
            if removed > 0 {
                debug!(removed, remaining = store.len(), "rate limiter cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_clock() -> (InMemoryRateLimitStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = InMemoryRateLimitStore::with_clock(clock.clone());
        (store, clock)
    }

    #[test]
    fn test_allows_up_to_ceiling_then_limits() {
        let (store, _clock) = store_with_clock();
        for expected in 1..=3 {
            let decision = store.check("tool:make_call", 3, ONE_MINUTE).unwrap();
            assert_eq!(decision, RateDecision::Allowed { count: expected });
        }
        let fourth = store.check("tool:make_call", 3, ONE_MINUTE).unwrap();
        assert!(!fourth.is_allowed());
        // Denials do not increment further
        assert_eq!(store.window("tool:make_call").unwrap().count, 3);
    }

    #[test]
    fn test_window_reopens_after_reset_time() {
        let (store, clock) = store_with_clock();
        for _ in 0..3 {
            store.check("tool:make_call", 3, ONE_MINUTE).unwrap();
        }
        assert!(!store.check("tool:make_call", 3, ONE_MINUTE).unwrap().is_allowed());

        clock.advance(ONE_MINUTE);
        let decision = store.check("tool:make_call", 3, ONE_MINUTE).unwrap();
        assert_eq!(decision, RateDecision::Allowed { count: 1 });
        assert_eq!(store.window("tool:make_call").unwrap().count, 1);
    }

    #[test]
    fn test_retry_after_reflects_remaining_window() {
        let (store, clock) = store_with_clock();
        store.check("conversation:c1", 1, ONE_MINUTE).unwrap();
        clock.advance(Duration::from_secs(45));
        match store.check("conversation:c1", 1, ONE_MINUTE).unwrap() {
            RateDecision::Limited { retry_after } => assert_eq!(retry_after, Duration::from_secs(15)),
            other => panic!("expected limited, got {other:?}"),
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let (store, _clock) = store_with_clock();
        store.check(&tool_key("make_call"), 1, ONE_MINUTE).unwrap();
        assert!(!store.check(&tool_key("make_call"), 1, ONE_MINUTE).unwrap().is_allowed());
        assert!(store.check(&tool_key("get_bookings"), 1, ONE_MINUTE).unwrap().is_allowed());
    }

    #[test]
    fn test_sweep_removes_only_expired_windows() {
        let (store, clock) = store_with_clock();
        store.check("old", 5, Duration::from_secs(10)).unwrap();
        store.check("new", 5, ONE_MINUTE).unwrap();
        clock.advance(Duration::from_secs(30));

        assert_eq!(store.sweep(), 1);
        assert!(store.window("old").is_none());
        assert!(store.window("new").is_some());
    }

    #[test]
    fn test_reset_clears_all_windows() {
        let (store, _clock) = store_with_clock();
        store.check("a", 5, ONE_MINUTE).unwrap();
        store.check("b", 5, ONE_MINUTE).unwrap();
        store.reset();
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_checks_never_exceed_ceiling() {
        let store = Arc::new(InMemoryRateLimitStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| store.check("shared", 20, ONE_MINUTE).unwrap().is_allowed())
                        .count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 20);
    }
}
