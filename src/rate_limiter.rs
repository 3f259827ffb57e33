//! Sliding-log admission control, one independent window per feature and client.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use utoipa::ToSchema;

use crate::constants::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_MS};
use crate::error::QuotaError;

/// Rate-limited feature; each has its own limiter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    Chat,
    TryOn,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Chat => "chat",
            Feature::TryOn => "try-on",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Feature::Chat),
            "try-on" | "tryon" => Ok(Feature::TryOn),
            other => Err(QuotaError::InvalidRequest(format!("unknown feature: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: Duration::from_millis(DEFAULT_WINDOW_MS),
        }
    }
}

/// Exact admission times within one window, oldest first
#[derive(Default)]
struct SlidingLog {
    timestamps: VecDeque<Instant>,
}

impl SlidingLog {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.timestamps.front() {
            if now.duration_since(*oldest) > window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record `now` if a slot is free, otherwise return the wait until one is.
    fn try_admit(&mut self, now: Instant, config: RateLimiterConfig) -> Result<(), Duration> {
        self.prune(now, config.window);
        if self.timestamps.len() < config.max_requests {
            self.timestamps.push_back(now);
            return Ok(());
        }
        Err(self.wait(now, config))
    }

    fn wait(&self, now: Instant, config: RateLimiterConfig) -> Duration {
        if self.timestamps.len() < config.max_requests {
            return Duration::ZERO;
        }
        match self.timestamps.front() {
            Some(oldest) => config.window.saturating_sub(now.duration_since(*oldest)),
            None => Duration::ZERO,
        }
    }
}

/// Sliding-window limiter that keeps the exact time of every admitted request.
pub struct RateLimiter {
    config: RateLimiterConfig,
    log: Mutex<SlidingLog>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            log: Mutex::new(SlidingLog::default()),
        }
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Admit a request if fewer than `max_requests` were admitted within the
    /// window. Admitted requests are recorded; refused ones are not.
    pub async fn can_make_request(&self) -> bool {
        self.log
            .lock()
            .await
            .try_admit(Instant::now(), self.config)
            .is_ok()
    }

    /// Time until the next request would be admitted. Zero when a slot is free.
    pub async fn time_until_next_request(&self) -> Duration {
        let now = Instant::now();
        let mut guard = self.log.lock().await;
        guard.prune(now, self.config.window);
        guard.wait(now, self.config)
    }

    /// Requests currently counted against the window
    pub async fn in_flight(&self) -> usize {
        let mut guard = self.log.lock().await;
        guard.prune(Instant::now(), self.config.window);
        guard.timestamps.len()
    }
}

struct RegistryState {
    logs: HashMap<(Feature, String), SlidingLog>,
    last_sweep: Instant,
}

/// Per (feature, client id) windows, created on first use. Clients whose
/// window has emptied are dropped by a sweep that runs at most once per
/// window length.
pub struct RateLimiterRegistry {
    chat: RateLimiterConfig,
    try_on: RateLimiterConfig,
    state: Mutex<RegistryState>,
}

impl RateLimiterRegistry {
    pub fn new(chat: RateLimiterConfig, try_on: RateLimiterConfig) -> Self {
        Self {
            chat,
            try_on,
            state: Mutex::new(RegistryState {
                logs: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn config_for(&self, feature: Feature) -> RateLimiterConfig {
        match feature {
            Feature::Chat => self.chat,
            Feature::TryOn => self.try_on,
        }
    }

    /// Admit a request or report how long the client must wait.
    pub async fn check(&self, feature: Feature, client_id: &str) -> Result<(), QuotaError> {
        let now = Instant::now();
        let config = self.config_for(feature);
        let mut guard = self.state.lock().await;
        self.sweep_idle(&mut guard, now);

        let result = guard
            .logs
            .entry((feature, client_id.to_string()))
            .or_default()
            .try_admit(now, config);

        result.map_err(|wait| {
            debug!("Rate limited {feature} request for client {client_id}");
            // An entry exactly one window old is still counted, so round up
            let retry_after_ms = (wait.as_millis() as u64).max(1);
            QuotaError::RateLimited { retry_after_ms }
        })
    }

    /// Number of (feature, client) windows currently held
    pub async fn tracked_clients(&self) -> usize {
        self.state.lock().await.logs.len()
    }

    fn sweep_idle(&self, state: &mut RegistryState, now: Instant) {
        let interval = self.chat.window.max(self.try_on.window);
        if now.duration_since(state.last_sweep) < interval {
            return;
        }
        state.last_sweep = now;

        let before = state.logs.len();
        state.logs.retain(|(feature, _), log| {
            log.prune(now, self.config_for(*feature).window);
            !log.timestamps.is_empty()
        });
        let evicted = before - state.logs.len();
        if evicted > 0 {
            debug!("Evicted {evicted} idle rate-limit window(s)");
        }
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default(), RateLimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_requests: usize, window_ms: u64) -> RateLimiterConfig {
        RateLimiterConfig {
            max_requests,
            window: Duration::from_millis(window_ms),
        }
    }

    #[tokio::test]
    async fn test_admits_up_to_max_then_refuses() {
        let limiter = RateLimiter::new(config(3, 1000));
        assert!(limiter.can_make_request().await);
        assert!(limiter.can_make_request().await);
        assert!(limiter.can_make_request().await);
        assert!(!limiter.can_make_request().await);
        // Refusals are not recorded
        assert_eq!(limiter.in_flight().await, 3);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(config(3, 50));
        for _ in 0..3 {
            assert!(limiter.can_make_request().await);
        }
        assert!(!limiter.can_make_request().await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.can_make_request().await);
        assert_eq!(limiter.in_flight().await, 1);
    }

    #[tokio::test]
    async fn test_time_until_next_request() {
        let limiter = RateLimiter::new(config(1, 10_000));
        assert_eq!(limiter.time_until_next_request().await, Duration::ZERO);

        assert!(limiter.can_make_request().await);
        let wait = limiter.time_until_next_request().await;
        assert!(wait > Duration::from_secs(9));
        assert!(wait <= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_registry_isolates_features_and_clients() {
        let registry = RateLimiterRegistry::new(config(1, 10_000), config(2, 10_000));

        assert!(registry.check(Feature::Chat, "alice").await.is_ok());
        let err = registry.check(Feature::Chat, "alice").await.unwrap_err();
        assert!(matches!(err, QuotaError::RateLimited { retry_after_ms } if retry_after_ms > 0));

        // Different client, different feature: separate windows
        assert!(registry.check(Feature::Chat, "bob").await.is_ok());
        assert!(registry.check(Feature::TryOn, "alice").await.is_ok());
        assert!(registry.check(Feature::TryOn, "alice").await.is_ok());
        assert!(registry.check(Feature::TryOn, "alice").await.is_err());
    }

    #[tokio::test]
    async fn test_registry_evicts_idle_clients() {
        let registry = RateLimiterRegistry::new(config(2, 50), config(2, 50));
        for client in ["alice", "bob", "carol"] {
            registry.check(Feature::Chat, client).await.unwrap();
        }
        registry.check(Feature::TryOn, "alice").await.unwrap();
        assert_eq!(registry.tracked_clients().await, 4);

        tokio::time::sleep(Duration::from_millis(80)).await;

        registry.check(Feature::Chat, "dave").await.unwrap();
        assert_eq!(registry.tracked_clients().await, 1);
    }

    #[tokio::test]
    async fn test_refusal_always_reports_a_wait() {
        let registry = RateLimiterRegistry::new(config(1, 20), config(1, 20));
        registry.check(Feature::Chat, "alice").await.unwrap();
        for _ in 0..50 {
            match registry.check(Feature::Chat, "alice").await {
                Err(QuotaError::RateLimited { retry_after_ms }) => assert!(retry_after_ms >= 1),
                Err(other) => panic!("unexpected error: {other}"),
                Ok(()) => {}
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[test]
    fn test_feature_parsing() {
        assert_eq!("chat".parse::<Feature>().unwrap(), Feature::Chat);
        assert_eq!("try-on".parse::<Feature>().unwrap(), Feature::TryOn);
        assert!("video".parse::<Feature>().is_err());
        assert_eq!(Feature::TryOn.to_string(), "try-on");
    }
}
