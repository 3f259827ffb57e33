//! Per-service credential pools with daily quotas.
//!
//! Daily reset is reset-on-access: a key's counter is compared against the
//! current UTC calendar date when it is considered for selection, and zeroed
//! if the date changed. There is no scheduled sweep.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::service::{ApiKeyEntry, ApiKeyInfo, ApiService, ServiceStats, mask_key};
use crate::constants::DEFAULT_KEY_DAILY_LIMIT;
use crate::error::QuotaError;

#[derive(Default)]
struct ServicePool {
    entries: Vec<ApiKeyEntry>,
    cursor: usize,
}

#[derive(Default)]
pub struct ApiKeyManager {
    pools: Mutex<HashMap<ApiService, ServicePool>>,
}

impl ApiKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the key pool for a service. Blank keys are skipped.
    /// Returns the number of keys registered.
    pub async fn register_service<I, S>(
        &self,
        service: ApiService,
        keys: I,
        daily_limit: Option<u32>,
    ) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let today = Utc::now().date_naive();
        let daily_limit = daily_limit.unwrap_or(DEFAULT_KEY_DAILY_LIMIT).max(1);

        let entries: Vec<ApiKeyEntry> = keys
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| ApiKeyEntry::new(k, service, daily_limit, today))
            .collect();
        let count = entries.len();

        self.pools
            .lock()
            .await
            .insert(service, ServicePool { entries, cursor: 0 });

        info!("Registered {count} API key(s) for {service} (daily limit {daily_limit})");
        count
    }

    pub async fn registered_services(&self) -> Vec<ApiService> {
        let guard = self.pools.lock().await;
        ApiService::ALL
            .into_iter()
            .filter(|s| guard.contains_key(s))
            .collect()
    }

    /// Round-robin selection starting at the service's cursor.
    pub async fn get_next_key(&self, service: ApiService) -> Result<String, QuotaError> {
        self.get_next_key_at(service, Utc::now()).await
    }

    pub async fn get_next_key_at(
        &self,
        service: ApiService,
        now: DateTime<Utc>,
    ) -> Result<String, QuotaError> {
        let today = now.date_naive();
        let mut guard = self.pools.lock().await;
        let pool = guard
            .get_mut(&service)
            .ok_or(QuotaError::NoKeysAvailable(service))?;

        let len = pool.entries.len();
        for offset in 0..len {
            let index = (pool.cursor + offset) % len;
            let entry = &mut pool.entries[index];

            if entry.refresh_daily(today) {
                debug!("Daily reset for {service} key {}", entry.prefix());
            }
            if !entry.is_available() {
                continue;
            }

            Self::mark_used(entry, now);
            pool.cursor = (index + 1) % len;
            return Ok(entry.key.clone());
        }

        warn!("No API keys available for {service} ({len} registered)");
        Err(QuotaError::NoKeysAvailable(service))
    }

    /// Uniform random selection among available keys. Does not move the
    /// round-robin cursor.
    pub async fn get_random_key(&self, service: ApiService) -> Result<String, QuotaError> {
        self.get_random_key_at(service, Utc::now()).await
    }

    pub async fn get_random_key_at(
        &self,
        service: ApiService,
        now: DateTime<Utc>,
    ) -> Result<String, QuotaError> {
        let today = now.date_naive();
        let mut guard = self.pools.lock().await;
        let pool = guard
            .get_mut(&service)
            .ok_or(QuotaError::NoKeysAvailable(service))?;

        let available: Vec<usize> = pool
            .entries
            .iter_mut()
            .enumerate()
            .filter_map(|(i, entry)| {
                entry.refresh_daily(today);
                entry.is_available().then_some(i)
            })
            .collect();

        if available.is_empty() {
            warn!("No API keys available for {service} (random selection)");
            return Err(QuotaError::NoKeysAvailable(service));
        }

        let pick = available[rand::rng().random_range(0..available.len())];
        let entry = &mut pool.entries[pick];
        Self::mark_used(entry, now);
        Ok(entry.key.clone())
    }

    fn mark_used(entry: &mut ApiKeyEntry, now: DateTime<Utc>) {
        entry.daily_usage += 1;
        entry.last_used_at = Some(now.timestamp_millis() as u64);
        if entry.daily_usage >= entry.daily_limit {
            info!(
                "{} key {} reached its daily limit ({})",
                entry.service,
                entry.prefix(),
                entry.daily_limit
            );
        }
    }

    /// Take matching keys out of rotation. Keys are matched by prefix so the
    /// caller never needs the full secret. Returns the number of keys changed.
    pub async fn mark_key_inactive(
        &self,
        service: ApiService,
        key_prefix: &str,
    ) -> Result<usize, QuotaError> {
        self.set_active(service, key_prefix, false).await
    }

    pub async fn reactivate_key(
        &self,
        service: ApiService,
        key_prefix: &str,
    ) -> Result<usize, QuotaError> {
        self.set_active(service, key_prefix, true).await
    }

    async fn set_active(
        &self,
        service: ApiService,
        key_prefix: &str,
        active: bool,
    ) -> Result<usize, QuotaError> {
        let key_prefix = key_prefix.trim();
        if key_prefix.is_empty() {
            return Err(QuotaError::InvalidRequest("key prefix cannot be empty".into()));
        }

        let mut guard = self.pools.lock().await;
        let Some(pool) = guard.get_mut(&service) else {
            return Ok(0);
        };

        let mut changed = 0;
        for entry in pool
            .entries
            .iter_mut()
            .filter(|e| e.key.starts_with(key_prefix))
        {
            entry.is_active = active;
            changed += 1;
        }

        if changed > 0 {
            let state = if active { "reactivated" } else { "deactivated" };
            info!(
                "{state} {changed} {service} key(s) matching {}",
                mask_key(key_prefix)
            );
        }
        Ok(changed)
    }

    pub async fn has_available_keys(&self, service: ApiService) -> bool {
        let today = Utc::now().date_naive();
        let guard = self.pools.lock().await;
        guard.get(&service).is_some_and(|pool| {
            pool.entries
                .iter()
                .any(|e| e.last_reset_date != today || e.is_available())
        })
    }

    /// Aggregate counters for a service. Counters from a previous day read as
    /// zero; stored state is left untouched until the next selection.
    pub async fn get_service_stats(&self, service: ApiService) -> ServiceStats {
        self.get_service_stats_at(service, Utc::now()).await
    }

    pub async fn get_service_stats_at(
        &self,
        service: ApiService,
        now: DateTime<Utc>,
    ) -> ServiceStats {
        let today = now.date_naive();
        let guard = self.pools.lock().await;
        let entries = guard
            .get(&service)
            .map(|p| p.entries.as_slice())
            .unwrap_or_default();

        let total_usage: u64 = entries
            .iter()
            .map(|e| u64::from(e.effective_usage(today)))
            .sum();
        let total_limit: u64 = entries.iter().map(|e| u64::from(e.daily_limit)).sum();
        let utilization_percent = if total_limit == 0 {
            0.0
        } else {
            total_usage as f64 / total_limit as f64 * 100.0
        };

        ServiceStats {
            service,
            total_keys: entries.len(),
            active_keys: entries
                .iter()
                .filter(|e| e.is_active || e.last_reset_date != today)
                .count(),
            total_usage,
            total_limit,
            utilization_percent,
        }
    }

    /// Masked listing of a service's keys
    pub async fn list_keys(&self, service: ApiService) -> Vec<ApiKeyInfo> {
        let today = Utc::now().date_naive();
        let guard = self.pools.lock().await;
        guard
            .get(&service)
            .map(|pool| {
                pool.entries
                    .iter()
                    .map(|e| ApiKeyInfo {
                        key_prefix: e.prefix(),
                        service,
                        daily_usage: e.effective_usage(today),
                        daily_limit: e.daily_limit,
                        is_active: e.is_active || e.last_reset_date != today,
                        last_reset_date: e.last_reset_date.to_string(),
                        last_used_at: e.last_used_at,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    async fn manager_with(keys: &[&str], limit: u32) -> ApiKeyManager {
        let manager = ApiKeyManager::new();
        manager
            .register_service(ApiService::Replicate, keys.iter().copied(), Some(limit))
            .await;
        manager
    }

    #[tokio::test]
    async fn test_round_robin_until_exhausted() {
        let manager = manager_with(&["key-a", "key-b"], 1).await;
        let now = Utc::now();

        assert_eq!(manager.get_next_key_at(ApiService::Replicate, now).await.unwrap(), "key-a");
        assert_eq!(manager.get_next_key_at(ApiService::Replicate, now).await.unwrap(), "key-b");
        let err = manager
            .get_next_key_at(ApiService::Replicate, now)
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::NoKeysAvailable(ApiService::Replicate)));
    }

    #[tokio::test]
    async fn test_round_robin_alternates() {
        let manager = manager_with(&["key-a", "key-b", "key-c"], 10).await;
        let now = Utc::now();
        let mut picks = Vec::new();
        for _ in 0..6 {
            picks.push(manager.get_next_key_at(ApiService::Replicate, now).await.unwrap());
        }
        assert_eq!(picks, ["key-a", "key-b", "key-c", "key-a", "key-b", "key-c"]);
    }

    #[tokio::test]
    async fn test_exhausted_keys_reset_next_day() {
        let manager = ApiKeyManager::new();
        manager
            .register_service(ApiService::Openai, ["sk-one"], Some(1))
            .await;

        let day_one = Utc::now();
        assert!(manager.get_next_key_at(ApiService::Openai, day_one).await.is_ok());
        assert!(manager.get_next_key_at(ApiService::Openai, day_one).await.is_err());

        let day_four = day_one + Duration::days(3);
        assert_eq!(
            manager.get_next_key_at(ApiService::Openai, day_four).await.unwrap(),
            "sk-one"
        );
    }

    #[tokio::test]
    async fn test_reset_only_on_calendar_date_change() {
        let manager = ApiKeyManager::new();
        manager
            .register_service(ApiService::Stability, ["sk-stab"], Some(1))
            .await;

        // Registration stamps today's date; select on fixed dates relative to it
        assert!(manager.get_next_key_at(ApiService::Stability, at(1, 1)).await.is_ok());
        // Same calendar day, 22 hours later: still exhausted
        assert!(manager.get_next_key_at(ApiService::Stability, at(1, 23)).await.is_err());
        // Two hours later but a new date: reset
        assert!(manager.get_next_key_at(ApiService::Stability, at(2, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unregistered_service_is_unavailable() {
        let manager = ApiKeyManager::new();
        let err = manager.get_next_key(ApiService::Generic).await.unwrap_err();
        assert_eq!(err.code(), "no_keys_available");
        assert!(manager.get_random_key(ApiService::Generic).await.is_err());
    }

    #[tokio::test]
    async fn test_inactive_keys_are_skipped_until_reactivated() {
        let manager = manager_with(&["r8_alpha_secret", "r8_beta_secret"], 10).await;
        let now = Utc::now();

        assert_eq!(
            manager.mark_key_inactive(ApiService::Replicate, "r8_alpha").await.unwrap(),
            1
        );
        for _ in 0..3 {
            assert_eq!(
                manager.get_next_key_at(ApiService::Replicate, now).await.unwrap(),
                "r8_beta_secret"
            );
        }

        assert_eq!(
            manager.reactivate_key(ApiService::Replicate, "r8_alpha").await.unwrap(),
            1
        );
        let picks = [
            manager.get_next_key_at(ApiService::Replicate, now).await.unwrap(),
            manager.get_next_key_at(ApiService::Replicate, now).await.unwrap(),
        ];
        assert!(picks.contains(&"r8_alpha_secret".to_string()));

        assert_eq!(
            manager.mark_key_inactive(ApiService::Replicate, "nope").await.unwrap(),
            0
        );
        assert!(manager.mark_key_inactive(ApiService::Replicate, "  ").await.is_err());
    }

    #[tokio::test]
    async fn test_random_key_respects_limits_and_cursor() {
        let manager = manager_with(&["key-a", "key-b"], 2).await;
        let now = Utc::now();

        for _ in 0..4 {
            let key = manager.get_random_key_at(ApiService::Replicate, now).await.unwrap();
            assert!(key == "key-a" || key == "key-b");
        }
        assert!(manager.get_random_key_at(ApiService::Replicate, now).await.is_err());
        assert!(manager.get_next_key_at(ApiService::Replicate, now).await.is_err());
    }

    #[tokio::test]
    async fn test_random_key_leaves_cursor_alone() {
        let manager = manager_with(&["key-a", "key-b"], 10).await;
        let now = Utc::now();
        manager.get_random_key_at(ApiService::Replicate, now).await.unwrap();
        assert_eq!(
            manager.get_next_key_at(ApiService::Replicate, now).await.unwrap(),
            "key-a"
        );
    }

    #[tokio::test]
    async fn test_service_stats() {
        let manager = manager_with(&["key-a", "key-b", " ", "key-c"], 4).await;
        let now = Utc::now();
        manager.get_next_key_at(ApiService::Replicate, now).await.unwrap();
        manager.get_next_key_at(ApiService::Replicate, now).await.unwrap();
        manager.mark_key_inactive(ApiService::Replicate, "key-c").await.unwrap();

        let stats = manager.get_service_stats_at(ApiService::Replicate, now).await;
        assert_eq!(stats.total_keys, 3);
        assert_eq!(stats.active_keys, 2);
        assert_eq!(stats.total_usage, 2);
        assert_eq!(stats.total_limit, 12);
        assert!((stats.utilization_percent - 16.666).abs() < 0.01);

        let empty = manager.get_service_stats(ApiService::Openai).await;
        assert_eq!(empty.total_keys, 0);
        assert_eq!(empty.utilization_percent, 0.0);
    }

    #[tokio::test]
    async fn test_list_keys_is_masked() {
        let manager = manager_with(&["r8_verysecretvalue"], 5).await;
        let keys = manager.list_keys(ApiService::Replicate).await;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_prefix, "r8_verys...");
        assert!(keys[0].is_active);
        assert_eq!(
            manager.registered_services().await,
            vec![ApiService::Replicate]
        );
        assert!(manager.has_available_keys(ApiService::Replicate).await);
        assert!(!manager.has_available_keys(ApiService::Openai).await);
    }
}
