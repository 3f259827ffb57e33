use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::constants::KEY_PREFIX_LEN;
use crate::error::QuotaError;

/// External vendor whose credentials are pooled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ApiService {
    Replicate,
    Openai,
    Stability,
    Generic,
}

impl ApiService {
    pub const ALL: [ApiService; 4] = [
        ApiService::Replicate,
        ApiService::Openai,
        ApiService::Stability,
        ApiService::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiService::Replicate => "replicate",
            ApiService::Openai => "openai",
            ApiService::Stability => "stability",
            ApiService::Generic => "generic",
        }
    }

    /// Environment variable holding the comma-separated key list
    pub fn env_var(&self) -> &'static str {
        match self {
            ApiService::Replicate => "REPLICATE_API_KEYS",
            ApiService::Openai => "OPENAI_API_KEYS",
            ApiService::Stability => "STABILITY_API_KEYS",
            ApiService::Generic => "GENERIC_API_KEYS",
        }
    }
}

impl fmt::Display for ApiService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiService {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApiService::ALL
            .into_iter()
            .find(|service| service.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| QuotaError::UnknownService(s.to_string()))
    }
}

/// One pooled credential with its own daily quota.
#[derive(Debug, Clone)]
pub struct ApiKeyEntry {
    pub key: String,
    pub service: ApiService,
    pub daily_usage: u32,
    pub daily_limit: u32,
    pub is_active: bool,
    pub last_reset_date: NaiveDate,
    /// Epoch ms of the last selection
    pub last_used_at: Option<u64>,
}

impl ApiKeyEntry {
    pub fn new(key: String, service: ApiService, daily_limit: u32, today: NaiveDate) -> Self {
        Self {
            key,
            service,
            daily_usage: 0,
            daily_limit,
            is_active: true,
            last_reset_date: today,
            last_used_at: None,
        }
    }

    /// Zero the counter and reactivate if `today` is a different calendar day
    /// than the last reset. Returns true when a reset happened.
    pub fn refresh_daily(&mut self, today: NaiveDate) -> bool {
        if self.last_reset_date == today {
            return false;
        }
        self.daily_usage = 0;
        self.is_active = true;
        self.last_reset_date = today;
        true
    }

    pub fn is_available(&self) -> bool {
        self.is_active && self.daily_usage < self.daily_limit
    }

    /// Usage as it would read after a reset on `today`, without mutating.
    pub fn effective_usage(&self, today: NaiveDate) -> u32 {
        if self.last_reset_date == today {
            self.daily_usage
        } else {
            0
        }
    }

    pub fn prefix(&self) -> String {
        mask_key(&self.key)
    }
}

/// Masked view of a key, safe to log or return from the admin API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyInfo {
    pub key_prefix: String,
    pub service: ApiService,
    pub daily_usage: u32,
    pub daily_limit: u32,
    pub is_active: bool,
    pub last_reset_date: String,
    pub last_used_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub service: ApiService,
    pub total_keys: usize,
    pub active_keys: usize,
    pub total_usage: u64,
    pub total_limit: u64,
    /// total_usage / total_limit as a percentage (0.0 when no keys)
    pub utilization_percent: f64,
}

pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(KEY_PREFIX_LEN).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_refresh_daily_only_on_new_date() {
        let mut entry = ApiKeyEntry::new("r8_abc".into(), ApiService::Replicate, 2, day(1));
        entry.daily_usage = 2;
        entry.is_active = false;

        assert!(!entry.refresh_daily(day(1)));
        assert_eq!(entry.daily_usage, 2);

        // Several idle days collapse into a single reset
        assert!(entry.refresh_daily(day(9)));
        assert_eq!(entry.daily_usage, 0);
        assert!(entry.is_active);
        assert_eq!(entry.last_reset_date, day(9));
    }

    #[test]
    fn test_service_parsing() {
        assert_eq!("replicate".parse::<ApiService>().unwrap(), ApiService::Replicate);
        assert_eq!("OpenAI".parse::<ApiService>().unwrap(), ApiService::Openai);
        let err = "gemini".parse::<ApiService>().unwrap_err();
        assert_eq!(err.code(), "unknown_service");
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("r8_1234567890abcdef"), "r8_12345...");
        assert_eq!(mask_key("abc"), "abc...");
    }
}
