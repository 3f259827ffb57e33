use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use tracing::warn;
use url::{Host, Url};

use crate::constants::{
    DEFAULT_MAX_REQUESTS, DEFAULT_STATS_CACHE_TTL_SECS, DEFAULT_WINDOW_MS,
    MAX_STATS_CACHE_TTL_SECS,
};
use crate::credits::PlanTable;
use crate::error::QuotaError;
use crate::keys::ApiService;
use crate::rate_limiter::RateLimiterConfig;

/// CORS configuration mode
#[derive(Debug, Clone, PartialEq)]
pub enum CorsMode {
    /// Only allow localhost origins (default, for local development)
    LocalhostOnly,
    /// Allow all origins
    AllowAll,
    /// Allow specific origins (comma-separated list)
    AllowList(Vec<String>),
}

impl CorsMode {
    /// Whether a browser `Origin` header value is allowed
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            CorsMode::AllowAll => true,
            CorsMode::LocalhostOnly => {
                let Ok(url) = Url::parse(origin) else {
                    return false;
                };
                match url.host() {
                    Some(Host::Domain(domain)) => domain == "localhost",
                    Some(Host::Ipv4(ip)) => ip.is_loopback(),
                    Some(Host::Ipv6(ip)) => ip.is_loopback(),
                    None => false,
                }
            }
            CorsMode::AllowList(allowed) => allowed.iter().any(|a| a == origin),
        }
    }
}

pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub admin_username: String,
    pub admin_password: String,
    pub cors_mode: CorsMode,
    pub disable_auth: bool,
    /// Key pools per service, in configuration order
    pub key_pools: Vec<(ApiService, Vec<String>)>,
    pub key_daily_limit: Option<u32>,
    pub plans: PlanTable,
    pub chat_limits: RateLimiterConfig,
    pub try_on_limits: RateLimiterConfig,
    pub stats_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, QuotaError> {
        dotenv().ok();
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_vars<F>(var: F) -> Result<Self, QuotaError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = var("FASHIONAI_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&var, "FASHIONAI_PORT", 4100u16);

        let data_dir = var("FASHIONAI_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("fashionai")
            });

        let disable_auth = var("FASHIONAI_DISABLE_AUTH")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let (admin_username, admin_password) = if disable_auth {
            (
                var("FASHIONAI_ADMIN_USERNAME").unwrap_or_default(),
                var("FASHIONAI_ADMIN_PASSWORD").unwrap_or_default(),
            )
        } else {
            (
                var("FASHIONAI_ADMIN_USERNAME").ok_or_else(|| {
                    QuotaError::ConfigError("FASHIONAI_ADMIN_USERNAME must be set".into())
                })?,
                var("FASHIONAI_ADMIN_PASSWORD").ok_or_else(|| {
                    QuotaError::ConfigError("FASHIONAI_ADMIN_PASSWORD must be set".into())
                })?,
            )
        };

        // CORS configuration: "localhost" (default), "*" (allow all), or comma-separated origins
        let cors_mode = match var("FASHIONAI_CORS_ORIGINS").as_deref() {
            Some("*") => CorsMode::AllowAll,
            Some(origins) if !origins.trim().is_empty() => CorsMode::AllowList(split_list(origins)),
            _ => CorsMode::LocalhostOnly,
        };

        let key_pools = ApiService::ALL
            .into_iter()
            .filter_map(|service| {
                let keys = split_list(&var(service.env_var())?);
                (!keys.is_empty()).then_some((service, keys))
            })
            .collect();

        let key_daily_limit = var("FASHIONAI_KEY_DAILY_LIMIT").and_then(|v| match v.parse() {
            Ok(limit) => Some(limit),
            Err(_) => {
                warn!("Ignoring invalid FASHIONAI_KEY_DAILY_LIMIT={v}");
                None
            }
        });

        let defaults = PlanTable::default();
        let plans = PlanTable {
            free: parse_or(&var, "FASHIONAI_CREDITS_FREE", defaults.free),
            pro: parse_or(&var, "FASHIONAI_CREDITS_PRO", defaults.pro),
            elite: parse_or(&var, "FASHIONAI_CREDITS_ELITE", defaults.elite),
        };
        if plans.free == 0 || plans.pro == 0 || plans.elite == 0 {
            return Err(QuotaError::ConfigError(
                "plan credit allotments must be greater than zero".into(),
            ));
        }

        let limiter = |prefix: &str| RateLimiterConfig {
            max_requests: parse_or(&var, &format!("{prefix}_MAX_REQUESTS"), DEFAULT_MAX_REQUESTS),
            window: Duration::from_millis(parse_or(
                &var,
                &format!("{prefix}_WINDOW_MS"),
                DEFAULT_WINDOW_MS,
            )),
        };
        let chat_limits = limiter("FASHIONAI_CHAT");
        let try_on_limits = limiter("FASHIONAI_TRYON");
        for (prefix, limits) in [
            ("FASHIONAI_CHAT", chat_limits),
            ("FASHIONAI_TRYON", try_on_limits),
        ] {
            if limits.max_requests == 0 || limits.window.is_zero() {
                return Err(QuotaError::ConfigError(format!(
                    "{prefix}_MAX_REQUESTS and {prefix}_WINDOW_MS must be greater than zero"
                )));
            }
        }

        let stats_cache_ttl_secs = parse_or(
            &var,
            "FASHIONAI_STATS_CACHE_TTL_SECS",
            DEFAULT_STATS_CACHE_TTL_SECS,
        );
        if stats_cache_ttl_secs > MAX_STATS_CACHE_TTL_SECS {
            return Err(QuotaError::ConfigError(format!(
                "FASHIONAI_STATS_CACHE_TTL_SECS must be at most {MAX_STATS_CACHE_TTL_SECS}"
            )));
        }
        let stats_cache_ttl = Duration::from_secs(stats_cache_ttl_secs);

        Ok(Self {
            host,
            port,
            data_dir,
            admin_username,
            admin_password,
            cors_mode,
            disable_auth,
            key_pools,
            key_daily_limit,
            plans,
            chat_limits,
            try_on_limits,
            stats_cache_ttl,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("quota.db")
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_or<F, T>(var: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match var(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {name}={raw}");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, QuotaError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_with_auth_disabled() {
        let config = config_from(&[("FASHIONAI_DISABLE_AUTH", "true")]).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 4100);
        assert_eq!(config.plans, PlanTable::default());
        assert_eq!(config.cors_mode, CorsMode::LocalhostOnly);
        assert_eq!(config.chat_limits.max_requests, 5);
        assert_eq!(config.try_on_limits.window, Duration::from_millis(60_000));
        assert!(config.key_pools.is_empty());
        assert!(config.db_path().ends_with("quota.db"));
    }

    #[test]
    fn test_admin_credentials_required() {
        let err = config_from(&[]).err().unwrap();
        assert_eq!(err.code(), "configuration_error");

        let config = config_from(&[
            ("FASHIONAI_ADMIN_USERNAME", "admin"),
            ("FASHIONAI_ADMIN_PASSWORD", "secret"),
        ])
        .unwrap();
        assert!(!config.disable_auth);
        assert_eq!(config.admin_username, "admin");
    }

    #[test]
    fn test_key_pools_and_overrides() {
        let config = config_from(&[
            ("FASHIONAI_DISABLE_AUTH", "1"),
            ("REPLICATE_API_KEYS", "r8_a, r8_b,,"),
            ("OPENAI_API_KEYS", " "),
            ("FASHIONAI_KEY_DAILY_LIMIT", "50"),
            ("FASHIONAI_CREDITS_PRO", "120"),
            ("FASHIONAI_CHAT_MAX_REQUESTS", "not-a-number"),
            ("FASHIONAI_TRYON_WINDOW_MS", "1000"),
            ("FASHIONAI_CORS_ORIGINS", "https://shop.example, https://admin.example"),
        ])
        .unwrap();

        assert_eq!(
            config.key_pools,
            vec![(
                ApiService::Replicate,
                vec!["r8_a".to_string(), "r8_b".to_string()]
            )]
        );
        assert_eq!(config.key_daily_limit, Some(50));
        assert_eq!(config.plans.pro, 120);
        assert_eq!(config.chat_limits.max_requests, DEFAULT_MAX_REQUESTS);
        assert_eq!(config.try_on_limits.window, Duration::from_millis(1000));
        assert_eq!(
            config.cors_mode,
            CorsMode::AllowList(vec![
                "https://shop.example".into(),
                "https://admin.example".into()
            ])
        );
    }

    #[test]
    fn test_out_of_range_limits_rejected() {
        let err = config_from(&[
            ("FASHIONAI_DISABLE_AUTH", "1"),
            ("FASHIONAI_STATS_CACHE_TTL_SECS", "18446744073709551615"),
        ])
        .err()
        .unwrap();
        assert_eq!(err.code(), "configuration_error");

        let config = config_from(&[
            ("FASHIONAI_DISABLE_AUTH", "1"),
            ("FASHIONAI_STATS_CACHE_TTL_SECS", "86400"),
        ])
        .unwrap();
        assert_eq!(config.stats_cache_ttl, Duration::from_secs(86_400));

        assert!(
            config_from(&[
                ("FASHIONAI_DISABLE_AUTH", "1"),
                ("FASHIONAI_CHAT_MAX_REQUESTS", "0"),
            ])
            .is_err()
        );
        assert!(
            config_from(&[
                ("FASHIONAI_DISABLE_AUTH", "1"),
                ("FASHIONAI_TRYON_WINDOW_MS", "0"),
            ])
            .is_err()
        );
    }

    #[test]
    fn test_localhost_cors_accepts_loopback_origins() {
        let mode = CorsMode::LocalhostOnly;
        assert!(mode.allows("http://localhost:3000"));
        assert!(mode.allows("http://127.0.0.1:5173"));
        assert!(mode.allows("http://[::1]:3000"));
        assert!(!mode.allows("https://shop.example"));
        assert!(!mode.allows("not a url"));

        let list = CorsMode::AllowList(vec!["https://shop.example".into()]);
        assert!(list.allows("https://shop.example"));
        assert!(!list.allows("http://localhost:3000"));
        assert!(CorsMode::AllowAll.allows("https://anything.example"));
    }

    #[test]
    fn test_zero_allotment_rejected() {
        let result = config_from(&[
            ("FASHIONAI_DISABLE_AUTH", "1"),
            ("FASHIONAI_CREDITS_FREE", "0"),
        ]);
        assert!(result.is_err());
    }
}
