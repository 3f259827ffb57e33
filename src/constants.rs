/// One day in milliseconds; credit accounts reset on this period
pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Default daily credit allotments per plan tier
pub const FREE_TIER_CREDITS: u32 = 10;
pub const PRO_TIER_CREDITS: u32 = 100;
pub const ELITE_TIER_CREDITS: u32 = 300;

/// Average daily credit usage at which a higher tier is recommended
pub const ELITE_RECOMMENDATION_THRESHOLD: f64 = 100.0;
pub const PRO_RECOMMENDATION_THRESHOLD: f64 = 20.0;

/// Trailing window used for tier recommendations
pub const RECOMMENDATION_WINDOW_DAYS: u32 = 7;

/// Default trailing window for credit statistics
pub const DEFAULT_STATS_DAYS: u32 = 30;
pub const MAX_STATS_DAYS: u32 = 365;

/// Default per-key daily request limit when none is configured
pub const DEFAULT_KEY_DAILY_LIMIT: u32 = 1000;

/// Number of leading characters of a key that may appear in logs and listings
pub const KEY_PREFIX_LEN: usize = 8;

/// Default sliding-window limiter settings (per feature, per client)
pub const DEFAULT_MAX_REQUESTS: usize = 5;
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Default TTL of memoised credit statistics
pub const DEFAULT_STATS_CACHE_TTL_SECS: u64 = 30;
pub const MAX_STATS_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
