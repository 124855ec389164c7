//! Shared constants for Bastion components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default Gatehouse HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8899";

/// Name of the bypass cookie presented back to the validate endpoint
pub const CHALLENGE_COOKIE: &str = "ng_challenge";

/// Default bypass token validity (24 hours)
pub const DEFAULT_TOKEN_VALIDITY_SECS: u64 = 86_400;

/// How long an expired token record is kept before the purge sweep
/// deletes it (1 hour)
pub const TOKEN_RETENTION_GRACE_SECS: u64 = 3_600;

/// Default minimum acceptance score for score-based providers
pub const DEFAULT_MIN_SCORE: f64 = 0.5;

/// Challenge event log retention (7 days)
pub const LOG_RETENTION_SECS: i64 = 7 * 86_400;

/// Default statistics window in hours
pub const DEFAULT_STATS_WINDOW_HOURS: i64 = 24;

/// Provider verification timeout in seconds
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 8;

/// Token purge sweep interval in seconds (hourly)
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 3_600;

/// Redis key prefixes
pub mod redis_keys {
    /// Challenge config: challenge:cfg:global or challenge:cfg:host:{id}
    pub const CONFIG_PREFIX: &str = "challenge:cfg:";

    /// Token record by digest: challenge:token:{hash}
    pub const TOKEN_PREFIX: &str = "challenge:token:";

    /// Token id index: challenge:token:id:{id}
    pub const TOKEN_ID_PREFIX: &str = "challenge:token:id:";

    /// Per-IP token index set: challenge:token:ip:{ip}
    pub const TOKEN_IP_PREFIX: &str = "challenge:token:ip:";

    /// Set of all live token digests
    pub const TOKEN_INDEX: &str = "challenge:token:index";

    /// Challenge event log: challenge:log:global or challenge:log:host:{id}
    pub const LOG_PREFIX: &str = "challenge:log:";
}

/// HTTP header names
pub mod headers {
    /// Bypass token header (alternative to the cookie)
    pub const X_CHALLENGE_TOKEN: &str = "X-Challenge-Token";

    /// Geo decision set by the edge layer ("0" = already allowed by country)
    pub const X_GEO_BLOCKED: &str = "X-Geo-Blocked";

    /// Virtual host the auth subrequest was issued for
    pub const X_PROXY_HOST_ID: &str = "X-Proxy-Host-Id";

    /// Optional challenge reason override from the edge layer
    pub const X_CHALLENGE_REASON: &str = "X-Challenge-Reason";
}
