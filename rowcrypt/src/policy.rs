//! Crypto policy: key expiry, revocation freshness, and cache configuration.

use crate::cache::CachePolicy;
use chrono::Utc;
use std::time::Duration;

pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(60 * 60 * 24 * 90); // 90 days
pub const DEFAULT_REVOKE_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60); // 60 minutes
pub const DEFAULT_CREATE_DATE_PRECISION: Duration = Duration::from_secs(60); // 1 minute
pub const DEFAULT_KEY_CACHE_MAX_SIZE: usize = 1000;
pub const DEFAULT_SESSION_CACHE_MAX_SIZE: usize = 1000;
pub const DEFAULT_SESSION_CACHE_DURATION: Duration = Duration::from_secs(60 * 60 * 2); // 2 hours

/// Policy governing key lifecycle and caching.
///
/// A key is expired once `now - created >= expire_key_after`; expired and
/// revoked keys still decrypt but trigger inline rotation on the next
/// encrypt. `revoke_check_interval` bounds how stale a cached key's revoked
/// flag may be before the envelope record is re-read.
#[derive(Debug, Clone)]
pub struct CryptoPolicy {
    /// Age after which a key is considered expired.
    pub expire_key_after: Duration,

    /// Maximum staleness of a cached key's revoked flag.
    pub revoke_check_interval: Duration,

    /// Truncation applied to new key timestamps; bounds how many distinct
    /// keys a rotation burst can create.
    pub create_date_precision: Duration,

    /// Whether system keys are cached.
    pub cache_system_keys: bool,

    /// Maximum entries in the system key cache.
    pub system_key_cache_max_size: usize,

    /// Eviction policy for the system key cache.
    pub system_key_cache_policy: CachePolicy,

    /// Whether intermediate keys are cached.
    pub cache_intermediate_keys: bool,

    /// Maximum entries in an intermediate key cache.
    pub intermediate_key_cache_max_size: usize,

    /// Eviction policy for intermediate key caches.
    pub intermediate_key_cache_policy: CachePolicy,

    /// Whether the intermediate key cache is shared across a factory's
    /// sessions instead of created per session.
    pub shared_intermediate_key_cache: bool,

    /// Whether whole sessions are cached and reference counted.
    pub cache_sessions: bool,

    /// Maximum entries in the session cache.
    pub session_cache_max_size: usize,

    /// Idle time after which a cached session is evicted.
    pub session_cache_duration: Duration,

    /// Eviction policy for the session cache.
    pub session_cache_policy: CachePolicy,
}

impl Default for CryptoPolicy {
    fn default() -> Self {
        Self {
            expire_key_after: DEFAULT_EXPIRE_AFTER,
            revoke_check_interval: DEFAULT_REVOKE_CHECK_INTERVAL,
            create_date_precision: DEFAULT_CREATE_DATE_PRECISION,
            cache_system_keys: true,
            system_key_cache_max_size: DEFAULT_KEY_CACHE_MAX_SIZE,
            system_key_cache_policy: CachePolicy::Simple,
            cache_intermediate_keys: true,
            intermediate_key_cache_max_size: DEFAULT_KEY_CACHE_MAX_SIZE,
            intermediate_key_cache_policy: CachePolicy::Simple,
            shared_intermediate_key_cache: false,
            cache_sessions: false,
            session_cache_max_size: DEFAULT_SESSION_CACHE_MAX_SIZE,
            session_cache_duration: DEFAULT_SESSION_CACHE_DURATION,
            session_cache_policy: CachePolicy::Slru,
        }
    }
}

impl CryptoPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long keys remain valid before expiring. Default 90 days.
    pub fn with_expire_after(mut self, duration: Duration) -> Self {
        self.expire_key_after = duration;
        self
    }

    /// Convenience for `with_expire_after` in whole days.
    pub fn with_key_expiration_days(self, days: u64) -> Self {
        self.with_expire_after(Duration::from_secs(days * 24 * 60 * 60))
    }

    /// Sets the revoked-flag staleness bound. Default 60 minutes.
    pub fn with_revoke_check_interval(mut self, duration: Duration) -> Self {
        self.revoke_check_interval = duration;
        self
    }

    /// Convenience for `with_revoke_check_interval` in whole minutes.
    pub fn with_revoke_check_minutes(self, minutes: u64) -> Self {
        self.with_revoke_check_interval(Duration::from_secs(minutes * 60))
    }

    /// Sets the timestamp truncation for new keys. Default 1 minute.
    pub fn with_create_date_precision(mut self, duration: Duration) -> Self {
        self.create_date_precision = duration;
        self
    }

    /// Disables caching of both system and intermediate keys.
    pub fn with_no_cache(mut self) -> Self {
        self.cache_system_keys = false;
        self.cache_intermediate_keys = false;
        self
    }

    /// Shares one intermediate key cache of the given capacity across all
    /// of a factory's sessions.
    pub fn with_shared_intermediate_key_cache(mut self, capacity: usize) -> Self {
        self.shared_intermediate_key_cache = true;
        self.intermediate_key_cache_max_size = capacity;
        self
    }

    /// Sets the eviction policy for the system key cache.
    pub fn with_system_key_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.system_key_cache_policy = policy;
        self
    }

    /// Sets the eviction policy for intermediate key caches.
    pub fn with_intermediate_key_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.intermediate_key_cache_policy = policy;
        self
    }

    /// Sets the maximum size of intermediate key caches.
    pub fn with_intermediate_key_cache_max_size(mut self, size: usize) -> Self {
        self.intermediate_key_cache_max_size = size;
        self
    }

    /// Enables session caching with reference counting.
    pub fn with_session_cache(mut self) -> Self {
        self.cache_sessions = true;
        self
    }

    /// Sets the session cache capacity. Default 1000.
    pub fn with_session_cache_max_size(mut self, size: usize) -> Self {
        self.session_cache_max_size = size;
        self
    }

    /// Sets the idle duration before cached sessions are evicted.
    /// Default 2 hours.
    pub fn with_session_cache_duration(mut self, duration: Duration) -> Self {
        self.session_cache_duration = duration;
        self
    }

    /// Sets the eviction policy for the session cache.
    pub fn with_session_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.session_cache_policy = policy;
        self
    }
}

/// Returns the current timestamp truncated to the given precision.
pub fn new_key_timestamp(truncate: Duration) -> i64 {
    let now = Utc::now().timestamp();
    let precision = truncate.as_secs() as i64;
    if precision > 0 {
        now - now.rem_euclid(precision)
    } else {
        now
    }
}

/// True if a key created at `created` has outlived `expire_after`.
/// A zero `expire_after` disables expiry.
pub fn is_key_expired(created: i64, expire_after: Duration) -> bool {
    let expire_secs = expire_after.as_secs() as i64;
    if expire_secs == 0 {
        return false;
    }
    Utc::now().timestamp() - created >= expire_secs
}
