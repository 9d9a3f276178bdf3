//! Per-source-IP admission control (§4.4): a TTL-expiring token-bucket
//! cache, consulted before the signon state machine branches into
//! FLAP-auth/BUCP-auth/service-entry.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Parameters for the IP rate limiter, recognized from configuration
/// (§6.3): `rate_per_sec`, `burst`, `entry_ttl`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub rate_per_sec: f64,
    pub burst: f64,
    pub entry_ttl: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 10.0,
            burst: 20.0,
            entry_ttl: Duration::from_secs(60),
        }
    }
}

struct Entry {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
    is_bucp: bool,
}

impl Entry {
    fn new(config: &RateLimiterConfig, now: Instant) -> Self {
        Self {
            tokens: config.burst,
            last_refill: now,
            last_seen: now,
            is_bucp: false,
        }
    }

    fn refill(&mut self, config: &RateLimiterConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.rate_per_sec).min(config.burst);
        self.last_refill = now;
    }
}

/// A TTL-expiring cache mapping source IP to a token bucket plus an
/// "auth-flavor" tag (§4.4). Internally concurrent: safe to share across
/// accept loops without an external lock.
pub struct IpRateLimiter {
    config: RateLimiterConfig,
    entries: Mutex<HashMap<IpAddr, Entry>>,
}

impl IpRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch or create the entry for `ip`, consume one token, and report
    /// the outcome plus the entry's current auth-flavor tag.
    pub fn allow(&self, ip: IpAddr) -> (bool, bool) {
        self.allow_at(ip, Instant::now())
    }

    fn allow_at(&self, ip: IpAddr, now: Instant) -> (bool, bool) {
        let mut entries = self.entries.lock();
        self.evict_expired(&mut entries, now);

        let entry = entries
            .entry(ip)
            .or_insert_with(|| Entry::new(&self.config, now));
        entry.refill(&self.config, now);
        entry.last_seen = now;

        let allowed = if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            true
        } else {
            false
        };

        (allowed, entry.is_bucp)
    }

    /// Mark `ip`'s entry as BUCP, after the first BUCP challenge/login SNAC
    /// is observed from it.
    pub fn set_bucp(&self, ip: IpAddr) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&ip) {
            entry.is_bucp = true;
        }
    }

    fn evict_expired(&self, entries: &mut HashMap<IpAddr, Entry>, now: Instant) {
        let expiry = self.config.entry_ttl * 2;
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_seen) < expiry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn admits_up_to_burst_then_rejects() {
        let limiter = IpRateLimiter::new(RateLimiterConfig {
            rate_per_sec: 0.0,
            burst: 3.0,
            entry_ttl: Duration::from_secs(60),
        });
        let now = Instant::now();
        assert!(limiter.allow_at(ip(), now).0);
        assert!(limiter.allow_at(ip(), now).0);
        assert!(limiter.allow_at(ip(), now).0);
        assert!(!limiter.allow_at(ip(), now).0);
    }

    #[test]
    fn refills_over_time() {
        let limiter = IpRateLimiter::new(RateLimiterConfig {
            rate_per_sec: 1.0,
            burst: 1.0,
            entry_ttl: Duration::from_secs(60),
        });
        let now = Instant::now();
        assert!(limiter.allow_at(ip(), now).0);
        assert!(!limiter.allow_at(ip(), now).0);
        assert!(limiter.allow_at(ip(), now + Duration::from_secs(2)).0);
    }

    #[test]
    fn set_bucp_tags_the_entry() {
        let limiter = IpRateLimiter::new(RateLimiterConfig::default());
        let (_, is_bucp) = limiter.allow(ip());
        assert!(!is_bucp);
        limiter.set_bucp(ip());
        let (_, is_bucp) = limiter.allow(ip());
        assert!(is_bucp);
    }

    #[test]
    fn entries_expire_after_twice_the_ttl() {
        let config = RateLimiterConfig {
            rate_per_sec: 1.0,
            burst: 1.0,
            entry_ttl: Duration::from_millis(10),
        };
        let limiter = IpRateLimiter::new(config);
        let now = Instant::now();
        limiter.allow_at(ip(), now);
        limiter.set_bucp(ip());
        // Long past 2*entry_ttl: the stale entry is evicted and rebuilt fresh.
        let (_, is_bucp) = limiter.allow_at(ip(), now + Duration::from_secs(5));
        assert!(!is_bucp);
    }
}
