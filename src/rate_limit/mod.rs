// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process token-bucket rate limiting for the handful of endpoints that
//! take attacker-controlled secrets as input (OPAQUE start, OTP verify,
//! password re-verify). One bucket per `(IpAddr, String)` key, where the
//! string half is usually the email under attempt — this bounds both a
//! single IP hammering many accounts and a single account being hammered
//! from many IPs.
//!
//! A single `Mutex<HashMap<...>>` behind `Arc` is enough at this scale; a
//! sharded map would only pay for itself under far higher request rates
//! than an identity provider's login surface sees.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, capacity: f64, refill_interval: Duration) {
        let elapsed = self.last_refill.elapsed();
        if elapsed.is_zero() || refill_interval.is_zero() {
            return;
        }
        let refilled = elapsed.as_secs_f64() / refill_interval.as_secs_f64();
        if refilled > 0.0 {
            self.tokens = (self.tokens + refilled).min(capacity);
            self.last_refill = Instant::now();
        }
    }
}

/// Shared rate limiter keyed by `(IpAddr, String)`, e.g. `(remote_ip, email)`.
pub struct RateLimiter {
    capacity: f64,
    refill_interval: Duration,
    buckets: Mutex<HashMap<(IpAddr, String), Bucket>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_seconds: u64) -> Self {
        Self {
            capacity: capacity.max(1) as f64,
            refill_interval: Duration::from_secs(refill_seconds.max(1)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Attempt to consume one token for `key`. Returns `true` if allowed.
    pub fn check(&self, ip: IpAddr, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry((ip, key.to_string()))
            .or_insert_with(|| Bucket::new(self.capacity));
        bucket.refill(self.capacity, self.refill_interval);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets that are back at full capacity, bounding memory growth.
    pub fn sweep(&self) {
        let mut buckets = self.buckets.lock();
        buckets.retain(|_, bucket| {
            bucket.refill(self.capacity, self.refill_interval);
            bucket.tokens < self.capacity
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn allows_up_to_capacity_then_blocks() {
        let limiter = RateLimiter::new(3, 30);
        assert!(limiter.check(ip(), "alice@example.com"));
        assert!(limiter.check(ip(), "alice@example.com"));
        assert!(limiter.check(ip(), "alice@example.com"));
        assert!(!limiter.check(ip(), "alice@example.com"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, 30);
        assert!(limiter.check(ip(), "alice@example.com"));
        assert!(limiter.check(ip(), "bob@example.com"));
    }

    #[test]
    fn sweep_keeps_depleted_buckets_but_drops_fully_refilled_ones() {
        let limiter = RateLimiter::new(1, 1);
        limiter.check(ip(), "alice@example.com");
        limiter.sweep();
        assert_eq!(limiter.buckets.lock().len(), 1, "depleted bucket is kept");

        std::thread::sleep(Duration::from_millis(1100));
        limiter.sweep();
        assert_eq!(
            limiter.buckets.lock().len(),
            0,
            "bucket refilled to capacity is dropped"
        );
    }
}
