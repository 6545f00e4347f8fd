//! Tuning for the dispatch worker pool and the stale job sweeper
//!
//! Durations are read from the environment in milliseconds.

use std::time::Duration;

use runfleet_common::config::{non_empty_var, parse_var};
use runfleet_common::Result;
use runfleet_machines::Strategy;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Concurrent dispatch slots in this process
    pub concurrency: usize,
    pub strategy: Strategy,
    /// Unavailable attempts tolerated before a job fails for good
    pub max_retries: i32,
    pub retry_delay: Duration,
    /// Lease TTL; renewed at half this while a dispatch is in flight
    pub lease_ttl: Duration,
    /// How long an idle slot waits before asking the store again
    pub poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            strategy: Strategy::LeastLoad,
            max_retries: 200,
            retry_delay: Duration::from_secs(30),
            lease_ttl: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let strategy = match non_empty_var("LOAD_BALANCER_STRATEGY") {
            Some(raw) => raw.parse::<Strategy>()?,
            None => defaults.strategy,
        };

        Ok(Self {
            concurrency: parse_var("WORKER_CONCURRENCY", defaults.concurrency).max(1),
            strategy,
            max_retries: parse_var("MAX_QUEUE_RETRIES", defaults.max_retries).max(0),
            retry_delay: millis_var("QUEUE_RETRY_DELAY", defaults.retry_delay),
            lease_ttl: millis_var("WORKER_LOCK_DURATION", defaults.lease_ttl),
            poll_interval: millis_var("WORKER_POLL_INTERVAL", defaults.poll_interval),
        })
    }

    /// Lease renewal period while a dispatch is in flight
    pub fn renew_every(&self) -> Duration {
        (self.lease_ttl / 2).max(Duration::from_millis(1))
    }
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Active time after which a job is presumed abandoned
    pub timeout: Duration,
    /// Upper bound on active jobs inspected per sweep
    pub scan_limit: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5 * 60),
            scan_limit: 1000,
        }
    }
}

impl SweeperConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: millis_var("STALE_CHECK_INTERVAL", defaults.interval),
            timeout: millis_var("STALE_JOB_TIMEOUT", defaults.timeout),
            scan_limit: parse_var("STALE_SCAN_LIMIT", defaults.scan_limit).max(1),
        }
    }
}

fn millis_var(key: &str, default: Duration) -> Duration {
    let millis = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    // Zero would spin the timers
    Duration::from_millis(parse_var(key, millis).max(1))
}
