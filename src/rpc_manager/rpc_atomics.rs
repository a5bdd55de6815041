use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Consecutive failures after which an endpoint is reported unhealthy
const UNHEALTHY_AFTER: u64 = 3;

/// Atomic health bookkeeping for one endpoint.
/// Probes and submissions mutate it concurrently without a shared lock.
#[derive(Debug)]
pub struct AtomicEndpointStats {
    /// Total number of requests made to this endpoint
    pub total_requests: AtomicU64,

    /// Total number of errors encountered
    pub total_errors: AtomicU64,

    /// Consecutive error count (resets on success)
    pub consecutive_errors: AtomicU64,

    /// Last known latency in microseconds
    pub last_latency_us: AtomicU64,

    /// Whether the endpoint is currently healthy
    pub is_healthy: AtomicBool,

    /// Cooldown deadline in milliseconds since the pool epoch; 0 means none
    pub cooldown_until_ms: AtomicU64,

    /// Last successful request timestamp (requires RwLock for Instant)
    pub last_success: RwLock<Option<Instant>>,
}

impl AtomicEndpointStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            consecutive_errors: AtomicU64::new(0),
            last_latency_us: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
            cooldown_until_ms: AtomicU64::new(0),
            last_success: RwLock::new(None),
        }
    }

    /// Record a successful request
    pub fn record_success(&self, latency_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.consecutive_errors.store(0, Ordering::Relaxed);
        self.last_latency_us.store(latency_us, Ordering::Relaxed);
        self.is_healthy.store(true, Ordering::Relaxed);
        *self.last_success.write() = Some(Instant::now());
    }

    /// Record a failed request
    pub fn record_failure(&self, latency_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_latency_us.store(latency_us, Ordering::Relaxed);

        if consecutive >= UNHEALTHY_AFTER {
            self.is_healthy.store(false, Ordering::Relaxed);
        }
    }

    /// Deprioritize until `deadline_ms` (pool-epoch millis)
    pub fn set_cooldown_until(&self, deadline_ms: u64) {
        self.cooldown_until_ms.fetch_max(deadline_ms, Ordering::AcqRel);
    }

    pub fn clear_cooldown(&self) {
        self.cooldown_until_ms.store(0, Ordering::Release);
    }

    pub fn cooldown_until(&self) -> u64 {
        self.cooldown_until_ms.load(Ordering::Acquire)
    }

    pub fn is_in_cooldown(&self, now_ms: u64) -> bool {
        self.cooldown_until() > now_ms
    }

    /// Get current error rate (0.0 - 1.0)
    pub fn error_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let errors = self.total_errors.load(Ordering::Relaxed);
        errors as f64 / total as f64
    }

    pub fn consecutive_errors(&self) -> u64 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy.load(Ordering::Relaxed)
    }

    pub fn last_latency_us(&self) -> u64 {
        self.last_latency_us.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    /// Get time since last success (if any)
    pub fn time_since_last_success(&self) -> Option<std::time::Duration> {
        self.last_success.read().as_ref().map(|instant| instant.elapsed())
    }
}

impl Default for AtomicEndpointStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_atomic_endpoint_stats() {
        let stats = AtomicEndpointStats::new();

        stats.record_success(1000);
        assert_eq!(stats.total_requests(), 1);
        assert_eq!(stats.total_errors(), 0);
        assert!(stats.is_healthy());

        stats.record_failure(2000);
        assert_eq!(stats.consecutive_errors(), 1);
        assert!(stats.is_healthy()); // Still healthy after 1 error

        stats.record_failure(3000);
        stats.record_failure(4000);
        assert_eq!(stats.consecutive_errors(), 3);
        assert!(!stats.is_healthy());

        // Recovery
        stats.record_success(500);
        assert_eq!(stats.consecutive_errors(), 0);
        assert!(stats.is_healthy());
        assert!(stats.time_since_last_success().is_some());
    }

    #[test]
    fn test_cooldown_never_moves_backwards() {
        let stats = AtomicEndpointStats::new();
        assert!(!stats.is_in_cooldown(0));

        stats.set_cooldown_until(500);
        stats.set_cooldown_until(200);
        assert_eq!(stats.cooldown_until(), 500);
        assert!(stats.is_in_cooldown(499));
        assert!(!stats.is_in_cooldown(500));

        stats.clear_cooldown();
        assert!(!stats.is_in_cooldown(0));
    }

    #[test]
    fn test_error_rate_calculation() {
        let stats = AtomicEndpointStats::new();
        assert_eq!(stats.error_rate(), 0.0);

        stats.record_success(100);
        stats.record_success(100);
        stats.record_failure(100);

        assert!((stats.error_rate() - 0.333).abs() < 0.01);
    }

    #[test]
    fn test_concurrent_access() {
        let stats = Arc::new(AtomicEndpointStats::new());
        let mut handles = vec![];

        // Half the threads succeed, half fail
        for i in 0..10 {
            let stats_clone = stats.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    if i % 2 == 0 {
                        stats_clone.record_success(1000);
                    } else {
                        stats_clone.record_failure(1000);
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.total_requests(), 1000);
        assert_eq!(stats.total_errors(), 500);
    }
}
