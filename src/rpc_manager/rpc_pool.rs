//! Ranked endpoint pool with per-endpoint retry, backoff and rotation.
//!
//! - Throttled endpoints get bounded exponential backoff, then rotation
//! - Unreachable endpoints (timeouts included) rotate immediately
//! - Fatal errors propagate without retry or rotation
//! - Failing endpoints are deprioritized for a cool-down window, never removed
//!
//! The pool is a plain value owned by the caller; health bookkeeping lives in
//! per-endpoint atomics so background probes can run alongside submissions.

use futures::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::client::{ChainRpc, SolanaRpc};
use super::rpc_atomics::AtomicEndpointStats;
use super::rpc_config::RpcConfig;
use super::rpc_errors::{FailureClass, RetryPolicy, RpcManagerError};
use crate::metrics::metrics;

/// Health status of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Point-in-time view of one endpoint
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub label: String,
    pub status: HealthStatus,
    pub consecutive_failures: u64,
    pub in_cooldown: bool,
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub last_latency_us: u64,
    pub since_last_success: Option<Duration>,
}

struct PoolEndpoint {
    client: Arc<dyn ChainRpc>,
    stats: AtomicEndpointStats,
}

impl PoolEndpoint {
    fn label(&self) -> &str {
        self.client.label()
    }
}

/// Endpoint pool executing operations with failover
pub struct EndpointPool {
    endpoints: Vec<PoolEndpoint>,
    policy: RetryPolicy,
    request_timeout: Duration,
    cooldown: Duration,
    epoch: Instant,
    // Serializes the "is this the last eligible endpoint" check with the cooldown write
    cooldown_gate: Mutex<()>,
}

impl std::fmt::Debug for EndpointPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPool")
            .field("endpoints", &self.labels())
            .field("policy", &self.policy)
            .field("request_timeout", &self.request_timeout)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

impl EndpointPool {
    /// Create a pool over already-constructed transports, ranked in the given order
    pub fn new(
        clients: Vec<Arc<dyn ChainRpc>>,
        policy: RetryPolicy,
        request_timeout: Duration,
        cooldown: Duration,
    ) -> Result<Self, RpcManagerError> {
        if clients.is_empty() {
            return Err(RpcManagerError::Configuration(
                "endpoint pool needs at least one endpoint".to_string(),
            ));
        }
        if policy.max_attempts == 0 {
            return Err(RpcManagerError::Configuration(
                "per-endpoint retry ceiling must be > 0".to_string(),
            ));
        }

        let endpoints = clients
            .into_iter()
            .map(|client| PoolEndpoint {
                client,
                stats: AtomicEndpointStats::new(),
            })
            .collect();

        Ok(Self {
            endpoints,
            policy,
            request_timeout,
            cooldown,
            epoch: Instant::now(),
            cooldown_gate: Mutex::new(()),
        })
    }

    /// Build `SolanaRpc` transports for every configured URL
    pub fn from_config(config: &RpcConfig) -> Result<Self, RpcManagerError> {
        let clients = config
            .urls
            .iter()
            .map(|url| Arc::new(SolanaRpc::new(url, config.request_timeout())) as Arc<dyn ChainRpc>)
            .collect();

        let pool = Self::new(
            clients,
            config.retry_policy(),
            config.request_timeout(),
            config.cooldown(),
        )?;
        info!(endpoints = ?pool.labels(), "Endpoint pool initialized");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn labels(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.label().to_string()).collect()
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Endpoint indices in the order `execute` will try them: eligible
    /// endpoints in configured order, then cooling endpoints by earliest
    /// eligibility.
    pub fn ranked(&self) -> Vec<usize> {
        let now = self.now_ms();
        let mut order: Vec<(bool, u64, usize)> = self
            .endpoints
            .iter()
            .enumerate()
            .map(|(idx, e)| {
                let until = e.stats.cooldown_until();
                let cooling = until > now;
                (cooling, if cooling { until } else { 0 }, idx)
            })
            .collect();
        order.sort_unstable();
        order.into_iter().map(|(_, _, idx)| idx).collect()
    }

    /// Put an endpoint into cooldown unless it is the last eligible one
    fn enter_cooldown(&self, idx: usize) {
        let _gate = self.cooldown_gate.lock();
        let now = self.now_ms();

        let others_eligible = self
            .endpoints
            .iter()
            .enumerate()
            .any(|(i, e)| i != idx && !e.stats.is_in_cooldown(now));

        let endpoint = &self.endpoints[idx];
        if !others_eligible {
            debug!(
                endpoint = %endpoint.label(),
                "Keeping last eligible endpoint in rotation"
            );
            return;
        }

        endpoint
            .stats
            .set_cooldown_until(now + self.cooldown.as_millis() as u64);
        info!(
            endpoint = %endpoint.label(),
            cooldown_ms = self.cooldown.as_millis() as u64,
            "Endpoint entered cooldown"
        );
    }

    /// Run `op` against the ranked endpoints until it succeeds, fails
    /// fatally, or every endpoint reaches its retry ceiling.
    ///
    /// Every attempt is bounded by the request timeout; an elapsed timeout
    /// is handled exactly like an unreachable endpoint. Total attempts never
    /// exceed `len() × policy.max_attempts`.
    #[instrument(skip(self, op))]
    pub async fn execute<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, RpcManagerError>
    where
        F: FnMut(Arc<dyn ChainRpc>) -> Fut,
        Fut: Future<Output = Result<T, RpcManagerError>>,
    {
        let timeout_ms = self.request_timeout.as_millis() as u64;
        let mut attempts = 0u32;
        let mut last_error: Option<RpcManagerError> = None;

        for idx in self.ranked() {
            let endpoint = &self.endpoints[idx];
            let mut tries_here = 0u32;

            loop {
                tries_here += 1;
                attempts += 1;
                metrics().endpoint_attempts.inc();

                let started = Instant::now();
                let outcome =
                    match tokio::time::timeout(self.request_timeout, op(endpoint.client.clone()))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(RpcManagerError::Timeout {
                            endpoint: endpoint.label().to_string(),
                            timeout_ms,
                        }),
                    };
                let latency = started.elapsed();
                let latency_us = latency.as_micros() as u64;
                metrics().rpc_latency.observe(latency.as_secs_f64());

                let err = match outcome {
                    Ok(value) => {
                        endpoint.stats.record_success(latency_us);
                        if endpoint.stats.is_in_cooldown(self.now_ms()) {
                            endpoint.stats.clear_cooldown();
                        }
                        return Ok(value);
                    }
                    Err(err) => err,
                };

                match err.class() {
                    FailureClass::Fatal => {
                        // The endpoint answered; the request itself is bad
                        endpoint.stats.record_success(latency_us);
                        debug!(endpoint = %endpoint.label(), error = %err, "Fatal error, not retrying");
                        return Err(err);
                    }
                    FailureClass::Throttled => {
                        endpoint.stats.record_failure(latency_us);
                        metrics().endpoint_failures.inc();
                        if let Some(delay) = self.policy.calculate_delay(tries_here) {
                            warn!(
                                endpoint = %endpoint.label(),
                                attempt = tries_here,
                                delay_ms = delay.as_millis() as u64,
                                "Rate limited, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        warn!(endpoint = %endpoint.label(), "Retry ceiling reached, rotating");
                        self.enter_cooldown(idx);
                        last_error = Some(err);
                        break;
                    }
                    FailureClass::Unreachable => {
                        endpoint.stats.record_failure(latency_us);
                        metrics().endpoint_failures.inc();
                        warn!(endpoint = %endpoint.label(), error = %err, "Endpoint unreachable, rotating");
                        self.enter_cooldown(idx);
                        last_error = Some(err);
                        break;
                    }
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| {
            RpcManagerError::Configuration("no endpoint attempted".to_string())
        });
        warn!(attempts, endpoints = self.len(), "All endpoints exhausted");
        Err(RpcManagerError::Exhausted {
            endpoints: self.len(),
            attempts,
            last_error: Box::new(last_error),
        })
    }

    /// Probe every endpoint once (`get_slot`) and return how many answered
    #[instrument(skip(self))]
    pub async fn probe_all(&self) -> usize {
        let probes = self.endpoints.iter().map(|endpoint| async move {
            let started = Instant::now();
            let result =
                tokio::time::timeout(self.request_timeout, endpoint.client.get_slot()).await;
            let latency_us = started.elapsed().as_micros() as u64;

            match result {
                Ok(Ok(slot)) => {
                    endpoint.stats.record_success(latency_us);
                    debug!(endpoint = %endpoint.label(), slot, "Probe ok");
                    true
                }
                Ok(Err(err)) if err.class() == FailureClass::Fatal => {
                    endpoint.stats.record_success(latency_us);
                    true
                }
                Ok(Err(err)) => {
                    endpoint.stats.record_failure(latency_us);
                    debug!(endpoint = %endpoint.label(), error = %err, "Probe failed");
                    false
                }
                Err(_) => {
                    endpoint.stats.record_failure(latency_us);
                    debug!(endpoint = %endpoint.label(), "Probe timed out");
                    false
                }
            }
        });

        join_all(probes).await.into_iter().filter(|ok| *ok).count()
    }

    /// Run `probe_all` every `interval` until the handle is aborted
    pub fn spawn_health_probes(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!(interval_ms = interval.as_millis() as u64, "Starting endpoint health probes");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let healthy = self.probe_all().await;
                debug!(healthy, total = self.len(), "Health probe round complete");
                for health in self.health_snapshot() {
                    debug!(
                        endpoint = %health.label,
                        status = ?health.status,
                        error_rate = health.error_rate,
                        last_latency_us = health.last_latency_us,
                        "Endpoint health"
                    );
                }
            }
        })
    }

    /// Per-endpoint view; also refreshes the exported endpoint gauges
    pub fn health_snapshot(&self) -> Vec<EndpointHealth> {
        let now = self.now_ms();
        self.endpoints
            .iter()
            .map(|e| {
                let error_rate = e.stats.error_rate();
                let last_latency_us = e.stats.last_latency_us();
                metrics()
                    .endpoint_error_rate
                    .with_label_values(&[e.label()])
                    .set(error_rate);
                metrics()
                    .endpoint_latency_us
                    .with_label_values(&[e.label()])
                    .set(last_latency_us as i64);

                let in_cooldown = e.stats.is_in_cooldown(now);
                let consecutive_failures = e.stats.consecutive_errors();
                let status = if in_cooldown || !e.stats.is_healthy() {
                    HealthStatus::Unhealthy
                } else if consecutive_failures > 0 {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                EndpointHealth {
                    label: e.label().to_string(),
                    status,
                    consecutive_failures,
                    in_cooldown,
                    total_requests: e.stats.total_requests(),
                    total_errors: e.stats.total_errors(),
                    error_rate,
                    last_latency_us,
                    since_last_success: e.stats.time_since_last_success(),
                }
            })
            .collect()
    }
}
