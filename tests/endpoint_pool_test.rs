//! Endpoint rotation driven through the public `ChainRpc` seam

use async_trait::async_trait;
use parking_lot::Mutex;
use perps_engine::rpc_manager::{
    ChainRpc, EndpointPool, RetryPolicy, RpcManagerError, SignatureOutcome, SimulationReport,
};
use perps_engine::{Pubkey, Signature};
use solana_sdk::{account::Account, hash::Hash, transaction::VersionedTransaction};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
enum Step {
    Slot(u64),
    Throttle,
    Refuse,
    Reject,
    Stall,
}

/// Answers `get_slot` from a script; every other call is unused here
struct MockEndpoint {
    label: String,
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
}

impl MockEndpoint {
    fn new(label: &str, script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainRpc for MockEndpoint {
    fn label(&self) -> &str {
        &self.label
    }

    async fn get_slot(&self) -> Result<u64, RpcManagerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(Step::Slot(1));
        let endpoint = self.label.clone();
        match step {
            Step::Slot(slot) => Ok(slot),
            Step::Throttle => Err(RpcManagerError::RateLimitExceeded { endpoint }),
            Step::Refuse => Err(RpcManagerError::Transport {
                endpoint,
                message: "connection refused".to_string(),
            }),
            Step::Reject => Err(RpcManagerError::RpcResponse {
                endpoint,
                message: "invalid params".to_string(),
                code: Some(-32602),
            }),
            Step::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(0)
            }
        }
    }

    async fn get_account(&self, _pubkey: &Pubkey) -> Result<Option<Account>, RpcManagerError> {
        Ok(None)
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcManagerError> {
        Ok(Hash::default())
    }

    async fn simulate_transaction(
        &self,
        _tx: &VersionedTransaction,
    ) -> Result<SimulationReport, RpcManagerError> {
        Ok(SimulationReport::default())
    }

    async fn send_transaction(
        &self,
        _tx: &VersionedTransaction,
    ) -> Result<Signature, RpcManagerError> {
        Ok(Signature::default())
    }

    async fn get_signature_status(
        &self,
        _signature: &Signature,
    ) -> Result<Option<SignatureOutcome>, RpcManagerError> {
        Ok(None)
    }
}

fn pool(endpoints: &[Arc<MockEndpoint>], max_attempts: u32) -> EndpointPool {
    EndpointPool::new(
        endpoints
            .iter()
            .map(|e| e.clone() as Arc<dyn ChainRpc>)
            .collect(),
        RetryPolicy {
            max_attempts,
            base_delay_ms: 50,
            max_delay_ms: 400,
            jitter_factor: 0.1,
            multiplier: 2.0,
        },
        Duration::from_millis(500),
        Duration::from_secs(30),
    )
    .unwrap()
}

async fn slot(pool: &EndpointPool) -> Result<u64, RpcManagerError> {
    pool.execute("get_slot", |rpc| async move { rpc.get_slot().await })
        .await
}

#[tokio::test(start_paused = true)]
async fn throttled_endpoint_backs_off_before_rotating() {
    let primary = MockEndpoint::new("primary", vec![Step::Throttle, Step::Throttle, Step::Slot(77)]);
    let secondary = MockEndpoint::new("secondary", vec![]);
    let pool = pool(&[primary.clone(), secondary.clone()], 3);

    assert_eq!(slot(&pool).await.unwrap(), 77);
    assert_eq!(primary.calls(), 3);
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn unreachable_endpoint_rotates_and_cools_down() {
    let primary = MockEndpoint::new("primary", vec![Step::Refuse]);
    let secondary = MockEndpoint::new("secondary", vec![Step::Slot(9)]);
    let pool = pool(&[primary.clone(), secondary.clone()], 3);

    assert_eq!(slot(&pool).await.unwrap(), 9);
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);

    // cooling endpoints are tried last, never dropped
    assert_eq!(pool.ranked(), vec![1, 0]);
    let health = pool.health_snapshot();
    assert!(health[0].in_cooldown);
    assert!(!health[1].in_cooldown);
}

#[tokio::test]
async fn fatal_error_is_not_retried() {
    let primary = MockEndpoint::new("primary", vec![Step::Reject]);
    let secondary = MockEndpoint::new("secondary", vec![]);
    let pool = pool(&[primary.clone(), secondary.clone()], 3);

    let err = slot(&pool).await.unwrap_err();
    assert!(matches!(err, RpcManagerError::RpcResponse { .. }));
    assert!(!err.is_exhausted());
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_endpoint_counts_as_unreachable() {
    let primary = MockEndpoint::new("primary", vec![Step::Stall]);
    let secondary = MockEndpoint::new("secondary", vec![Step::Slot(5)]);
    let pool = pool(&[primary.clone(), secondary.clone()], 2);

    assert_eq!(slot(&pool).await.unwrap(), 5);
    assert_eq!(primary.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_reports_attempt_count() {
    let endpoints: Vec<_> = (0..2)
        .map(|i| MockEndpoint::new(&format!("e{}", i), vec![Step::Throttle; 8]))
        .collect();
    let pool = pool(&endpoints, 3);

    match slot(&pool).await.unwrap_err() {
        RpcManagerError::Exhausted {
            endpoints: count,
            attempts,
            last_error,
        } => {
            assert_eq!(count, 2);
            assert_eq!(attempts, 6);
            assert!(matches!(*last_error, RpcManagerError::RateLimitExceeded { .. }));
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert!(endpoints.iter().all(|e| e.calls() == 3));
}

#[tokio::test]
async fn probe_counts_answering_endpoints() {
    let up = MockEndpoint::new("up", vec![]);
    let down = MockEndpoint::new("down", vec![Step::Refuse]);
    let pool = pool(&[up, down], 1);

    assert_eq!(pool.probe_all().await, 1);
}
