//! Test Utilities Module
//!
//! Scripted `ChainRpc` transport and account fixtures for deterministic
//! pool, resolver and pipeline tests without a network.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use solana_sdk::{
    account::Account, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::VersionedTransaction,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::rpc_manager::{ChainRpc, RpcManagerError, SignatureOutcome, SimulationReport};

/// Failure injected into every operation of a `ScriptedRpc`
#[derive(Debug, Clone)]
pub enum FailMode {
    Throttle,
    Unreachable,
    /// Never returns; exercises the pool's bounded wait
    Hang,
    Fatal(String),
}

impl FailMode {
    fn to_error(&self, endpoint: &str) -> RpcManagerError {
        let endpoint = endpoint.to_string();
        match self {
            FailMode::Throttle => RpcManagerError::RateLimitExceeded { endpoint },
            FailMode::Unreachable => RpcManagerError::Transport {
                endpoint,
                message: "connection refused".to_string(),
            },
            FailMode::Hang => RpcManagerError::Timeout {
                endpoint,
                timeout_ms: 0,
            },
            FailMode::Fatal(message) => RpcManagerError::RpcResponse {
                endpoint,
                message: message.clone(),
                code: Some(-32602),
            },
        }
    }
}

/// How `get_signature_status` answers after a send
#[derive(Debug, Clone)]
pub enum StatusMode {
    Confirmed,
    Pending,
    Failed(String),
}

/// In-memory endpoint whose answers are scripted by the test
pub struct ScriptedRpc {
    label: String,
    calls: AtomicU64,
    failure: Mutex<Option<(FailMode, Option<u32>)>>,
    accounts: DashMap<Pubkey, Account>,
    simulations: Mutex<VecDeque<SimulationReport>>,
    send_rejections: Mutex<VecDeque<Vec<String>>>,
    status: Mutex<StatusMode>,
    drop_send_acks: AtomicBool,
    simulated: Mutex<Vec<VersionedTransaction>>,
    sent: Mutex<Vec<VersionedTransaction>>,
}

impl ScriptedRpc {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            calls: AtomicU64::new(0),
            failure: Mutex::new(None),
            accounts: DashMap::new(),
            simulations: Mutex::new(VecDeque::new()),
            send_rejections: Mutex::new(VecDeque::new()),
            status: Mutex::new(StatusMode::Confirmed),
            drop_send_acks: AtomicBool::new(false),
            simulated: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Fail every call with `mode`
    pub fn fail_with(&self, mode: FailMode) {
        *self.failure.lock() = Some((mode, None));
    }

    /// Fail the next `times` calls with `mode`, then behave normally
    pub fn fail_times(&self, mode: FailMode, times: u32) {
        *self.failure.lock() = Some((mode, Some(times)));
    }

    pub fn set_account(&self, pubkey: Pubkey, account: Account) {
        self.accounts.insert(pubkey, account);
    }

    /// Queue a simulation answer; an empty queue simulates cleanly
    pub fn push_simulation(&self, report: SimulationReport) {
        self.simulations.lock().push_back(report);
    }

    /// Queue a preflight rejection carrying `logs` for the next send
    pub fn push_send_rejection(&self, logs: Vec<String>) {
        self.send_rejections.lock().push_back(logs);
    }

    /// Land every sent transaction but answer the send with a timeout
    pub fn drop_send_acks(&self) {
        self.drop_send_acks.store(true, Ordering::SeqCst);
    }

    pub fn set_status(&self, mode: StatusMode) {
        *self.status.lock() = mode;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn simulated(&self) -> Vec<VersionedTransaction> {
        self.simulated.lock().clone()
    }

    pub fn sent(&self) -> Vec<VersionedTransaction> {
        self.sent.lock().clone()
    }

    fn take_failure(&self) -> Option<FailMode> {
        let mut guard = self.failure.lock();
        let (mode, remaining) = guard.as_mut()?;
        let mode = mode.clone();
        match remaining {
            None => Some(mode),
            Some(0) => {
                *guard = None;
                None
            }
            Some(n) => {
                *n -= 1;
                if *n == 0 {
                    *guard = None;
                }
                Some(mode)
            }
        }
    }

    async fn gate(&self) -> Result<(), RpcManagerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.take_failure() {
            None => Ok(()),
            Some(FailMode::Hang) => {
                futures::future::pending::<()>().await;
                Ok(())
            }
            Some(mode) => Err(mode.to_error(&self.label)),
        }
    }
}

#[async_trait]
impl ChainRpc for ScriptedRpc {
    fn label(&self) -> &str {
        &self.label
    }

    async fn get_slot(&self) -> Result<u64, RpcManagerError> {
        self.gate().await?;
        Ok(42)
    }

    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, RpcManagerError> {
        self.gate().await?;
        Ok(self.accounts.get(pubkey).map(|a| a.value().clone()))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcManagerError> {
        self.gate().await?;
        Ok(Hash::new_from_array([7u8; 32]))
    }

    async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<SimulationReport, RpcManagerError> {
        self.gate().await?;
        self.simulated.lock().push(tx.clone());
        Ok(self
            .simulations
            .lock()
            .pop_front()
            .unwrap_or_else(|| SimulationReport {
                error: None,
                logs: vec!["Program log: ok".to_string()],
                units_consumed: Some(120_000),
            }))
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, RpcManagerError> {
        self.gate().await?;
        if let Some(logs) = self.send_rejections.lock().pop_front() {
            return Err(RpcManagerError::Program {
                endpoint: self.label.clone(),
                message: "Transaction simulation failed".to_string(),
                logs,
            });
        }
        self.sent.lock().push(tx.clone());
        if self.drop_send_acks.load(Ordering::SeqCst) {
            return Err(RpcManagerError::Timeout {
                endpoint: self.label.clone(),
                timeout_ms: 0,
            });
        }
        Ok(tx.signatures.first().copied().unwrap_or_default())
    }

    async fn get_signature_status(
        &self,
        _signature: &Signature,
    ) -> Result<Option<SignatureOutcome>, RpcManagerError> {
        self.gate().await?;
        Ok(match &*self.status.lock() {
            StatusMode::Confirmed => Some(Ok(())),
            StatusMode::Pending => None,
            StatusMode::Failed(reason) => Some(Err(reason.clone())),
        })
    }
}

/// Serialized SPL mint account owned by `token_program`
pub fn mint_account(token_program: Pubkey, decimals: u8) -> Account {
    // COption<Pubkey> authority (36) + supply (8) + decimals + is_initialized + COption freeze (36)
    let mut data = vec![0u8; 82];
    data[44] = decimals;
    data[45] = 1;
    Account {
        lamports: 1_461_600,
        data,
        owner: token_program,
        executable: false,
        rent_epoch: 0,
    }
}

/// Any existing account (contents irrelevant)
pub fn existing_account(owner: Pubkey) -> Account {
    Account {
        lamports: 2_039_280,
        data: vec![0u8; 165],
        owner,
        executable: false,
        rent_epoch: 0,
    }
}
