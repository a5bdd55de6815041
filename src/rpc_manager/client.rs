//! Transport seam between the endpoint pool and a Solana JSON-RPC node.

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig};
use solana_sdk::{
    account::Account,
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::time::Duration;

use super::rpc_config::redact_url;
use super::rpc_errors::RpcManagerError;

/// Result of a transaction simulation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    /// Transaction error rendered as text, `None` when the simulation succeeded
    pub error: Option<String>,
    /// Program log lines
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

impl SimulationReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a landed signature: `Ok(())`, or the on-chain error text
pub type SignatureOutcome = Result<(), String>;

/// Operations the engine needs from one RPC endpoint
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Log-safe label for this endpoint
    fn label(&self) -> &str;

    async fn get_slot(&self) -> Result<u64, RpcManagerError>;

    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, RpcManagerError>;

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcManagerError>;

    async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<SimulationReport, RpcManagerError>;

    async fn send_transaction(&self, tx: &VersionedTransaction)
        -> Result<Signature, RpcManagerError>;

    /// `None` while the signature is unknown or unconfirmed
    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureOutcome>, RpcManagerError>;
}

/// `ChainRpc` over the nonblocking Solana RPC client
pub struct SolanaRpc {
    client: RpcClient,
    label: String,
}

impl SolanaRpc {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            client: RpcClient::new_with_timeout_and_commitment(
                url.to_string(),
                timeout,
                CommitmentConfig::confirmed(),
            ),
            label: redact_url(url),
        }
    }

    fn classify(&self, err: solana_client::client_error::ClientError) -> RpcManagerError {
        RpcManagerError::from_client_error(&err, &self.label)
    }
}

#[async_trait]
impl ChainRpc for SolanaRpc {
    fn label(&self) -> &str {
        &self.label
    }

    async fn get_slot(&self) -> Result<u64, RpcManagerError> {
        self.client.get_slot().await.map_err(|e| self.classify(e))
    }

    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, RpcManagerError> {
        self.client
            .get_account_with_commitment(pubkey, self.client.commitment())
            .await
            .map(|response| response.value)
            .map_err(|e| self.classify(e))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcManagerError> {
        self.client
            .get_latest_blockhash()
            .await
            .map_err(|e| self.classify(e))
    }

    async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<SimulationReport, RpcManagerError> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(CommitmentConfig::confirmed()),
            ..RpcSimulateTransactionConfig::default()
        };

        let response = self
            .client
            .simulate_transaction_with_config(tx, config)
            .await
            .map_err(|e| self.classify(e))?;

        let value = response.value;
        Ok(SimulationReport {
            error: value.err.map(|e| format!("{:?}", e)),
            logs: value.logs.unwrap_or_default(),
            units_consumed: value.units_consumed,
        })
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, RpcManagerError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(CommitmentLevel::Confirmed),
            max_retries: Some(3),
            ..RpcSendTransactionConfig::default()
        };

        self.client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(|e| self.classify(e))
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureOutcome>, RpcManagerError> {
        self.client
            .get_signature_status(signature)
            .await
            .map(|status| status.map(|result| result.map_err(|e| e.to_string())))
            .map_err(|e| self.classify(e))
    }
}
