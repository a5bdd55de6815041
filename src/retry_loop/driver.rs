use async_trait::async_trait;
use solana_sdk::{hash::Hash, signature::Signature};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::SubmissionConfig;
use crate::metrics::metrics;
use crate::pda::{identify, Candidate};
use crate::rpc_manager::{EndpointPool, SimulationReport};
use crate::step_tracker::{phases, StepTracker};
use crate::tx_builder::{AccountSet, BuiltTransaction, TransactionBuilderError};

use super::diagnostics::{CorrectiveAction, ProgramDiagnostics, SignatureKind};
use super::state::{
    Attempt, AttemptOutcome, LoopState, MatchedScheme, RetryLoopError, SubmissionOutcome,
};

/// Produces a signed transaction for one attempt
#[async_trait]
pub trait AttemptBuilder: Send + Sync {
    async fn build(
        &self,
        attempt: Attempt,
        blockhash: Hash,
    ) -> Result<BuiltTransaction, TransactionBuilderError>;

    /// Every known seed scheme for `account`, derived against `set`
    fn candidates(&self, account: &str, set: &AccountSet) -> Vec<Candidate>;
}

#[derive(Debug, Clone)]
pub struct RetryLoopConfig {
    pub dry_run: bool,
    pub allow_custody_swap: bool,
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RetryLoopConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            allow_custody_swap: true,
            confirm_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl From<&SubmissionConfig> for RetryLoopConfig {
    fn from(config: &SubmissionConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            allow_custody_swap: config.allow_custody_swap,
            confirm_timeout: Duration::from_millis(config.confirm_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// Drives build → simulate → send → confirm for one intent, with at most
/// one corrective custody swap
pub struct AccountResolutionRetryLoop {
    pool: Arc<EndpointPool>,
    config: RetryLoopConfig,
}

impl AccountResolutionRetryLoop {
    pub fn new(pool: Arc<EndpointPool>, config: RetryLoopConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &RetryLoopConfig {
        &self.config
    }

    /// Run the loop to completion. Attempts are strictly sequential.
    #[instrument(skip_all, fields(dry_run = self.config.dry_run))]
    pub async fn run(
        &self,
        builder: &dyn AttemptBuilder,
        tracker: &StepTracker,
    ) -> Result<SubmissionOutcome, RetryLoopError> {
        let mut state = LoopState::BuildAccounts(Attempt::Natural);
        loop {
            debug!(state = state.name(), "Retry loop transition");
            state = match state {
                LoopState::BuildAccounts(attempt) => {
                    match self.build_accounts(attempt, builder, tracker).await {
                        Ok(built) => LoopState::SubmitOrSimulate(attempt, Box::new(built)),
                        Err(err) => LoopState::Done(Err(err)),
                    }
                }
                LoopState::SubmitOrSimulate(attempt, built) => {
                    self.submit_or_simulate(attempt, built, tracker).await
                }
                LoopState::Diagnose(attempt, built, diagnostics) => {
                    match self.diagnose(attempt, &built, diagnostics, builder, tracker) {
                        AttemptOutcome::Accepted(outcome) => LoopState::Done(Ok(outcome)),
                        AttemptOutcome::RetryableWithCorrection(
                            CorrectiveAction::SwapCustodyRoles,
                            diagnostics,
                        ) => match attempt.after_ordering_failure() {
                            Some(next) => {
                                metrics().custody_swaps.inc();
                                info!(from = %attempt, to = %next, "Swapping custody roles and retrying");
                                LoopState::BuildAccounts(next)
                            }
                            None => LoopState::Done(Err(RetryLoopError::OrderingUnresolved {
                                attempt,
                                swap_allowed: true,
                                diagnostics,
                            })),
                        },
                        AttemptOutcome::RetryableWithCorrection(CorrectiveAction::Halt, diag) => {
                            LoopState::Done(Err(RetryLoopError::ProgramRejected {
                                attempt,
                                diagnostics: diag,
                            }))
                        }
                        AttemptOutcome::Fatal(err) => LoopState::Done(Err(err)),
                    }
                }
                LoopState::Done(result) => return result,
            };
        }
    }

    async fn build_accounts(
        &self,
        attempt: Attempt,
        builder: &dyn AttemptBuilder,
        tracker: &StepTracker,
    ) -> Result<BuiltTransaction, RetryLoopError> {
        tracker.start(phases::BUILD);
        let blockhash = self
            .pool
            .execute("get_latest_blockhash", |rpc| async move {
                rpc.get_latest_blockhash().await
            })
            .await
            .map_err(|source| {
                tracker.fail(phases::BUILD, format!("blockhash: {}", source));
                RetryLoopError::Rpc {
                    stage: "blockhash",
                    source,
                }
            })?;

        match builder.build(attempt, blockhash).await {
            Ok(built) => {
                tracker.ok(
                    phases::BUILD,
                    format!(
                        "{} attempt, {} instructions",
                        attempt,
                        built.tx.message.instructions().len()
                    ),
                );
                Ok(built)
            }
            Err(source) => {
                tracker.fail(phases::BUILD, format!("{} attempt: {}", attempt, source));
                Err(RetryLoopError::Build { attempt, source })
            }
        }
    }

    async fn submit_or_simulate(
        &self,
        attempt: Attempt,
        built: Box<BuiltTransaction>,
        tracker: &StepTracker,
    ) -> LoopState {
        tracker.start(phases::SIMULATE);
        let report = match self.simulate(&built).await {
            Ok(report) => report,
            Err(source) => {
                tracker.fail(phases::SIMULATE, source.to_string());
                return LoopState::Done(Err(RetryLoopError::Rpc {
                    stage: "simulate",
                    source,
                }));
            }
        };

        if !report.is_ok() {
            let diagnostics = ProgramDiagnostics::parse(&report.logs, report.error.as_deref());
            tracker.fail(phases::SIMULATE, diagnostics.summary());
            return LoopState::Diagnose(attempt, built, Box::new(diagnostics));
        }

        tracker.sub_ok(phases::SIMULATE, phases::ACCOUNT_ORDERING, format!("{} roles accepted", attempt));
        tracker.sub_ok(phases::SIMULATE, phases::SEEDS, "");
        tracker.ok(
            phases::SIMULATE,
            report
                .units_consumed
                .map(|units| format!("{} compute units", units))
                .unwrap_or_default(),
        );

        if self.config.dry_run {
            return LoopState::Done(match built.raw_base64() {
                Ok(raw_tx_base64) => Ok(SubmissionOutcome::Simulated {
                    attempt,
                    units_consumed: report.units_consumed,
                    raw_tx_base64,
                }),
                Err(source) => Err(RetryLoopError::Build { attempt, source }),
            });
        }

        tracker.start(phases::SUBMIT);
        let signature = match self.send(&built).await {
            Ok(signature) => {
                tracker.ok(phases::SUBMIT, signature.to_string());
                info!(%signature, %attempt, "Transaction sent");
                signature
            }
            Err(source) => {
                if let Some(logs) = source.program_logs() {
                    let diagnostics = ProgramDiagnostics::parse(logs, Some(&source.to_string()));
                    tracker.fail(phases::SUBMIT, diagnostics.summary());
                    return LoopState::Diagnose(attempt, built, Box::new(diagnostics));
                }
                // No program verdict; the signed bytes may already be on a node
                warn!(
                    signature = %built.signature,
                    error = %source,
                    "Send unacknowledged, checking signature status"
                );
                metrics().unacknowledged_sends.inc();
                tracker.sub_fail(phases::SUBMIT, phases::ACKNOWLEDGED, source.to_string());
                tracker.ok(
                    phases::SUBMIT,
                    format!("{} (unacknowledged)", built.signature),
                );
                built.signature
            }
        };

        tracker.start(phases::CONFIRM);
        let result = self.await_confirmation(signature).await;
        match &result {
            Ok(()) => tracker.ok(phases::CONFIRM, "confirmed"),
            Err(err) => tracker.fail(phases::CONFIRM, err.to_string()),
        }
        LoopState::Done(result.map(|()| SubmissionOutcome::Submitted { signature, attempt }))
    }

    async fn simulate(
        &self,
        built: &BuiltTransaction,
    ) -> Result<SimulationReport, crate::rpc_manager::RpcManagerError> {
        let tx = &built.tx;
        self.pool
            .execute("simulate_transaction", |rpc| async move {
                rpc.simulate_transaction(tx).await
            })
            .await
    }

    /// Resends inside the pool reuse the exact signed bytes
    async fn send(
        &self,
        built: &BuiltTransaction,
    ) -> Result<Signature, crate::rpc_manager::RpcManagerError> {
        let tx = &built.tx;
        self.pool
            .execute("send_transaction", |rpc| async move {
                rpc.send_transaction(tx).await
            })
            .await
    }

    /// Poll until the signature lands or the deadline passes. Poll errors
    /// are tolerated; the transaction is never resubmitted.
    async fn await_confirmation(&self, signature: Signature) -> Result<(), RetryLoopError> {
        let deadline = Instant::now() + self.config.confirm_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(%signature, "Confirmation deadline passed");
                return Err(RetryLoopError::SubmittedUnconfirmed { signature });
            }

            let poll = self.pool.execute("get_signature_status", |rpc| async move {
                rpc.get_signature_status(&signature).await
            });
            match tokio::time::timeout(remaining, poll).await {
                Ok(Ok(Some(Ok(())))) => return Ok(()),
                Ok(Ok(Some(Err(reason)))) => {
                    return Err(RetryLoopError::ExecutionFailed { signature, reason })
                }
                Ok(Ok(None)) => debug!(%signature, "Not yet confirmed"),
                Ok(Err(err)) => warn!(%signature, error = %err, "Status poll failed"),
                Err(_) => {
                    warn!(%signature, "Confirmation deadline passed during poll");
                    return Err(RetryLoopError::SubmittedUnconfirmed { signature });
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
        }
    }

    /// Map diagnostics to the one action the signature table allows
    fn diagnose(
        &self,
        attempt: Attempt,
        built: &BuiltTransaction,
        diagnostics: Box<ProgramDiagnostics>,
        builder: &dyn AttemptBuilder,
        tracker: &StepTracker,
    ) -> AttemptOutcome {
        warn!(%attempt, diagnostics = %diagnostics.summary(), "Program rejected attempt");

        match diagnostics.kind {
            Some(SignatureKind::CustodyOrdering) => {
                tracker.sub_fail(
                    phases::SIMULATE,
                    phases::ACCOUNT_ORDERING,
                    format!("rejected under {} roles", attempt),
                );
                if !self.config.allow_custody_swap {
                    return AttemptOutcome::Fatal(RetryLoopError::OrderingUnresolved {
                        attempt,
                        swap_allowed: false,
                        diagnostics,
                    });
                }
                if attempt.after_ordering_failure().is_none() {
                    return AttemptOutcome::Fatal(RetryLoopError::OrderingUnresolved {
                        attempt,
                        swap_allowed: true,
                        diagnostics,
                    });
                }
                AttemptOutcome::RetryableWithCorrection(diagnostics.action(), diagnostics)
            }
            Some(SignatureKind::SeedMismatch) => {
                let account = diagnostics
                    .account
                    .clone()
                    .unwrap_or_else(|| "position".to_string());
                let candidates = builder.candidates(&account, &built.account_set);
                let matched_scheme = diagnostics
                    .right
                    .as_ref()
                    .and_then(|expected| identify(expected, &candidates))
                    .map(|c| MatchedScheme {
                        scheme: c.scheme.clone(),
                        source: c.source,
                    });
                tracker.sub_fail(
                    phases::SIMULATE,
                    phases::SEEDS,
                    format!(
                        "{} expected {}; matching scheme: {}",
                        account,
                        diagnostics
                            .right
                            .map(|p| p.to_string())
                            .unwrap_or_else(|| "<unparsed>".to_string()),
                        matched_scheme
                            .as_ref()
                            .map(|m| m.scheme.as_str())
                            .unwrap_or("none")
                    ),
                );
                AttemptOutcome::Fatal(RetryLoopError::SeedMismatch {
                    account: Some(account),
                    expected: diagnostics.right,
                    matched_scheme,
                    diagnostics,
                })
            }
            Some(SignatureKind::UnknownAccount) => {
                AttemptOutcome::Fatal(RetryLoopError::UnknownAccount {
                    account: diagnostics.unknown_account,
                    diagnostics,
                })
            }
            Some(SignatureKind::PrivilegeMismatch) | None => {
                AttemptOutcome::Fatal(RetryLoopError::ProgramRejected {
                    attempt,
                    diagnostics,
                })
            }
        }
    }
}
