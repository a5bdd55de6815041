use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::fmt;
use thiserror::Error;

use crate::pda::SchemeSource;
use crate::rpc_manager::RpcManagerError;
use crate::tx_builder::{BuiltTransaction, TransactionBuilderError};

use super::diagnostics::{CorrectiveAction, ProgramDiagnostics};

/// Which custody ordering an attempt uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attempt {
    /// custody = market custody, collateralCustody = collateral custody
    Natural,
    /// The two custody roles exchanged
    Swapped,
}

impl Attempt {
    /// The attempt allowed after an ordering failure; there is none after `Swapped`
    pub fn after_ordering_failure(self) -> Option<Attempt> {
        match self {
            Attempt::Natural => Some(Attempt::Swapped),
            Attempt::Swapped => None,
        }
    }

    pub fn is_swapped(&self) -> bool {
        matches!(self, Attempt::Swapped)
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Attempt::Natural => "natural",
            Attempt::Swapped => "swapped",
        })
    }
}

/// Successful end of the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Submitted {
        signature: Signature,
        attempt: Attempt,
    },
    /// Dry run: the program accepted the transaction in simulation
    Simulated {
        attempt: Attempt,
        units_consumed: Option<u64>,
        raw_tx_base64: String,
    },
}

impl SubmissionOutcome {
    pub fn attempt(&self) -> Attempt {
        match self {
            SubmissionOutcome::Submitted { attempt, .. }
            | SubmissionOutcome::Simulated { attempt, .. } => *attempt,
        }
    }

    pub fn signature(&self) -> Option<Signature> {
        match self {
            SubmissionOutcome::Submitted { signature, .. } => Some(*signature),
            SubmissionOutcome::Simulated { .. } => None,
        }
    }
}

/// Seed scheme whose derivation equals the program's expected address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedScheme {
    pub scheme: String,
    pub source: SchemeSource,
}

impl fmt::Display for MatchedScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.scheme, self.source)
    }
}

#[derive(Debug, Error)]
pub enum RetryLoopError {
    #[error("Failed to build {attempt} attempt: {source}")]
    Build {
        attempt: Attempt,
        #[source]
        source: TransactionBuilderError,
    },

    #[error("RPC failure during {stage}: {source}")]
    Rpc {
        stage: &'static str,
        #[source]
        source: RpcManagerError,
    },

    #[error(
        "Seed mismatch on {}: program expected {}, matching scheme: {}",
        account.as_deref().unwrap_or("<unknown>"),
        expected.map(|p| p.to_string()).unwrap_or_else(|| "<unparsed>".to_string()),
        matched_scheme.as_ref().map(|m| m.to_string()).unwrap_or_else(|| "none".to_string())
    )]
    SeedMismatch {
        account: Option<String>,
        expected: Option<Pubkey>,
        matched_scheme: Option<MatchedScheme>,
        diagnostics: Box<ProgramDiagnostics>,
    },

    #[error("Custody ordering unresolved after {attempt} attempt (swap allowed: {swap_allowed}): {}", diagnostics.summary())]
    OrderingUnresolved {
        attempt: Attempt,
        swap_allowed: bool,
        diagnostics: Box<ProgramDiagnostics>,
    },

    #[error("Instruction references an unknown account: {}", account.map(|p| p.to_string()).unwrap_or_else(|| "<unparsed>".to_string()))]
    UnknownAccount {
        account: Option<Pubkey>,
        diagnostics: Box<ProgramDiagnostics>,
    },

    #[error("Program rejected {attempt} attempt: {}", diagnostics.summary())]
    ProgramRejected {
        attempt: Attempt,
        diagnostics: Box<ProgramDiagnostics>,
    },

    #[error("Transaction {signature} failed on-chain: {reason}")]
    ExecutionFailed { signature: Signature, reason: String },

    #[error("Transaction {signature} was sent but not confirmed in time")]
    SubmittedUnconfirmed { signature: Signature },
}

impl RetryLoopError {
    /// Only pool exhaustion is worth re-running the whole submission for
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryLoopError::Rpc { source, .. } if source.is_exhausted())
    }

    pub fn category(&self) -> &'static str {
        match self {
            RetryLoopError::Build { .. } => "build",
            RetryLoopError::Rpc { .. } => "network",
            RetryLoopError::SeedMismatch { .. }
            | RetryLoopError::OrderingUnresolved { .. }
            | RetryLoopError::UnknownAccount { .. }
            | RetryLoopError::ProgramRejected { .. } => "program",
            RetryLoopError::ExecutionFailed { .. } | RetryLoopError::SubmittedUnconfirmed { .. } => {
                "execution"
            }
        }
    }

    pub fn diagnostics(&self) -> Option<&ProgramDiagnostics> {
        match self {
            RetryLoopError::SeedMismatch { diagnostics, .. }
            | RetryLoopError::OrderingUnresolved { diagnostics, .. }
            | RetryLoopError::UnknownAccount { diagnostics, .. }
            | RetryLoopError::ProgramRejected { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }

    /// A signature exists; the transaction may have landed
    pub fn was_submitted(&self) -> bool {
        matches!(
            self,
            RetryLoopError::ExecutionFailed { .. } | RetryLoopError::SubmittedUnconfirmed { .. }
        )
    }
}

/// Result of one attempt, before the loop decides what comes next
#[derive(Debug)]
pub enum AttemptOutcome {
    Accepted(SubmissionOutcome),
    RetryableWithCorrection(CorrectiveAction, Box<ProgramDiagnostics>),
    Fatal(RetryLoopError),
}

/// States of the retry loop
#[derive(Debug)]
pub enum LoopState {
    BuildAccounts(Attempt),
    SubmitOrSimulate(Attempt, Box<BuiltTransaction>),
    Diagnose(Attempt, Box<BuiltTransaction>, Box<ProgramDiagnostics>),
    Done(Result<SubmissionOutcome, RetryLoopError>),
}

impl LoopState {
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::BuildAccounts(_) => "build_accounts",
            LoopState::SubmitOrSimulate(..) => "submit_or_simulate",
            LoopState::Diagnose(..) => "diagnose",
            LoopState::Done(_) => "done",
        }
    }
}
