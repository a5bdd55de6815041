//! Error types for the transaction builder
//!
//! Every builder failure is detected locally, before anything reaches the
//! network, so none of them is retryable at this layer. The retry loop is
//! the only place that turns a program diagnostic into a corrected attempt.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::ata::AtaError;
use crate::intent::IntentError;
use crate::pda::{DeriveError, IdlError};

use super::accounts::Role;

#[derive(Error, Debug)]
pub enum TransactionBuilderError {
    /// Account set violates a structural rule (e.g. custody == collateral custody)
    #[error("Invalid account set: {0}")]
    InvalidAccountSet(String),

    /// A non-optional account in the layout has no resolved address
    #[error("Missing required account '{0}'")]
    MissingAccount(String),

    #[error("Token program {actual} does not match the mint's program {expected}")]
    TokenProgramMismatch { expected: Pubkey, actual: Pubkey },

    #[error("Position request escrow {actual} does not match recomputed {expected}")]
    EscrowMismatch { expected: Pubkey, actual: Pubkey },

    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild { program: String, reason: String },

    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Message compilation failed: {0}")]
    Compile(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Derive(#[from] DeriveError),

    #[error(transparent)]
    Ata(#[from] AtaError),

    #[error(transparent)]
    Intent(#[from] IntentError),

    #[error(transparent)]
    Idl(#[from] IdlError),
}

impl TransactionBuilderError {
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidAccountSet(_)
            | Self::MissingAccount(_)
            | Self::TokenProgramMismatch { .. }
            | Self::EscrowMismatch { .. } => "account_set",
            Self::InstructionBuild { .. } => "instruction",
            Self::InvalidInstructionOrder(_) => "validation",
            Self::Encoding(_) | Self::Compile(_) => "encoding",
            Self::Signing(_) => "signing",
            Self::Configuration(_) | Self::Idl(_) => "config",
            Self::Derive(e) => e.category(),
            Self::Ata(e) => e.category(),
            Self::Intent(_) => "intent",
        }
    }

    pub fn missing(role: Role) -> Self {
        Self::MissingAccount(role.idl_name().to_string())
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransactionBuilderError::missing(Role::PositionRequestAta);
        assert_eq!(err.to_string(), "Missing required account 'positionRequestAta'");

        let err = TransactionBuilderError::InstructionBuild {
            program: "perpetuals".to_string(),
            reason: "no accounts".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Instruction build error (program=perpetuals): no accounts"
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            TransactionBuilderError::InvalidAccountSet("x".to_string()).category(),
            "account_set"
        );
        assert_eq!(
            TransactionBuilderError::Derive(DeriveError::UnknownAccount("x".to_string()))
                .category(),
            "configuration"
        );
        assert!(!TransactionBuilderError::Signing("x".to_string()).is_retryable());
    }
}
