//! Account resolution retry loop
//!
//! A small state machine around one order submission:
//! - **state**: attempts, loop states, outcomes and errors
//! - **diagnostics**: program log parsing and the signature table
//! - **driver**: the loop itself, all I/O through the endpoint pool
//!
//! A custody ordering diagnostic permits exactly one swap of the custody
//! roles. Every other recognized signature halts.

pub mod diagnostics;
pub mod driver;
pub mod state;

pub use diagnostics::{
    CorrectiveAction, DiagnosticSignature, ProgramDiagnostics, SignatureKind, SIGNATURE_TABLE,
};
pub use driver::{AccountResolutionRetryLoop, AttemptBuilder, RetryLoopConfig};
pub use state::{
    Attempt, AttemptOutcome, LoopState, MatchedScheme, RetryLoopError, SubmissionOutcome,
};
