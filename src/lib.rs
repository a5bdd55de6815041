//! perps-engine
//!
//! Opens or increases leveraged positions on the Jupiter Perpetuals
//! program. The crate derives the program's accounts deterministically,
//! submits through a pool of failover RPC endpoints, and recovers from the
//! program's custody-ordering ambiguity with at most one corrective retry.
//!
//! ## Layout
//!
//! - [`pda`]: program-derived addresses, seed schemes, Anchor IDL model
//! - [`ata`]: associated token accounts and token program detection
//! - [`rpc_manager`]: the endpoint pool
//! - [`tx_builder`]: account sets, instruction encoding, message compilation
//! - [`retry_loop`]: simulation, submission and diagnostic-driven retry
//! - [`step_tracker`]: the phase checklist
//! - [`engine`]: the pipeline tying it together

pub mod ata;
pub mod config;
pub mod engine;
pub mod intent;
pub mod logging;
pub mod markets;
pub mod metrics;
pub mod observability;
pub mod pda;
pub mod price_feed;
pub mod retry_loop;
pub mod rpc_manager;
pub mod step_tracker;
pub mod tx_builder;
pub mod wallet;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use config::EngineConfig;
pub use engine::{EngineError, OrderEngine};
pub use intent::{Guardrail, OrderRequest, PositionOrderIntent, Side};
pub use retry_loop::{Attempt, SubmissionOutcome};
pub use step_tracker::{finalize_guard, install_exit_hook, StepTracker};

pub use solana_sdk::{pubkey::Pubkey, signature::Signature};

#[cfg(test)]
mod tests;
