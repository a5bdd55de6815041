//! Transaction builder
//!
//! Turns a validated intent plus resolved accounts into a signed v0
//! transaction:
//! - **accounts**: role-keyed account set, natural/swapped assembly, guards, layout
//! - **encoding**: borsh params and the instruction discriminator
//! - **instructions**: compute budget → account init → domain → post ordering
//! - **builder**: message compilation and signing
//! - **errors**: builder error taxonomy

pub mod accounts;
pub mod builder;
pub mod encoding;
pub mod errors;
pub mod instructions;

pub use accounts::{build_account_metas, AccountInputs, AccountLayout, AccountSet, LayoutEntry, Role};
pub use builder::{BuiltTransaction, TxBuilder};
pub use encoding::{IncreasePositionParams, PerpSide, INCREASE_POSITION_IX};
pub use errors::TransactionBuilderError;
pub use instructions::{plan_instructions, sanity_check_ix_order, InstructionPlan};
