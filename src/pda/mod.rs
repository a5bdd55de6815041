//! Program-derived addresses
//!
//! Seed schemes (declared by the program IDL or built in), their
//! evaluation against resolved accounts and arguments, and side-by-side
//! candidate derivation for diagnostics.

pub mod deriver;
pub mod idl;
pub mod schemes;
pub mod seeds;

pub use deriver::{identify, AddressDeriver, Candidate, DerivedAddress};
pub use idl::{anchor_discriminator, Idl, IdlError, IdlInstruction};
pub use schemes::SchemeRegistry;
pub use seeds::{normalize_name, DeriveError, SchemeSource, SeedContext, SeedRule, SeedScheme};
