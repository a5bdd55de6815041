use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use thiserror::Error;

/// Derivation failures. All of them are configuration problems: they are
/// detected before hashing and never involve I/O.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeriveError {
    #[error("seed references unresolved account '{0}'")]
    UnresolvedAccount(String),

    #[error("seed references unresolved argument '{0}'")]
    UnresolvedArg(String),

    #[error("unsupported seed kind '{0}'")]
    UnsupportedSeed(String),

    #[error("seed #{index} is {len} bytes (max 32)")]
    SeedTooLong { index: usize, len: usize },

    #[error("{0} seeds exceed the maximum of 15")]
    TooManySeeds(usize),

    #[error("no viable bump for scheme '{0}'")]
    NoViableBump(String),

    #[error("no derivation scheme for account '{0}'")]
    UnknownAccount(String),
}

impl DeriveError {
    pub fn category(&self) -> &'static str {
        "configuration"
    }
}

/// One seed of a derivation scheme
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SeedRule {
    /// Literal bytes
    Const(Vec<u8>),
    /// The deriving program's own id
    ProgramId,
    /// Address bytes of a resolved account, by role or IDL path
    Account(String),
    /// Encoded bytes of a resolved instruction argument
    Arg(String),
    /// Kind the deriver cannot evaluate (sysvar, account data paths, ...)
    Unsupported(String),
}

impl SeedRule {
    pub fn literal(s: &str) -> Self {
        SeedRule::Const(s.as_bytes().to_vec())
    }

    pub fn account(path: &str) -> Self {
        SeedRule::Account(path.to_string())
    }

    pub fn arg(path: &str) -> Self {
        SeedRule::Arg(path.to_string())
    }
}

/// Where a scheme came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeSource {
    /// Declared by the program's interface description
    Declared,
    /// Built-in fallback
    Fallback,
}

/// Named, ordered seed list deriving one logical account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedScheme {
    pub name: String,
    pub rules: Vec<SeedRule>,
    pub source: SchemeSource,
    /// Derive under this program instead of the target program
    pub program: Option<Pubkey>,
}

impl SeedScheme {
    pub fn fallback(name: &str, rules: Vec<SeedRule>) -> Self {
        Self {
            name: name.to_string(),
            rules,
            source: SchemeSource::Fallback,
            program: None,
        }
    }

    pub fn declared(name: &str, rules: Vec<SeedRule>, program: Option<Pubkey>) -> Self {
        Self {
            name: name.to_string(),
            rules,
            source: SchemeSource::Declared,
            program,
        }
    }
}

/// Canonical form for role and IDL names: `positionRequest`,
/// `position_request` and `PositionRequest` all compare equal.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Resolved values seed rules may reference
#[derive(Debug, Clone, Default)]
pub struct SeedContext {
    accounts: HashMap<String, Pubkey>,
    args: HashMap<String, Vec<u8>>,
}

impl SeedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, name: &str, address: Pubkey) -> Self {
        self.insert_account(name, address);
        self
    }

    pub fn with_arg(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.args.insert(normalize_name(name), bytes);
        self
    }

    pub fn insert_account(&mut self, name: &str, address: Pubkey) {
        self.accounts.insert(normalize_name(name), address);
    }

    /// Look up an account path; `params.owner` falls back to `owner`
    pub fn account(&self, path: &str) -> Option<&Pubkey> {
        lookup(&self.accounts, path)
    }

    pub fn arg(&self, path: &str) -> Option<&[u8]> {
        lookup(&self.args, path).map(Vec::as_slice)
    }
}

fn lookup<'a, V>(map: &'a HashMap<String, V>, path: &str) -> Option<&'a V> {
    map.get(&normalize_name(path)).or_else(|| {
        path.rsplit_once('.')
            .and_then(|(_, last)| map.get(&normalize_name(last)))
    })
}
