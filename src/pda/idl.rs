//! Anchor interface description (IDL) model.
//!
//! Only the parts the engine consumes are modelled: instruction names,
//! discriminators, ordered account lists with their PDA seed declarations,
//! and argument names. Both the legacy (`isMut`/`isSigner`, string consts)
//! and the 0.30+ (`writable`/`signer`, byte-array consts) layouts parse.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use super::seeds::{normalize_name, SeedRule, SeedScheme};

#[derive(Debug, Error)]
pub enum IdlError {
    #[error("failed to read IDL {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse IDL: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("instruction '{0}' not found in IDL")]
    MissingInstruction(String),

    #[error("IDL discriminator for '{name}' has {len} bytes, expected 8")]
    BadDiscriminator { name: String, len: usize },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Idl {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub metadata: Option<IdlMetadata>,
    pub instructions: Vec<IdlInstruction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdlMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdlInstruction {
    pub name: String,
    #[serde(default)]
    pub discriminator: Option<Vec<u8>>,
    pub accounts: Vec<IdlAccountItem>,
    #[serde(default)]
    pub args: Vec<IdlField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdlAccountItem {
    pub name: String,
    #[serde(default, alias = "isMut")]
    pub writable: bool,
    #[serde(default, alias = "isSigner")]
    pub signer: bool,
    #[serde(default, alias = "isOptional")]
    pub optional: bool,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub pda: Option<IdlPda>,
    /// Legacy composite account groups
    #[serde(default)]
    pub accounts: Vec<IdlAccountItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdlPda {
    pub seeds: Vec<IdlSeed>,
    #[serde(default)]
    pub program: Option<IdlSeed>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IdlSeed {
    Const {
        value: serde_json::Value,
        #[serde(default, rename = "type")]
        ty: Option<serde_json::Value>,
    },
    Account {
        path: String,
    },
    Arg {
        path: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdlField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: serde_json::Value,
}

impl Idl {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IdlError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| IdlError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, IdlError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Program address declared by the IDL, if any
    pub fn program_address(&self) -> Option<Pubkey> {
        self.address
            .as_deref()
            .or_else(|| self.metadata.as_ref().and_then(|m| m.address.as_deref()))
            .and_then(|s| Pubkey::from_str(s).ok())
    }

    /// Find an instruction by name, ignoring camel/snake case differences
    pub fn instruction(&self, name: &str) -> Result<&IdlInstruction, IdlError> {
        let wanted = normalize_name(name);
        self.instructions
            .iter()
            .find(|ix| normalize_name(&ix.name) == wanted)
            .ok_or_else(|| IdlError::MissingInstruction(name.to_string()))
    }
}

impl IdlInstruction {
    /// Declared discriminator, or the Anchor sighash of the snake-case name
    pub fn discriminator(&self) -> Result<[u8; 8], IdlError> {
        match &self.discriminator {
            Some(bytes) => bytes
                .as_slice()
                .try_into()
                .map_err(|_| IdlError::BadDiscriminator {
                    name: self.name.clone(),
                    len: bytes.len(),
                }),
            None => Ok(anchor_discriminator(&self.name)),
        }
    }

    /// Accounts in declared order, composite groups flattened
    pub fn flat_accounts(&self) -> Vec<&IdlAccountItem> {
        fn walk<'a>(items: &'a [IdlAccountItem], out: &mut Vec<&'a IdlAccountItem>) {
            for item in items {
                if item.accounts.is_empty() {
                    out.push(item);
                } else {
                    walk(&item.accounts, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.accounts, &mut out);
        out
    }

    /// Seed schemes this instruction declares, keyed by account name
    pub fn declared_schemes(&self) -> Vec<(String, SeedScheme)> {
        self.flat_accounts()
            .into_iter()
            .filter_map(|item| {
                let pda = item.pda.as_ref()?;
                let rules = pda.seeds.iter().map(seed_rule).collect();
                let program = pda.program.as_ref().and_then(program_override);
                Some((
                    item.name.clone(),
                    SeedScheme::declared(&format!("{}:idl", item.name), rules, program),
                ))
            })
            .collect()
    }
}

fn seed_rule(seed: &IdlSeed) -> SeedRule {
    match seed {
        IdlSeed::Const { value, ty } => const_bytes(value, ty.as_ref())
            .map(SeedRule::Const)
            .unwrap_or_else(|| SeedRule::Unsupported(format!("const {}", value))),
        IdlSeed::Account { path } if path.contains('.') => {
            // Seeds read from account data need the account fetched first
            SeedRule::Unsupported(format!("account data path {}", path))
        }
        IdlSeed::Account { path } => SeedRule::Account(path.clone()),
        IdlSeed::Arg { path } => SeedRule::Arg(path.clone()),
        IdlSeed::Other => SeedRule::Unsupported("unknown seed kind".to_string()),
    }
}

fn const_bytes(value: &serde_json::Value, ty: Option<&serde_json::Value>) -> Option<Vec<u8>> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect(),
        serde_json::Value::String(s) => match ty.and_then(|t| t.as_str()) {
            None | Some("string") => Some(s.as_bytes().to_vec()),
            Some("publicKey") | Some("pubkey") => {
                Pubkey::from_str(s).ok().map(|pk| pk.to_bytes().to_vec())
            }
            Some(_) => None,
        },
        _ => None,
    }
}

fn program_override(seed: &IdlSeed) -> Option<Pubkey> {
    match seed {
        IdlSeed::Const { value, ty } => const_bytes(value, ty.as_ref())
            .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok())
            .map(Pubkey::new_from_array),
        _ => None,
    }
}

/// `sha256("global:<snake_case_name>")[..8]`
pub fn anchor_discriminator(instruction_name: &str) -> [u8; 8] {
    let preimage = format!("global:{}", to_snake_case(instruction_name));
    let digest = Sha256::digest(preimage.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 8);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_IDL: &str = r#"{
        "version": "0.1.0",
        "name": "perpetuals",
        "instructions": [{
            "name": "createIncreasePositionMarketRequest",
            "accounts": [
                {"name": "owner", "isMut": true, "isSigner": true},
                {"name": "perpetuals", "isMut": false, "isSigner": false,
                 "pda": {"seeds": [{"kind": "const", "type": "string", "value": "perpetuals"}]}},
                {"name": "position", "isMut": true, "isSigner": false,
                 "pda": {"seeds": [
                    {"kind": "const", "type": "string", "value": "position"},
                    {"kind": "account", "type": "publicKey", "path": "owner"},
                    {"kind": "arg", "type": "u8", "path": "params.side"}
                 ]}},
                {"name": "referral", "isMut": false, "isSigner": false, "isOptional": true}
            ],
            "args": [{"name": "params", "type": {"defined": "CreateIncreasePositionMarketRequestParams"}}]
        }]
    }"#;

    const MODERN_IDL: &str = r#"{
        "address": "PERPHjGBqRHArX4DySjwM6UJHiR3sWAatqfdBS2qQJu",
        "metadata": {"name": "perpetuals"},
        "instructions": [{
            "name": "create_increase_position_market_request",
            "discriminator": [1, 2, 3, 4, 5, 6, 7, 8],
            "accounts": [
                {"name": "owner", "writable": true, "signer": true},
                {"name": "event_authority",
                 "pda": {"seeds": [{"kind": "const", "value": [95, 95, 101, 118, 101, 110, 116, 95, 97, 117, 116, 104, 111, 114, 105, 116, 121]}]}},
                {"name": "clock", "pda": {"seeds": [{"kind": "sysvar"}]}}
            ],
            "args": []
        }]
    }"#;

    #[test]
    fn test_parse_legacy_layout() {
        let idl = Idl::from_json(LEGACY_IDL).unwrap();
        let ix = idl.instruction("create_increase_position_market_request").unwrap();
        let accounts = ix.flat_accounts();

        assert_eq!(accounts.len(), 4);
        assert!(accounts[0].writable && accounts[0].signer);
        assert!(accounts[3].optional);
        assert_eq!(ix.discriminator().unwrap(), anchor_discriminator(&ix.name));

        let schemes = ix.declared_schemes();
        assert_eq!(schemes.len(), 2);
        let (name, position) = &schemes[1];
        assert_eq!(name, "position");
        assert_eq!(
            position.rules,
            vec![
                SeedRule::literal("position"),
                SeedRule::account("owner"),
                SeedRule::arg("params.side"),
            ]
        );
    }

    #[test]
    fn test_parse_modern_layout() {
        let idl = Idl::from_json(MODERN_IDL).unwrap();
        assert_eq!(
            idl.program_address().unwrap().to_string(),
            "PERPHjGBqRHArX4DySjwM6UJHiR3sWAatqfdBS2qQJu"
        );

        let ix = idl.instruction("createIncreasePositionMarketRequest").unwrap();
        assert_eq!(ix.discriminator().unwrap(), [1, 2, 3, 4, 5, 6, 7, 8]);

        let schemes = ix.declared_schemes();
        assert_eq!(schemes[0].1.rules, vec![SeedRule::literal("__event_authority")]);
        assert!(matches!(schemes[1].1.rules[0], SeedRule::Unsupported(_)));
    }

    #[test]
    fn test_missing_instruction() {
        let idl = Idl::from_json(LEGACY_IDL).unwrap();
        assert!(matches!(
            idl.instruction("closePosition"),
            Err(IdlError::MissingInstruction(_))
        ));
    }

    #[test]
    fn test_discriminator_is_case_insensitive() {
        assert_eq!(
            to_snake_case("createIncreasePositionMarketRequest"),
            "create_increase_position_market_request"
        );
        assert_eq!(
            anchor_discriminator("createIncreasePositionMarketRequest"),
            anchor_discriminator("create_increase_position_market_request")
        );

        let digest = Sha256::digest(b"global:create_increase_position_market_request");
        assert_eq!(
            &anchor_discriminator("create_increase_position_market_request")[..],
            &digest[..8]
        );
    }
}
