//! Associated token accounts
//!
//! Detects which token program owns a mint, derives associated token
//! accounts under that program and verifies every derivation against an
//! independent recompute before handing the address out.

use dashmap::DashMap;
use solana_sdk::{instruction::Instruction, pubkey, pubkey::Pubkey, system_instruction};
use spl_associated_token_account::{
    get_associated_token_address_with_program_id,
    instruction::create_associated_token_account_idempotent,
};
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::Mint;
use thiserror::Error;
use tracing::{debug, info};

use crate::rpc_manager::{EndpointPool, RpcManagerError};

pub const TOKEN_2022_PROGRAM_ID: Pubkey = pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");

#[derive(Debug, Error)]
pub enum AtaError {
    #[error("mint {0} does not exist")]
    MintNotFound(Pubkey),

    #[error("mint {mint} is owned by {owner}, which is not a known token program")]
    UnknownTokenProgram { mint: Pubkey, owner: Pubkey },

    #[error("mint {mint} has malformed data: {reason}")]
    InvalidMint { mint: Pubkey, reason: String },

    #[error(
        "associated token account self-check failed for owner {owner}, mint {mint}: \
         derived {derived}, recomputed {recomputed}"
    )]
    SelfCheckMismatch {
        owner: Pubkey,
        mint: Pubkey,
        derived: Pubkey,
        recomputed: Pubkey,
    },

    #[error("native wrapping is not supported under {0:?}")]
    UnsupportedWrap(TokenProgramFlavor),

    #[error("failed to build token instruction: {0}")]
    Instruction(String),

    #[error(transparent)]
    Rpc(#[from] RpcManagerError),
}

impl AtaError {
    pub fn category(&self) -> &'static str {
        match self {
            AtaError::Rpc(_) => "network",
            _ => "configuration",
        }
    }

    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Token program variant owning a mint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenProgramFlavor {
    Token,
    Token2022,
}

impl TokenProgramFlavor {
    pub fn program_id(&self) -> Pubkey {
        match self {
            TokenProgramFlavor::Token => spl_token::id(),
            TokenProgramFlavor::Token2022 => TOKEN_2022_PROGRAM_ID,
        }
    }

    pub fn from_owner(owner: &Pubkey) -> Option<Self> {
        if *owner == spl_token::id() {
            Some(TokenProgramFlavor::Token)
        } else if *owner == TOKEN_2022_PROGRAM_ID {
            Some(TokenProgramFlavor::Token2022)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintInfo {
    pub flavor: TokenProgramFlavor,
    pub decimals: u8,
}

/// A resolved token account plus the instruction creating it, if absent
#[derive(Debug, Clone)]
pub struct AtaResolution {
    pub address: Pubkey,
    pub mint: MintInfo,
    pub create_ix: Option<Instruction>,
}

/// Resolves token accounts through the endpoint pool, caching mint lookups
#[derive(Debug, Default)]
pub struct AtaResolver {
    mints: DashMap<Pubkey, MintInfo>,
}

impl AtaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token program and decimals for `mint`; fetched once, then cached
    pub async fn detect_flavor(
        &self,
        pool: &EndpointPool,
        mint: &Pubkey,
    ) -> Result<MintInfo, AtaError> {
        if let Some(info) = self.mints.get(mint) {
            return Ok(*info);
        }

        let key = *mint;
        let account = pool
            .execute("get_mint_account", move |rpc| async move {
                rpc.get_account(&key).await
            })
            .await?
            .ok_or(AtaError::MintNotFound(key))?;

        let flavor = TokenProgramFlavor::from_owner(&account.owner).ok_or(
            AtaError::UnknownTokenProgram {
                mint: key,
                owner: account.owner,
            },
        )?;
        let decimals = unpack_decimals(&key, &account.data)?;

        let info = MintInfo { flavor, decimals };
        debug!(mint = %key, ?flavor, decimals, "Detected mint token program");
        self.mints.insert(key, info);
        Ok(info)
    }

    /// Derive `owner`'s account for `mint`, verified by an independent recompute
    pub fn derive(
        owner: &Pubkey,
        mint: &Pubkey,
        flavor: TokenProgramFlavor,
    ) -> Result<Pubkey, AtaError> {
        let token_program = flavor.program_id();
        let derived = get_associated_token_address_with_program_id(owner, mint, &token_program);
        let recomputed = recompute(owner, mint, &token_program);

        if derived != recomputed {
            return Err(AtaError::SelfCheckMismatch {
                owner: *owner,
                mint: *mint,
                derived,
                recomputed,
            });
        }
        Ok(derived)
    }

    /// Address of `owner`'s account and, when missing on-chain, an
    /// idempotent creation instruction paid by `payer`
    pub async fn ensure(
        &self,
        pool: &EndpointPool,
        payer: &Pubkey,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<AtaResolution, AtaError> {
        let info = self.detect_flavor(pool, mint).await?;
        let address = Self::derive(owner, mint, info.flavor)?;

        let existing = pool
            .execute("get_token_account", move |rpc| async move {
                rpc.get_account(&address).await
            })
            .await?;

        let create_ix = match existing {
            Some(_) => None,
            None => {
                info!(owner = %owner, mint = %mint, ata = %address, "Token account missing, will create");
                Some(create_associated_token_account_idempotent(
                    payer,
                    owner,
                    mint,
                    &info.flavor.program_id(),
                ))
            }
        };

        Ok(AtaResolution {
            address,
            mint: info,
            create_ix,
        })
    }

    /// Escrow account owned by the position request PDA. The program
    /// creates it, so no instruction is returned.
    pub async fn resolve_escrow(
        &self,
        pool: &EndpointPool,
        position_request: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Pubkey, AtaError> {
        let info = self.detect_flavor(pool, mint).await?;
        Self::derive(position_request, mint, info.flavor)
    }
}

/// Fund a native-mint account with `lamports` and sync its token balance
pub fn wrap_native_instructions(
    owner: &Pubkey,
    token_account: &Pubkey,
    lamports: u64,
    flavor: TokenProgramFlavor,
) -> Result<Vec<Instruction>, AtaError> {
    if flavor != TokenProgramFlavor::Token {
        return Err(AtaError::UnsupportedWrap(flavor));
    }
    let sync = spl_token::instruction::sync_native(&flavor.program_id(), token_account)
        .map_err(|e| AtaError::Instruction(e.to_string()))?;
    Ok(vec![
        system_instruction::transfer(owner, token_account, lamports),
        sync,
    ])
}

fn recompute(owner: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Pubkey {
    let (address, _) = Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &spl_associated_token_account::id(),
    );
    address
}

fn unpack_decimals(mint: &Pubkey, data: &[u8]) -> Result<u8, AtaError> {
    // Token-2022 mints carry extensions after the base layout
    if data.len() < Mint::LEN {
        return Err(AtaError::InvalidMint {
            mint: *mint,
            reason: format!("{} bytes, expected at least {}", data.len(), Mint::LEN),
        });
    }
    Mint::unpack_from_slice(&data[..Mint::LEN])
        .map(|m| m.decimals)
        .map_err(|e| AtaError::InvalidMint {
            mint: *mint,
            reason: e.to_string(),
        })
}
