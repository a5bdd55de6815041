//! Role-keyed account set and instruction account layout.
//!
//! Accounts are always looked up by role name, never by position, so a
//! layout read from the IDL and the built-in layout produce the same
//! instruction for the same set.

use solana_sdk::{instruction::AccountMeta, pubkey::Pubkey, system_program};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::ata::{AtaResolver, TokenProgramFlavor, TOKEN_2022_PROGRAM_ID};
use crate::intent::Side;
use crate::pda::{normalize_name, AddressDeriver, IdlInstruction, SchemeRegistry, SeedContext};
use crate::retry_loop::Attempt;

use super::encoding::side_seed;
use super::errors::TransactionBuilderError;

/// Logical account slots of an increase-position request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Owner,
    FundingAccount,
    Perpetuals,
    Pool,
    Position,
    PositionRequest,
    PositionRequestAta,
    Custody,
    CollateralCustody,
    InputMint,
    Referral,
    TokenProgram,
    AssociatedTokenProgram,
    SystemProgram,
    EventAuthority,
    Program,
}

impl Role {
    pub const ALL: [Role; 16] = [
        Role::Owner,
        Role::FundingAccount,
        Role::Perpetuals,
        Role::Pool,
        Role::Position,
        Role::PositionRequest,
        Role::PositionRequestAta,
        Role::Custody,
        Role::CollateralCustody,
        Role::InputMint,
        Role::Referral,
        Role::TokenProgram,
        Role::AssociatedTokenProgram,
        Role::SystemProgram,
        Role::EventAuthority,
        Role::Program,
    ];

    /// Account name as it appears in the program IDL
    pub fn idl_name(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::FundingAccount => "fundingAccount",
            Role::Perpetuals => "perpetuals",
            Role::Pool => "pool",
            Role::Position => "position",
            Role::PositionRequest => "positionRequest",
            Role::PositionRequestAta => "positionRequestAta",
            Role::Custody => "custody",
            Role::CollateralCustody => "collateralCustody",
            Role::InputMint => "inputMint",
            Role::Referral => "referral",
            Role::TokenProgram => "tokenProgram",
            Role::AssociatedTokenProgram => "associatedTokenProgram",
            Role::SystemProgram => "systemProgram",
            Role::EventAuthority => "eventAuthority",
            Role::Program => "program",
        }
    }

    /// Match an IDL or diagnostic account name, ignoring case style
    pub fn from_name(name: &str) -> Option<Role> {
        let wanted = normalize_name(name);
        Role::ALL
            .iter()
            .copied()
            .find(|role| normalize_name(role.idl_name()) == wanted)
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Role::Referral)
    }

    fn is_writable(&self) -> bool {
        matches!(
            self,
            Role::Owner
                | Role::FundingAccount
                | Role::Position
                | Role::PositionRequest
                | Role::PositionRequestAta
        )
    }

    fn is_signer(&self) -> bool {
        matches!(self, Role::Owner)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.idl_name())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::from_name(s).ok_or_else(|| format!("unknown account role: {}", s))
    }
}

/// Everything needed to derive an account set, independent of attempt mode
#[derive(Debug, Clone)]
pub struct AccountInputs {
    pub owner: Pubkey,
    /// Owner's token account for the input mint
    pub funding_account: Pubkey,
    pub pool: Pubkey,
    /// Market asset custody
    pub market_custody: Pubkey,
    /// Stable collateral custody
    pub collateral_custody: Pubkey,
    pub input_mint: Pubkey,
    pub input_flavor: TokenProgramFlavor,
    pub referral: Option<Pubkey>,
    pub side: Side,
    pub counter: u64,
}

/// Seed values for the program PDAs with the given custody roles
pub fn pda_seed_context(
    inputs: &AccountInputs,
    custody: Pubkey,
    collateral_custody: Pubkey,
) -> SeedContext {
    SeedContext::new()
        .with_account(Role::Owner.idl_name(), inputs.owner)
        .with_account(Role::Pool.idl_name(), inputs.pool)
        .with_account(Role::Custody.idl_name(), custody)
        .with_account(Role::CollateralCustody.idl_name(), collateral_custody)
        .with_account(Role::InputMint.idl_name(), inputs.input_mint)
        .with_arg("side", vec![side_seed(inputs.side)])
        .with_arg("counter", inputs.counter.to_le_bytes().to_vec())
        // Increase
        .with_arg("requestChange", vec![1])
}

/// Resolved role → address map for one attempt
#[derive(Debug, Clone)]
pub struct AccountSet {
    roles: BTreeMap<Role, Pubkey>,
    mode: Attempt,
    input_flavor: TokenProgramFlavor,
    seeds: SeedContext,
}

impl AccountSet {
    /// Derive every PDA for `mode`. Swapped mode exchanges the two custody
    /// roles and re-derives the position, the position request and its escrow.
    pub fn assemble(
        mode: Attempt,
        inputs: &AccountInputs,
        deriver: &AddressDeriver,
        schemes: &SchemeRegistry,
    ) -> Result<Self, TransactionBuilderError> {
        let (custody, collateral_custody) = match mode {
            Attempt::Natural => (inputs.market_custody, inputs.collateral_custody),
            Attempt::Swapped => (inputs.collateral_custody, inputs.market_custody),
        };
        if custody == collateral_custody {
            return Err(TransactionBuilderError::InvalidAccountSet(format!(
                "custody and collateralCustody are both {}",
                custody
            )));
        }

        let mut seeds = pda_seed_context(inputs, custody, collateral_custody);

        let perpetuals = deriver.derive_scheme(schemes.resolve("perpetuals")?, &seeds)?;
        let event_authority = deriver.derive_scheme(schemes.resolve("eventAuthority")?, &seeds)?;
        seeds.insert_account(Role::Perpetuals.idl_name(), perpetuals.address);

        let position = deriver.derive_scheme(schemes.resolve("position")?, &seeds)?;
        seeds.insert_account(Role::Position.idl_name(), position.address);

        let position_request = deriver.derive_scheme(schemes.resolve("positionRequest")?, &seeds)?;
        seeds.insert_account(Role::PositionRequest.idl_name(), position_request.address);

        let escrow = AtaResolver::derive(
            &position_request.address,
            &inputs.input_mint,
            inputs.input_flavor,
        )?;

        let mut roles = BTreeMap::new();
        roles.insert(Role::Owner, inputs.owner);
        roles.insert(Role::FundingAccount, inputs.funding_account);
        roles.insert(Role::Perpetuals, perpetuals.address);
        roles.insert(Role::Pool, inputs.pool);
        roles.insert(Role::Position, position.address);
        roles.insert(Role::PositionRequest, position_request.address);
        roles.insert(Role::PositionRequestAta, escrow);
        roles.insert(Role::Custody, custody);
        roles.insert(Role::CollateralCustody, collateral_custody);
        roles.insert(Role::InputMint, inputs.input_mint);
        if let Some(referral) = inputs.referral {
            roles.insert(Role::Referral, referral);
        }
        roles.insert(Role::TokenProgram, inputs.input_flavor.program_id());
        roles.insert(Role::AssociatedTokenProgram, spl_associated_token_account::id());
        roles.insert(Role::SystemProgram, system_program::id());
        roles.insert(Role::EventAuthority, event_authority.address);
        roles.insert(Role::Program, *deriver.program_id());

        debug!(
            ?mode,
            position = %position.address,
            position_request = %position_request.address,
            "Assembled account set"
        );

        Ok(Self {
            roles,
            mode,
            input_flavor: inputs.input_flavor,
            seeds,
        })
    }

    pub fn mode(&self) -> Attempt {
        self.mode
    }

    pub fn get(&self, role: Role) -> Option<Pubkey> {
        self.roles.get(&role).copied()
    }

    pub fn require(&self, role: Role) -> Result<Pubkey, TransactionBuilderError> {
        self.get(role)
            .ok_or_else(|| TransactionBuilderError::missing(role))
    }

    /// Seed values the set was derived from, for re-deriving candidates
    pub fn seed_context(&self) -> &SeedContext {
        &self.seeds
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, Pubkey)> + '_ {
        self.roles.iter().map(|(role, pk)| (*role, *pk))
    }

    #[cfg(test)]
    pub(crate) fn set(&mut self, role: Role, address: Pubkey) {
        self.roles.insert(role, address);
    }

    /// Structural checks run before every build
    pub fn guard(&self) -> Result<(), TransactionBuilderError> {
        for role in Role::ALL.iter().filter(|r| !r.is_optional()) {
            self.require(*role)?;
        }

        let custody = self.require(Role::Custody)?;
        let collateral = self.require(Role::CollateralCustody)?;
        if custody == collateral {
            return Err(TransactionBuilderError::InvalidAccountSet(format!(
                "custody and collateralCustody are both {}",
                custody
            )));
        }

        let token_program = self.require(Role::TokenProgram)?;
        if token_program != spl_token::id() && token_program != TOKEN_2022_PROGRAM_ID {
            return Err(TransactionBuilderError::InvalidAccountSet(format!(
                "tokenProgram {} is not a known token program",
                token_program
            )));
        }
        let expected_program = self.input_flavor.program_id();
        if token_program != expected_program {
            return Err(TransactionBuilderError::TokenProgramMismatch {
                expected: expected_program,
                actual: token_program,
            });
        }

        let escrow = self.require(Role::PositionRequestAta)?;
        let recomputed = AtaResolver::derive(
            &self.require(Role::PositionRequest)?,
            &self.require(Role::InputMint)?,
            self.input_flavor,
        )?;
        if escrow != recomputed {
            return Err(TransactionBuilderError::EscrowMismatch {
                expected: recomputed,
                actual: escrow,
            });
        }
        Ok(())
    }
}

/// One slot of an instruction's account list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    pub name: String,
    pub role: Option<Role>,
    /// Address pinned by the IDL, used when no role matches
    pub fixed: Option<Pubkey>,
    pub writable: bool,
    pub signer: bool,
    pub optional: bool,
}

/// Ordered account list of the increase-position instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLayout {
    entries: Vec<LayoutEntry>,
}

impl AccountLayout {
    pub fn builtin() -> Self {
        let entries = Role::ALL
            .iter()
            .map(|role| LayoutEntry {
                name: role.idl_name().to_string(),
                role: Some(*role),
                fixed: None,
                writable: role.is_writable(),
                signer: role.is_signer(),
                optional: role.is_optional(),
            })
            .collect();
        Self { entries }
    }

    pub fn from_instruction(instruction: &IdlInstruction) -> Self {
        let entries = instruction
            .flat_accounts()
            .into_iter()
            .map(|item| LayoutEntry {
                name: item.name.clone(),
                role: Role::from_name(&item.name),
                fixed: item.address.as_deref().and_then(|a| Pubkey::from_str(a).ok()),
                writable: item.writable,
                signer: item.signer,
                optional: item.optional,
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Account metas in layout order, filled by role name
pub fn build_account_metas(
    layout: &AccountLayout,
    set: &AccountSet,
) -> Result<Vec<AccountMeta>, TransactionBuilderError> {
    let mut metas = Vec::with_capacity(layout.len());
    for entry in layout.entries() {
        let address = entry.role.and_then(|role| set.get(role)).or(entry.fixed);
        match address {
            Some(pubkey) => metas.push(AccountMeta {
                pubkey,
                is_signer: entry.signer,
                is_writable: entry.writable,
            }),
            None if entry.optional => {
                debug!(account = %entry.name, "Optional account absent, skipped");
            }
            None => return Err(TransactionBuilderError::MissingAccount(entry.name.clone())),
        }
    }
    Ok(metas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::{Market, MarketSymbol, USDC_MINT};

    fn inputs() -> AccountInputs {
        let market = Market::resolve(MarketSymbol::Sol);
        let owner = Pubkey::new_unique();
        AccountInputs {
            owner,
            funding_account: AtaResolver::derive(&owner, &USDC_MINT, TokenProgramFlavor::Token)
                .unwrap(),
            pool: market.pool,
            market_custody: market.custody.custody,
            collateral_custody: market.collateral_custody.custody,
            input_mint: USDC_MINT,
            input_flavor: TokenProgramFlavor::Token,
            referral: Some(owner),
            side: Side::Long,
            counter: 1_700_000_000,
        }
    }

    fn deriver() -> AddressDeriver {
        AddressDeriver::new(crate::markets::JUPITER_PERPS_PROGRAM_ID.parse().unwrap())
    }

    #[test]
    fn test_role_names_round_trip() {
        for role in Role::ALL {
            assert_eq!(Role::from_name(role.idl_name()), Some(role));
        }
        assert_eq!(Role::from_name("collateral_custody"), Some(Role::CollateralCustody));
        assert_eq!(Role::from_name("position_request_ata"), Some(Role::PositionRequestAta));
        assert!(Role::from_name("vault").is_none());
    }

    #[test]
    fn test_natural_assembly_passes_guard() {
        let inputs = inputs();
        let set =
            AccountSet::assemble(Attempt::Natural, &inputs, &deriver(), &SchemeRegistry::builtin())
                .unwrap();
        set.guard().unwrap();
        assert_eq!(set.get(Role::Custody), Some(inputs.market_custody));
        assert_eq!(set.get(Role::CollateralCustody), Some(inputs.collateral_custody));
        assert_eq!(set.get(Role::TokenProgram), Some(spl_token::id()));
    }

    #[test]
    fn test_swapped_assembly_rederives() {
        let inputs = inputs();
        let registry = SchemeRegistry::builtin();
        let natural = AccountSet::assemble(Attempt::Natural, &inputs, &deriver(), &registry).unwrap();
        let swapped = AccountSet::assemble(Attempt::Swapped, &inputs, &deriver(), &registry).unwrap();

        assert_eq!(swapped.get(Role::Custody), natural.get(Role::CollateralCustody));
        assert_eq!(swapped.get(Role::CollateralCustody), natural.get(Role::Custody));
        assert_ne!(swapped.get(Role::Position), natural.get(Role::Position));
        assert_ne!(swapped.get(Role::PositionRequest), natural.get(Role::PositionRequest));
        assert_ne!(swapped.get(Role::PositionRequestAta), natural.get(Role::PositionRequestAta));
        assert_eq!(swapped.get(Role::Perpetuals), natural.get(Role::Perpetuals));
        swapped.guard().unwrap();
    }

    #[test]
    fn test_equal_custodies_rejected() {
        let mut inputs = inputs();
        inputs.collateral_custody = inputs.market_custody;
        let err = AccountSet::assemble(
            Attempt::Natural,
            &inputs,
            &deriver(),
            &SchemeRegistry::builtin(),
        )
        .unwrap_err();
        assert!(matches!(err, TransactionBuilderError::InvalidAccountSet(_)));
    }

    #[test]
    fn test_guard_catches_tampering() {
        let inputs = inputs();
        let registry = SchemeRegistry::builtin();
        let base = AccountSet::assemble(Attempt::Natural, &inputs, &deriver(), &registry).unwrap();

        let mut set = base.clone();
        set.set(Role::TokenProgram, TOKEN_2022_PROGRAM_ID);
        assert!(matches!(
            set.guard(),
            Err(TransactionBuilderError::TokenProgramMismatch { .. })
        ));

        let mut set = base.clone();
        set.set(Role::TokenProgram, Pubkey::new_unique());
        assert!(matches!(
            set.guard(),
            Err(TransactionBuilderError::InvalidAccountSet(_))
        ));

        let mut set = base.clone();
        set.set(Role::PositionRequestAta, Pubkey::new_unique());
        assert!(matches!(
            set.guard(),
            Err(TransactionBuilderError::EscrowMismatch { .. })
        ));

        let mut set = base;
        let custody = set.get(Role::Custody).unwrap();
        set.set(Role::CollateralCustody, custody);
        assert!(matches!(
            set.guard(),
            Err(TransactionBuilderError::InvalidAccountSet(_))
        ));
    }

    #[test]
    fn test_builtin_layout_metas() {
        let set = AccountSet::assemble(
            Attempt::Natural,
            &inputs(),
            &deriver(),
            &SchemeRegistry::builtin(),
        )
        .unwrap();
        let metas = build_account_metas(&AccountLayout::builtin(), &set).unwrap();
        assert_eq!(metas.len(), 16);
        assert!(metas[0].is_signer && metas[0].is_writable);
        assert_eq!(metas[7].pubkey, set.get(Role::Custody).unwrap());
        assert_eq!(metas[15].pubkey, *deriver().program_id());
    }

    #[test]
    fn test_missing_optional_skipped_required_errors() {
        let mut inputs = inputs();
        inputs.referral = None;
        let set = AccountSet::assemble(
            Attempt::Natural,
            &inputs,
            &deriver(),
            &SchemeRegistry::builtin(),
        )
        .unwrap();
        let metas = build_account_metas(&AccountLayout::builtin(), &set).unwrap();
        assert_eq!(metas.len(), 15);

        let mut layout = AccountLayout::builtin();
        layout.entries.push(LayoutEntry {
            name: "oracle".to_string(),
            role: None,
            fixed: None,
            writable: false,
            signer: false,
            optional: false,
        });
        assert!(matches!(
            build_account_metas(&layout, &set),
            Err(TransactionBuilderError::MissingAccount(name)) if name == "oracle"
        ));
    }
}
