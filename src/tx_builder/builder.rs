use base64::Engine as _;
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::{v0::Message as MessageV0, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use tracing::debug;

use crate::pda::{anchor_discriminator, AddressDeriver, Idl, SchemeRegistry};
use crate::retry_loop::Attempt;
use crate::wallet::TransactionSigner;

use super::accounts::{build_account_metas, AccountInputs, AccountLayout, AccountSet, Role};
use super::encoding::{
    check_arg_layout, discriminator_for, encode_instruction_data, IncreasePositionParams,
    INCREASE_POSITION_IX,
};
use super::errors::TransactionBuilderError;
use super::instructions::InstructionPlan;

/// A signed transaction ready for simulation or broadcast
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub tx: VersionedTransaction,
    pub signature: Signature,
    pub mode: Attempt,
    pub account_set: AccountSet,
}

impl BuiltTransaction {
    /// Wire-format bytes, base64 encoded
    pub fn raw_base64(&self) -> Result<String, TransactionBuilderError> {
        let bytes = bincode::serialize(&self.tx)
            .map_err(|e| TransactionBuilderError::Encoding(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

/// Builds increase-position transactions for one program
#[derive(Debug, Clone)]
pub struct TxBuilder {
    deriver: AddressDeriver,
    schemes: SchemeRegistry,
    layout: AccountLayout,
    discriminator: [u8; 8],
}

impl TxBuilder {
    /// Built-in account layout, seed schemes and discriminator
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            deriver: AddressDeriver::new(program_id),
            schemes: SchemeRegistry::builtin(),
            layout: AccountLayout::builtin(),
            discriminator: anchor_discriminator(INCREASE_POSITION_IX),
        }
    }

    /// Layout, declared seeds and discriminator taken from the program IDL
    pub fn from_idl(program_id: Pubkey, idl: &Idl) -> Result<Self, TransactionBuilderError> {
        if let Some(declared) = idl.program_address() {
            if declared != program_id {
                return Err(TransactionBuilderError::Configuration(format!(
                    "IDL is for program {}, configured program is {}",
                    declared, program_id
                )));
            }
        }

        let ix = idl.instruction(INCREASE_POSITION_IX)?;
        check_arg_layout(ix)?;
        let discriminator = discriminator_for(Some(ix))?;
        debug!(
            discriminator = %hex::encode(discriminator),
            accounts = ix.accounts.len(),
            "Loaded instruction from IDL"
        );

        Ok(Self {
            deriver: AddressDeriver::new(program_id),
            schemes: SchemeRegistry::from_instruction(ix),
            layout: AccountLayout::from_instruction(ix),
            discriminator,
        })
    }

    pub fn program_id(&self) -> &Pubkey {
        self.deriver.program_id()
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    pub fn schemes(&self) -> &SchemeRegistry {
        &self.schemes
    }

    pub fn layout(&self) -> &AccountLayout {
        &self.layout
    }

    pub fn discriminator(&self) -> [u8; 8] {
        self.discriminator
    }

    /// Assemble and guard the account set for `mode`
    pub fn assemble(
        &self,
        mode: Attempt,
        inputs: &AccountInputs,
    ) -> Result<AccountSet, TransactionBuilderError> {
        let set = AccountSet::assemble(mode, inputs, &self.deriver, &self.schemes)?;
        set.guard()?;
        Ok(set)
    }

    pub fn domain_instruction(
        &self,
        set: &AccountSet,
        params: &IncreasePositionParams,
    ) -> Result<Instruction, TransactionBuilderError> {
        let accounts = build_account_metas(&self.layout, set)?;
        let data = encode_instruction_data(self.discriminator, params)?;
        Ok(Instruction {
            program_id: *self.program_id(),
            accounts,
            data,
        })
    }

    /// Compile `plan` into a v0 message and sign it with `signer` as fee payer
    pub fn compile(
        &self,
        plan: &InstructionPlan,
        set: AccountSet,
        blockhash: Hash,
        signer: &dyn TransactionSigner,
    ) -> Result<BuiltTransaction, TransactionBuilderError> {
        let payer = signer.pubkey();
        let owner = set.require(Role::Owner)?;
        if owner != payer {
            return Err(TransactionBuilderError::Signing(format!(
                "signer {} is not the position owner {}",
                payer, owner
            )));
        }

        let message = MessageV0::try_compile(&payer, &plan.instructions, &[], blockhash)
            .map_err(|e| TransactionBuilderError::Compile(e.to_string()))?;
        if message.header.num_required_signatures != 1 {
            return Err(TransactionBuilderError::Signing(format!(
                "message requires {} signatures, only the owner signs",
                message.header.num_required_signatures
            )));
        }

        let message = VersionedMessage::V0(message);
        let signature = signer
            .sign_message(&message.serialize())
            .map_err(|e| TransactionBuilderError::Signing(e.to_string()))?;

        Ok(BuiltTransaction {
            tx: VersionedTransaction {
                signatures: vec![signature],
                message,
            },
            signature,
            mode: set.mode(),
            account_set: set,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ata::{AtaResolver, TokenProgramFlavor};
    use crate::config::ComputeBudgetConfig;
    use crate::intent::Side;
    use crate::markets::{Market, MarketSymbol, JUPITER_PERPS_PROGRAM_ID, USDC_MINT};
    use crate::tx_builder::encoding::PerpSide;
    use crate::tx_builder::instructions::plan_instructions;
    use crate::wallet::KeypairSigner;
    use solana_sdk::signature::{Keypair, Signer};

    fn params() -> IncreasePositionParams {
        IncreasePositionParams {
            size_usd_delta: 10_000_000,
            collateral_token_delta: 5_000_000,
            side: PerpSide::Long,
            price_slippage: 160_000_000,
            jupiter_minimum_out: None,
            counter: 9,
        }
    }

    fn inputs(owner: Pubkey) -> AccountInputs {
        let market = Market::resolve(MarketSymbol::Sol);
        AccountInputs {
            owner,
            funding_account: AtaResolver::derive(&owner, &USDC_MINT, TokenProgramFlavor::Token)
                .unwrap(),
            pool: market.pool,
            market_custody: market.custody.custody,
            collateral_custody: market.collateral_custody.custody,
            input_mint: USDC_MINT,
            input_flavor: TokenProgramFlavor::Token,
            referral: None,
            side: Side::Long,
            counter: 9,
        }
    }

    #[test]
    fn test_compile_and_sign() {
        let keypair = Keypair::new();
        let owner = keypair.pubkey();
        let signer = KeypairSigner::from_keypair(keypair);
        let builder = TxBuilder::new(JUPITER_PERPS_PROGRAM_ID.parse().unwrap());

        let set = builder.assemble(Attempt::Natural, &inputs(owner)).unwrap();
        let ix = builder.domain_instruction(&set, &params()).unwrap();
        assert_eq!(ix.accounts[0].pubkey, owner);
        assert_eq!(&ix.data[..8], &builder.discriminator());

        let plan = plan_instructions(ComputeBudgetConfig::default(), vec![], ix, vec![]).unwrap();
        let built = builder
            .compile(&plan, set, Hash::new_unique(), &signer)
            .unwrap();

        assert_eq!(built.mode, Attempt::Natural);
        assert_eq!(built.tx.signatures, vec![built.signature]);
        assert!(built.tx.verify_with_results().iter().all(|ok| *ok));
        assert!(!built.raw_base64().unwrap().is_empty());
    }

    #[test]
    fn test_compile_rejects_foreign_signer() {
        let builder = TxBuilder::new(JUPITER_PERPS_PROGRAM_ID.parse().unwrap());
        let set = builder
            .assemble(Attempt::Natural, &inputs(Pubkey::new_unique()))
            .unwrap();
        let ix = builder.domain_instruction(&set, &params()).unwrap();
        let plan = plan_instructions(ComputeBudgetConfig::default(), vec![], ix, vec![]).unwrap();

        let signer = KeypairSigner::from_keypair(Keypair::new());
        let err = builder
            .compile(&plan, set, Hash::new_unique(), &signer)
            .unwrap_err();
        assert!(matches!(err, TransactionBuilderError::Signing(_)));
    }

    #[test]
    fn test_idl_program_mismatch() {
        let idl = Idl::from_json(
            r#"{"address": "11111111111111111111111111111111", "instructions": []}"#,
        )
        .unwrap();
        let err = TxBuilder::from_idl(JUPITER_PERPS_PROGRAM_ID.parse().unwrap(), &idl).unwrap_err();
        assert!(matches!(err, TransactionBuilderError::Configuration(_)));
    }

    #[test]
    fn test_idl_layout_orders_by_name() {
        let idl = Idl::from_json(
            r#"{"instructions": [{
                "name": "create_increase_position_market_request",
                "accounts": [
                    {"name": "program"},
                    {"name": "owner", "writable": true, "signer": true},
                    {"name": "position_request", "writable": true},
                    {"name": "custody"},
                    {"name": "collateral_custody"}
                ],
                "args": [{"name": "params", "type": {"defined": "Params"}}]
            }]}"#,
        )
        .unwrap();
        let program_id: Pubkey = JUPITER_PERPS_PROGRAM_ID.parse().unwrap();
        let builder = TxBuilder::from_idl(program_id, &idl).unwrap();
        let owner = Pubkey::new_unique();
        let set = builder.assemble(Attempt::Natural, &inputs(owner)).unwrap();
        let ix = builder.domain_instruction(&set, &params()).unwrap();

        assert_eq!(ix.accounts.len(), 5);
        assert_eq!(ix.accounts[0].pubkey, program_id);
        assert_eq!(ix.accounts[1].pubkey, owner);
        assert!(ix.accounts[1].is_signer);
        assert_eq!(ix.accounts[2].pubkey, set.get(Role::PositionRequest).unwrap());
        assert_eq!(ix.accounts[4].pubkey, set.get(Role::CollateralCustody).unwrap());
        assert_eq!(
            &ix.data[..8],
            &crate::pda::anchor_discriminator("create_increase_position_market_request")
        );
    }
}
