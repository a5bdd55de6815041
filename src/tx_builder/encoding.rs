//! Instruction data for `createIncreasePositionMarketRequest`.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::intent::{PositionOrderIntent, Side};
use crate::pda::{anchor_discriminator, IdlInstruction};

use super::errors::TransactionBuilderError;

pub const INCREASE_POSITION_IX: &str = "createIncreasePositionMarketRequest";

/// Program-side side enum; `None` occupies discriminant 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum PerpSide {
    None,
    Long,
    Short,
}

impl From<Side> for PerpSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => PerpSide::Long,
            Side::Short => PerpSide::Short,
        }
    }
}

/// Single-byte seed the position PDA uses for `side`
pub fn side_seed(side: Side) -> u8 {
    match PerpSide::from(side) {
        PerpSide::None => 0,
        PerpSide::Long => 1,
        PerpSide::Short => 2,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct IncreasePositionParams {
    pub size_usd_delta: u64,
    pub collateral_token_delta: u64,
    pub side: PerpSide,
    pub price_slippage: u64,
    pub jupiter_minimum_out: Option<u64>,
    pub counter: u64,
}

impl IncreasePositionParams {
    /// Fixed-point params for `intent`, collateral scaled by the input mint's decimals
    pub fn from_intent(
        intent: &PositionOrderIntent,
        input_decimals: u8,
    ) -> Result<Self, TransactionBuilderError> {
        Ok(Self {
            size_usd_delta: intent.size_usd_micro()?,
            collateral_token_delta: intent.collateral_atoms(input_decimals)?,
            side: intent.side().into(),
            price_slippage: intent.price_bound_micro()?,
            jupiter_minimum_out: None,
            counter: intent.counter(),
        })
    }
}

/// Discriminator followed by the borsh-encoded params
pub fn encode_instruction_data(
    discriminator: [u8; 8],
    params: &IncreasePositionParams,
) -> Result<Vec<u8>, TransactionBuilderError> {
    let body = borsh::to_vec(params).map_err(|e| TransactionBuilderError::Encoding(e.to_string()))?;
    let mut data = Vec::with_capacity(8 + body.len());
    data.extend_from_slice(&discriminator);
    data.extend_from_slice(&body);
    Ok(data)
}

/// IDL-declared discriminator, else the Anchor sighash of the instruction name
pub fn discriminator_for(idl: Option<&IdlInstruction>) -> Result<[u8; 8], TransactionBuilderError> {
    match idl {
        Some(ix) => Ok(ix.discriminator()?),
        None => Ok(anchor_discriminator(INCREASE_POSITION_IX)),
    }
}

/// The instruction must take exactly one struct argument carrying the params
pub fn check_arg_layout(ix: &IdlInstruction) -> Result<(), TransactionBuilderError> {
    match ix.args.as_slice() {
        [arg] if arg.ty.is_object() => Ok(()),
        args => Err(TransactionBuilderError::Configuration(format!(
            "{} expects a single params struct, IDL declares {} argument(s)",
            ix.name,
            args.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComputeBudgetConfig;
    use crate::intent::{Guardrail, OrderRequest};
    use crate::markets::{MarketSymbol, WSOL_MINT};
    use crate::pda::Idl;
    use rust_decimal_macros::dec;

    fn intent(side: Side) -> PositionOrderIntent {
        PositionOrderIntent::new(OrderRequest {
            market: MarketSymbol::Sol,
            side,
            size_usd: dec!(250.5),
            collateral_mint: WSOL_MINT,
            collateral_amount: dec!(1.25),
            guardrail: Some(Guardrail::Slippage {
                oracle_price: dec!(100),
                slippage_bps: 50,
            }),
            compute_budget: ComputeBudgetConfig::default(),
            counter: Some(42),
            pool_override: None,
        })
        .unwrap()
    }

    #[test]
    fn test_params_from_intent() {
        let params = IncreasePositionParams::from_intent(&intent(Side::Short), 9).unwrap();
        assert_eq!(params.size_usd_delta, 250_500_000);
        assert_eq!(params.collateral_token_delta, 1_250_000_000);
        assert_eq!(params.side, PerpSide::Short);
        assert_eq!(params.price_slippage, 99_500_000);
        assert_eq!(params.jupiter_minimum_out, None);
        assert_eq!(params.counter, 42);
    }

    #[test]
    fn test_wire_layout() {
        let params = IncreasePositionParams::from_intent(&intent(Side::Long), 9).unwrap();
        let disc = anchor_discriminator(INCREASE_POSITION_IX);
        let data = encode_instruction_data(disc, &params).unwrap();

        // 8 disc + 8 + 8 + 1 + 8 + 1 (None) + 8
        assert_eq!(data.len(), 42);
        assert_eq!(&data[..8], &disc);
        assert_eq!(&data[8..16], &250_500_000u64.to_le_bytes());
        assert_eq!(data[24], 1);
        assert_eq!(&data[25..33], &100_500_000u64.to_le_bytes());
        assert_eq!(data[33], 0);
        assert_eq!(&data[34..42], &42u64.to_le_bytes());

        let decoded = IncreasePositionParams::try_from_slice(&data[8..]).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_side_seed() {
        assert_eq!(side_seed(Side::Long), 1);
        assert_eq!(side_seed(Side::Short), 2);
    }

    #[test]
    fn test_arg_layout_and_discriminator_from_idl() {
        let idl = Idl::from_json(
            r#"{"instructions": [
                {"name": "createIncreasePositionMarketRequest",
                 "discriminator": [9, 9, 9, 9, 9, 9, 9, 9],
                 "accounts": [],
                 "args": [{"name": "params", "type": {"defined": {"name": "Params"}}}]},
                {"name": "other", "accounts": [],
                 "args": [{"name": "a", "type": "u64"}, {"name": "b", "type": "u64"}]}
            ]}"#,
        )
        .unwrap();

        let ix = idl.instruction(INCREASE_POSITION_IX).unwrap();
        check_arg_layout(ix).unwrap();
        assert_eq!(discriminator_for(Some(ix)).unwrap(), [9; 8]);
        assert_eq!(
            discriminator_for(None).unwrap(),
            anchor_discriminator("create_increase_position_market_request")
        );

        let other = idl.instruction("other").unwrap();
        assert!(check_arg_layout(other).is_err());
    }
}
