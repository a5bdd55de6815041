//! Validated, immutable order intent.
//!
//! All monetary inputs arrive as `Decimal` and leave as fixed-point `u64`
//! minor units; no floating point is involved on the way to the encoder.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::ComputeBudgetConfig;
use crate::markets::{Market, MarketSymbol};

/// USD values are encoded with six decimals
pub const USD_DECIMALS: u32 = 6;

const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntentError {
    #[error("missing price guardrail: supply an oracle price with slippage, or an explicit bound")]
    MissingGuardrail,

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: Decimal },

    #[error("slippage of {0} bps is out of range")]
    InvalidSlippage(u32),

    #[error("{guardrail} cannot bound a {side} order")]
    GuardrailSideMismatch { guardrail: &'static str, side: Side },

    #[error("{field} does not fit in u64 at {decimals} decimals")]
    Overflow { field: &'static str, decimals: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Long => "long",
            Side::Short => "short",
        })
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            other => Err(format!("unknown side: {}", other)),
        }
    }
}

/// Worst acceptable execution price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guardrail {
    /// Oracle price widened by `slippage_bps` against the trader
    Slippage {
        oracle_price: Decimal,
        slippage_bps: u32,
    },
    /// Explicit ceiling for a long
    MaxPrice(Decimal),
    /// Explicit floor for a short
    MinPrice(Decimal),
}

impl Guardrail {
    fn name(&self) -> &'static str {
        match self {
            Guardrail::Slippage { .. } => "slippage guardrail",
            Guardrail::MaxPrice(_) => "max price",
            Guardrail::MinPrice(_) => "min price",
        }
    }

    /// Combine oracle price and slippage into the single bound sent on-chain
    pub fn price_bound(&self, side: Side) -> Result<Decimal, IntentError> {
        match (*self, side) {
            (
                Guardrail::Slippage {
                    oracle_price,
                    slippage_bps,
                },
                _,
            ) => {
                ensure_positive("oracle price", oracle_price)?;
                if slippage_bps >= BPS_DENOMINATOR {
                    return Err(IntentError::InvalidSlippage(slippage_bps));
                }
                let bps = Decimal::from(slippage_bps);
                let denom = Decimal::from(BPS_DENOMINATOR);
                let factor = match side {
                    Side::Long => (denom + bps) / denom,
                    Side::Short => (denom - bps) / denom,
                };
                Ok(oracle_price * factor)
            }
            (Guardrail::MaxPrice(price), Side::Long) | (Guardrail::MinPrice(price), Side::Short) => {
                ensure_positive("price bound", price)?;
                Ok(price)
            }
            (guardrail, side) => Err(IntentError::GuardrailSideMismatch {
                guardrail: guardrail.name(),
                side,
            }),
        }
    }
}

/// Unvalidated order input as collected by a caller
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub market: MarketSymbol,
    pub side: Side,
    pub size_usd: Decimal,
    /// Mint funding the collateral (e.g. WSOL or USDC)
    pub collateral_mint: Pubkey,
    /// Collateral amount in UI units of `collateral_mint`
    pub collateral_amount: Decimal,
    pub guardrail: Option<Guardrail>,
    pub compute_budget: ComputeBudgetConfig,
    /// Position-request counter; defaults to the current Unix timestamp
    pub counter: Option<u64>,
    pub pool_override: Option<Pubkey>,
}

/// Order intent, validated once and never mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionOrderIntent {
    market: Market,
    side: Side,
    size_usd: Decimal,
    collateral_mint: Pubkey,
    collateral_amount: Decimal,
    guardrail: Guardrail,
    price_bound: Decimal,
    compute_budget: ComputeBudgetConfig,
    counter: u64,
}

impl PositionOrderIntent {
    pub fn new(request: OrderRequest) -> Result<Self, IntentError> {
        ensure_positive("size_usd", request.size_usd)?;
        ensure_positive("collateral_amount", request.collateral_amount)?;

        let guardrail = request.guardrail.ok_or(IntentError::MissingGuardrail)?;
        let price_bound = guardrail.price_bound(request.side)?;

        let market = match request.pool_override {
            Some(pool) => Market::resolve(request.market).with_pool(pool),
            None => Market::resolve(request.market),
        };

        let intent = Self {
            market,
            side: request.side,
            size_usd: request.size_usd,
            collateral_mint: request.collateral_mint,
            collateral_amount: request.collateral_amount,
            guardrail,
            price_bound,
            compute_budget: request.compute_budget,
            counter: request
                .counter
                .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64),
        };

        // Fail now rather than at the encoding boundary
        intent.size_usd_micro()?;
        intent.price_bound_micro()?;
        Ok(intent)
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn size_usd(&self) -> Decimal {
        self.size_usd
    }

    pub fn collateral_mint(&self) -> Pubkey {
        self.collateral_mint
    }

    pub fn collateral_amount(&self) -> Decimal {
        self.collateral_amount
    }

    pub fn guardrail(&self) -> Guardrail {
        self.guardrail
    }

    pub fn price_bound(&self) -> Decimal {
        self.price_bound
    }

    pub fn compute_budget(&self) -> ComputeBudgetConfig {
        self.compute_budget
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn size_usd_micro(&self) -> Result<u64, IntentError> {
        to_fixed("size_usd", self.size_usd, USD_DECIMALS, RoundingStrategy::ToZero)
    }

    /// Price bound in micro-USD, rounded toward the tighter side
    pub fn price_bound_micro(&self) -> Result<u64, IntentError> {
        let strategy = match self.side {
            Side::Long => RoundingStrategy::ToZero,
            Side::Short => RoundingStrategy::AwayFromZero,
        };
        to_fixed("price_bound", self.price_bound, USD_DECIMALS, strategy)
    }

    /// Collateral in the mint's smallest unit
    pub fn collateral_atoms(&self, decimals: u8) -> Result<u64, IntentError> {
        to_fixed(
            "collateral_amount",
            self.collateral_amount,
            decimals as u32,
            RoundingStrategy::ToZero,
        )
    }
}

fn ensure_positive(field: &'static str, value: Decimal) -> Result<(), IntentError> {
    if value <= Decimal::ZERO {
        return Err(IntentError::NotPositive { field, value });
    }
    Ok(())
}

/// Scale `value` by 10^decimals into an integer of minor units
pub fn to_fixed(
    field: &'static str,
    value: Decimal,
    decimals: u32,
    strategy: RoundingStrategy,
) -> Result<u64, IntentError> {
    let overflow = || IntentError::Overflow { field, decimals };
    let scale = 10u64.checked_pow(decimals).ok_or_else(overflow)?;
    value
        .checked_mul(Decimal::from(scale))
        .ok_or_else(overflow)?
        .round_dp_with_strategy(0, strategy)
        .to_u64()
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::WSOL_MINT;
    use rust_decimal_macros::dec;

    fn request() -> OrderRequest {
        OrderRequest {
            market: MarketSymbol::Sol,
            side: Side::Long,
            size_usd: dec!(100),
            collateral_mint: WSOL_MINT,
            collateral_amount: dec!(0.5),
            guardrail: Some(Guardrail::Slippage {
                oracle_price: dec!(150),
                slippage_bps: 200,
            }),
            compute_budget: ComputeBudgetConfig::default(),
            counter: Some(7),
            pool_override: None,
        }
    }

    #[test]
    fn test_guardrail_combines_oracle_and_slippage() {
        let intent = PositionOrderIntent::new(request()).unwrap();
        assert_eq!(intent.price_bound(), dec!(153));
        assert_eq!(intent.price_bound_micro().unwrap(), 153_000_000);
        assert_eq!(intent.size_usd_micro().unwrap(), 100_000_000);
        assert_eq!(intent.collateral_atoms(9).unwrap(), 500_000_000);
        assert_eq!(intent.counter(), 7);
    }

    #[test]
    fn test_short_slippage_lowers_bound() {
        let mut req = request();
        req.side = Side::Short;
        let intent = PositionOrderIntent::new(req).unwrap();
        assert_eq!(intent.price_bound(), dec!(147));
    }

    #[test]
    fn test_missing_guardrail_is_rejected() {
        let mut req = request();
        req.guardrail = None;
        assert_eq!(
            PositionOrderIntent::new(req).unwrap_err(),
            IntentError::MissingGuardrail
        );
    }

    #[test]
    fn test_explicit_bound_must_match_side() {
        let mut req = request();
        req.guardrail = Some(Guardrail::MinPrice(dec!(140)));
        assert!(matches!(
            PositionOrderIntent::new(req).unwrap_err(),
            IntentError::GuardrailSideMismatch { .. }
        ));

        let mut req = request();
        req.guardrail = Some(Guardrail::MaxPrice(dec!(155.1234567)));
        let intent = PositionOrderIntent::new(req).unwrap();
        // Long ceilings round down
        assert_eq!(intent.price_bound_micro().unwrap(), 155_123_456);
    }

    #[test]
    fn test_non_positive_amounts_are_rejected() {
        let mut req = request();
        req.size_usd = dec!(0);
        assert!(matches!(
            PositionOrderIntent::new(req).unwrap_err(),
            IntentError::NotPositive { field: "size_usd", .. }
        ));
    }

    #[test]
    fn test_slippage_out_of_range() {
        let mut req = request();
        req.guardrail = Some(Guardrail::Slippage {
            oracle_price: dec!(150),
            slippage_bps: 10_000,
        });
        assert_eq!(
            PositionOrderIntent::new(req).unwrap_err(),
            IntentError::InvalidSlippage(10_000)
        );
    }

    #[test]
    fn test_to_fixed_overflow() {
        let err = to_fixed("x", Decimal::from(u64::MAX), 6, RoundingStrategy::ToZero).unwrap_err();
        assert!(matches!(err, IntentError::Overflow { .. }));
    }
}
