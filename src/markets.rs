//! Known pool, custody and mint addresses for the Jupiter perpetuals program.

use solana_sdk::{pubkey, pubkey::Pubkey};
use std::fmt;
use std::str::FromStr;

pub const JUPITER_PERPS_PROGRAM_ID: &str = "PERPHjGBqRHArX4DySjwM6UJHiR3sWAatqfdBS2qQJu";

pub const JLP_POOL: Pubkey = pubkey!("5BUwFW4nRbftYTDMbgxykoFWqWHPzahFSNAaaaJtVKsq");

pub const WSOL_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");
pub const USDC_MINT: Pubkey = pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
pub const USDT_MINT: Pubkey = pubkey!("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB");
pub const WETH_MINT: Pubkey = pubkey!("7vfCXTUXx5WJV5JADk17DUJ4ksgau7utNKj4b963voxs");
pub const WBTC_MINT: Pubkey = pubkey!("3NZ9JMVBmGAqocybic2c7LQCJScmgsAZ6vQqTDzcqmJh");

/// One custody account of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustodyInfo {
    pub symbol: &'static str,
    pub custody: Pubkey,
    pub mint: Pubkey,
    pub decimals: u8,
}

pub const SOL_CUSTODY: CustodyInfo = CustodyInfo {
    symbol: "SOL",
    custody: pubkey!("7xS2gz2bTp3fwCC7knJvUWTEU9Tycczu6VhJYKgi1wdz"),
    mint: WSOL_MINT,
    decimals: 9,
};

pub const ETH_CUSTODY: CustodyInfo = CustodyInfo {
    symbol: "ETH",
    custody: pubkey!("AQCGyheWPLeo6Qp9WpYS9m3Qj479t7R636N9ey1rEjEn"),
    mint: WETH_MINT,
    decimals: 8,
};

pub const BTC_CUSTODY: CustodyInfo = CustodyInfo {
    symbol: "BTC",
    custody: pubkey!("5Pv3gM9JrFFH883SWAhvJC9RPYmo8UNxuFtv5bMMALkm"),
    mint: WBTC_MINT,
    decimals: 8,
};

pub const USDC_CUSTODY: CustodyInfo = CustodyInfo {
    symbol: "USDC",
    custody: pubkey!("G18jKKXQwBbrHeiK3C9MRXhkHsLHf7XgCSisykV46EZa"),
    mint: USDC_MINT,
    decimals: 6,
};

pub const USDT_CUSTODY: CustodyInfo = CustodyInfo {
    symbol: "USDT",
    custody: pubkey!("4vkNeXiYEUizLdrpdPS1eC2mccyM4NUPRtERrk6ZETkk"),
    mint: USDT_MINT,
    decimals: 6,
};

const ALL_CUSTODIES: [CustodyInfo; 5] = [
    SOL_CUSTODY,
    ETH_CUSTODY,
    BTC_CUSTODY,
    USDC_CUSTODY,
    USDT_CUSTODY,
];

/// Tradeable market symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketSymbol {
    Sol,
    Eth,
    Btc,
}

impl FromStr for MarketSymbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SOL" | "SOL-PERP" => Ok(MarketSymbol::Sol),
            "ETH" | "ETH-PERP" => Ok(MarketSymbol::Eth),
            "BTC" | "BTC-PERP" => Ok(MarketSymbol::Btc),
            other => Err(format!("unknown market: {}", other)),
        }
    }
}

impl fmt::Display for MarketSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MarketSymbol::Sol => "SOL",
            MarketSymbol::Eth => "ETH",
            MarketSymbol::Btc => "BTC",
        })
    }
}

/// Pool plus the two custodies an increase request references:
/// the market asset and the stable collateral custody.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Market {
    pub symbol: MarketSymbol,
    pub pool: Pubkey,
    pub custody: CustodyInfo,
    pub collateral_custody: CustodyInfo,
}

impl Market {
    pub fn resolve(symbol: MarketSymbol) -> Self {
        let custody = match symbol {
            MarketSymbol::Sol => SOL_CUSTODY,
            MarketSymbol::Eth => ETH_CUSTODY,
            MarketSymbol::Btc => BTC_CUSTODY,
        };
        Self {
            symbol,
            pool: JLP_POOL,
            custody,
            collateral_custody: USDC_CUSTODY,
        }
    }

    pub fn with_pool(mut self, pool: Pubkey) -> Self {
        self.pool = pool;
        self
    }
}

/// Custody keyed by its mint
pub fn custody_for_mint(mint: &Pubkey) -> Option<CustodyInfo> {
    ALL_CUSTODIES.iter().copied().find(|c| c.mint == *mint)
}
