//! perps-engine CLI
//!
//! Thin wrapper: parses arguments, loads configuration and the keypair,
//! then hands one order to the engine. The checklist is printed on every
//! exit path.

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use perps_engine::config::EngineConfig;
use perps_engine::markets::{Market, MarketSymbol, USDC_MINT, USDT_MINT, WSOL_MINT};
use perps_engine::price_feed::PriceFeed;
use perps_engine::rpc_manager::EndpointPool;
use perps_engine::wallet::KeypairSigner;
use perps_engine::{
    finalize_guard, install_exit_hook, Guardrail, OrderEngine, OrderRequest, Side, StepTracker,
    SubmissionOutcome,
};

/// Open or increase a Jupiter Perps position
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Market: SOL, ETH or BTC
    #[arg(long, default_value = "SOL")]
    market: MarketSymbol,

    /// long or short
    #[arg(long)]
    side: Side,

    /// Position size increase in USD
    #[arg(long)]
    size_usd: Decimal,

    /// Collateral amount in UI units of the collateral mint
    #[arg(long)]
    collateral: Decimal,

    /// Collateral mint: USDC, USDT, SOL or a mint address
    #[arg(long, default_value = "USDC")]
    collateral_mint: String,

    /// Slippage in basis points applied to the oracle price
    #[arg(long)]
    slippage_bps: Option<u32>,

    /// Oracle price; fetched from the price feed when omitted
    #[arg(long)]
    oracle_price: Option<Decimal>,

    /// Explicit ceiling for a long
    #[arg(long, conflicts_with_all = ["slippage_bps", "min_price"])]
    max_price: Option<Decimal>,

    /// Explicit floor for a short
    #[arg(long, conflicts_with_all = ["slippage_bps", "max_price"])]
    min_price: Option<Decimal>,

    /// Position request counter (defaults to the Unix timestamp)
    #[arg(long)]
    counter: Option<u64>,

    /// Simulate only; print the base64 transaction
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = EngineConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;
    if args.dry_run {
        config.submission.dry_run = true;
    }
    perps_engine::logging::init_logging(&config.logging, args.verbose)
        .context("Failed to initialize logging")?;

    let tracker = Arc::new(StepTracker::pipeline());
    install_exit_hook(tracker.clone());
    let _finalize = finalize_guard(tracker.clone());

    let signer = KeypairSigner::from_file(&config.wallet.keypair_path)
        .with_context(|| format!("Failed to read keypair {}", config.wallet.keypair_path))?;
    let pool = Arc::new(EndpointPool::from_config(&config.rpc).context("Invalid RPC config")?);
    if let Some(interval) = config.rpc.probe_interval() {
        let _probes = pool.clone().spawn_health_probes(interval);
    }
    let engine = OrderEngine::from_config(&config, pool.clone(), Arc::new(signer))
        .context("Failed to initialize engine")?;

    let guardrail = guardrail(&args, &config).await?;
    let request = OrderRequest {
        market: args.market,
        side: args.side,
        size_usd: args.size_usd,
        collateral_mint: parse_mint(&args.collateral_mint)?,
        collateral_amount: args.collateral,
        guardrail,
        compute_budget: config.compute_budget,
        counter: args.counter,
        pool_override: config.pool_override()?,
    };
    let intent = engine
        .validate_intent(request, &tracker)
        .context("Invalid order")?;

    let result = engine.submit(&intent, &tracker).await;
    for health in pool.health_snapshot() {
        info!(
            endpoint = %health.label,
            status = ?health.status,
            requests = health.total_requests,
            error_rate = health.error_rate,
            last_latency_us = health.last_latency_us,
            "Endpoint health"
        );
    }

    match result {
        Ok(SubmissionOutcome::Submitted { signature, attempt }) => {
            info!(%signature, %attempt, "Position request confirmed");
            println!("{}", signature);
            Ok(ExitCode::SUCCESS)
        }
        Ok(SubmissionOutcome::Simulated {
            attempt,
            units_consumed,
            raw_tx_base64,
        }) => {
            info!(%attempt, ?units_consumed, "Dry run accepted by the program");
            println!("{}", raw_tx_base64);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("error: {}", err);
            if let Some(diagnostics) = err.diagnostics() {
                eprintln!("{}", diagnostics);
            }
            Ok(ExitCode::from(if err.is_fatal() { 1 } else { 2 }))
        }
    }
}

async fn guardrail(args: &Args, config: &EngineConfig) -> Result<Option<Guardrail>> {
    if let Some(price) = args.max_price {
        return Ok(Some(Guardrail::MaxPrice(price)));
    }
    if let Some(price) = args.min_price {
        return Ok(Some(Guardrail::MinPrice(price)));
    }
    let Some(slippage_bps) = args.slippage_bps else {
        return Ok(None);
    };
    let oracle_price = match args.oracle_price {
        Some(price) => price,
        None => {
            let mint = Market::resolve(args.market).custody.mint;
            PriceFeed::new(&config.price_feed)
                .context("Failed to build price feed client")?
                .price_usd(&mint)
                .await
                .context("Failed to fetch oracle price")?
        }
    };
    Ok(Some(Guardrail::Slippage {
        oracle_price,
        slippage_bps,
    }))
}

fn parse_mint(raw: &str) -> Result<Pubkey> {
    Ok(match raw.trim().to_ascii_uppercase().as_str() {
        "USDC" => USDC_MINT,
        "USDT" => USDT_MINT,
        "SOL" | "WSOL" => WSOL_MINT,
        _ => Pubkey::from_str(raw.trim()).with_context(|| format!("Invalid mint {}", raw))?,
    })
}
