//! Benchmarks for address derivation and transaction assembly
//!
//! Benchmarks:
//! - Single position PDA derivation
//! - All position candidates side by side (diagnostic path)
//! - Account set assembly per attempt
//! - Full build: assemble + encode + compile + sign

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rust_decimal_macros::dec;
use solana_sdk::{hash::Hash, signature::Keypair};

use perps_engine::ata::TokenProgramFlavor;
use perps_engine::config::ComputeBudgetConfig;
use perps_engine::markets::{Market, MarketSymbol, JUPITER_PERPS_PROGRAM_ID, USDC_MINT};
use perps_engine::pda::{AddressDeriver, SchemeRegistry};
use perps_engine::tx_builder::accounts::pda_seed_context;
use perps_engine::tx_builder::{plan_instructions, AccountInputs, IncreasePositionParams, TxBuilder};
use perps_engine::wallet::{KeypairSigner, TransactionSigner};
use perps_engine::{Attempt, Guardrail, OrderRequest, PositionOrderIntent, Pubkey, Side};

fn inputs(owner: Pubkey) -> AccountInputs {
    let market = Market::resolve(MarketSymbol::Sol);
    AccountInputs {
        owner,
        funding_account: Pubkey::new_unique(),
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

fn intent() -> PositionOrderIntent {
    PositionOrderIntent::new(OrderRequest {
        market: MarketSymbol::Sol,
        side: Side::Long,
        size_usd: dec!(250),
        collateral_mint: USDC_MINT,
        collateral_amount: dec!(50),
        guardrail: Some(Guardrail::Slippage {
            oracle_price: dec!(150),
            slippage_bps: 50,
        }),
        compute_budget: ComputeBudgetConfig::default(),
        counter: Some(1_700_000_000),
        pool_override: None,
    })
    .unwrap()
}

fn bench_derivation(c: &mut Criterion) {
    let program: Pubkey = JUPITER_PERPS_PROGRAM_ID.parse().unwrap();
    let deriver = AddressDeriver::new(program);
    let registry = SchemeRegistry::builtin();
    let inputs = inputs(Pubkey::new_unique());
    let ctx = pda_seed_context(&inputs, inputs.market_custody, inputs.collateral_custody);

    let mut group = c.benchmark_group("derive");
    group.bench_function("position", |b| {
        let scheme = registry.resolve("position").unwrap();
        b.iter(|| deriver.derive_scheme(black_box(scheme), black_box(&ctx)))
    });
    group.bench_function("position_candidates", |b| {
        let schemes = registry.candidates("position");
        b.iter(|| deriver.derive_candidates(black_box(&schemes), black_box(&ctx)))
    });
    group.finish();
}

fn bench_assembly(c: &mut Criterion) {
    let program: Pubkey = JUPITER_PERPS_PROGRAM_ID.parse().unwrap();
    let builder = TxBuilder::new(program);
    let signer = KeypairSigner::from_keypair(Keypair::new());
    let inputs = inputs(signer.pubkey());
    let params = IncreasePositionParams::from_intent(&intent(), 6).unwrap();

    let mut group = c.benchmark_group("assemble");
    for attempt in [Attempt::Natural, Attempt::Swapped] {
        group.bench_with_input(
            BenchmarkId::new("account_set", attempt),
            &attempt,
            |b, attempt| b.iter(|| builder.assemble(*attempt, black_box(&inputs)).unwrap()),
        );
    }
    group.bench_function("build_and_sign", |b| {
        b.iter(|| {
            let set = builder.assemble(Attempt::Natural, &inputs).unwrap();
            let ix = builder.domain_instruction(&set, &params).unwrap();
            let plan =
                plan_instructions(ComputeBudgetConfig::default(), Vec::new(), ix, Vec::new())
                    .unwrap();
            builder
                .compile(&plan, set, Hash::new_unique(), &signer)
                .unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_derivation, bench_assembly);
criterion_main!(benches);
