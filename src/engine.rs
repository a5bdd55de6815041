//! Order engine
//!
//! Runs one increase-position order through the fixed pipeline
//! (intent → network → derive → token_accounts → build → simulate →
//! submit → confirm), recording every phase on the step tracker. Only one
//! submission may be in flight per engine at a time.

use async_trait::async_trait;
use solana_sdk::{hash::Hash, instruction::Instruction, pubkey::Pubkey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::ata::{wrap_native_instructions, AtaError, AtaResolver, TokenProgramFlavor};
use crate::config::{ComputeBudgetConfig, ConfigError, EngineConfig, SubmissionConfig};
use crate::intent::{IntentError, OrderRequest, PositionOrderIntent};
use crate::markets::WSOL_MINT;
use crate::metrics::{metrics, Timer};
use crate::observability::TraceContext;
use crate::pda::{Candidate, DeriveError, Idl, IdlError};
use crate::retry_loop::{
    AccountResolutionRetryLoop, Attempt, AttemptBuilder, ProgramDiagnostics, RetryLoopConfig,
    RetryLoopError, SubmissionOutcome,
};
use crate::rpc_manager::{EndpointPool, RpcManagerError};
use crate::step_tracker::{phases, StepStatus, StepTracker};
use crate::tx_builder::accounts::pda_seed_context;
use crate::tx_builder::{
    plan_instructions, AccountInputs, AccountSet, BuiltTransaction, IncreasePositionParams,
    TransactionBuilderError, TxBuilder,
};
use crate::wallet::TransactionSigner;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("A submission is already in flight")]
    SubmissionInFlight,

    #[error(transparent)]
    Intent(#[from] IntentError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Idl(#[from] IdlError),

    #[error(transparent)]
    Derive(#[from] DeriveError),

    #[error(transparent)]
    Ata(#[from] AtaError),

    #[error(transparent)]
    Build(#[from] TransactionBuilderError),

    #[error("All endpoints exhausted during {stage}: {source}")]
    EndpointsExhausted {
        stage: &'static str,
        #[source]
        source: RpcManagerError,
    },

    #[error("RPC error during {stage}: {source}")]
    Rpc {
        stage: &'static str,
        #[source]
        source: RpcManagerError,
    },

    #[error(transparent)]
    Submission(RetryLoopError),
}

impl EngineError {
    fn from_rpc(stage: &'static str, source: RpcManagerError) -> Self {
        if source.is_exhausted() {
            EngineError::EndpointsExhausted { stage, source }
        } else {
            EngineError::Rpc { stage, source }
        }
    }

    /// Everything except endpoint exhaustion is final for this intent
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::EndpointsExhausted { .. })
    }

    pub fn category(&self) -> &'static str {
        match self {
            EngineError::SubmissionInFlight => "concurrency",
            EngineError::Intent(_) => "intent",
            EngineError::Config(_) | EngineError::Idl(_) => "configuration",
            EngineError::Derive(e) => e.category(),
            EngineError::Ata(e) => e.category(),
            EngineError::Build(e) => e.category(),
            EngineError::EndpointsExhausted { .. } | EngineError::Rpc { .. } => "network",
            EngineError::Submission(e) => e.category(),
        }
    }

    /// Parsed program diagnostics, when the program rejected the order
    pub fn diagnostics(&self) -> Option<&ProgramDiagnostics> {
        match self {
            EngineError::Submission(e) => e.diagnostics(),
            _ => None,
        }
    }
}

/// Pool exhaustion inside token account resolution is still exhaustion
fn token_account_error(err: AtaError) -> EngineError {
    match err {
        AtaError::Rpc(source) => EngineError::from_rpc("token_accounts", source),
        other => EngineError::Ata(other),
    }
}

impl From<RetryLoopError> for EngineError {
    fn from(err: RetryLoopError) -> Self {
        match err {
            RetryLoopError::Rpc { stage, source } if source.is_exhausted() => {
                EngineError::EndpointsExhausted { stage, source }
            }
            other => EngineError::Submission(other),
        }
    }
}

/// Addresses reported by the derive phase
#[derive(Debug, Clone)]
pub struct DerivedPreview {
    pub perpetuals: Pubkey,
    pub position: Pubkey,
    pub position_request: Pubkey,
    pub position_candidates: Vec<Candidate>,
}

/// One order, fully resolved and ready for attempts
struct PreparedOrder<'a> {
    builder: &'a TxBuilder,
    signer: &'a dyn TransactionSigner,
    inputs: AccountInputs,
    params: IncreasePositionParams,
    budget: ComputeBudgetConfig,
    pre: Vec<Instruction>,
}

#[async_trait]
impl AttemptBuilder for PreparedOrder<'_> {
    async fn build(
        &self,
        attempt: Attempt,
        blockhash: Hash,
    ) -> Result<BuiltTransaction, TransactionBuilderError> {
        let set = self.builder.assemble(attempt, &self.inputs)?;
        let domain_ix = self.builder.domain_instruction(&set, &self.params)?;
        let plan = plan_instructions(self.budget, self.pre.clone(), domain_ix, Vec::new())?;
        self.builder.compile(&plan, set, blockhash, self.signer)
    }

    fn candidates(&self, account: &str, set: &AccountSet) -> Vec<Candidate> {
        let schemes = self.builder.schemes().candidates(account);
        self.builder
            .deriver()
            .derive_candidates(&schemes, set.seed_context())
    }
}

pub struct OrderEngine {
    pool: Arc<EndpointPool>,
    builder: TxBuilder,
    resolver: AtaResolver,
    signer: Arc<dyn TransactionSigner>,
    submission: SubmissionConfig,
    referral: Option<Pubkey>,
    in_flight: AtomicBool,
}

impl OrderEngine {
    pub fn new(
        pool: Arc<EndpointPool>,
        builder: TxBuilder,
        signer: Arc<dyn TransactionSigner>,
        submission: SubmissionConfig,
    ) -> Self {
        Self {
            pool,
            builder,
            resolver: AtaResolver::new(),
            signer,
            submission,
            referral: None,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Builder from the IDL when one is configured, built-ins otherwise
    pub fn from_config(
        config: &EngineConfig,
        pool: Arc<EndpointPool>,
        signer: Arc<dyn TransactionSigner>,
    ) -> Result<Self, EngineError> {
        let program_id = config.program_id()?;
        let builder = match &config.program.idl_path {
            Some(path) => {
                let idl = Idl::from_file(path)?;
                info!(path = %path, "Using program IDL");
                TxBuilder::from_idl(program_id, &idl)?
            }
            None => TxBuilder::new(program_id),
        };
        Ok(Self::new(pool, builder, signer, config.submission.clone())
            .with_referral(config.referral()?))
    }

    pub fn with_referral(mut self, referral: Option<Pubkey>) -> Self {
        self.referral = referral;
        self
    }

    pub fn builder(&self) -> &TxBuilder {
        &self.builder
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Validate `request` and record the intent phase
    pub fn validate_intent(
        &self,
        request: OrderRequest,
        tracker: &StepTracker,
    ) -> Result<PositionOrderIntent, EngineError> {
        tracker.start(phases::INTENT);
        match PositionOrderIntent::new(request) {
            Ok(intent) => {
                tracker.ok(
                    phases::INTENT,
                    format!(
                        "{} {} ${} bound {}",
                        intent.side(),
                        intent.market().symbol,
                        intent.size_usd(),
                        intent.price_bound()
                    ),
                );
                Ok(intent)
            }
            Err(err) => {
                tracker.fail(phases::INTENT, err.to_string());
                Err(err.into())
            }
        }
    }

    /// Open or increase a position for `intent`
    pub async fn submit(
        &self,
        intent: &PositionOrderIntent,
        tracker: &StepTracker,
    ) -> Result<SubmissionOutcome, EngineError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Rejecting submission while another is in flight");
            return Err(EngineError::SubmissionInFlight);
        }
        let _guard = scopeguard::guard((), |_| {
            self.in_flight.store(false, Ordering::SeqCst);
        });

        let trace = TraceContext::new("open_position");
        let span = trace.span();
        let timer = Timer::start();
        metrics().submissions_total.inc();

        let result = self.run_pipeline(intent, tracker).instrument(span).await;
        timer.observe(&metrics().submission_latency);

        match &result {
            Ok(outcome) => {
                metrics().submission_success.inc();
                info!(
                    correlation_id = %trace.correlation_id(),
                    elapsed_ms = trace.elapsed_ms(),
                    attempt = %outcome.attempt(),
                    signature = ?outcome.signature(),
                    "Submission finished"
                );
            }
            Err(err) => {
                metrics().submission_failures.inc();
                warn!(
                    correlation_id = %trace.correlation_id(),
                    elapsed_ms = trace.elapsed_ms(),
                    category = err.category(),
                    error = %err,
                    "Submission failed"
                );
            }
        }
        result
    }

    async fn run_pipeline(
        &self,
        intent: &PositionOrderIntent,
        tracker: &StepTracker,
    ) -> Result<SubmissionOutcome, EngineError> {
        if tracker.status(phases::INTENT) != Some(StepStatus::Ok) {
            tracker.ok(phases::INTENT, format!("{} {}", intent.side(), intent.market().symbol));
        }

        self.check_network(tracker).await?;

        let owner = self.signer.pubkey();
        let market = intent.market();
        let input_mint = intent.collateral_mint();
        let natural = AccountInputs {
            owner,
            funding_account: Pubkey::default(),
            pool: market.pool,
            market_custody: market.custody.custody,
            collateral_custody: market.collateral_custody.custody,
            input_mint,
            input_flavor: TokenProgramFlavor::Token,
            referral: Some(self.referral.unwrap_or(owner)),
            side: intent.side(),
            counter: intent.counter(),
        };

        let preview = self.derive(&natural, tracker)?;

        tracker.start(phases::TOKEN_ACCOUNTS);
        let (inputs, pre, decimals) =
            match self.resolve_token_accounts(intent, natural, &preview, tracker).await {
                Ok(resolved) => resolved,
                Err(err) => {
                    tracker.fail(phases::TOKEN_ACCOUNTS, err.to_string());
                    return Err(err);
                }
            };

        let params = match IncreasePositionParams::from_intent(intent, decimals) {
            Ok(params) => params,
            Err(err) => {
                tracker.fail(phases::BUILD, format!("order parameters: {}", err));
                return Err(err.into());
            }
        };
        let order = PreparedOrder {
            builder: &self.builder,
            signer: self.signer.as_ref(),
            inputs,
            params,
            budget: intent.compute_budget(),
            pre,
        };

        let retry_loop = AccountResolutionRetryLoop::new(
            self.pool.clone(),
            RetryLoopConfig::from(&self.submission),
        );
        Ok(retry_loop.run(&order, tracker).await?)
    }

    #[instrument(skip_all)]
    async fn check_network(&self, tracker: &StepTracker) -> Result<u64, EngineError> {
        tracker.start(phases::NETWORK);
        match self
            .pool
            .execute("get_slot", |rpc| async move { rpc.get_slot().await })
            .await
        {
            Ok(slot) => {
                tracker.ok(
                    phases::NETWORK,
                    format!("slot {} across {} endpoints", slot, self.pool.len()),
                );
                Ok(slot)
            }
            Err(err) => {
                tracker.fail(phases::NETWORK, err.to_string());
                Err(EngineError::from_rpc("network", err))
            }
        }
    }

    /// Natural-order PDAs, with every position scheme candidate side by side
    pub fn derive(
        &self,
        inputs: &AccountInputs,
        tracker: &StepTracker,
    ) -> Result<DerivedPreview, EngineError> {
        tracker.start(phases::DERIVE);
        let result = self.derive_preview(inputs);
        match &result {
            Ok(preview) => tracker.ok(
                phases::DERIVE,
                format!(
                    "position {} request {}",
                    preview.position, preview.position_request
                ),
            ),
            Err(err) => tracker.fail(phases::DERIVE, err.to_string()),
        }
        result
    }

    fn derive_preview(&self, inputs: &AccountInputs) -> Result<DerivedPreview, EngineError> {
        let deriver = self.builder.deriver();
        let schemes = self.builder.schemes();
        let mut ctx = pda_seed_context(inputs, inputs.market_custody, inputs.collateral_custody);

        let perpetuals = deriver.derive_scheme(schemes.resolve("perpetuals")?, &ctx)?;
        ctx.insert_account("perpetuals", perpetuals.address);

        let position = deriver.derive_scheme(schemes.resolve("position")?, &ctx)?;
        let position_candidates =
            deriver.derive_candidates(&schemes.candidates("position"), &ctx);
        for candidate in &position_candidates {
            debug!(scheme = %candidate.scheme, address = ?candidate.address(), "Position candidate");
        }
        ctx.insert_account("position", position.address);

        let position_request = deriver.derive_scheme(schemes.resolve("positionRequest")?, &ctx)?;

        Ok(DerivedPreview {
            perpetuals: perpetuals.address,
            position: position.address,
            position_request: position_request.address,
            position_candidates,
        })
    }

    /// Funding account (created if missing), optional native wrap, escrow check
    async fn resolve_token_accounts(
        &self,
        intent: &PositionOrderIntent,
        mut inputs: AccountInputs,
        preview: &DerivedPreview,
        tracker: &StepTracker,
    ) -> Result<(AccountInputs, Vec<Instruction>, u8), EngineError> {
        let owner = inputs.owner;
        let mint = inputs.input_mint;

        let funding = self
            .resolver
            .ensure(&self.pool, &owner, &owner, &mint)
            .await
            .map_err(token_account_error)?;
        let escrow = self
            .resolver
            .resolve_escrow(&self.pool, &preview.position_request, &mint)
            .await
            .map_err(token_account_error)?;

        let mut pre = Vec::new();
        let created = funding.create_ix.is_some();
        if let Some(ix) = funding.create_ix {
            pre.push(ix);
        }
        if mint == WSOL_MINT && self.submission.wrap_native {
            let lamports = intent.collateral_atoms(funding.mint.decimals)?;
            pre.extend(wrap_native_instructions(
                &owner,
                &funding.address,
                lamports,
                funding.mint.flavor,
            )?);
        }

        inputs.funding_account = funding.address;
        inputs.input_flavor = funding.mint.flavor;

        tracker.ok(
            phases::TOKEN_ACCOUNTS,
            format!(
                "funding {}{}, escrow {}, {:?} program",
                funding.address,
                if created { " (created)" } else { "" },
                escrow,
                funding.mint.flavor
            ),
        );
        Ok((inputs, pre, funding.mint.decimals))
    }
}
