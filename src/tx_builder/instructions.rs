//! Instruction planning and ordering validation
//!
//! Transactions are laid out as:
//! 1. Compute-unit limit (if > 0)
//! 2. Compute-unit price (if > 0)
//! 3. Account-init / native-wrap instructions
//! 4. The single domain instruction
//! 5. Post instructions

use solana_sdk::{
    compute_budget::{self, ComputeBudgetInstruction},
    instruction::Instruction,
    pubkey::Pubkey,
};

use crate::config::ComputeBudgetConfig;
use crate::tx_builder::errors::TransactionBuilderError;

// ComputeBudgetInstruction variant tags
const SET_CU_LIMIT_TAG: u8 = 2;
const SET_CU_PRICE_TAG: u8 = 3;

/// Ordered instructions plus the position of the domain instruction
#[derive(Debug, Clone)]
pub struct InstructionPlan {
    pub instructions: Vec<Instruction>,
    pub domain_index: usize,
}

impl InstructionPlan {
    pub fn domain_instruction(&self) -> &Instruction {
        &self.instructions[self.domain_index]
    }
}

pub fn plan_instructions(
    budget: ComputeBudgetConfig,
    pre: Vec<Instruction>,
    domain_ix: Instruction,
    post: Vec<Instruction>,
) -> Result<InstructionPlan, TransactionBuilderError> {
    if domain_ix.accounts.is_empty() {
        return Err(TransactionBuilderError::InstructionBuild {
            program: domain_ix.program_id.to_string(),
            reason: "domain instruction has no accounts".to_string(),
        });
    }

    let mut instructions = Vec::with_capacity(3 + pre.len() + post.len());

    if budget.unit_limit > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(
            budget.unit_limit,
        ));
    }
    if budget.unit_price_micro_lamports > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(
            budget.unit_price_micro_lamports,
        ));
    }

    instructions.extend(pre);
    let domain_index = instructions.len();
    instructions.push(domain_ix);
    instructions.extend(post);

    let plan = InstructionPlan {
        instructions,
        domain_index,
    };
    sanity_check_ix_order(&plan.instructions, &plan.domain_instruction().program_id)?;
    Ok(plan)
}

fn budget_tag(ix: &Instruction) -> Option<u8> {
    if ix.program_id == compute_budget::id() {
        ix.data.first().copied()
    } else {
        None
    }
}

/// Compute-budget directives form a prefix (limit before price, each at
/// most once) and exactly one instruction targets `domain_program`.
pub fn sanity_check_ix_order(
    instructions: &[Instruction],
    domain_program: &Pubkey,
) -> Result<(), TransactionBuilderError> {
    if instructions.is_empty() {
        return Err(TransactionBuilderError::invalid_order(
            "Instruction list is empty",
        ));
    }

    let prefix = instructions
        .iter()
        .take_while(|ix| budget_tag(ix).is_some())
        .count();
    let tags: Vec<u8> = instructions[..prefix].iter().filter_map(budget_tag).collect();
    match tags.as_slice() {
        [] | [SET_CU_LIMIT_TAG] | [SET_CU_PRICE_TAG] | [SET_CU_LIMIT_TAG, SET_CU_PRICE_TAG] => {}
        other => {
            return Err(TransactionBuilderError::invalid_order(format!(
                "Unexpected compute budget prefix {:?}",
                other
            )))
        }
    }

    if let Some(idx) = instructions[prefix..]
        .iter()
        .position(|ix| budget_tag(ix).is_some())
    {
        return Err(TransactionBuilderError::invalid_order(format!(
            "Compute budget instruction at position {} after non-budget instructions",
            prefix + idx
        )));
    }

    let domain_count = instructions
        .iter()
        .filter(|ix| ix.program_id == *domain_program)
        .count();
    if domain_count != 1 {
        return Err(TransactionBuilderError::invalid_order(format!(
            "Expected exactly one instruction for {}, found {}",
            domain_program, domain_count
        )));
    }

    Ok(())
}
