use std::collections::HashMap;

use super::idl::IdlInstruction;
use super::seeds::{normalize_name, DeriveError, SeedRule, SeedScheme};

pub const PERPETUALS_SEED: &str = "perpetuals";
pub const EVENT_AUTHORITY_SEED: &str = "__event_authority";
pub const POSITION_SEED: &str = "position";
pub const POSITION_REQUEST_SEED: &str = "position_request";

/// Seed schemes per PDA account. A scheme declared by the interface
/// description always takes precedence over the built-in fallbacks.
#[derive(Debug, Clone, Default)]
pub struct SchemeRegistry {
    declared: HashMap<String, SeedScheme>,
    fallbacks: HashMap<String, Vec<SeedScheme>>,
}

impl SchemeRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fallbacks for the perpetuals program's PDAs
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.add_fallback(
            "perpetuals",
            SeedScheme::fallback("perpetuals", vec![SeedRule::literal(PERPETUALS_SEED)]),
        );
        registry.add_fallback(
            "eventAuthority",
            SeedScheme::fallback(
                "event_authority",
                vec![SeedRule::literal(EVENT_AUTHORITY_SEED)],
            ),
        );
        // v1 is the primary; v2 and v3 are kept as candidates for diagnostics
        registry.add_fallback(
            "position",
            SeedScheme::fallback(
                "position_v1",
                vec![
                    SeedRule::literal(POSITION_SEED),
                    SeedRule::account("owner"),
                    SeedRule::account("pool"),
                    SeedRule::account("custody"),
                    SeedRule::account("collateralCustody"),
                    SeedRule::arg("side"),
                ],
            ),
        );
        registry.add_fallback(
            "position",
            SeedScheme::fallback(
                "position_v2",
                vec![
                    SeedRule::literal(POSITION_SEED),
                    SeedRule::account("owner"),
                    SeedRule::account("pool"),
                    SeedRule::account("collateralCustody"),
                    SeedRule::account("custody"),
                    SeedRule::arg("side"),
                ],
            ),
        );
        registry.add_fallback(
            "position",
            SeedScheme::fallback(
                "position_v3",
                vec![
                    SeedRule::literal(POSITION_SEED),
                    SeedRule::account("owner"),
                    SeedRule::account("custody"),
                    SeedRule::account("collateralCustody"),
                    SeedRule::arg("side"),
                ],
            ),
        );
        registry.add_fallback(
            "positionRequest",
            SeedScheme::fallback(
                "position_request",
                vec![
                    SeedRule::literal(POSITION_REQUEST_SEED),
                    SeedRule::account("position"),
                    SeedRule::arg("counter"),
                    SeedRule::arg("requestChange"),
                ],
            ),
        );
        registry
    }

    /// Built-ins overlaid with whatever `instruction` declares
    pub fn from_instruction(instruction: &IdlInstruction) -> Self {
        let mut registry = Self::builtin();
        for (account, scheme) in instruction.declared_schemes() {
            registry.declare(&account, scheme);
        }
        registry
    }

    pub fn declare(&mut self, account: &str, scheme: SeedScheme) {
        self.declared.insert(normalize_name(account), scheme);
    }

    pub fn add_fallback(&mut self, account: &str, scheme: SeedScheme) {
        self.fallbacks
            .entry(normalize_name(account))
            .or_default()
            .push(scheme);
    }

    pub fn has_declared(&self, account: &str) -> bool {
        self.declared.contains_key(&normalize_name(account))
    }

    /// The scheme used to build the transaction
    pub fn resolve(&self, account: &str) -> Result<&SeedScheme, DeriveError> {
        let key = normalize_name(account);
        self.declared
            .get(&key)
            .or_else(|| self.fallbacks.get(&key).and_then(|list| list.first()))
            .ok_or_else(|| DeriveError::UnknownAccount(account.to_string()))
    }

    /// Primary scheme first, then every other known scheme with distinct rules
    pub fn candidates(&self, account: &str) -> Vec<SeedScheme> {
        let key = normalize_name(account);
        let mut out: Vec<SeedScheme> = Vec::new();
        let all = self
            .declared
            .get(&key)
            .into_iter()
            .chain(self.fallbacks.get(&key).into_iter().flatten());
        for scheme in all {
            if !out.iter().any(|s| s.rules == scheme.rules && s.program == scheme.program) {
                out.push(scheme.clone());
            }
        }
        out
    }
}
