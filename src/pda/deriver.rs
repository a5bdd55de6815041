//! Program-derived address computation.
//!
//! Pure functions of `(program_id, seeds)`; the deriver owns no client, so a
//! derivation can never touch the network.

use solana_sdk::pubkey::Pubkey;
use tracing::debug;

use super::seeds::{DeriveError, SchemeSource, SeedContext, SeedRule, SeedScheme};

const MAX_SEED_LEN: usize = 32;
// find_program_address appends the bump as the final seed
const MAX_USER_SEEDS: usize = 15;

/// `(address, bump)` for one derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivedAddress {
    pub address: Pubkey,
    pub bump: u8,
}

/// One scheme's result, kept alongside its siblings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub scheme: String,
    pub source: SchemeSource,
    pub result: Result<DerivedAddress, DeriveError>,
}

impl Candidate {
    pub fn address(&self) -> Option<Pubkey> {
        self.result.as_ref().ok().map(|d| d.address)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AddressDeriver {
    program_id: Pubkey,
}

impl AddressDeriver {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Canonical address and bump for raw seeds under this program
    pub fn derive(&self, seeds: &[&[u8]]) -> Result<DerivedAddress, DeriveError> {
        derive_with(&self.program_id, seeds, "raw")
    }

    /// Evaluate every rule of `scheme` against `ctx` without hashing
    pub fn resolve_seeds(
        &self,
        scheme: &SeedScheme,
        ctx: &SeedContext,
    ) -> Result<Vec<Vec<u8>>, DeriveError> {
        scheme
            .rules
            .iter()
            .map(|rule| match rule {
                SeedRule::Const(bytes) => Ok(bytes.clone()),
                SeedRule::ProgramId => Ok(self.program_id.to_bytes().to_vec()),
                SeedRule::Account(path) => ctx
                    .account(path)
                    .map(|pk| pk.to_bytes().to_vec())
                    .ok_or_else(|| DeriveError::UnresolvedAccount(path.clone())),
                SeedRule::Arg(path) => ctx
                    .arg(path)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| DeriveError::UnresolvedArg(path.clone())),
                SeedRule::Unsupported(kind) => Err(DeriveError::UnsupportedSeed(kind.clone())),
            })
            .collect()
    }

    /// Derive one scheme. Resolution errors surface before any hashing.
    pub fn derive_scheme(
        &self,
        scheme: &SeedScheme,
        ctx: &SeedContext,
    ) -> Result<DerivedAddress, DeriveError> {
        let seeds = self.resolve_seeds(scheme, ctx)?;
        let refs: Vec<&[u8]> = seeds.iter().map(Vec::as_slice).collect();
        let program_id = scheme.program.unwrap_or(self.program_id);
        derive_with(&program_id, &refs, &scheme.name)
    }

    /// Derive all schemes side by side; one failing scheme does not hide the
    /// others. A scheme landing on an address already produced by an earlier
    /// scheme is dropped, so each address appears once.
    pub fn derive_candidates(&self, schemes: &[SeedScheme], ctx: &SeedContext) -> Vec<Candidate> {
        let mut seen: Vec<Pubkey> = Vec::with_capacity(schemes.len());
        schemes
            .iter()
            .filter_map(|scheme| {
                let result = self.derive_scheme(scheme, ctx);
                if let Ok(derived) = &result {
                    if seen.contains(&derived.address) {
                        debug!(scheme = %scheme.name, address = %derived.address, "Candidate duplicates an earlier scheme");
                        return None;
                    }
                    seen.push(derived.address);
                    debug!(scheme = %scheme.name, address = %derived.address, bump = derived.bump, "Derived candidate");
                }
                Some(Candidate {
                    scheme: scheme.name.clone(),
                    source: scheme.source,
                    result,
                })
            })
            .collect()
    }
}

fn derive_with(
    program_id: &Pubkey,
    seeds: &[&[u8]],
    scheme: &str,
) -> Result<DerivedAddress, DeriveError> {
    if seeds.len() > MAX_USER_SEEDS {
        return Err(DeriveError::TooManySeeds(seeds.len()));
    }
    if let Some((index, seed)) = seeds
        .iter()
        .enumerate()
        .find(|(_, s)| s.len() > MAX_SEED_LEN)
    {
        return Err(DeriveError::SeedTooLong {
            index,
            len: seed.len(),
        });
    }

    Pubkey::try_find_program_address(seeds, program_id)
        .map(|(address, bump)| DerivedAddress { address, bump })
        .ok_or_else(|| DeriveError::NoViableBump(scheme.to_string()))
}

/// Which candidate, if any, produced the address the program expected
pub fn identify<'a>(expected: &Pubkey, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
    candidates
        .iter()
        .find(|c| c.address().as_ref() == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deriver() -> AddressDeriver {
        AddressDeriver::new(Pubkey::new_unique())
    }

    #[test]
    fn test_derive_matches_find_program_address() {
        let d = deriver();
        let derived = d.derive(&[b"perpetuals"]).unwrap();
        let (expected, bump) = Pubkey::find_program_address(&[b"perpetuals"], d.program_id());
        assert_eq!(derived.address, expected);
        assert_eq!(derived.bump, bump);
        assert!(!derived.address.is_on_curve());
    }

    #[test]
    fn test_unresolved_account_is_configuration_error() {
        let d = deriver();
        let scheme = SeedScheme::fallback(
            "position",
            vec![SeedRule::literal("position"), SeedRule::account("owner")],
        );
        let err = d.derive_scheme(&scheme, &SeedContext::new()).unwrap_err();
        assert_eq!(err, DeriveError::UnresolvedAccount("owner".to_string()));
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_unsupported_kind_fails_before_later_rules() {
        let d = deriver();
        let scheme = SeedScheme::fallback(
            "weird",
            vec![
                SeedRule::Unsupported("sysvar".to_string()),
                SeedRule::account("missing"),
            ],
        );
        let err = d.derive_scheme(&scheme, &SeedContext::new()).unwrap_err();
        assert_eq!(err, DeriveError::UnsupportedSeed("sysvar".to_string()));
    }

    #[test]
    fn test_seed_limits() {
        let d = deriver();
        let long = [0u8; 33];
        assert!(matches!(
            d.derive(&[&long]),
            Err(DeriveError::SeedTooLong { index: 0, len: 33 })
        ));

        let many: Vec<&[u8]> = (0..16).map(|_| &b"x"[..]).collect();
        assert_eq!(d.derive(&many), Err(DeriveError::TooManySeeds(16)));
    }

    #[test]
    fn test_program_id_seed_and_override() {
        let d = deriver();
        let other = Pubkey::new_unique();
        let mut scheme = SeedScheme::fallback("self", vec![SeedRule::ProgramId]);

        let under_target = d.derive_scheme(&scheme, &SeedContext::new()).unwrap();
        let seed = d.program_id().to_bytes();
        assert_eq!(under_target, d.derive(&[&seed]).unwrap());

        scheme.program = Some(other);
        let under_other = d.derive_scheme(&scheme, &SeedContext::new()).unwrap();
        assert_ne!(under_target.address, under_other.address);
    }

    #[test]
    fn test_candidates_tracked_side_by_side() {
        let d = deriver();
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let ctx = SeedContext::new().with_account("a", a).with_account("b", b);

        let schemes = vec![
            SeedScheme::fallback("ab", vec![SeedRule::account("a"), SeedRule::account("b")]),
            SeedScheme::fallback("ba", vec![SeedRule::account("b"), SeedRule::account("a")]),
            SeedScheme::fallback("broken", vec![SeedRule::account("c")]),
        ];
        let candidates = d.derive_candidates(&schemes, &ctx);

        assert_eq!(candidates.len(), 3);
        assert_ne!(candidates[0].address(), candidates[1].address());
        assert!(candidates[2].result.is_err());

        let expected = candidates[1].address().unwrap();
        assert_eq!(identify(&expected, &candidates).unwrap().scheme, "ba");
        assert!(identify(&Pubkey::new_unique(), &candidates).is_none());
    }

    #[test]
    fn test_equivalent_schemes_collapse_to_first() {
        let d = deriver();
        let a = Pubkey::new_unique();
        let ctx = SeedContext::new()
            .with_account("a", a)
            .with_account("alias", a)
            .with_account("b", Pubkey::new_unique());

        let schemes = vec![
            SeedScheme::fallback("primary", vec![SeedRule::account("a")]),
            SeedScheme::fallback("spelled_differently", vec![SeedRule::account("alias")]),
            SeedScheme::fallback("other", vec![SeedRule::account("b")]),
        ];
        let candidates = d.derive_candidates(&schemes, &ctx);

        let names: Vec<&str> = candidates.iter().map(|c| c.scheme.as_str()).collect();
        assert_eq!(names, vec!["primary", "other"]);
        let expected = d.derive(&[a.as_ref()]).unwrap().address;
        assert_eq!(identify(&expected, &candidates).unwrap().scheme, "primary");
    }
}
