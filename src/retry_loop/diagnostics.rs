//! Program log diagnostics
//!
//! Recognized failure signatures are data: each entry names the markers
//! that identify it and the single corrective action it permits. Parsing is
//! pure; nothing here touches the network.

use once_cell::sync::Lazy;
use regex::Regex;
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

static CAUSED_BY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"caused by account:\s*([A-Za-z0-9_]+)").expect("valid regex"));
static ERROR_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Error Code:\s*([A-Za-z0-9_]+)").expect("valid regex"));
static ERROR_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Error Number:\s*(\d+)").expect("valid regex"));
static ERROR_MESSAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Error Message:\s*(.+?)\.?\s*$").expect("valid regex"));
static CUSTOM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Custom\((\d+)\)").expect("valid regex"));
static PUBKEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[1-9A-HJ-NP-Za-km-z]{32,44}").expect("valid regex"));
static UNKNOWN_ACCOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Instruction references an unknown account\s+([1-9A-HJ-NP-Za-km-z]{32,44})")
        .expect("valid regex")
});

// Lines scanned after an AnchorError header for its Left:/Right: values
const BLOCK_WINDOW: usize = 16;

/// Closed set of recognized program failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureKind {
    /// A PDA's seeds do not match what the program derived
    SeedMismatch,
    /// custody / collateralCustody supplied in the wrong roles
    CustodyOrdering,
    /// An account the program needs is not in the instruction
    UnknownAccount,
    /// Signer or writable privileges do not match the program's expectations
    PrivilegeMismatch,
}

impl fmt::Display for SignatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignatureKind::SeedMismatch => "seed_mismatch",
            SignatureKind::CustodyOrdering => "custody_ordering",
            SignatureKind::UnknownAccount => "unknown_account",
            SignatureKind::PrivilegeMismatch => "privilege_mismatch",
        })
    }
}

/// What the retry loop may do about a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectiveAction {
    /// Exchange custody and collateralCustody, re-derive, try once more
    SwapCustodyRoles,
    /// Stop and report
    Halt,
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticSignature {
    pub kind: SignatureKind,
    /// Any one of these substrings identifies the signature
    pub markers: &'static [&'static str],
    pub action: CorrectiveAction,
}

/// Checked in order; the first match wins
pub const SIGNATURE_TABLE: &[DiagnosticSignature] = &[
    DiagnosticSignature {
        kind: SignatureKind::SeedMismatch,
        markers: &["Error Code: ConstraintSeeds", "Error Number: 2006", "Custom(2006)"],
        action: CorrectiveAction::Halt,
    },
    DiagnosticSignature {
        kind: SignatureKind::CustodyOrdering,
        markers: &[
            "InvalidCollateralAccount",
            "Invalid collateral account",
            "Error Number: 6006",
            "Custom(6006)",
        ],
        action: CorrectiveAction::SwapCustodyRoles,
    },
    DiagnosticSignature {
        kind: SignatureKind::UnknownAccount,
        markers: &["Instruction references an unknown account"],
        action: CorrectiveAction::Halt,
    },
    DiagnosticSignature {
        kind: SignatureKind::PrivilegeMismatch,
        markers: &[
            "writable privilege escalated",
            "signer privilege escalated",
            "Cross-program invocation with unauthorized signer or writable account",
        ],
        action: CorrectiveAction::Halt,
    },
];

/// Everything extracted from one failed simulation or preflight
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgramDiagnostics {
    pub kind: Option<SignatureKind>,
    pub error_code: Option<String>,
    pub error_number: Option<u32>,
    pub error_message: Option<String>,
    /// Account named by `AnchorError caused by account: X`
    pub account: Option<String>,
    pub left: Option<Pubkey>,
    /// For seed mismatches, the address the program expected
    pub right: Option<Pubkey>,
    pub unknown_account: Option<Pubkey>,
    /// Top-level transaction error, if the RPC reported one
    pub error: Option<String>,
    pub logs: Vec<String>,
}

impl ProgramDiagnostics {
    pub fn parse(logs: &[String], error: Option<&str>) -> Self {
        let mut diag = ProgramDiagnostics {
            logs: logs.to_vec(),
            error: error.map(str::to_string),
            ..Default::default()
        };

        let signature = classify(logs, error);
        diag.kind = signature.map(|s| s.kind);

        for line in logs {
            if diag.error_code.is_none() {
                diag.error_code = capture(&ERROR_CODE_RE, line);
            }
            if diag.error_number.is_none() {
                diag.error_number = capture(&ERROR_NUMBER_RE, line).and_then(|n| n.parse().ok());
            }
            if diag.error_message.is_none() {
                diag.error_message = capture(&ERROR_MESSAGE_RE, line);
            }
            if diag.unknown_account.is_none() {
                diag.unknown_account =
                    capture(&UNKNOWN_ACCOUNT_RE, line).and_then(|s| Pubkey::from_str(&s).ok());
            }
        }
        if diag.error_number.is_none() {
            diag.error_number = error
                .and_then(|e| capture(&CUSTOM_RE, e))
                .and_then(|n| n.parse().ok());
        }

        match diag.kind {
            Some(SignatureKind::SeedMismatch) => {
                if let Some((account, right)) = seed_mismatch_block(logs) {
                    diag.account = Some(account);
                    diag.right = right;
                }
            }
            Some(SignatureKind::CustodyOrdering) => {
                let start = logs
                    .iter()
                    .position(|l| l.contains("InvalidCollateralAccount") || l.contains("6006"))
                    .unwrap_or(0);
                diag.left = labelled_pubkey(&logs[start..], "Left:");
                diag.right = labelled_pubkey(&logs[start..], "Right:");
                diag.account = logs.iter().find_map(|l| capture(&CAUSED_BY_RE, l));
            }
            _ => {
                diag.account = logs.iter().find_map(|l| capture(&CAUSED_BY_RE, l));
            }
        }
        diag
    }

    /// Permitted action; unrecognized failures halt
    pub fn action(&self) -> CorrectiveAction {
        self.kind
            .and_then(|kind| SIGNATURE_TABLE.iter().find(|s| s.kind == kind))
            .map(|s| s.action)
            .unwrap_or(CorrectiveAction::Halt)
    }

    /// One-line description for logs and error messages
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(kind) = self.kind {
            parts.push(kind.to_string());
        }
        if let Some(code) = &self.error_code {
            parts.push(format!("code={}", code));
        }
        if let Some(number) = self.error_number {
            parts.push(format!("number={}", number));
        }
        if let Some(account) = &self.account {
            parts.push(format!("account={}", account));
        }
        if let Some(message) = &self.error_message {
            parts.push(format!("message=\"{}\"", message));
        }
        if parts.is_empty() {
            match &self.error {
                Some(error) => parts.push(error.clone()),
                None => parts.push("unrecognized program failure".to_string()),
            }
        }
        parts.join(" ")
    }
}

impl fmt::Display for ProgramDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

fn classify(logs: &[String], error: Option<&str>) -> Option<&'static DiagnosticSignature> {
    SIGNATURE_TABLE.iter().find(|sig| {
        sig.markers.iter().any(|marker| {
            logs.iter().any(|line| line.contains(marker))
                || error.map(|e| e.contains(marker)).unwrap_or(false)
        })
    })
}

fn capture(re: &Regex, line: &str) -> Option<String> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn strip_log_prefix(line: &str) -> &str {
    let text = line.trim();
    text.strip_prefix("Program log:").map(str::trim).unwrap_or(text)
}

/// Pubkey after `label`, on the same line or the next one
fn labelled_pubkey(lines: &[String], label: &str) -> Option<Pubkey> {
    let idx = lines
        .iter()
        .take(BLOCK_WINDOW)
        .position(|l| strip_log_prefix(l).starts_with(label))?;
    let same_line = strip_log_prefix(&lines[idx])
        .strip_prefix(label)
        .unwrap_or_default();
    PUBKEY_RE
        .find(same_line)
        .or_else(|| lines.get(idx + 1).and_then(|next| PUBKEY_RE.find(strip_log_prefix(next))))
        .and_then(|m| Pubkey::from_str(m.as_str()).ok())
}

/// `(account, expected address)` from the ConstraintSeeds block
fn seed_mismatch_block(logs: &[String]) -> Option<(String, Option<Pubkey>)> {
    logs.iter().enumerate().find_map(|(i, line)| {
        if !line.contains("AnchorError") {
            return None;
        }
        let account = capture(&CAUSED_BY_RE, line)?;
        Some((account, labelled_pubkey(&logs[i..], "Right:")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    const GIVEN: &str = "7xS2gz2bTp3fwCC7knJvUWTEU9Tycczu6VhJYKgi1wdz";
    const EXPECTED: &str = "G18jKKXQwBbrHeiK3C9MRXhkHsLHf7XgCSisykV46EZa";

    #[test]
    fn test_seed_mismatch_next_line_right() {
        let diag = ProgramDiagnostics::parse(
            &logs(&[
                "Program PERPHjGBqRHArX4DySjwM6UJHiR3sWAatqfdBS2qQJu invoke [1]",
                "Program log: AnchorError caused by account: position_request. Error Code: ConstraintSeeds. Error Number: 2006. Error Message: A seeds constraint was violated.",
                "Program log: Left:",
                &format!("Program log: {}", GIVEN),
                "Program log: Right:",
                &format!("Program log: {}", EXPECTED),
            ]),
            None,
        );
        assert_eq!(diag.kind, Some(SignatureKind::SeedMismatch));
        assert_eq!(diag.account.as_deref(), Some("position_request"));
        assert_eq!(diag.right, Some(EXPECTED.parse().unwrap()));
        assert_eq!(diag.error_code.as_deref(), Some("ConstraintSeeds"));
        assert_eq!(diag.error_number, Some(2006));
        assert_eq!(diag.error_message.as_deref(), Some("A seeds constraint was violated"));
        assert_eq!(diag.action(), CorrectiveAction::Halt);
    }

    #[test]
    fn test_seed_mismatch_same_line_right() {
        let diag = ProgramDiagnostics::parse(
            &logs(&[
                "Program log: AnchorError caused by account: position. Error Code: ConstraintSeeds. Error Number: 2006.",
                &format!("Program log: Left: {}", GIVEN),
                &format!("Program log: Right: {}", EXPECTED),
            ]),
            None,
        );
        assert_eq!(diag.account.as_deref(), Some("position"));
        assert_eq!(diag.right, Some(EXPECTED.parse().unwrap()));
    }

    #[test]
    fn test_custody_ordering_left_right() {
        let diag = ProgramDiagnostics::parse(
            &logs(&[
                "Program log: AnchorError occurred. Error Code: InvalidCollateralAccount. Error Number: 6006. Error Message: Invalid collateral account.",
                "Program log: Left:",
                &format!("Program log: {}", GIVEN),
                "Program log: Right:",
                &format!("Program log: {}", EXPECTED),
            ]),
            Some("InstructionError(3, Custom(6006))"),
        );
        assert_eq!(diag.kind, Some(SignatureKind::CustodyOrdering));
        assert_eq!(diag.left, Some(GIVEN.parse().unwrap()));
        assert_eq!(diag.right, Some(EXPECTED.parse().unwrap()));
        assert_eq!(diag.error_number, Some(6006));
        assert_eq!(diag.action(), CorrectiveAction::SwapCustodyRoles);
    }

    #[test]
    fn test_custody_ordering_from_error_only() {
        let diag = ProgramDiagnostics::parse(&[], Some("InstructionError(3, Custom(6006))"));
        assert_eq!(diag.kind, Some(SignatureKind::CustodyOrdering));
        assert_eq!(diag.error_number, Some(6006));
    }

    #[test]
    fn test_unknown_account() {
        let diag = ProgramDiagnostics::parse(
            &logs(&[&format!("Instruction references an unknown account {}", GIVEN)]),
            None,
        );
        assert_eq!(diag.kind, Some(SignatureKind::UnknownAccount));
        assert_eq!(diag.unknown_account, Some(GIVEN.parse().unwrap()));
        assert_eq!(diag.action(), CorrectiveAction::Halt);
    }

    #[test]
    fn test_unrecognized_failure_halts() {
        let diag = ProgramDiagnostics::parse(
            &logs(&[
                "Program log: AnchorError occurred. Error Code: MaxPriceSlippage. Error Number: 6003. Error Message: Price slippage limit exceeded.",
            ]),
            None,
        );
        assert_eq!(diag.kind, None);
        assert_eq!(diag.action(), CorrectiveAction::Halt);
        assert_eq!(
            diag.summary(),
            "code=MaxPriceSlippage number=6003 message=\"Price slippage limit exceeded\""
        );
    }
}
