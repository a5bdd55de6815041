//! Signing capability
//!
//! The engine only ever sees a `TransactionSigner`; key material stays
//! behind the trait.

use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Failed to read keypair file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Invalid keypair: {0}")]
    Invalid(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Opaque signing capability for the fee payer / position owner
pub trait TransactionSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    fn sign_message(&self, message: &[u8]) -> Result<Signature, WalletError>;
}

/// Local keypair signer
#[derive(Clone)]
pub struct KeypairSigner {
    keypair: Arc<Keypair>,
}

impl std::fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("pubkey", &self.keypair.pubkey())
            .finish()
    }
}

impl KeypairSigner {
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Load a keypair from a JSON byte array (solana-keygen format) or 64 raw bytes
    pub fn from_file(path: &str) -> Result<Self, WalletError> {
        let expanded = expand_home(path);
        let raw = std::fs::read(&expanded).map_err(|e| WalletError::Read {
            path: expanded.clone(),
            reason: e.to_string(),
        })?;
        Self::from_bytes_or_json(&raw)
    }

    pub fn from_bytes_or_json(raw: &[u8]) -> Result<Self, WalletError> {
        let bytes: Vec<u8> = if raw.len() == 64 {
            raw.to_vec()
        } else {
            serde_json::from_slice(raw)
                .map_err(|e| WalletError::Invalid(format!("not a JSON byte array: {}", e)))?
        };
        if bytes.len() != 64 {
            return Err(WalletError::Invalid(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        if bytes.iter().all(|&b| b == 0) {
            return Err(WalletError::Invalid("all-zero key rejected".to_string()));
        }
        let keypair = Keypair::try_from(bytes.as_slice())
            .map_err(|e| WalletError::Invalid(e.to_string()))?;
        Ok(Self::from_keypair(keypair))
    }
}

impl TransactionSigner for KeypairSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn sign_message(&self, message: &[u8]) -> Result<Signature, WalletError> {
        self.keypair
            .try_sign_message(message)
            .map_err(|e| WalletError::Signing(e.to_string()))
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home, rest),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sign_verifies() {
        let signer = KeypairSigner::from_keypair(Keypair::new());
        let sig = signer.sign_message(b"hello").unwrap();
        assert!(sig.verify(signer.pubkey().as_ref(), b"hello"));
    }

    #[test]
    fn test_load_json_keypair() {
        let keypair = Keypair::new();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let signer = KeypairSigner::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(signer.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_rejects_bad_material() {
        assert!(matches!(
            KeypairSigner::from_bytes_or_json(&[0u8; 64]),
            Err(WalletError::Invalid(_))
        ));
        assert!(KeypairSigner::from_bytes_or_json(b"[1,2,3]").is_err());
        assert!(matches!(
            KeypairSigner::from_file("/nonexistent/id.json"),
            Err(WalletError::Read { .. })
        ));
    }
}
