use once_cell::sync::Lazy;
use regex::Regex;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_rpc_client_api::request::{RpcError, RpcResponseErrorData};
use std::time::Duration;
use thiserror::Error;

/// HTTP 429 and the JSON-RPC code some providers use for quota exhaustion
const THROTTLE_CODES: [i64; 2] = [429, -32429];

/// A numeric code introduced by `code`, `status` or `HTTP`
static CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:code|status(?:\s+code)?|http(?:/[0-9.]+)?)\s*[:=]?\s*(-?\d+)\b")
        .expect("valid regex")
});

/// How the pool reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Rate limited: back off on the same endpoint, then rotate
    Throttled,
    /// Timeout, transport or 5xx: rotate immediately
    Unreachable,
    /// Program-level or malformed request: propagate without retry
    Fatal,
}

/// Endpoint pool error types
#[derive(Debug, Clone, Error)]
pub enum RpcManagerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Operation did not complete within the bounded wait
    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Rate limit exceeded
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    /// HTTP 5xx from the endpoint itself
    #[error("Server error {status} (endpoint: {endpoint})")]
    ServerError { endpoint: String, status: u16 },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// The program rejected the transaction during preflight; logs are kept
    #[error("Program rejected transaction: {message} (endpoint: {endpoint})")]
    Program {
        endpoint: String,
        message: String,
        logs: Vec<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Every endpoint used up its retry ceiling
    #[error("All {endpoints} endpoints exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        endpoints: usize,
        attempts: u32,
        last_error: Box<RpcManagerError>,
    },
}

impl RpcManagerError {
    /// Classify the failure for rotation purposes
    pub fn class(&self) -> FailureClass {
        match self {
            RpcManagerError::RateLimitExceeded { .. } => FailureClass::Throttled,
            RpcManagerError::Transport { .. }
            | RpcManagerError::Timeout { .. }
            | RpcManagerError::ServerError { .. } => FailureClass::Unreachable,
            RpcManagerError::RpcResponse { .. }
            | RpcManagerError::Program { .. }
            | RpcManagerError::Configuration(_)
            | RpcManagerError::Exhausted { .. } => FailureClass::Fatal,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.class() != FailureClass::Fatal
    }

    /// True when the pool gave up after trying every endpoint
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RpcManagerError::Exhausted { .. })
    }

    /// Get the endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RpcManagerError::Transport { endpoint, .. }
            | RpcManagerError::Timeout { endpoint, .. }
            | RpcManagerError::RateLimitExceeded { endpoint }
            | RpcManagerError::ServerError { endpoint, .. }
            | RpcManagerError::RpcResponse { endpoint, .. }
            | RpcManagerError::Program { endpoint, .. } => Some(endpoint),
            RpcManagerError::Configuration(_) | RpcManagerError::Exhausted { .. } => None,
        }
    }

    /// Program log lines captured with a preflight rejection
    pub fn program_logs(&self) -> Option<&[String]> {
        match self {
            RpcManagerError::Program { logs, .. } => Some(logs),
            _ => None,
        }
    }

    /// Create from ClientError with context
    pub fn from_client_error(err: &ClientError, endpoint: &str) -> Self {
        match err.kind() {
            ClientErrorKind::RpcError(RpcError::RpcResponseError {
                code,
                message,
                data,
                ..
            }) => {
                if let RpcResponseErrorData::SendTransactionPreflightFailure(sim) = data {
                    return RpcManagerError::Program {
                        endpoint: endpoint.to_string(),
                        message: message.clone(),
                        logs: sim.logs.clone().unwrap_or_default(),
                    };
                }
                if THROTTLE_CODES.contains(code) {
                    return RpcManagerError::RateLimitExceeded {
                        endpoint: endpoint.to_string(),
                    };
                }
                RpcManagerError::RpcResponse {
                    endpoint: endpoint.to_string(),
                    message: message.clone(),
                    code: Some(*code),
                }
            }
            ClientErrorKind::Reqwest(e) => {
                if let Some(status) = e.status() {
                    let status = status.as_u16();
                    if status == 429 {
                        return RpcManagerError::RateLimitExceeded {
                            endpoint: endpoint.to_string(),
                        };
                    }
                    if (500..600).contains(&status) {
                        return RpcManagerError::ServerError {
                            endpoint: endpoint.to_string(),
                            status,
                        };
                    }
                }
                if e.is_timeout() {
                    RpcManagerError::Timeout {
                        endpoint: endpoint.to_string(),
                        timeout_ms: 0,
                    }
                } else {
                    RpcManagerError::Transport {
                        endpoint: endpoint.to_string(),
                        message: e.to_string(),
                    }
                }
            }
            ClientErrorKind::Io(e) => RpcManagerError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            },
            _ => Self::from_message(&err.to_string(), endpoint),
        }
    }

    /// Classify a free-form error message
    pub fn from_message(message: &str, endpoint: &str) -> Self {
        let lower = message.to_lowercase();
        let endpoint = endpoint.to_string();
        let code = CODE_RE
            .captures(&lower)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok());

        if lower.contains("rate limit")
            || lower.contains("too many requests")
            || code.is_some_and(|c| THROTTLE_CODES.contains(&c))
        {
            RpcManagerError::RateLimitExceeded { endpoint }
        } else if lower.contains("timeout") || lower.contains("timed out") {
            RpcManagerError::Timeout {
                endpoint,
                timeout_ms: 0,
            }
        } else if let Some(status) = ["502", "503", "504"]
            .iter()
            .find(|code| lower.contains(*code))
            .and_then(|code| code.parse::<u16>().ok())
        {
            RpcManagerError::ServerError { endpoint, status }
        } else if lower.contains("connection")
            || lower.contains("error sending request")
            || lower.contains("dns")
        {
            RpcManagerError::Transport {
                endpoint,
                message: message.to_string(),
            }
        } else {
            RpcManagerError::RpcResponse {
                endpoint,
                message: message.to_string(),
                code,
            }
        }
    }
}

/// Retry policy for a single endpoint
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts allowed on one endpoint before rotating (the per-endpoint ceiling)
    pub max_attempts: u32,

    /// Base delay in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,

    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            jitter_factor: 0.2,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try on the same endpoint, given how many
    /// attempts were already made there. `None` once the ceiling is reached.
    pub fn calculate_delay(&self, attempts_made: u32) -> Option<Duration> {
        if attempts_made >= self.max_attempts {
            return None;
        }

        let exponent = attempts_made.saturating_sub(1) as i32;
        let delay_ms = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);

        // Add jitter to prevent thundering herd
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * self.jitter_factor;
        let jittered = (delay_ms * (1.0 + jitter)).clamp(0.0, self.max_delay_ms as f64) as u64;

        Some(Duration::from_millis(jittered))
    }

    /// Upper bound on attempts across `endpoints` endpoints
    pub fn attempt_budget(&self, endpoints: usize) -> u32 {
        self.max_attempts.saturating_mul(endpoints as u32)
    }
}
