//! Endpoint pool
//!
//! Retry, backoff and rotation across a ranked set of Solana RPC endpoints,
//! with atomic per-endpoint health bookkeeping.

pub mod client;
pub mod rpc_atomics;
pub mod rpc_config;
pub mod rpc_errors;
pub mod rpc_pool;

// Re-exports for convenience
pub use client::{ChainRpc, SignatureOutcome, SimulationReport, SolanaRpc};
pub use rpc_config::{redact_url, RpcConfig};
pub use rpc_errors::{FailureClass, RetryPolicy, RpcManagerError};
pub use rpc_pool::{EndpointHealth, EndpointPool, HealthStatus};
