//! Correlation and trace identifiers for one order submission

use uuid::Uuid;

/// Ties together every log line of one submission
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub correlation_id: CorrelationId,
    pub operation: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl TraceContext {
    pub fn new(operation: &str) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            correlation_id: CorrelationId::new(),
            operation: operation.to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Milliseconds since the context was opened
    pub fn elapsed_ms(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_milliseconds()
    }

    /// Tracing span carrying the identifiers as fields
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "submission",
            operation = %self.operation,
            correlation_id = %self.correlation_id,
            trace_id = %self.trace_id,
        )
    }
}
