use std::time::Duration;

/// Consistency level requested from the gateway, sent as
/// `x-ms-consistency-level` on every request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    #[default]
    Session,
    Eventual,
    ConsistentPrefix,
}

impl ConsistencyLevel {
    pub fn as_header_value(self) -> &'static str {
        match self {
            ConsistencyLevel::Strong => "Strong",
            ConsistencyLevel::BoundedStaleness => "BoundedStaleness",
            ConsistencyLevel::Session => "Session",
            ConsistencyLevel::Eventual => "Eventual",
            ConsistencyLevel::ConsistentPrefix => "ConsistentPrefix",
        }
    }
}

/// Retry policy for throttled (429) and transiently unavailable (503/408)
/// gateway responses: at most `max_attempts` retries, and never more than
/// `max_wait` of cumulative retry sleep per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlingRetryOptions {
    pub max_attempts: usize,
    pub max_wait: Duration,
}

impl Default for ThrottlingRetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 9,
            max_wait: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionMode {
    /// all traffic through the gateway endpoint (the only mode the
    /// interception harness can sit in front of)
    #[default]
    Gateway,
    /// direct per-replica connections; rejected at build time
    Direct,
}

/// Per-query knobs. Accepted as configuration surface; gateway mode executes
/// pages serially regardless of the requested parallelism.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    pub max_degree_of_parallelism: u32,
}
