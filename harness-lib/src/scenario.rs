use std::time::Duration;

/// Slack added on top of the configured budget before an operation counts as
/// having overrun it, absorbing scheduler jitter around the timeout itself.
const BUDGET_GRACE: Duration = Duration::from_millis(250);

/// The representative operations a scenario can drive: metadata reads,
/// queries, a point count and a bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// metadata read of the database resource
    DatabaseRead,
    /// list every collection of the database
    ListCollections,
    /// parameterized point query against the non-default partition-key collection
    QueryById,
    /// `SELECT VALUE COUNT(1)` over the default collection
    CountAll,
    /// unfiltered query, first pages drained via continuation
    ReadAll,
    /// bulk upsert into the default collection
    BulkUpsert,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::DatabaseRead,
        OperationKind::ListCollections,
        OperationKind::QueryById,
        OperationKind::CountAll,
        OperationKind::ReadAll,
        OperationKind::BulkUpsert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::DatabaseRead => "database_read",
            OperationKind::ListCollections => "list_collections",
            OperationKind::QueryById => "query_by_id",
            OperationKind::CountAll => "count_all",
            OperationKind::ReadAll => "read_all",
            OperationKind::BulkUpsert => "bulk_upsert",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal finding of one scenario.
///
/// Three user-visible findings are deliberately kept apart: a client bounded
/// by its own budget, a client that overran its budget but still terminated,
/// and a client that never terminated before the external ceiling. The last
/// one is the anomaly this harness exists to catch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome {
    Completed { within_budget: bool },
    ClientError { within_budget: bool, error: String },
    /// the external wall-clock ceiling elapsed first; the operation was
    /// abandoned mid-flight
    ObservedHang,
}

impl ScenarioOutcome {
    pub fn finding(&self) -> &'static str {
        match self {
            ScenarioOutcome::Completed {
                within_budget: true,
            } => "completed_within_budget",
            ScenarioOutcome::Completed {
                within_budget: false,
            } => "completed_over_budget",
            ScenarioOutcome::ClientError {
                within_budget: true,
                ..
            } => "failed_within_budget",
            ScenarioOutcome::ClientError {
                within_budget: false,
                ..
            } => "failed_over_budget",
            ScenarioOutcome::ObservedHang => "observed_hang",
        }
    }

    pub fn is_hang(&self) -> bool {
        matches!(self, ScenarioOutcome::ObservedHang)
    }
}

/// What one scenario run produced.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub operation: OperationKind,
    pub delay: Duration,
    pub elapsed: Duration,
    pub outcome: ScenarioOutcome,
}

/// Classify a finished (or abandoned) operation.
///
/// `result` is `None` when the external ceiling cut the operation off;
/// that is an observed hang regardless of anything else. Otherwise the
/// elapsed time is measured against the client's *own* budget (if any),
/// with a small grace so a budget-bounded failure that fires right at the
/// deadline still counts as within budget.
pub fn classify(
    elapsed: Duration,
    budget: Option<Duration>,
    result: Option<Result<(), String>>,
) -> ScenarioOutcome {
    let within_budget = match budget {
        Some(budget) => elapsed <= budget + BUDGET_GRACE,
        None => true,
    };
    match result {
        None => ScenarioOutcome::ObservedHang,
        Some(Ok(())) => ScenarioOutcome::Completed { within_budget },
        Some(Err(error)) => ScenarioOutcome::ClientError {
            within_budget,
            error,
        },
    }
}
