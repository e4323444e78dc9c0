use std::time::Duration;

use latency_harness_lib::scenario::ScenarioReport;

mod human;
mod json;

pub use self::{human::HumanReporter, json::JsonlReporter};

pub trait Reporter: Send + 'static {
    fn on_scenario(&mut self, report: &ScenarioReport);
    fn finish(&mut self, total_elapsed: Duration);
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    scenarios: usize,
    hangs: usize,
    over_budget: usize,
}

impl Counters {
    pub(super) fn apply(&mut self, report: &ScenarioReport) {
        self.scenarios += 1;
        if report.outcome.is_hang() {
            self.hangs += 1;
        }
        if matches!(
            report.outcome.finding(),
            "completed_over_budget" | "failed_over_budget"
        ) {
            self.over_budget += 1;
        }
    }
}
