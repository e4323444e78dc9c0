use std::time::Duration;

use latency_harness_lib::scenario::{ScenarioOutcome, ScenarioReport};

use super::{Counters, Reporter};

pub struct JsonlReporter {
    counters: Counters,
}

impl JsonlReporter {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
        }
    }
}

impl Reporter for JsonlReporter {
    fn on_scenario(&mut self, report: &ScenarioReport) {
        self.counters.apply(report);

        let line = serde_json::json!({
            "type": "scenario",
            "operation": report.operation.as_str(),
            "delay_ms": report.delay.as_millis() as u64,
            "elapsed_ms": report.elapsed.as_millis() as u64,
            "finding": report.outcome.finding(),
            "error": match &report.outcome {
                ScenarioOutcome::ClientError { error, .. } => Some(error.as_str()),
                _ => None,
            },
        });
        println!("{line}");
    }

    fn finish(&mut self, total_elapsed: Duration) {
        let line = serde_json::json!({
            "type": "summary",
            "scenarios": self.counters.scenarios,
            "observed_hangs": self.counters.hangs,
            "over_budget": self.counters.over_budget,
            "total_ms": total_elapsed.as_millis() as u64,
        });
        println!("{line}");
    }
}
