use std::time::Duration;

use latency_harness_lib::scenario::{ScenarioOutcome, ScenarioReport};

use super::{Counters, Reporter};

pub struct HumanReporter {
    counters: Counters,
}

impl HumanReporter {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
        }
    }
}

impl Reporter for HumanReporter {
    fn on_scenario(&mut self, report: &ScenarioReport) {
        self.counters.apply(report);

        let detail = match &report.outcome {
            ScenarioOutcome::ClientError { error, .. } => format!(" ({error})"),
            _ => String::new(),
        };
        println!(
            "{:<18} delay={:<8} elapsed={:>8.3}s finding={}{}",
            report.operation.to_string(),
            humantime::format_duration(report.delay).to_string(),
            report.elapsed.as_secs_f64(),
            report.outcome.finding(),
            detail,
        );
    }

    fn finish(&mut self, total_elapsed: Duration) {
        println!(
            "done scenarios={} observed_hangs={} over_budget={} total={:.3}s",
            self.counters.scenarios,
            self.counters.hangs,
            self.counters.over_budget,
            total_elapsed.as_secs_f64(),
        );
    }
}
