use std::time::Duration;

use latency_harness_lib::client::ThrottlingRetryOptions;

use super::ScenarioConfig;

/// High level reproduction scenarios.
/// Each scenario is a preset of injected delay and client policy.
#[derive(Debug, Clone, Copy, clap::ValueEnum, Default)]
pub enum ScenarioPreset {
    /// No injected delay.
    /// Validates the rig itself before anything interesting happens.
    #[default]
    Baseline,

    /// Two seconds of injected delay.
    /// The client's one-second budget is expected to cut operations short.
    ShortStall,

    /// Ten seconds of injected delay.
    /// Runaway-retry territory; the external ceiling is the safety net.
    LongStall,
}

impl ScenarioPreset {
    /// Construct the concrete scenario configuration
    /// associated with this preset.
    pub fn config(self) -> ScenarioConfig {
        let base = ScenarioConfig {
            delay: Duration::ZERO,
            budget: Some(Duration::from_secs(1)),
            retry: ThrottlingRetryOptions {
                max_attempts: 3,
                max_wait: Duration::from_secs(12),
            },
            ceiling: Duration::from_secs(60),
        };

        match self {
            ScenarioPreset::Baseline => base,
            ScenarioPreset::ShortStall => ScenarioConfig {
                delay: Duration::from_secs(2),
                ..base
            },
            ScenarioPreset::LongStall => ScenarioConfig {
                delay: Duration::from_secs(10),
                ..base
            },
        }
    }
}
