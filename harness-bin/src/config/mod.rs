use std::time::Duration;

use clap::Args;

use latency_harness_lib::client::ThrottlingRetryOptions;

mod scenario;

pub use self::scenario::ScenarioPreset;

/// Fully resolved parameters of one scenario run.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioConfig {
    /// artificial delay the proxy injects before every response
    pub delay: Duration,
    /// the client's own end-to-end latency budget; `None` = unbounded
    pub budget: Option<Duration>,
    /// the client's throttling retry policy
    pub retry: ThrottlingRetryOptions,
    /// external wall-clock ceiling, independent of the client's budget
    pub ceiling: Duration,
}

/// Manually defined parameters overwrite scenario parameters.
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct RunOverrides {
    /// artificial delay injected before every proxied response
    #[arg(long, value_parser = humantime::parse_duration)]
    pub delay: Option<Duration>,

    /// client-side end-to-end latency budget
    #[arg(long, value_parser = humantime::parse_duration)]
    pub budget: Option<Duration>,

    /// drop the end-to-end latency budget entirely
    #[arg(long, default_value_t = false)]
    pub unbounded: bool,

    /// maximum retry attempts on throttled requests
    #[arg(long)]
    pub max_retries: Option<usize>,

    /// maximum cumulative retry wait per operation
    #[arg(long, value_parser = humantime::parse_duration)]
    pub max_retry_wait: Option<Duration>,

    /// external wall-clock ceiling per scenario
    #[arg(long, value_parser = humantime::parse_duration)]
    pub ceiling: Option<Duration>,
}

pub fn merge(preset: ScenarioConfig, overrides: &RunOverrides) -> ScenarioConfig {
    let mut cfg = preset;
    if let Some(delay) = overrides.delay {
        cfg.delay = delay;
    }
    if overrides.unbounded {
        cfg.budget = None;
    } else if let Some(budget) = overrides.budget {
        cfg.budget = Some(budget);
    }
    if let Some(max_retries) = overrides.max_retries {
        cfg.retry.max_attempts = max_retries;
    }
    if let Some(max_retry_wait) = overrides.max_retry_wait {
        cfg.retry.max_wait = max_retry_wait;
    }
    if let Some(ceiling) = overrides.ceiling {
        cfg.ceiling = ceiling;
    }
    cfg
}
