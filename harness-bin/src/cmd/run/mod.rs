use std::{path::PathBuf, time::Duration};

use rama::{
    error::{ErrorContext as _, OpaqueError},
    graceful::{self, ShutdownGuard},
    http::Uri,
    net::socket::Interface,
    telemetry::tracing,
};

use clap::Args;
use tokio::time::Instant;

use latency_harness_lib::{
    client::{
        ConsistencyLevel, GatewayClient, GatewayDatabase, QueryOptions, QuerySpec,
    },
    delay::ResponseDelay,
    proxy::{ProxyConfig, run_intercept_proxy},
    scenario::{OperationKind, ScenarioReport, classify},
};

use crate::{
    config::{RunOverrides, ScenarioConfig, ScenarioPreset, merge},
    mock::{self, MockGatewayConfig, run_mock_gateway},
};

pub mod reporter;

use self::reporter::{HumanReporter, JsonlReporter, Reporter};

#[derive(Debug, Clone, Args)]
/// run the scenario suite: proxy + client per scenario, one operation each
pub struct RunCommand {
    /// origin of a real backend; when omitted a mock gateway
    /// is started in-process per scenario
    #[arg(long, value_name = "ORIGIN")]
    pub backend: Option<Uri>,

    #[arg(long)]
    /// Scenario preset to run,
    /// manually defined parameters overwrite preset parameters.
    pub scenario: Option<ScenarioPreset>,

    #[clap(flatten)]
    pub overrides: RunOverrides,

    /// exercise the mock gateway's throttling path
    /// (429 every n-th document request)
    #[arg(long, value_name = "N")]
    pub throttle_every: Option<u32>,

    /// master key credential handed to the client
    #[arg(long, default_value = "test-master-key")]
    pub master_key: String,

    /// report JSONL instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub async fn exec(data: PathBuf, guard: ShutdownGuard, args: RunCommand) -> Result<(), OpaqueError> {
    tokio::fs::create_dir_all(&data)
        .await
        .with_context(|| format!("create data directory at path '{}'", data.display()))?;

    let preset = args.scenario.unwrap_or_default();
    let cfg = merge(preset.config(), &args.overrides);
    tracing::info!(
        scenario = ?preset,
        delay = ?cfg.delay,
        budget = ?cfg.budget,
        retry = ?cfg.retry,
        ceiling = ?cfg.ceiling,
        "scenario configuration ready",
    );

    let mut reporter: Box<dyn Reporter> = if args.json {
        Box::new(JsonlReporter::new())
    } else {
        Box::new(HumanReporter::new())
    };

    let suite_started = Instant::now();
    for operation in OperationKind::ALL {
        let cancel_guard = guard.clone();
        let report = tokio::select! {
            report = run_scenario(ScenarioParams {
                operation,
                cfg: &cfg,
                backend: args.backend.clone(),
                throttle_every: args.throttle_every,
                master_key: &args.master_key,
            }) => report?,
            _ = cancel_guard.cancelled() => {
                tracing::warn!("shutdown initiated, abandoning remaining scenarios");
                break;
            }
        };
        reporter.on_scenario(&report);
    }
    reporter.finish(suite_started.elapsed());

    Ok(())
}

pub(crate) struct ScenarioParams<'a> {
    pub operation: OperationKind,
    pub cfg: &'a ScenarioConfig,
    /// `None` starts a scenario-scoped mock gateway
    pub backend: Option<Uri>,
    pub throttle_every: Option<u32>,
    pub master_key: &'a str,
}

/// One full scenario: fresh proxy (and mock backend), fresh client, one
/// operation under the external ceiling, then teardown of everything,
/// guaranteed before this function returns, whatever the outcome.
pub(crate) async fn run_scenario(
    params: ScenarioParams<'_>,
) -> Result<ScenarioReport, OpaqueError> {
    let ScenarioParams {
        operation,
        cfg,
        backend,
        throttle_every,
        master_key,
    } = params;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown = graceful::Shutdown::new(async move {
        let _ = stop_rx.await;
    });

    let delay = ResponseDelay::default();

    let scenario = drive_scenario(
        &shutdown,
        &delay,
        operation,
        cfg,
        backend,
        throttle_every,
        master_key,
    )
    .await;

    // teardown before reporting, on every exit path, so the next scenario
    // always starts clean
    let _ = stop_tx.send(());
    if let Err(err) = shutdown.shutdown_with_limit(Duration::from_secs(5)).await {
        tracing::warn!(%operation, "scenario teardown did not complete cleanly: {err}");
    }

    let (elapsed, result) = scenario?;
    let outcome = classify(elapsed, cfg.budget, result);
    Ok(ScenarioReport {
        operation,
        delay: cfg.delay,
        elapsed,
        outcome,
    })
}

/// Wire up backend + proxy + client inside the given graceful scope and
/// drive the operation under the external ceiling.
///
/// `Ok((elapsed, None))` means the ceiling cut the operation off.
async fn drive_scenario(
    shutdown: &graceful::Shutdown,
    delay: &ResponseDelay,
    operation: OperationKind,
    cfg: &ScenarioConfig,
    backend: Option<Uri>,
    throttle_every: Option<u32>,
    master_key: &str,
) -> Result<(Duration, Option<Result<(), String>>), OpaqueError> {
    let (backend_origin, insecure_upstream) = match backend {
        Some(origin) => (origin, false),
        None => {
            let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
            shutdown.spawn_task_fn(async move |guard| {
                let bind = match loopback_interface() {
                    Ok(bind) => bind,
                    Err(err) => {
                        tracing::error!("mock gateway bind interface: {err}");
                        return;
                    }
                };
                let cfg = MockGatewayConfig { throttle_every };
                if let Err(err) = run_mock_gateway(bind, cfg, guard, ready_tx).await {
                    tracing::error!("mock gateway exited with an error: {err}");
                }
            });
            let handle = await_ready(ready_rx, "mock gateway").await?;
            (handle.base_url, true)
        }
    };

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    shutdown.spawn_task_fn({
        let delay = delay.clone();
        let backend = backend_origin.clone();
        async move |guard| {
            let bind = match loopback_interface() {
                Ok(bind) => bind,
                Err(err) => {
                    tracing::error!("interception proxy bind interface: {err}");
                    return;
                }
            };
            let proxy_cfg = ProxyConfig {
                bind,
                backend,
                insecure_upstream,
            };
            if let Err(err) = run_intercept_proxy(proxy_cfg, guard, delay, ready_tx).await {
                tracing::error!("interception proxy exited with an error: {err}");
            }
        }
    });
    let proxy = await_ready(ready_rx, "interception proxy").await?;

    let mut builder = GatewayClient::builder()
        .endpoint(proxy.base_url.clone())
        .master_key(master_key)
        .consistency_level(ConsistencyLevel::Session)
        .throttling_retry_options(cfg.retry)
        .content_response_on_write(false)
        .trusted_ca(proxy.root_ca.clone());
    if let Some(budget) = cfg.budget {
        builder = builder.end_to_end_latency_budget(budget);
    }
    let client = builder.build().map_err(OpaqueError::from_boxed)?;

    // everything is wired up; from here on responses stall
    delay.set(cfg.delay);

    let database = client.database(mock::DATABASE);
    tracing::info!(%operation, "driving scenario operation");
    let started = Instant::now();
    let result = tokio::time::timeout(cfg.ceiling, drive_operation(&database, operation)).await;
    Ok((started.elapsed(), result.ok()))
}

async fn drive_operation(
    database: &GatewayDatabase,
    operation: OperationKind,
) -> Result<(), String> {
    let result = match operation {
        OperationKind::DatabaseRead => database.read().await.map(drop),
        OperationKind::ListCollections => database.read_all_containers().await.map(drop),
        OperationKind::QueryById => {
            let spec = QuerySpec::new("SELECT * FROM c WHERE c.id=@id")
                .with_parameter("@id", random_id());
            database
                .container(mock::CUSTOM_PK_COLLECTION)
                .query_items(
                    spec,
                    QueryOptions {
                        max_degree_of_parallelism: 16,
                    },
                )
                .await
                .map(drop)
        }
        OperationKind::CountAll => database
            .container(mock::DEFAULT_COLLECTION)
            .count()
            .await
            .map(drop),
        OperationKind::ReadAll => database
            .container(mock::DEFAULT_COLLECTION)
            .query_items(
                QuerySpec::new("SELECT * FROM c"),
                QueryOptions {
                    max_degree_of_parallelism: 16,
                },
            )
            .await
            .map(drop),
        OperationKind::BulkUpsert => {
            let id = random_id();
            database
                .container(mock::DEFAULT_COLLECTION)
                .upsert_items(vec![serde_json::json!({ "id": id })])
                .await
                .map(drop)
        }
    };
    result.map_err(|err| err.to_string())
}

fn random_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

fn loopback_interface() -> Result<Interface, OpaqueError> {
    "127.0.0.1:0"
        .parse()
        .map_err(|err| OpaqueError::from_display(format!("parse loopback interface: {err}")))
}

async fn await_ready<T>(
    rx: tokio::sync::oneshot::Receiver<T>,
    what: &str,
) -> Result<T, OpaqueError> {
    tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .map_err(|_| OpaqueError::from_display(format!("timed out waiting for {what} to start")))?
        .map_err(|_| {
            OpaqueError::from_display(format!("{what} terminated before it became ready"))
        })
}
