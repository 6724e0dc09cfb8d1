use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::model::{BenchConfig, ScenarioKind};
use crate::engine::executor::TrialExecutor;
use crate::engine::RunEvent;
use crate::error::ProxyBenchError;
use crate::http::client::ProxyClient;
use crate::results::TrialRun;

/// Which clients a suite drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxySelection {
    /// One proxy, by its config key.
    Named(String),
    /// Every configured proxy, in key order.
    All,
    /// No proxy: a baseline against the target itself.
    Direct,
}

/// What to run for one [`run_suite`] call.
#[derive(Debug, Clone)]
pub struct SuiteRequest {
    /// Target name or URL. `None` uses the first configured target.
    pub target: Option<String>,
    pub proxies: ProxySelection,
    /// Only run scenarios of this kind.
    pub kind: Option<ScenarioKind>,
    pub count_override: Option<usize>,
    pub concurrency_override: Option<usize>,
    /// Pause after each scenario run.
    pub pause_between_runs: Duration,
    /// Pause before moving on to the next proxy.
    pub pause_between_proxies: Duration,
}

impl SuiteRequest {
    pub fn new(proxies: ProxySelection) -> Self {
        Self {
            target: None,
            proxies,
            kind: None,
            count_override: None,
            concurrency_override: None,
            pause_between_runs: Duration::from_secs(1),
            pause_between_proxies: Duration::from_secs(2),
        }
    }

    pub fn without_pauses(mut self) -> Self {
        self.pause_between_runs = Duration::ZERO;
        self.pause_between_proxies = Duration::ZERO;
        self
    }
}

/// Run every enabled scenario for each selected proxy against one target.
///
/// A proxy whose client cannot be built is skipped with a warning. When
/// `cancel` fires the current run finishes as `Cancelled`, is kept, and the
/// suite stops. Errors are only returned for an unresolvable target or an
/// unknown proxy name.
pub async fn run_suite(
    config: &BenchConfig,
    request: &SuiteRequest,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<RunEvent>>,
) -> Result<Vec<TrialRun>, ProxyBenchError> {
    let target_url = config.resolve_target(request.target.as_deref())?;
    let clients = build_clients(config, &request.proxies)?;
    let scenarios: Vec<_> = config
        .enabled_scenarios()
        .filter(|s| request.kind.map_or(true, |kind| s.kind == kind))
        .collect();

    tracing::info!(
        "Starting suite against {target_url}: {} client(s), {} scenario(s)",
        clients.len(),
        scenarios.len()
    );

    let mut runs = Vec::new();
    let client_count = clients.len();

    for (position, (label, built)) in clients.into_iter().enumerate() {
        let client = match built {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::warn!("Skipping proxy '{label}': failed to build client: {e}");
                continue;
            }
        };

        for scenario in &scenarios {
            let count = request.count_override.unwrap_or(scenario.count);
            let concurrency = request.concurrency_override.unwrap_or(scenario.concurrency);
            let strategy = scenario.strategy_with(&config.settings, concurrency);

            let mut executor = TrialExecutor::new(Arc::clone(&client), strategy)
                .with_cancellation(cancel.clone());
            if let Some(tx) = &events {
                executor = executor.with_events(tx.clone());
            }

            let run = executor.run(&scenario.name, &target_url, count).await;
            let cancelled = run.is_cancelled();
            runs.push(run);

            if cancelled || cancel.is_cancelled() {
                tracing::warn!("Suite cancelled; returning {} run(s)", runs.len());
                return Ok(runs);
            }
            pause(request.pause_between_runs, &cancel).await;
        }

        if position + 1 < client_count {
            pause(request.pause_between_proxies, &cancel).await;
        }
    }

    tracing::info!("Suite finished with {} run(s)", runs.len());
    Ok(runs)
}

type BuiltClient = (String, Result<ProxyClient, ProxyBenchError>);

fn build_clients(
    config: &BenchConfig,
    selection: &ProxySelection,
) -> Result<Vec<BuiltClient>, ProxyBenchError> {
    let settings = &config.settings;
    let clients = match selection {
        ProxySelection::Named(key) => {
            let proxy = config.proxy(key)?;
            vec![(key.clone(), proxy.build_client(settings))]
        }
        ProxySelection::All => config
            .proxies
            .iter()
            .map(|(key, proxy)| (key.clone(), proxy.build_client(settings)))
            .collect(),
        ProxySelection::Direct => vec![("direct".to_string(), settings.direct_client())],
    };
    Ok(clients)
}

async fn pause(duration: Duration, cancel: &CancellationToken) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}
