use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::Strategy;
use crate::error::ProxyBenchError;
use crate::http::client::{Endpoint, ProxyClient};

// ---------------------------------------------------------------------------
// Targets and proxies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TargetDefinition {
    pub name: String,
    /// Absolute `http://` or `https://` URL.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProxyDefinition {
    /// SOCKS5 endpoint as `host:port` or `[v6]:port`.
    pub socks5: String,
    /// Display name recorded on every run through this proxy.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyDefinition {
    pub fn endpoint(&self) -> Result<Endpoint, ProxyBenchError> {
        Endpoint::parse(&self.socks5)
    }

    /// A client tunnelling through this proxy with the timeouts and target
    /// resolution mode from `settings`.
    pub fn build_client(&self, settings: &Settings) -> Result<ProxyClient, ProxyBenchError> {
        let mut builder = ProxyClient::builder()
            .socks5(self.endpoint()?)
            .name(&self.name)
            .timeout(settings.request_timeout())
            .resolve_target_locally(settings.resolve_target_locally);
        if self.has_credentials() {
            builder = builder.credentials(
                self.username.as_deref().unwrap_or_default(),
                self.password.as_deref().unwrap_or_default(),
            );
        }
        builder.build()
    }

    /// Empty strings count as absent.
    pub fn has_credentials(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        set(&self.username) || set(&self.password)
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Low-interference sampling through the small sequential pool.
    Single,
    /// A fixed number of trials in flight at once.
    Concurrent,
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScenarioKind::Single => "single",
            ScenarioKind::Concurrent => "concurrent",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Scenario {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScenarioKind,
    pub count: usize,
    /// Only read for concurrent scenarios.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Scenario {
    pub fn strategy(&self, settings: &Settings) -> Strategy {
        self.strategy_with(settings, self.concurrency)
    }

    /// Same as [`Scenario::strategy`] with the concurrency replaced.
    pub fn strategy_with(&self, settings: &Settings, concurrency: usize) -> Strategy {
        match self.kind {
            ScenarioKind::Single => Strategy::Sequential {
                workers: settings.sequential_workers,
                interval: settings.request_interval(),
            },
            ScenarioKind::Concurrent => Strategy::Concurrent { concurrency },
        }
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    /// Deadline for one whole trial, dial included.
    pub request_timeout_ms: u64,
    /// Pause each sequential worker takes after a trial.
    pub request_interval_ms: u64,
    /// Where the reporting side writes its files. Not read by the core.
    pub output_dir: PathBuf,
    /// Width of the pool used by `single` scenarios. `1` is strict
    /// one-at-a-time sampling.
    pub sequential_workers: usize,
    /// Resolve target hosts locally and hand the proxy an IP address.
    pub resolve_target_locally: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            request_interval_ms: 0,
            output_dir: PathBuf::from("reports"),
            sequential_workers: Strategy::DEFAULT_SEQUENTIAL_WORKERS,
            resolve_target_locally: false,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    /// A client without a proxy, for baseline runs.
    pub fn direct_client(&self) -> Result<ProxyClient, ProxyBenchError> {
        ProxyClient::builder()
            .timeout(self.request_timeout())
            .build()
    }
}

// ---------------------------------------------------------------------------
// BenchConfig
// ---------------------------------------------------------------------------

/// Everything a benchmark suite needs: what to hit, through which proxies,
/// and how hard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BenchConfig {
    #[serde(default)]
    pub targets: Vec<TargetDefinition>,
    /// Keyed by the name used to select a proxy.
    #[serde(default)]
    pub proxies: BTreeMap<String, ProxyDefinition>,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub settings: Settings,
}

impl BenchConfig {
    pub fn enabled_scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter().filter(|s| s.enabled)
    }

    pub fn proxy(&self, key: &str) -> Result<&ProxyDefinition, ProxyBenchError> {
        self.proxies
            .get(key)
            .ok_or_else(|| ProxyBenchError::ProxyNotFound(key.to_string()))
    }

    /// Turn a target name or URL into a URL.
    ///
    /// `None` picks the first configured target. A name that matches a
    /// configured target yields its URL; anything starting with `http://`
    /// or `https://` is taken as-is.
    pub fn resolve_target(&self, name_or_url: Option<&str>) -> Result<String, ProxyBenchError> {
        let Some(wanted) = name_or_url else {
            return self
                .targets
                .first()
                .map(|t| t.url.clone())
                .ok_or_else(|| ProxyBenchError::Validation("No targets defined".to_string()));
        };

        if let Some(target) = self.targets.iter().find(|t| t.name == wanted) {
            return Ok(target.url.clone());
        }
        if wanted.starts_with("http://") || wanted.starts_with("https://") {
            return Ok(wanted.to_string());
        }
        Err(ProxyBenchError::Validation(format!(
            "Target '{wanted}' is neither a configured target name nor an http(s) URL"
        )))
    }
}
