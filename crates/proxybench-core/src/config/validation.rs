use crate::config::model::{BenchConfig, ProxyDefinition, Scenario, ScenarioKind, Settings};
use crate::error::ProxyBenchError;
use crate::http::client::Endpoint;

/// Longest username or password a SOCKS5 sub-negotiation can carry.
const MAX_CREDENTIAL_LEN: usize = 255;

/// Validate a [`BenchConfig`] and return every problem found.
///
/// An empty `Vec` means the config is valid.
pub fn validate_config(config: &BenchConfig) -> Vec<ProxyBenchError> {
    let mut errors = Vec::new();

    if config.targets.is_empty() {
        errors.push(ProxyBenchError::Validation("No targets defined".to_string()));
    }
    for target in &config.targets {
        if target.name.trim().is_empty() {
            errors.push(ProxyBenchError::Validation(format!(
                "Target '{}': name must not be empty",
                target.url
            )));
        }
        let url = target.url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(ProxyBenchError::Validation(format!(
                "Target '{}': URL must start with http:// or https:// (got: {})",
                target.name, target.url
            )));
        }
    }

    if config.proxies.is_empty() {
        errors.push(ProxyBenchError::Validation("No proxies defined".to_string()));
    }
    for (key, proxy) in &config.proxies {
        errors.extend(validate_proxy(key, proxy));
    }

    for scenario in &config.scenarios {
        errors.extend(validate_scenario(scenario));
    }

    errors.extend(validate_settings(&config.settings));

    errors
}

fn validate_proxy(key: &str, proxy: &ProxyDefinition) -> Vec<ProxyBenchError> {
    let mut errors = Vec::new();

    if proxy.name.trim().is_empty() {
        errors.push(ProxyBenchError::Validation(format!(
            "Proxy '{key}': name must not be empty"
        )));
    }

    if let Err(e) = Endpoint::parse(&proxy.socks5) {
        errors.push(ProxyBenchError::Validation(format!(
            "Proxy '{key}': socks5 address is not host:port ({e})"
        )));
    }

    let username = proxy.username.as_deref().unwrap_or_default();
    let password = proxy.password.as_deref().unwrap_or_default();
    if username.is_empty() && !password.is_empty() {
        errors.push(ProxyBenchError::Validation(format!(
            "Proxy '{key}': password given without a username"
        )));
    }
    if username.len() > MAX_CREDENTIAL_LEN || password.len() > MAX_CREDENTIAL_LEN {
        errors.push(ProxyBenchError::Validation(format!(
            "Proxy '{key}': username and password must be at most {MAX_CREDENTIAL_LEN} bytes"
        )));
    }

    errors
}

fn validate_scenario(scenario: &Scenario) -> Vec<ProxyBenchError> {
    let mut errors = Vec::new();

    if scenario.name.trim().is_empty() {
        errors.push(ProxyBenchError::Validation(
            "Scenario name must not be empty".to_string(),
        ));
    }

    if scenario.count == 0 {
        errors.push(ProxyBenchError::Validation(format!(
            "Scenario '{}': count must be at least 1",
            scenario.name
        )));
    }

    if scenario.kind == ScenarioKind::Concurrent && scenario.concurrency == 0 {
        errors.push(ProxyBenchError::Validation(format!(
            "Scenario '{}': concurrency must be at least 1",
            scenario.name
        )));
    }

    errors
}

fn validate_settings(settings: &Settings) -> Vec<ProxyBenchError> {
    let mut errors = Vec::new();

    if settings.request_timeout_ms == 0 {
        errors.push(ProxyBenchError::Validation(
            "request_timeout_ms must be greater than 0".to_string(),
        ));
    }

    if settings.sequential_workers == 0 {
        errors.push(ProxyBenchError::Validation(
            "sequential_workers must be at least 1".to_string(),
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::model::TargetDefinition;

    fn valid_config() -> BenchConfig {
        let mut proxies = BTreeMap::new();
        proxies.insert(
            "edge".to_string(),
            ProxyDefinition {
                socks5: "proxy.example.com:1080".to_string(),
                name: "Edge".to_string(),
                username: Some("user".to_string()),
                password: Some("secret".to_string()),
            },
        );
        BenchConfig {
            targets: vec![TargetDefinition {
                name: "home".to_string(),
                url: "https://example.com/".to_string(),
            }],
            proxies,
            scenarios: vec![Scenario {
                name: "load".to_string(),
                kind: ScenarioKind::Concurrent,
                count: 100,
                concurrency: 10,
                enabled: true,
            }],
            settings: Settings::default(),
        }
    }

    fn messages(errors: &[ProxyBenchError]) -> Vec<String> {
        errors.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn valid_config_has_no_errors() {
        assert!(validate_config(&valid_config()).is_empty());
    }

    #[test]
    fn empty_config_reports_missing_targets_and_proxies() {
        let msgs = messages(&validate_config(&BenchConfig::default()));
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].contains("No targets"));
        assert!(msgs[1].contains("No proxies"));
    }

    #[test]
    fn non_http_target_is_rejected() {
        let mut cfg = valid_config();
        cfg.targets[0].url = "ftp://example.com/".to_string();
        let msgs = messages(&validate_config(&cfg));
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("http:// or https://"));
    }

    #[test]
    fn bad_proxy_address_is_rejected() {
        let mut cfg = valid_config();
        cfg.proxies.get_mut("edge").unwrap().socks5 = "proxy.example.com".to_string();
        let msgs = messages(&validate_config(&cfg));
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("Proxy 'edge'"));
    }

    #[test]
    fn password_without_username_is_rejected() {
        let mut cfg = valid_config();
        cfg.proxies.get_mut("edge").unwrap().username = None;
        let msgs = messages(&validate_config(&cfg));
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("without a username"));
    }

    #[test]
    fn overlong_credentials_are_rejected() {
        let mut cfg = valid_config();
        cfg.proxies.get_mut("edge").unwrap().password = Some("x".repeat(256));
        let msgs = messages(&validate_config(&cfg));
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("255 bytes"));
    }

    #[test]
    fn zero_count_and_concurrency_are_rejected() {
        let mut cfg = valid_config();
        cfg.scenarios[0].count = 0;
        cfg.scenarios[0].concurrency = 0;
        let msgs = messages(&validate_config(&cfg));
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].contains("count must be at least 1"));
        assert!(msgs[1].contains("concurrency must be at least 1"));
    }

    #[test]
    fn single_scenario_ignores_concurrency() {
        let mut cfg = valid_config();
        cfg.scenarios[0].kind = ScenarioKind::Single;
        cfg.scenarios[0].concurrency = 0;
        assert!(validate_config(&cfg).is_empty());
    }

    #[test]
    fn zero_timeout_and_workers_are_rejected() {
        let mut cfg = valid_config();
        cfg.settings.request_timeout_ms = 0;
        cfg.settings.sequential_workers = 0;
        let msgs = messages(&validate_config(&cfg));
        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn errors_accumulate_across_sections() {
        let mut cfg = valid_config();
        cfg.targets[0].name = " ".to_string();
        cfg.scenarios[0].name = String::new();
        cfg.settings.sequential_workers = 0;
        assert_eq!(validate_config(&cfg).len(), 3);
    }
}
