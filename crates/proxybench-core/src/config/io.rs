use std::path::Path;

use crate::config::model::BenchConfig;
use crate::config::validation::validate_config;
use crate::error::ProxyBenchError;

/// Parse a JSON config and validate it. All validation problems are joined
/// into a single [`ProxyBenchError::Validation`].
pub fn parse_config(content: &str) -> Result<BenchConfig, ProxyBenchError> {
    let config: BenchConfig = serde_json::from_str(content)?;

    let errors = validate_config(&config);
    if !errors.is_empty() {
        let joined = errors
            .iter()
            .map(|e| match e {
                ProxyBenchError::Validation(msg) => msg.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ProxyBenchError::Validation(joined));
    }

    Ok(config)
}

/// Read and validate a benchmark config file from disk.
pub async fn read_config(path: impl AsRef<Path>) -> Result<BenchConfig, ProxyBenchError> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    parse_config(&content)
}

/// Write a [`BenchConfig`] to disk as pretty-printed JSON.
pub async fn write_config(config: &BenchConfig, path: impl AsRef<Path>) -> Result<(), ProxyBenchError> {
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path.as_ref(), content).await?;
    Ok(())
}
