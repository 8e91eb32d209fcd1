//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LogFormat, RateLimitScope};

    const SAMPLE: &str = r#"
[listener]
bind_address = "127.0.0.1:8080"

[health_check]
interval_secs = 5

[circuit_breaker]
max_requests = 5
failure_threshold = 0.5

[rate_limit]
idle_ttl_secs = 120

[[rate_limit.policies]]
name = "per-ip"
requests = 100
window_secs = 60
burst = 150
scope = "per_ip"

[observability]
log_format = "json"

[[services]]
name = "orders"
url = "http://127.0.0.1:9001"
timeout_ms = 2000

[services.headers]
x-internal = "gateway"

[[routes]]
path = "/api/orders/*"
service = "orders"
strip_prefix = true
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:8080");
        assert_eq!(config.health_check.interval_secs, 5);
        assert!(config.health_check.enabled);
        assert_eq!(config.circuit_breaker.max_requests, 5);
        assert_eq!(config.circuit_breaker.timeout_secs, 30);
        assert_eq!(config.rate_limit.policies[0].scope, RateLimitScope::PerIp);
        assert!(config.rate_limit.policies[0].enabled);
        assert_eq!(config.observability.log_format, LogFormat::Json);

        let orders = &config.services[0];
        assert_eq!(orders.health_path, "/health");
        assert_eq!(orders.headers.get("x-internal").map(String::as_str), Some("gateway"));
        assert_eq!(config.routes[0].method, "*");
        assert!(config.routes[0].strip_prefix);
    }

    #[test]
    fn test_parse_rejects_unknown_service() {
        let content = r#"
[[routes]]
path = "/api/x/*"
service = "missing-service"
"#;
        match parse_config(content) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].to_string().contains("missing-service"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(parse_config("services = 3"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join("api_gateway_loader_test.toml");
        fs::write(&path, SAMPLE).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.services.len(), 1);
        fs::remove_file(&path).unwrap_or_default();

        assert!(matches!(load_config(&path), Err(ConfigError::Io(_))));
    }
}
