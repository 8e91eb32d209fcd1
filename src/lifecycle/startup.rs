//! Startup orchestration.
//!
//! Configuration is validated as a whole before anything is built; any
//! error is fatal. The registry is populated before the pipeline is wired
//! so breakers exist for every service from the first request.

use std::sync::Arc;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::gateway::{Forwarder, Gateway};
use crate::registry::ServiceRegistry;

/// Build the request pipeline from a configuration.
pub fn build_gateway(
    config: &GatewayConfig,
    forwarder: Arc<dyn Forwarder>,
) -> Result<Gateway, Vec<ValidationError>> {
    validate_config(config)?;

    let registry = Arc::new(ServiceRegistry::from_config(config)?);
    registry.validate_configuration()?;

    let stats = registry.stats();
    tracing::info!(
        services = stats.total_services,
        routes = stats.routes,
        policies = config.rate_limit.policies.len(),
        "Gateway initialized"
    );

    Ok(Gateway::new(registry, config, forwarder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;
    use crate::gateway::HyperForwarder;

    #[test]
    fn test_build_from_valid_config() {
        let config = parse_config(
            r#"
            [[services]]
            name = "orders"
            url = "http://127.0.0.1:9001"

            [[routes]]
            path = "/api/orders/*"
            service = "orders"
            strip_prefix = true
            "#,
        )
        .unwrap();

        let gateway = build_gateway(&config, Arc::new(HyperForwarder::new())).unwrap();
        assert_eq!(gateway.registry().stats().total_services, 1);
        assert_eq!(gateway.breakers().len(), 1);
    }

    #[test]
    fn test_unknown_service_is_fatal() {
        let mut config = GatewayConfig::default();
        config.routes.push(crate::config::schema::RouteConfig {
            path: "/api/*".into(),
            method: "*".into(),
            service: "ghost".into(),
            strip_prefix: false,
            require_auth: false,
            headers: Default::default(),
        });

        let errors = build_gateway(&config, Arc::new(HyperForwarder::new())).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::UnknownService {
                index: 0,
                path: "/api/*".into(),
                service: "ghost".into(),
            }]
        );
    }
}
