//! Service registry.
//!
//! # Responsibilities
//! - Authoritative catalog of services and routes
//! - Resolve (method, path) to a route and its service
//! - Own the background health-checking task
//!
//! # Design Decisions
//! - One `RwLock` for the service map, one for the route list
//! - Every accessor returns clones; nothing live escapes the lock
//! - Lock order is routes → services wherever both are held
//! - Health probes run with no lock held; only the status write locks

pub mod service;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use axum::http::Method;
use serde::Serialize;

use crate::config::schema::GatewayConfig;
use crate::config::validation::ValidationError;
use crate::health::active::HealthTask;
use crate::health::state::HealthStatus;
use crate::routing::rule::{RouteInfo, RouteRule};

pub use service::{ServiceEndpoint, ServiceInfo};

/// Aggregate registry counts for introspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_services: usize,
    pub healthy_services: usize,
    pub unhealthy_services: usize,
    pub unknown_services: usize,
    pub routes: usize,
}

#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceEndpoint>>,
    routes: RwLock<Vec<RouteRule>>,
    health_task: Mutex<Option<HealthTask>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a validated configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, Vec<ValidationError>> {
        let registry = Self::new();
        registry.apply_config(config)?;
        Ok(registry)
    }

    /// Compile services and routes from `config` and swap them in atomically.
    pub fn apply_config(&self, config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let services: Vec<_> = config
            .services
            .iter()
            .filter_map(|s| ServiceEndpoint::from_config(s).map_err(|e| errors.push(e)).ok())
            .collect();
        let routes: Vec<_> = config
            .routes
            .iter()
            .filter_map(|r| RouteRule::from_config(r).map_err(|e| errors.push(e)).ok())
            .collect();

        if !errors.is_empty() {
            return Err(errors);
        }
        self.replace(services, routes)
    }

    /// Upsert a service by name. Status is reset to unknown.
    pub fn register_service(&self, mut endpoint: ServiceEndpoint) -> Result<(), ValidationError> {
        endpoint.validate()?;
        endpoint.normalize();

        tracing::info!(service = %endpoint.name, url = %endpoint.url, "Service registered");
        write(&self.services).insert(endpoint.name.clone(), endpoint);
        Ok(())
    }

    /// Remove a service. Routes pointing at it stop resolving.
    pub fn deregister_service(&self, name: &str) -> bool {
        let removed = write(&self.services).remove(name).is_some();
        if removed {
            tracing::info!(service = %name, "Service deregistered");
        }
        removed
    }

    /// Append a route. The target service is checked by
    /// [`validate_configuration`](Self::validate_configuration), so routes and
    /// services may be registered in either order.
    pub fn register_route(&self, rule: RouteRule) {
        tracing::debug!(path = %rule.path.as_str(), method = %rule.method, service = %rule.service, "Route registered");
        write(&self.routes).push(rule);
    }

    pub fn get_service(&self, name: &str) -> Option<ServiceEndpoint> {
        read(&self.services).get(name).cloned()
    }

    /// First registered route matching `method` and `path`, with its service.
    ///
    /// A match whose service is missing or disabled resolves to `None`; later
    /// rules are not consulted.
    pub fn find_route(&self, method: &Method, path: &str) -> Option<(RouteRule, ServiceEndpoint)> {
        let routes = read(&self.routes);
        let rule = routes.iter().find(|r| r.matches(method, path))?;

        let services = read(&self.services);
        let service = services.get(&rule.service).filter(|s| s.enabled)?;
        Some((rule.clone(), service.clone()))
    }

    /// Snapshot of enabled services whose last probe was healthy.
    pub fn get_healthy_services(&self) -> HashMap<String, ServiceEndpoint> {
        read(&self.services)
            .iter()
            .filter(|(_, s)| s.is_healthy())
            .map(|(name, s)| (name.clone(), s.clone()))
            .collect()
    }

    /// Snapshot of enabled services (the health checker's work list).
    pub fn enabled_services(&self) -> Vec<ServiceEndpoint> {
        read(&self.services)
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }

    /// All services sorted by name.
    pub fn list_services(&self) -> Vec<ServiceEndpoint> {
        let mut services: Vec<_> = read(&self.services).values().cloned().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    /// All routes in registration order.
    pub fn list_routes(&self) -> Vec<RouteRule> {
        read(&self.routes).clone()
    }

    pub fn route_infos(&self) -> Vec<RouteInfo> {
        read(&self.routes).iter().map(RouteRule::info).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let routes = read(&self.routes).len();
        let services = read(&self.services);

        let mut stats = RegistryStats {
            total_services: services.len(),
            routes,
            ..Default::default()
        };
        for service in services.values() {
            match service.status {
                HealthStatus::Healthy => stats.healthy_services += 1,
                HealthStatus::Unhealthy => stats.unhealthy_services += 1,
                HealthStatus::Unknown => stats.unknown_services += 1,
            }
        }
        stats
    }

    /// Check that every route targets a registered service.
    pub fn validate_configuration(&self) -> Result<(), Vec<ValidationError>> {
        let routes = read(&self.routes);
        let services = read(&self.services);

        let errors: Vec<_> = routes
            .iter()
            .enumerate()
            .filter(|(_, r)| !services.contains_key(&r.service))
            .map(|(index, r)| ValidationError::UnknownService {
                index,
                path: r.path.as_str().to_string(),
                service: r.service.clone(),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Replace the whole service map and route list in one step.
    ///
    /// Nothing changes unless the new set validates. Health observations are
    /// carried over for services whose name and URL are unchanged.
    pub fn replace(
        &self,
        services: Vec<ServiceEndpoint>,
        routes: Vec<RouteRule>,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut next = HashMap::with_capacity(services.len());

        for mut service in services {
            if let Err(e) = service.validate() {
                errors.push(e);
                continue;
            }
            service.normalize();
            if next.contains_key(&service.name) {
                errors.push(ValidationError::DuplicateService { name: service.name });
                continue;
            }
            next.insert(service.name.clone(), service);
        }

        let names: HashSet<&String> = next.keys().collect();
        for (index, route) in routes.iter().enumerate() {
            if !names.contains(&route.service) {
                errors.push(ValidationError::UnknownService {
                    index,
                    path: route.path.as_str().to_string(),
                    service: route.service.clone(),
                });
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let mut current_routes = write(&self.routes);
        let mut current_services = write(&self.services);

        for (name, service) in next.iter_mut() {
            if let Some(previous) = current_services.get(name) {
                if previous.url == service.url {
                    service.status = previous.status;
                    service.last_checked = previous.last_checked;
                    service.latency = previous.latency;
                }
            }
        }

        tracing::info!(services = next.len(), routes = routes.len(), "Registry replaced");
        *current_services = next;
        *current_routes = routes;
        Ok(())
    }

    /// Write back one probe result. Ignored when the service was removed or
    /// re-pointed at another URL while the probe was in flight.
    pub(crate) fn record_health(
        &self,
        probed: &ServiceEndpoint,
        status: HealthStatus,
        latency: Duration,
        checked_at: SystemTime,
    ) -> Option<HealthStatus> {
        let mut services = write(&self.services);
        let service = services
            .get_mut(&probed.name)
            .filter(|s| s.url == probed.url)?;

        let previous = service.status;
        service.status = status;
        service.latency = Some(latency);
        service.last_checked = Some(checked_at);
        Some(previous)
    }

    /// Start the background health-checking loop. The first round runs
    /// immediately. Returns `false` if a loop is already running.
    pub fn start_health_checking(self: &Arc<Self>, interval: Duration) -> bool {
        let mut task = self
            .health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!("Health checking already running");
            return false;
        }

        *task = Some(HealthTask::spawn(Arc::downgrade(self), interval));
        true
    }

    /// Stop the loop and wait for it to exit. Returns `false` if it was not
    /// running.
    pub async fn stop_health_checking(&self) -> bool {
        let task = self
            .health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match task {
            Some(task) => {
                task.stop().await;
                true
            }
            None => false,
        }
    }

    pub fn is_health_checking(&self) -> bool {
        self.health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}
