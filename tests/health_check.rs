//! Active health checking against live mock backends.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use api_gateway::health::{HealthChecker, HealthStatus};
use api_gateway::registry::{ServiceEndpoint, ServiceRegistry};

mod common;

fn endpoint(name: &str, addr: std::net::SocketAddr) -> ServiceEndpoint {
    ServiceEndpoint::new(name, &format!("http://{}", addr), Duration::from_millis(500)).unwrap()
}

#[tokio::test]
async fn test_probe_results_update_registry() {
    let healthy = common::start_programmable_backend(|path| async move {
        if path == "/status" {
            (200, "ok".into())
        } else {
            (404, "not found".into())
        }
    })
    .await;
    let failing = common::start_programmable_backend(|_| async { (500, "boom".into()) }).await;
    let down = common::closed_port().await;

    let registry = ServiceRegistry::new();
    registry
        .register_service(endpoint("users", healthy).with_health_path("status"))
        .unwrap();
    registry.register_service(endpoint("billing", failing)).unwrap();
    registry.register_service(endpoint("search", down)).unwrap();
    registry
        .register_service(endpoint("legacy", down).with_enabled(false))
        .unwrap();

    let probed = HealthChecker::new().check_all(&registry).await;
    assert_eq!(probed, 3);

    let users = registry.get_service("users").unwrap();
    assert_eq!(users.status, HealthStatus::Healthy);
    assert!(users.last_checked.is_some());
    assert!(users.latency.is_some());

    assert_eq!(registry.get_service("billing").unwrap().status, HealthStatus::Unhealthy);
    assert_eq!(registry.get_service("search").unwrap().status, HealthStatus::Unhealthy);
    assert_eq!(registry.get_service("legacy").unwrap().status, HealthStatus::Unknown);

    let healthy: Vec<_> = registry.get_healthy_services().into_keys().collect();
    assert_eq!(healthy, vec!["users".to_string()]);

    let stats = registry.stats();
    assert_eq!(stats.healthy_services, 1);
    assert_eq!(stats.unhealthy_services, 2);
    assert_eq!(stats.unknown_services, 1);
}

#[tokio::test]
async fn test_silent_backends_time_out_concurrently() {
    let first = common::start_silent_backend().await;
    let second = common::start_silent_backend().await;

    let registry = ServiceRegistry::new();
    for (name, addr) in [("orders", first), ("billing", second)] {
        let service = ServiceEndpoint::new(
            name,
            &format!("http://{}", addr),
            Duration::from_millis(300),
        )
        .unwrap();
        registry.register_service(service).unwrap();
    }

    let start = Instant::now();
    assert_eq!(HealthChecker::new().check_all(&registry).await, 2);
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(550), "probes ran serially: {:?}", elapsed);

    for name in ["orders", "billing"] {
        let service = registry.get_service(name).unwrap();
        assert_eq!(service.status, HealthStatus::Unhealthy);
        assert!(service.latency.unwrap() >= Duration::from_millis(300));
    }
}

#[tokio::test]
async fn test_https_service_is_contacted() {
    let (addr, accepted) = common::start_connection_counter().await;
    let service = ServiceEndpoint::new(
        "secure",
        &format!("https://127.0.0.1:{}", addr.port()),
        Duration::from_millis(500),
    )
    .unwrap();

    // The listener does not speak TLS, so the handshake fails.
    let (status, _) = HealthChecker::new().probe(&service).await;
    assert_eq!(status, HealthStatus::Unhealthy);
    assert!(accepted.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_background_loop_start_stop() {
    let backend = common::start_mock_backend("ok").await;
    let registry = Arc::new(ServiceRegistry::new());
    registry.register_service(endpoint("users", backend)).unwrap();

    assert!(registry.start_health_checking(Duration::from_millis(50)));
    assert!(!registry.start_health_checking(Duration::from_millis(50)));
    assert!(registry.is_health_checking());

    let r = registry.clone();
    let became_healthy = common::eventually(Duration::from_secs(3), || {
        let r = r.clone();
        async move { r.get_service("users").is_some_and(|s| s.is_healthy()) }
    })
    .await;
    assert!(became_healthy);

    assert!(registry.stop_health_checking().await);
    assert!(!registry.stop_health_checking().await);
    assert!(!registry.is_health_checking());

    assert!(registry.start_health_checking(Duration::from_millis(50)));
    assert!(registry.stop_health_checking().await);
}

#[tokio::test]
async fn test_status_follows_backend() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let up = Arc::new(AtomicBool::new(true));
    let flag = up.clone();
    let backend = common::start_programmable_backend(move |_| {
        let healthy = flag.load(Ordering::SeqCst);
        async move {
            if healthy {
                (200, "ok".into())
            } else {
                (503, "draining".into())
            }
        }
    })
    .await;

    let registry = ServiceRegistry::new();
    registry.register_service(endpoint("orders", backend)).unwrap();
    let checker = HealthChecker::new();

    checker.check_all(&registry).await;
    assert_eq!(registry.get_service("orders").unwrap().status, HealthStatus::Healthy);

    up.store(false, Ordering::SeqCst);
    checker.check_all(&registry).await;
    assert_eq!(registry.get_service("orders").unwrap().status, HealthStatus::Unhealthy);
}
