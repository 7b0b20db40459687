//! 远程调用服务测试

mod common;

use common::{
    ep, route, Behavior, FirstAddressResolver, ScriptedFactory, ScriptedProber, SharedFactory,
};
use flare_rpc_routing::client::{
    AddressResolver, DefaultAddressResolver, RemoteInvokeContext, RemoteInvokeMessage, RemoteInvokeService,
    RpcContext, REMOTE_ADDRESS,
};
use flare_rpc_routing::health::{HealthCheckService, HealthEvent};
use flare_rpc_routing::registry::ServiceRouteManager;
use flare_rpc_routing::store::MemoryStore;
use flare_rpc_routing::{
    Config, ErrorCode, HealthCheckConfig, InvokerConfig, LoadBalanceStrategy, RegistryConfig,
    RoutingRuntime,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Fixture {
    registry: Arc<ServiceRouteManager>,
    health: Arc<HealthCheckService>,
    prober: Arc<ScriptedProber>,
    factory: Arc<ScriptedFactory>,
    resolver: Arc<FirstAddressResolver>,
    invoker: RemoteInvokeService,
}

async fn fixture(health_config: HealthCheckConfig, routes: Vec<flare_rpc_routing::ServiceRoute>) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let registry = ServiceRouteManager::new(store, &RegistryConfig::default());
    registry.set_routes(routes).await.unwrap();

    let prober = ScriptedProber::new();
    let health = HealthCheckService::new(health_config, prober.clone());
    health.set_evictor(registry.clone());

    let factory = ScriptedFactory::new();
    let resolver = FirstAddressResolver::new(registry.clone());
    let invoker = RemoteInvokeService::new(
        resolver.clone(),
        Arc::new(SharedFactory(factory.clone())),
        health.clone(),
        &InvokerConfig::default(),
    );
    Fixture {
        registry,
        health,
        prober,
        factory,
        resolver,
        invoker,
    }
}

fn call(service_id: &str) -> RemoteInvokeContext {
    RemoteInvokeContext::new(RemoteInvokeMessage::new(service_id))
}

#[tokio::test]
async fn test_repeated_communication_failures_evict_address() {
    let target = ep("10.0.0.1:9000");
    let f = fixture(
        HealthCheckConfig::default().with_thresholds(3, 0),
        vec![route("svc1", "/orders", &["10.0.0.1:9000"])],
    )
    .await;
    f.factory.set(&target, Behavior::Refuse);
    let mut health_events = f.health.subscribe();

    let (err, attached) = RpcContext::scope(async {
        let err = f.invoker.invoke(call("svc1"), None).await.unwrap_err();
        (err, RpcContext::attachment(REMOTE_ADDRESS))
    })
    .await;
    assert!(err.is_communication());
    assert_eq!(attached, Some(json!("10.0.0.1:9000")));
    assert_eq!(f.health.snapshot(&target).unwrap().unhealthy_count, 1);

    for _ in 0..2 {
        let err = f.invoker.invoke(call("svc1"), None).await.unwrap_err();
        assert!(err.is_communication());
    }
    assert_eq!(f.health.snapshot(&target).unwrap().unhealthy_count, 3);

    assert!(!f.health.is_healthy(&target).await);
    assert!(f.registry.get_route_by_service_id("svc1").await.is_none());

    let mut removed = false;
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(100), health_events.recv()).await
    {
        if event == (HealthEvent::Removed { endpoint: target.clone() }) {
            removed = true;
        }
    }
    assert!(removed);

    let err = f.invoker.invoke(call("svc1"), None).await.unwrap_err();
    assert!(err.is_unresolvable());
    assert_eq!(f.factory.sent_count(), 3);
}

#[tokio::test]
async fn test_default_resolver_skips_unhealthy_addresses() {
    let store = Arc::new(MemoryStore::new());
    let registry = ServiceRouteManager::new(store, &RegistryConfig::default());
    registry
        .set_route(route("svc1", "/orders", &["10.0.0.1:9000", "10.0.0.2:9000"]))
        .await
        .unwrap();
    let prober = ScriptedProber::new();
    prober.set_unreachable(&ep("10.0.0.1:9000"), true);
    let health = HealthCheckService::new(HealthCheckConfig::default(), prober.clone());

    let factory = ScriptedFactory::new();
    let resolver = Arc::new(DefaultAddressResolver::new(
        registry.clone(),
        health.clone(),
        LoadBalanceStrategy::RoundRobin,
    ));
    let invoker = RemoteInvokeService::new(
        resolver,
        Arc::new(SharedFactory(factory.clone())),
        health.clone(),
        &InvokerConfig::default(),
    );

    for _ in 0..3 {
        invoker.invoke(call("svc1"), None).await.unwrap();
    }
    let sent = factory.sent.lock();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|(endpoint, _)| *endpoint == ep("10.0.0.2:9000")));
}

#[tokio::test]
async fn test_default_resolver_checks_each_address_once() {
    let store = Arc::new(MemoryStore::new());
    let registry = ServiceRouteManager::new(store, &RegistryConfig::default());
    registry
        .set_route(route("svc1", "/orders", &["10.0.0.1:9000", "10.0.0.2:9000"]))
        .await
        .unwrap();
    let prober = ScriptedProber::new();
    let health = HealthCheckService::new(HealthCheckConfig::default(), prober.clone());
    let mut events = health.subscribe();
    let resolver = DefaultAddressResolver::new(
        registry.clone(),
        health.clone(),
        LoadBalanceStrategy::RoundRobin,
    );

    let resolved = resolver.resolve("svc1", None).await.unwrap();
    assert!(resolved.is_some());
    assert_eq!(prober.reachability_calls(), 2);
    assert_eq!(health.endpoints().len(), 2);

    let mut changed = Vec::new();
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(100), events.recv()).await
    {
        if let HealthEvent::Changed { endpoint, .. } = event {
            changed.push(endpoint);
        }
    }
    changed.sort();
    assert_eq!(changed, vec![ep("10.0.0.1:9000"), ep("10.0.0.2:9000")]);
}

#[tokio::test]
async fn test_successful_invocation_passes_message_through() {
    let target = ep("10.0.0.1:9000");
    let f = fixture(
        HealthCheckConfig::default(),
        vec![route("svc1", "/orders", &["10.0.0.1:9000"])],
    )
    .await;
    f.factory.set(&target, Behavior::Reply(json!({ "total": 42 })));

    let context = RemoteInvokeContext::new(
        RemoteInvokeMessage::new("svc1").with_parameter("orderId", "A-1"),
    );
    let result = f.invoker.invoke(context, None).await.unwrap();

    assert_eq!(result.result, json!({ "total": 42 }));
    assert!(result.exception_message.is_none());
    let sent = f.factory.sent.lock();
    assert_eq!(sent[0].0, target);
    assert_eq!(sent[0].1.parameters.get("orderId"), Some(&json!("A-1")));
    assert!(f.health.snapshot(&target).is_none());
}

#[tokio::test]
async fn test_timeout_cancels_transport_and_marks_timeout() {
    let target = ep("10.0.0.1:9000");
    let f = fixture(
        HealthCheckConfig::default(),
        vec![route("svc1", "/orders", &["10.0.0.1:9000"])],
    )
    .await;
    f.factory.set(&target, Behavior::Hang);

    let err = f
        .invoker
        .invoke(call("svc1"), Some(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(f.factory.tokens.lock()[0].is_cancelled());
    let snapshot = f.health.snapshot(&target).unwrap();
    assert_eq!(snapshot.timeout_count, 1);
    assert_eq!(snapshot.unhealthy_count, 1);
    assert!(snapshot.last_timeout_at.is_some());
}

#[tokio::test]
async fn test_transport_reported_timeout_marks_timeout() {
    let target = ep("10.0.0.1:9000");
    let f = fixture(
        HealthCheckConfig::default(),
        vec![route("svc1", "/orders", &["10.0.0.1:9000"])],
    )
    .await;
    f.factory.set(&target, Behavior::ReportTimeout);

    let err = f.invoker.invoke(call("svc1"), None).await.unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(f.health.snapshot(&target).unwrap().timeout_count, 1);
}

#[tokio::test]
async fn test_other_failures_leave_health_untouched() {
    let target = ep("10.0.0.1:9000");
    let f = fixture(
        HealthCheckConfig::default(),
        vec![route("svc1", "/orders", &["10.0.0.1:9000"])],
    )
    .await;
    f.factory.set(&target, Behavior::Fail("handler panicked".to_string()));

    let err = f.invoker.invoke(call("svc1"), None).await.unwrap_err();

    assert!(!err.is_communication());
    assert!(!err.is_timeout());
    assert!(f.health.snapshot(&target).is_none());
    assert_eq!(f.prober.reachability_calls(), 0);
}

#[tokio::test]
async fn test_empty_service_id_is_rejected() {
    let f = fixture(HealthCheckConfig::default(), Vec::new()).await;

    let err = f.invoker.invoke(call("  "), None).await.unwrap_err();

    assert_eq!(err.code(), Some(ErrorCode::InvalidParameter));
    assert_eq!(f.resolver.calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.factory.sent_count(), 0);
}

#[tokio::test]
async fn test_unknown_service_is_unresolvable() {
    let f = fixture(
        HealthCheckConfig::default(),
        vec![route("svc1", "/orders", &["10.0.0.1:9000"])],
    )
    .await;

    let err = f.invoker.invoke(call("missing"), None).await.unwrap_err();

    assert!(err.is_unresolvable());
    assert_eq!(f.factory.sent_count(), 0);
}

#[tokio::test]
async fn test_caller_cancellation() {
    let target = ep("10.0.0.1:9000");
    let f = fixture(
        HealthCheckConfig::default(),
        vec![route("svc1", "/orders", &["10.0.0.1:9000"])],
    )
    .await;
    f.factory.set(&target, Behavior::Hang);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let err = f
        .invoker
        .invoke_with_cancellation(call("svc1"), Some(Duration::from_secs(5)), cancel)
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(ErrorCode::OperationFailed));
    assert!(f.health.snapshot(&target).is_none());
}

#[tokio::test]
async fn test_attachment_requires_context_scope() {
    let f = fixture(
        HealthCheckConfig::default(),
        vec![route("svc1", "/orders", &["10.0.0.1:9000"])],
    )
    .await;

    f.invoker.invoke(call("svc1"), None).await.unwrap();
    assert!(RpcContext::attachment(REMOTE_ADDRESS).is_none());
    assert!(!RpcContext::set_attachment("key", "value"));
}

#[tokio::test]
async fn test_runtime_wires_components() {
    let mut config = Config::default();
    config.registry = RegistryConfig::default().with_root_path("/runtime/routes");
    let store = Arc::new(MemoryStore::new());
    let prober = ScriptedProber::new();
    let health = HealthCheckService::new(config.health_check.clone(), prober);
    let factory = ScriptedFactory::new();
    factory.set(&ep("10.0.0.1:9000"), Behavior::Reply(json!("pong")));

    let runtime = RoutingRuntime::start_with(
        config,
        store.clone(),
        health,
        Arc::new(SharedFactory(factory.clone())),
    )
    .await
    .unwrap();
    runtime
        .registry()
        .set_route(route("svc1", "/ping", &["10.0.0.1:9000"]))
        .await
        .unwrap();

    let result = runtime.invoker().invoke(call("svc1"), None).await.unwrap();
    assert_eq!(result.result, json!("pong"));
    assert_eq!(runtime.health().endpoints(), vec![ep("10.0.0.1:9000")]);

    runtime.shutdown();
}
