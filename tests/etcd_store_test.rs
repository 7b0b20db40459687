//! etcd 协调存储集成测试
//!
//! 这些测试需要运行中的 etcd 服务器实例。
//! 默认情况下，测试会被忽略，需要使用
//! `cargo test --features etcd --test etcd_store_test -- --ignored` 运行。
//!
//! 启动 etcd 服务器：
//! ```bash
//! docker run -d --name etcd-test -p 2379:2379 -p 2380:2380 \
//!   quay.io/coreos/etcd:v3.5.9 \
//!   etcd --advertise-client-urls=http://127.0.0.1:2379 \
//!        --listen-client-urls=http://0.0.0.0:2379
//! ```

#![cfg(feature = "etcd")]

use flare_rpc_routing::registry::{RouteEvent, ServiceDescriptor, ServiceRoute, ServiceRouteManager};
use flare_rpc_routing::store::{CoordinationStore, EtcdStore};
use flare_rpc_routing::{Endpoint, ErrorCode, RegistryConfig, WatchedEventKind};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

/// etcd 服务器地址
/// 可以通过环境变量 ETCD_ENDPOINTS 覆盖，默认为 http://127.0.0.1:2379
fn etcd_endpoints() -> Vec<String> {
    std::env::var("ETCD_ENDPOINTS")
        .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["http://127.0.0.1:2379".to_string()])
}

async fn connect() -> Arc<EtcdStore> {
    Arc::new(
        EtcdStore::connect(&etcd_endpoints())
            .await
            .expect("Failed to connect to etcd"),
    )
}

/// 每个测试使用独立的根路径
fn test_root(name: &str) -> String {
    format!("/flare-test/{}-{}", name, std::process::id())
}

#[tokio::test]
#[ignore]
async fn test_etcd_node_semantics() {
    let store = connect().await;
    let root = test_root("nodes");
    let _ = store.create("/flare-test", Vec::new()).await;
    store.create(&root, Vec::new()).await.unwrap();

    let err = store.create(&root, Vec::new()).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NodeExists));

    let child = format!("{}/svc1", root);
    store.create(&child, b"v1".to_vec()).await.unwrap();
    assert_eq!(store.get_children(&root).await.unwrap(), vec!["svc1"]);

    let err = store.delete(&root).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NodeNotEmpty));

    store.set_data(&child, b"v2".to_vec()).await.unwrap();
    assert_eq!(store.get_data(&child).await.unwrap(), b"v2");

    store.delete(&child).await.unwrap();
    store.delete(&root).await.unwrap();
    assert!(!store.exists(&root).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_etcd_watches_fire() {
    let store = connect().await;
    let root = test_root("watch");
    let _ = store.create("/flare-test", Vec::new()).await;
    store.create(&root, Vec::new()).await.unwrap();

    let children = store.watch_children(&root).await.unwrap();
    let child = format!("{}/svc1", root);
    store.create(&child, b"v1".to_vec()).await.unwrap();
    let event = timeout(Duration::from_secs(5), children)
        .await
        .expect("children watch timed out")
        .unwrap();
    assert_eq!(event.kind, WatchedEventKind::NodeChildrenChanged);

    let data = store.watch_data(&child).await.unwrap();
    store.set_data(&child, b"v2".to_vec()).await.unwrap();
    let event = timeout(Duration::from_secs(5), data)
        .await
        .expect("data watch timed out")
        .unwrap();
    assert_eq!(event.kind, WatchedEventKind::NodeDataChanged);

    store.delete(&child).await.unwrap();
    store.delete(&root).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_etcd_route_manager_sync() {
    let store = connect().await;
    let config = RegistryConfig::default().with_root_path(test_root("routes"));
    let provider = ServiceRouteManager::new(store.clone(), &config);
    let consumer = ServiceRouteManager::new(store.clone(), &config);
    consumer.start().await.unwrap();
    let mut events = consumer.subscribe();

    let route = ServiceRoute::new(
        ServiceDescriptor::new("svc1").with_route_path("/orders/{id}"),
        [Endpoint::new("127.0.0.1", 9000)],
    );
    provider.set_route(route).await.unwrap();

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("route event timed out")
        .unwrap();
    assert!(matches!(event, RouteEvent::Created(ref r) if r.id() == "svc1"));
    assert!(consumer.get_route_by_path("/orders/7").await.is_some());

    provider.clear().await.unwrap();
    consumer.shutdown();
}
