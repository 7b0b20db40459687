//! 内存协调存储测试

use flare_rpc_routing::store::{child_path, parent_path, CoordinationStore, MemoryStore};
use flare_rpc_routing::{ErrorCode, WatchedEventKind};
use std::time::Duration;

#[tokio::test]
async fn test_node_lifecycle() {
    let store = MemoryStore::new();

    assert!(store.exists("/").await.unwrap());
    store.create("/routes", Vec::new()).await.unwrap();
    store.create("/routes/svc1", b"v1".to_vec()).await.unwrap();

    assert_eq!(store.get_data("/routes/svc1").await.unwrap(), b"v1");
    assert_eq!(store.get_children("/routes").await.unwrap(), vec!["svc1"]);
    assert_eq!(store.get_children("/").await.unwrap(), vec!["routes"]);

    store.set_data("/routes/svc1", b"v2".to_vec()).await.unwrap();
    assert_eq!(store.get_data("/routes/svc1").await.unwrap(), b"v2");

    store.delete("/routes/svc1").await.unwrap();
    assert!(!store.exists("/routes/svc1").await.unwrap());
    assert_eq!(store.write_count(), 4);
}

#[tokio::test]
async fn test_error_semantics() {
    let store = MemoryStore::new();
    store.create("/routes", Vec::new()).await.unwrap();
    store.create("/routes/svc1", Vec::new()).await.unwrap();

    let err = store.create("/routes", Vec::new()).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NodeExists));

    let err = store.create("/missing/svc", Vec::new()).await.unwrap_err();
    assert!(err.is_node_not_found());

    let err = store.delete("/routes").await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NodeNotEmpty));

    let err = store.set_data("/routes/svc2", Vec::new()).await.unwrap_err();
    assert!(err.is_node_not_found());

    let err = store.get_children("/nothing").await.unwrap_err();
    assert!(err.is_node_not_found());

    let err = store.exists("relative").await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::InvalidParameter));
}

#[tokio::test]
async fn test_children_watch_fires_once() {
    let store = MemoryStore::new();
    store.create("/routes", Vec::new()).await.unwrap();

    let watch = store.watch_children("/routes").await.unwrap();
    store.create("/routes/svc1", Vec::new()).await.unwrap();
    let event = watch.await.unwrap();
    assert_eq!(event.path, "/routes");
    assert_eq!(event.kind, WatchedEventKind::NodeChildrenChanged);

    // 未重新订阅时后续变更不会再通知
    assert_eq!(store.pending_watch_count(), 0);
    store.create("/routes/svc2", Vec::new()).await.unwrap();
    assert_eq!(store.pending_watch_count(), 0);
}

#[tokio::test]
async fn test_data_watch_kinds() {
    let store = MemoryStore::new();

    let created = store.watch_data("/svc").await.unwrap();
    store.create("/svc", b"a".to_vec()).await.unwrap();
    assert_eq!(created.await.unwrap().kind, WatchedEventKind::NodeCreated);

    let changed = store.watch_data("/svc").await.unwrap();
    store.set_data("/svc", b"b".to_vec()).await.unwrap();
    assert_eq!(changed.await.unwrap().kind, WatchedEventKind::NodeDataChanged);

    let deleted = store.watch_data("/svc").await.unwrap();
    let parent = store.watch_children("/").await.unwrap();
    store.delete("/svc").await.unwrap();
    assert_eq!(deleted.await.unwrap().kind, WatchedEventKind::NodeDeleted);
    assert_eq!(
        parent.await.unwrap().kind,
        WatchedEventKind::NodeChildrenChanged
    );
}

#[tokio::test]
async fn test_dropped_watches_are_pruned() {
    let store = MemoryStore::new();
    store.create("/svc", Vec::new()).await.unwrap();

    for _ in 0..5 {
        drop(store.watch_data("/svc").await.unwrap());
    }
    let live = store.watch_data("/svc").await.unwrap();
    assert_eq!(store.pending_watch_count(), 1);

    store.set_data("/svc", b"x".to_vec()).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(1), live)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, WatchedEventKind::NodeDataChanged);
}

#[test]
fn test_path_helpers() {
    assert_eq!(parent_path("/a/b"), Some("/a"));
    assert_eq!(parent_path("/a"), Some("/"));
    assert_eq!(parent_path("/"), None);
    assert_eq!(child_path("/", "a"), "/a");
    assert_eq!(child_path("/a", "b"), "/a/b");
}
