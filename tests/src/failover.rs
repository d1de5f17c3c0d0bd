//! Simulates the crash-and-promote path against a real
//! `Coordinator`, using `MockKv` to stand in for etcd the way
//! `coordinator::election`'s own tests do, but driving the public
//! `Coordinator` API end to end instead of reaching into its private
//! session state.

use std::sync::{Arc, Mutex};

use common::model::position::Position;
use coordinator::mock_kv::MockKv;
use coordinator::{ClusterMember, Coordinator, CoordinatorCallbacks, KvStore};
use position::PositionStore;

#[tokio::test]
async fn follower_promotes_once_the_dead_leaders_lease_lapses_and_resumes_from_its_position() {
    let kv: Arc<dyn KvStore> = Arc::new(MockKv::new());

    // A previous process instance held the lock, published a heartbeat and
    // a position, then crashed without a clean shutdown.
    let dead_session = kv.create_session(60).await.unwrap();
    assert!(kv.try_acquire_lock("lock/leader", dead_session).await.unwrap());
    let last_position = Position::new("mysql-bin.000004", 8192, 0);
    kv.put("pos", last_position.encode(), None).await.unwrap();
    kv.put(
        "heartbeat/old-leader",
        ClusterMember::encode_heartbeat(0, true),
        Some(dead_session),
    )
    .await
    .unwrap();

    // Another live Coordinator can't take over while that lease is alive.
    let contender_session = kv.create_session(60).await.unwrap();
    assert!(!kv.try_acquire_lock("lock/leader", contender_session).await.unwrap());

    // The lease lapses server-side (etcd would do this automatically once
    // the holder stops renewing it past its TTL): both the lock and the
    // heartbeat it owned disappear together.
    kv.expire_session(dead_session);

    let applied = Arc::new(Mutex::new(None::<Vec<u8>>));
    let applied_cb = applied.clone();
    let became_leader = Arc::new(Mutex::new(false));
    let became_leader_cb = became_leader.clone();
    let callbacks = CoordinatorCallbacks {
        on_became_leader: Box::new(move || *became_leader_cb.lock().unwrap() = true),
        on_position_changed: Box::new(move |bytes| *applied_cb.lock().unwrap() = Some(bytes)),
    };
    let follower = Coordinator::new(kv.clone(), "follower", "10.0.0.2", 9001, callbacks);

    // start() creates the session and attempts acquisition as its first
    // step; the lock is free now, so this should succeed immediately.
    follower.start().await.unwrap();
    assert!(follower.is_leader());
    assert!(*became_leader.lock().unwrap());

    // Promotion resumes from the dead leader's last published position,
    // the same resolution step the running process performs on startup
    // when its local position file is empty.
    let remote = follower.read_position().await.unwrap();
    assert_eq!(remote, last_position.encode());

    let store = PositionStore::new(tempfile::tempdir().unwrap().path().join("position"));
    store.apply_remote(&remote).await.unwrap();
    assert_eq!(store.cached(), Some(last_position));

    follower.shutdown().await.unwrap();
    assert!(!follower.is_leader());
}

#[tokio::test]
async fn single_leader_holds_across_three_contending_members() {
    let kv: Arc<dyn KvStore> = Arc::new(MockKv::new());
    let mut coordinators = Vec::new();
    for i in 0..3 {
        let callbacks = CoordinatorCallbacks {
            on_became_leader: Box::new(|| {}),
            on_position_changed: Box::new(|_| {}),
        };
        coordinators.push(Coordinator::new(kv.clone(), format!("member-{i}"), "10.0.0.1", 9000, callbacks));
    }
    for coordinator in &coordinators {
        coordinator.start().await.unwrap();
    }

    let leaders = coordinators.iter().filter(|c| c.is_leader()).count();
    assert_eq!(leaders, 1);

    for coordinator in &coordinators {
        coordinator.shutdown().await.unwrap();
    }
}
