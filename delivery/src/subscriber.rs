use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use common::err::ReError;
use common::structure::queue::BoundedQueue;
use tokio::sync::Notify;
use tracing::warn;

use crate::group::Group;
use crate::weighted::{pick_weighted, renormalize_weights};
use common::config::GroupMode;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 10_000;

/// One TCP or WebSocket subscriber connection. Owns a bounded outgoing
/// queue of pre-serialized EVENT payloads; a full queue drops the newest
/// message and counts it, so it never blocks the dispatch walk.
pub struct Subscriber {
    pub id: u64,
    weight: AtomicU32,
    sent_count: AtomicU64,
    dropped_count: AtomicU64,
    queue: BoundedQueue<Arc<str>>,
    /// Signaled on every successful enqueue so a connection's writer task
    /// can block on `notified()` instead of busy-polling `dequeue`.
    notify: Notify,
}

impl Subscriber {
    pub fn new(id: u64, weight: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            weight: AtomicU32::new(weight),
            sent_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            queue: BoundedQueue::new(SUBSCRIBER_QUEUE_CAPACITY),
            notify: Notify::new(),
        })
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::SeqCst)
    }

    fn set_weight(&self, weight: u32) {
        self.weight.store(weight, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::SeqCst)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::SeqCst)
    }

    pub fn dequeue(&self) -> Option<Arc<str>> {
        self.queue.pop()
    }

    fn enqueue_broadcast(&self, payload: Arc<str>) {
        if self.queue.push(payload) {
            self.notify.notify_one();
        } else {
            self.dropped_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn enqueue_weighted(&self, payload: Arc<str>) {
        if self.queue.push(payload) {
            self.sent_count.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
        } else {
            self.dropped_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct GroupState {
    group: Group,
    members: Vec<Arc<Subscriber>>,
}

/// Group membership and dispatch for one TCP or WebSocket listener.
/// Guarded by a single mutex; broadcast/weighted dispatch walks hold it
/// for the whole enqueue pass.
pub struct SubscriberGroups {
    inner: Mutex<HashMap<String, GroupState>>,
}

impl SubscriberGroups {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_group(&self, group: Group) {
        let mut inner = self.inner.lock().unwrap();
        inner.insert(group.name.clone(), GroupState { group, members: vec![] });
    }

    /// Adds `subscriber` to `group_name`, then re-normalizes the group's
    /// weights so they sum to 100. Errors if the group is
    /// unknown — the caller replies ERROR and closes the connection.
    pub fn join(&self, group_name: &str, subscriber: Arc<Subscriber>) -> Result<(), ReError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .get_mut(group_name)
            .ok_or_else(|| ReError::Error(format!("unknown group '{group_name}'")))?;
        state.members.push(subscriber);
        renormalize(state);
        Ok(())
    }

    pub fn leave(&self, group_name: &str, subscriber_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.get_mut(group_name) {
            state.members.retain(|m| m.id != subscriber_id);
            renormalize(state);
        }
    }

    /// Enqueues `payload` to every group whose filters match `table`,
    /// broadcasting to every member or routing to the weight-minimizing
    /// member depending on the group's mode.
    pub fn dispatch(&self, table: &str, payload: Arc<str>) {
        let inner = self.inner.lock().unwrap();
        for state in inner.values() {
            if !state.group.matches(table) || state.members.is_empty() {
                continue;
            }
            match state.group.mode {
                GroupMode::Broadcast => {
                    for member in &state.members {
                        member.enqueue_broadcast(payload.clone());
                    }
                }
                GroupMode::Weighted => {
                    let weights: Vec<u32> = state.members.iter().map(|m| m.weight()).collect();
                    let sent: Vec<u64> = state.members.iter().map(|m| m.sent_count()).collect();
                    if let Some(idx) = pick_weighted(&weights, &sent) {
                        state.members[idx].enqueue_weighted(payload.clone());
                    } else {
                        warn!(group = %state.group.name, "weighted group has no positive-weight member");
                    }
                }
            }
        }
    }
}

fn renormalize(state: &mut GroupState) {
    let raw: Vec<u32> = state.members.iter().map(|m| m.weight()).collect();
    let normalized = renormalize_weights(&raw);
    for (member, weight) in state.members.iter().zip(normalized) {
        member.set_weight(weight);
    }
}

impl Default for SubscriberGroups {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_unknown_group_errors() {
        let groups = SubscriberGroups::new();
        let subscriber = Subscriber::new(1, 50);
        assert!(groups.join("missing", subscriber).is_err());
    }

    #[test]
    fn broadcast_enqueues_to_every_member() {
        let groups = SubscriberGroups::new();
        groups.register_group(Group::new("g", GroupMode::Broadcast, &[]).unwrap());
        let a = Subscriber::new(1, 0);
        let b = Subscriber::new(2, 0);
        groups.join("g", a.clone()).unwrap();
        groups.join("g", b.clone()).unwrap();

        groups.dispatch("t", Arc::from("payload"));
        assert!(a.dequeue().is_some());
        assert!(b.dequeue().is_some());
    }

    #[test]
    fn weighted_dispatch_routes_to_one_member_and_counts_it() {
        let groups = SubscriberGroups::new();
        groups.register_group(Group::new("g", GroupMode::Weighted, &[]).unwrap());
        let a = Subscriber::new(1, 50);
        let b = Subscriber::new(2, 50);
        groups.join("g", a.clone()).unwrap();
        groups.join("g", b.clone()).unwrap();

        groups.dispatch("t", Arc::from("payload"));
        let total_sent = a.sent_count() + b.sent_count();
        assert_eq!(total_sent, 1);
    }

    #[test]
    fn membership_change_renormalizes_to_100() {
        let groups = SubscriberGroups::new();
        groups.register_group(Group::new("g", GroupMode::Weighted, &[]).unwrap());
        let a = Subscriber::new(1, 20);
        let b = Subscriber::new(2, 30);
        let c = Subscriber::new(3, 50);
        groups.join("g", a.clone()).unwrap();
        groups.join("g", b.clone()).unwrap();
        groups.join("g", c.clone()).unwrap();
        assert_eq!(a.weight() + b.weight() + c.weight(), 100);

        groups.leave("g", c.id);
        assert_eq!(a.weight() + b.weight(), 100);
    }
}
