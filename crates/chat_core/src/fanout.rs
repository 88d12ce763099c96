//! crates/chat_core/src/fanout.rs
//!
//! The connection-to-group registry. Each live connection owns an unbounded
//! channel; the router maps group keys to the channels currently subscribed.
//! Both maps are sharded (`DashMap`) so registration on one connection never
//! blocks delivery to another.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::events::{BrokerEvent, GroupKey};

pub type ConnectionId = Uuid;

/// The sending half of a connection's outbound event queue.
pub type EventSender = mpsc::UnboundedSender<BrokerEvent>;

struct ConnectionEntry {
    user_id: Uuid,
    sender: EventSender,
    groups: HashSet<GroupKey>,
}

//=========================================================================================
// FanoutRouter
//=========================================================================================

#[derive(Default)]
pub struct FanoutRouter {
    groups: DashMap<GroupKey, HashMap<ConnectionId, EventSender>>,
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl FanoutRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an authenticated connection into its `user:` and `session:` groups.
    ///
    /// The returned guard unregisters the connection from every group it joined
    /// when dropped.
    pub fn register(
        self: &Arc<Self>,
        user_id: Uuid,
        session_id: Uuid,
        sender: EventSender,
    ) -> ConnectionGuard {
        let id = Uuid::new_v4();
        let user_group = GroupKey::User(user_id);
        let groups: HashSet<GroupKey> =
            [user_group, GroupKey::Session(session_id)].into_iter().collect();

        self.connections.insert(
            id,
            ConnectionEntry {
                user_id,
                sender: sender.clone(),
                groups: groups.clone(),
            },
        );
        let mut first_for_user = false;
        for group in groups {
            let mut members = self.groups.entry(group).or_default();
            members.insert(id, sender.clone());
            // Decided under the shard lock so concurrent registrations agree.
            if group == user_group {
                first_for_user = members.len() == 1;
            }
        }
        debug!(connection = %id, user = %user_id, session = %session_id, "connection registered");

        ConnectionGuard {
            router: Arc::clone(self),
            id,
            user_id,
            session_id,
            first_for_user,
        }
    }

    /// Adds a registered connection to another group. Returns `false` if the
    /// connection is no longer registered.
    pub fn subscribe(&self, connection: ConnectionId, group: GroupKey) -> bool {
        let Some(mut entry) = self.connections.get_mut(&connection) else {
            return false;
        };
        if entry.groups.insert(group) {
            self.groups
                .entry(group)
                .or_default()
                .insert(connection, entry.sender.clone());
        }
        true
    }

    pub fn unsubscribe(&self, connection: ConnectionId, group: GroupKey) {
        if let Some(mut entry) = self.connections.get_mut(&connection) {
            entry.groups.remove(&group);
        }
        self.remove_from_group(&group, &[connection]);
    }

    /// Removes every connection of `user_id` from `group`.
    pub fn unsubscribe_user(&self, user_id: Uuid, group: GroupKey) {
        let connections: Vec<ConnectionId> = match self.groups.get(&GroupKey::User(user_id)) {
            Some(members) => members.keys().copied().collect(),
            None => return,
        };
        for connection in connections {
            self.unsubscribe(connection, group);
        }
    }

    /// Removes a group entirely, e.g. when its room is deleted.
    pub fn dissolve(&self, group: &GroupKey) {
        let Some((_, members)) = self.groups.remove(group) else {
            return;
        };
        for connection in members.keys() {
            if let Some(mut entry) = self.connections.get_mut(connection) {
                entry.groups.remove(group);
            }
        }
    }

    /// Drops a connection from every group it joined. Returns whether it was
    /// the last connection of its user, or `None` if it was already gone.
    fn unregister(&self, connection: ConnectionId) -> Option<bool> {
        let (_, entry) = self.connections.remove(&connection)?;
        let user_group = GroupKey::User(entry.user_id);
        let mut last_for_user = false;
        for group in &entry.groups {
            let emptied = self.remove_from_group(group, &[connection]);
            if *group == user_group {
                last_for_user = emptied;
            }
        }
        debug!(connection = %connection, "connection unregistered");
        Some(last_for_user)
    }

    /// Returns `true` when this call left the group empty.
    fn remove_from_group(&self, group: &GroupKey, ids: &[ConnectionId]) -> bool {
        let emptied = {
            let Some(mut members) = self.groups.get_mut(group) else {
                return false;
            };
            let before = members.len();
            for id in ids {
                members.remove(id);
            }
            members.len() < before && members.is_empty()
        };
        self.groups.remove_if(group, |_, members| members.is_empty());
        emptied
    }

    fn prune(&self, dead: Vec<ConnectionId>) {
        for connection in dead {
            self.unregister(connection);
        }
    }

    /// Pushes an event to every connection in `group`. Returns how many
    /// connections accepted it.
    pub fn publish(&self, group: &GroupKey, event: &BrokerEvent) -> usize {
        let mut dead = Vec::new();
        let delivered = match self.groups.get(group) {
            Some(members) => members
                .iter()
                .filter(|(id, sender)| {
                    let ok = sender.send(event.clone()).is_ok();
                    if !ok {
                        dead.push(**id);
                    }
                    ok
                })
                .count(),
            None => return 0,
        };
        self.prune(dead);
        debug!(group = %group, event = event.kind(), delivered, "published");
        delivered
    }

    /// Pushes an event to the `user:` group of each listed user, once per user.
    pub fn publish_to_users<I>(&self, users: I, event: &BrokerEvent) -> usize
    where
        I: IntoIterator<Item = Uuid>,
    {
        let unique: HashSet<Uuid> = users.into_iter().collect();
        unique
            .into_iter()
            .map(|user_id| self.publish(&GroupKey::User(user_id), event))
            .sum()
    }

    /// Pushes an event to every registered connection.
    pub fn publish_all(&self, event: &BrokerEvent) -> usize {
        let mut dead = Vec::new();
        let delivered = self
            .connections
            .iter()
            .filter(|entry| {
                let ok = entry.sender.send(event.clone()).is_ok();
                if !ok {
                    dead.push(*entry.key());
                }
                ok
            })
            .count();
        self.prune(dead);
        debug!(event = event.kind(), delivered, "published to all connections");
        delivered
    }

    pub fn group_size(&self, group: &GroupKey) -> usize {
        self.groups.get(group).map(|members| members.len()).unwrap_or(0)
    }

    pub fn is_user_connected(&self, user_id: Uuid) -> bool {
        self.group_size(&GroupKey::User(user_id)) > 0
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

//=========================================================================================
// ConnectionGuard
//=========================================================================================

/// Ties a connection's group memberships to its lifetime.
pub struct ConnectionGuard {
    router: Arc<FanoutRouter>,
    id: ConnectionId,
    user_id: Uuid,
    session_id: Uuid,
    first_for_user: bool,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn subscribe(&self, group: GroupKey) -> bool {
        self.router.subscribe(self.id, group)
    }

    pub fn unsubscribe(&self, group: GroupKey) {
        self.router.unsubscribe(self.id, group)
    }

    /// Whether this was the user's only connection when it registered.
    pub fn is_first_for_user(&self) -> bool {
        self.first_for_user
    }

    /// Unregisters now and reports whether the user has no connection left.
    pub fn release(self) -> bool {
        match self.router.unregister(self.id) {
            Some(last) => last,
            // Already pruned after a failed send.
            None => !self.router.is_user_connected(self.user_id),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.router.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (EventSender, mpsc::UnboundedReceiver<BrokerEvent>) {
        mpsc::unbounded_channel()
    }

    fn revoked(session_id: Uuid) -> BrokerEvent {
        BrokerEvent::SessionRevoked { session_id }
    }

    #[test]
    fn session_group_targets_only_that_session() {
        let router = Arc::new(FanoutRouter::new());
        let user = Uuid::new_v4();
        let (s1, s2) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let _c1 = router.register(user, s1, tx1);
        let _c2 = router.register(user, s2, tx2);

        assert_eq!(router.publish(&GroupKey::Session(s2), &revoked(s2)), 1);
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().ok(), Some(revoked(s2)));
    }

    #[test]
    fn user_group_reaches_every_device() {
        let router = Arc::new(FanoutRouter::new());
        let user = Uuid::new_v4();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let _c1 = router.register(user, Uuid::new_v4(), tx1);
        let _c2 = router.register(user, Uuid::new_v4(), tx2);

        let event = BrokerEvent::RoomJoined { room_id: Uuid::new_v4() };
        assert_eq!(router.publish(&GroupKey::User(user), &event), 2);
        assert_eq!(rx1.try_recv().ok(), Some(event.clone()));
        assert_eq!(rx2.try_recv().ok(), Some(event));
    }

    #[test]
    fn dropping_guard_leaves_all_groups() {
        let router = Arc::new(FanoutRouter::new());
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();
        let room = Uuid::new_v4();
        let (tx, _rx) = channel();
        let guard = router.register(user, session, tx);
        assert!(guard.subscribe(GroupKey::Room(room)));
        assert_eq!(router.group_size(&GroupKey::Room(room)), 1);

        drop(guard);

        assert_eq!(router.connection_count(), 0);
        assert!(!router.is_user_connected(user));
        assert_eq!(router.group_size(&GroupKey::Session(session)), 0);
        assert_eq!(router.group_size(&GroupKey::Room(room)), 0);
    }

    #[test]
    fn publish_to_users_delivers_once_per_user() {
        let router = Arc::new(FanoutRouter::new());
        let user = Uuid::new_v4();
        let (tx, mut rx) = channel();
        let _c = router.register(user, Uuid::new_v4(), tx);

        let event = BrokerEvent::RoomLeft { room_id: Uuid::new_v4() };
        assert_eq!(router.publish_to_users(vec![user, user], &event), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receivers_are_pruned() {
        let router = Arc::new(FanoutRouter::new());
        let user = Uuid::new_v4();
        let (tx, rx) = channel();
        let _c = router.register(user, Uuid::new_v4(), tx);
        drop(rx);

        let event = BrokerEvent::RoomDeleted { room_id: Uuid::new_v4() };
        assert_eq!(router.publish(&GroupKey::User(user), &event), 0);
        assert_eq!(router.group_size(&GroupKey::User(user)), 0);
    }

    #[test]
    fn publish_all_prunes_leaked_connections() {
        let router = Arc::new(FanoutRouter::new());
        let user = Uuid::new_v4();
        let (tx, rx) = channel();
        let (live_tx, mut live_rx) = channel();
        std::mem::forget(router.register(user, Uuid::new_v4(), tx));
        let _live = router.register(Uuid::new_v4(), Uuid::new_v4(), live_tx);
        drop(rx);

        let event = BrokerEvent::RoomDeleted { room_id: Uuid::new_v4() };
        assert_eq!(router.publish_all(&event), 1);
        assert_eq!(router.connection_count(), 1);
        assert!(!router.is_user_connected(user));
        assert_eq!(live_rx.try_recv().ok(), Some(event.clone()));

        assert_eq!(router.publish_all(&event), 1);
    }

    #[test]
    fn first_and_last_connection_are_flagged() {
        let router = Arc::new(FanoutRouter::new());
        let user = Uuid::new_v4();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let c1 = router.register(user, Uuid::new_v4(), tx1);
        let c2 = router.register(user, Uuid::new_v4(), tx2);
        assert!(c1.is_first_for_user());
        assert!(!c2.is_first_for_user());

        assert!(!c1.release());
        assert!(c2.release());
        assert_eq!(router.connection_count(), 0);
    }

    #[test]
    fn release_after_pruning_still_reports_offline() {
        let router = Arc::new(FanoutRouter::new());
        let user = Uuid::new_v4();
        let (tx, rx) = channel();
        let guard = router.register(user, Uuid::new_v4(), tx);
        drop(rx);

        router.publish(&GroupKey::User(user), &revoked(guard.session_id()));
        assert_eq!(router.connection_count(), 0);
        assert!(guard.release());
    }

    #[test]
    fn concurrent_connections_flag_exactly_one_first_and_last() {
        let router = Arc::new(FanoutRouter::new());
        let user = Uuid::new_v4();
        let threads = 8;
        let barrier = std::sync::Barrier::new(threads);
        let firsts = std::sync::atomic::AtomicUsize::new(0);
        let lasts = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    let (tx, _rx) = channel();
                    let guard = router.register(user, Uuid::new_v4(), tx);
                    if guard.is_first_for_user() {
                        firsts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                    barrier.wait();
                    if guard.release() {
                        lasts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(firsts.into_inner(), 1);
        assert_eq!(lasts.into_inner(), 1);
        assert!(!router.is_user_connected(user));
    }

    #[test]
    fn leaving_user_is_detached_from_room_group() {
        let router = Arc::new(FanoutRouter::new());
        let user = Uuid::new_v4();
        let room = Uuid::new_v4();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let c1 = router.register(user, Uuid::new_v4(), tx1);
        let c2 = router.register(user, Uuid::new_v4(), tx2);
        c1.subscribe(GroupKey::Room(room));
        c2.subscribe(GroupKey::Room(room));

        router.unsubscribe_user(user, GroupKey::Room(room));
        assert_eq!(router.group_size(&GroupKey::Room(room)), 0);
        assert!(router.is_user_connected(user));
    }

    #[test]
    fn dissolved_group_is_gone() {
        let router = Arc::new(FanoutRouter::new());
        let room = Uuid::new_v4();
        let (tx, _rx) = channel();
        let guard = router.register(Uuid::new_v4(), Uuid::new_v4(), tx);
        guard.subscribe(GroupKey::Room(room));

        router.dissolve(&GroupKey::Room(room));
        assert_eq!(router.group_size(&GroupKey::Room(room)), 0);
        drop(guard);
        assert_eq!(router.connection_count(), 0);
    }

    #[test]
    fn unsubscribe_stops_room_traffic() {
        let router = Arc::new(FanoutRouter::new());
        let room = Uuid::new_v4();
        let (tx, mut rx) = channel();
        let guard = router.register(Uuid::new_v4(), Uuid::new_v4(), tx);
        guard.subscribe(GroupKey::Room(room));
        guard.unsubscribe(GroupKey::Room(room));

        let event = BrokerEvent::RoomDeleted { room_id: room };
        assert_eq!(router.publish(&GroupKey::Room(room), &event), 0);
        assert!(rx.try_recv().is_err());
    }
}
