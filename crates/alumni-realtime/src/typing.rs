//! Ephemeral typing indicators, one entry per (room, user).
//!
//! Entries live only in memory and have no timeout: they disappear on
//! stop-typing, on send, on disconnect, or when the member leaves the room.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use alumni_shared::protocol::ServerEvent;
use alumni_shared::types::{RoomId, UserId};

use crate::error::Result;
use crate::hub::{Channel, EventHub};
use crate::SharedDatabase;

type Entries = HashMap<RoomId, HashMap<UserId, DateTime<Utc>>>;

#[derive(Clone)]
pub struct TypingTracker {
    db: SharedDatabase,
    hub: EventHub,
    entries: Arc<Mutex<Entries>>,
}

impl TypingTracker {
    pub fn new(db: SharedDatabase, hub: EventHub) -> Self {
        Self {
            db,
            hub,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Insert or refresh the entry and tell the rest of the room.
    /// Non-members and unknown rooms are ignored.
    pub async fn start_typing(&self, user: UserId, room: RoomId) -> Result<()> {
        if !self.db.lock().await.is_member(room, user)? {
            debug!(room = %room, user = %user, "Ignoring typing from non-member");
            return Ok(());
        }

        self.entries
            .lock()
            .await
            .entry(room)
            .or_default()
            .insert(user, Utc::now());

        self.announce(room, user, true).await;
        Ok(())
    }

    pub async fn stop_typing(&self, user: UserId, room: RoomId) -> Result<()> {
        if self.remove(room, user).await || self.db.lock().await.is_member(room, user)? {
            self.announce(room, user, false).await;
        }
        Ok(())
    }

    /// Drop the entry if present, announcing the stop. Returns whether one existed.
    pub async fn clear(&self, user: UserId, room: RoomId) -> bool {
        let removed = self.remove(room, user).await;
        if removed {
            self.announce(room, user, false).await;
        }
        removed
    }

    /// Remove every entry held by `user`. Returns the affected rooms.
    pub async fn cleanup_on_disconnect(&self, user: UserId) -> Vec<RoomId> {
        let rooms: Vec<RoomId> = {
            let mut entries = self.entries.lock().await;
            let rooms: Vec<RoomId> = entries
                .iter_mut()
                .filter_map(|(room, typists)| typists.remove(&user).map(|_| *room))
                .collect();
            entries.retain(|_, typists| !typists.is_empty());
            rooms
        };

        for room in &rooms {
            self.announce(*room, user, false).await;
        }
        rooms
    }

    pub async fn list_typing(&self, room: RoomId) -> BTreeSet<UserId> {
        self.entries
            .lock()
            .await
            .get(&room)
            .map(|typists| typists.keys().copied().collect())
            .unwrap_or_default()
    }

    async fn remove(&self, room: RoomId, user: UserId) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(typists) = entries.get_mut(&room) else {
            return false;
        };
        let removed = typists.remove(&user).is_some();
        if typists.is_empty() {
            entries.remove(&room);
        }
        removed
    }

    async fn announce(&self, room: RoomId, user: UserId, is_typing: bool) {
        let event = ServerEvent::UserTyping {
            room_id: room,
            user_id: user,
            is_typing,
        };
        self.hub
            .publish_except(&Channel::Room(room), event, user)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alumni_shared::types::ConnectionId;
    use alumni_store::{Database, Room};

    async fn setup(members: &[UserId]) -> (TypingTracker, EventHub, RoomId) {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let room = Room {
            id: RoomId::new(),
            name: "Group Chat".into(),
            is_group: true,
            members: members.to_vec(),
            admins: vec![members[0]],
            avatar_url: None,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_room(&room).unwrap();

        let hub = EventHub::new();
        let tracker = TypingTracker::new(Arc::new(Mutex::new(db)), hub.clone());
        (tracker, hub, room.id)
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (alice, bob) = (UserId::new(), UserId::new());
        let (typing, hub, room) = setup(&[alice, bob]).await;

        let (a_conn, b_conn) = (ConnectionId::new(), ConnectionId::new());
        let mut a_rx = hub.register(a_conn, alice).await;
        let mut b_rx = hub.register(b_conn, bob).await;
        hub.subscribe(a_conn, Channel::Room(room)).await;
        hub.subscribe(b_conn, Channel::Room(room)).await;

        typing.start_typing(alice, room).await.unwrap();
        assert_eq!(typing.list_typing(room).await, BTreeSet::from([alice]));
        assert_eq!(
            b_rx.try_recv().unwrap(),
            ServerEvent::UserTyping { room_id: room, user_id: alice, is_typing: true }
        );
        assert!(a_rx.try_recv().is_err());

        typing.stop_typing(alice, room).await.unwrap();
        assert!(typing.list_typing(room).await.is_empty());
        assert_eq!(
            b_rx.try_recv().unwrap(),
            ServerEvent::UserTyping { room_id: room, user_id: alice, is_typing: false }
        );
    }

    #[tokio::test]
    async fn test_non_member_is_ignored() {
        let (typing, _hub, room) = setup(&[UserId::new(), UserId::new()]).await;
        let outsider = UserId::new();

        typing.start_typing(outsider, room).await.unwrap();
        typing.start_typing(outsider, RoomId::new()).await.unwrap();
        assert!(typing.list_typing(room).await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_keeps_single_entry() {
        let alice = UserId::new();
        let (typing, _hub, room) = setup(&[alice, UserId::new()]).await;

        typing.start_typing(alice, room).await.unwrap();
        typing.start_typing(alice, room).await.unwrap();
        assert_eq!(typing.list_typing(room).await.len(), 1);
        assert!(typing.clear(alice, room).await);
        assert!(!typing.clear(alice, room).await);
    }

    #[tokio::test]
    async fn test_cleanup_on_disconnect() {
        let (alice, bob) = (UserId::new(), UserId::new());
        let (typing, hub, room) = setup(&[alice, bob]).await;
        let b_conn = ConnectionId::new();
        let mut b_rx = hub.register(b_conn, bob).await;
        hub.subscribe(b_conn, Channel::Room(room)).await;

        typing.start_typing(alice, room).await.unwrap();
        typing.start_typing(bob, room).await.unwrap();
        let _ = b_rx.try_recv();

        assert_eq!(typing.cleanup_on_disconnect(alice).await, vec![room]);
        assert_eq!(typing.list_typing(room).await, BTreeSet::from([bob]));
        assert!(matches!(
            b_rx.try_recv().unwrap(),
            ServerEvent::UserTyping { is_typing: false, .. }
        ));
        assert!(typing.cleanup_on_disconnect(alice).await.is_empty());
    }
}
