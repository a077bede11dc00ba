//! The entry point transports call.
//!
//! [`ChatService`] owns one instance of every component and runs the
//! cross-component flows: persistence first, then fan-out. A failed broadcast
//! is logged and never undoes a committed change.

use tokio::sync::mpsc;
use tracing::{info, warn};

use alumni_shared::protocol::{FeedEvent, MessageDto, RoomDto, ServerEvent};
use alumni_shared::types::{CommentId, ConnectionId, MessageId, PostId, RoomId, UserId};
use alumni_store::Room;

use crate::error::Result;
use crate::feed::FeedRelay;
use crate::hub::{Channel, EventHub};
use crate::messages::{Draft, MessageStore};
use crate::presence::{Departure, PresenceTracker};
use crate::rooms::{LeaveOutcome, RoomRegistry};
use crate::typing::TypingTracker;
use crate::views::message_dto;
use crate::SharedDatabase;

/// One authenticated live connection.
pub struct Session {
    pub id: ConnectionId,
    pub user: UserId,
    /// Outbound events for this connection, drained by the transport.
    pub events: mpsc::Receiver<ServerEvent>,
}

#[derive(Clone)]
pub struct ChatService {
    hub: EventHub,
    presence: PresenceTracker,
    rooms: RoomRegistry,
    messages: MessageStore,
    typing: TypingTracker,
    feed: FeedRelay,
}

impl ChatService {
    pub fn new(db: SharedDatabase) -> Self {
        let hub = EventHub::new();
        Self {
            presence: PresenceTracker::new(db.clone(), hub.clone()),
            rooms: RoomRegistry::new(db.clone(), hub.clone()),
            messages: MessageStore::new(db.clone()),
            typing: TypingTracker::new(db, hub.clone()),
            feed: FeedRelay::new(hub.clone()),
            hub,
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    // ------------------------------------------------------------------
    // Connections and presence
    // ------------------------------------------------------------------

    pub async fn connect(&self, user: UserId) -> Session {
        let id = ConnectionId::new();
        let events = self.hub.register(id, user).await;
        self.presence.connect(user, id).await;
        Session { id, user, events }
    }

    /// Close a connection. Safe to call more than once. Typing entries are
    /// dropped only once the user's last connection is gone.
    pub async fn disconnect(&self, conn: ConnectionId) -> Option<Departure> {
        self.hub.unregister(conn).await;
        let departure = self.presence.disconnect(conn).await?;
        if departure.went_offline {
            self.typing.cleanup_on_disconnect(departure.user).await;
        }
        Some(departure)
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.presence.list_online().await.into_iter().collect()
    }

    pub async fn is_online(&self, user: UserId) -> bool {
        self.presence.is_online(user).await
    }

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    pub async fn create_room(
        &self,
        initiator: UserId,
        member_ids: &[UserId],
        is_group: bool,
        name: Option<String>,
    ) -> Result<RoomDto> {
        let created = self.rooms.create(initiator, member_ids, is_group, name).await?;
        if created.created {
            self.notify_members(&created.room, created.room.members.iter().copied())
                .await;
        }
        self.rooms.view(&created.room, initiator).await
    }

    /// `NotFound` for an unknown room, `Forbidden` unless `user` is a member.
    pub async fn require_member(&self, user: UserId, room_id: RoomId) -> Result<()> {
        self.rooms.require_member(room_id, user).await.map(|_| ())
    }

    pub async fn list_rooms(&self, user: UserId) -> Result<Vec<RoomDto>> {
        self.rooms.list_for(user).await
    }

    /// Start watching a room: subscribe, zero the unread counter and record
    /// delivery of everything the user has not received yet.
    pub async fn join_room(&self, session: &Session, room_id: RoomId) -> Result<RoomDto> {
        self.join_room_as(session.user, session.id, room_id).await
    }

    pub async fn join_room_as(&self, user: UserId, conn: ConnectionId, room_id: RoomId) -> Result<RoomDto> {
        let room = self.rooms.join(user, conn, room_id).await?;
        let delivered = self.messages.mark_delivered(user, room_id).await?;
        if !delivered.is_empty() {
            let event = ServerEvent::MessagesDelivered {
                room_id,
                message_ids: delivered,
                delivered_to: user,
            };
            self.hub.publish(&Channel::Room(room_id), event).await;
        }
        self.rooms.view(&room, user).await
    }

    pub async fn leave_room(&self, conn: ConnectionId, room_id: RoomId) {
        self.rooms.leave(conn, room_id).await;
    }

    pub async fn add_members(&self, actor: UserId, room_id: RoomId, member_ids: &[UserId]) -> Result<RoomDto> {
        let (room, added) = self.rooms.add_members(actor, room_id, member_ids).await?;
        if !added.is_empty() {
            self.notify_members(&room, room.members.iter().copied()).await;
        }
        self.rooms.view(&room, actor).await
    }

    pub async fn promote_admin(&self, actor: UserId, room_id: RoomId, target: UserId) -> Result<RoomDto> {
        let room = self.rooms.promote_admin(actor, room_id, target).await?;
        self.notify_members(&room, room.members.iter().copied()).await;
        self.rooms.view(&room, actor).await
    }

    pub async fn remove_member(&self, actor: UserId, room_id: RoomId, target: UserId) -> Result<RoomDto> {
        let room = self.rooms.remove_member(actor, room_id, target).await?;
        self.typing.clear(target, room_id).await;
        let notified = room.members.iter().copied().chain(std::iter::once(target));
        self.notify_members(&room, notified).await;
        self.rooms.view(&room, actor).await
    }

    pub async fn leave_group(&self, user: UserId, room_id: RoomId) -> Result<LeaveOutcome> {
        let outcome = self.rooms.leave_group(user, room_id).await?;
        self.typing.clear(user, room_id).await;
        if let LeaveOutcome::Left { room, .. } = &outcome {
            self.notify_members(room, room.members.iter().copied()).await;
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Persist a message, clear the sender's typing entry, then push the
    /// message and a refreshed room view to every member's personal channel,
    /// the sender's other connections included.
    pub async fn send_message(&self, sender: UserId, room_id: RoomId, draft: Draft) -> Result<MessageDto> {
        let posted = self.messages.append(sender, room_id, draft).await?;
        self.typing.clear(sender, room_id).await;

        let dto = message_dto(&posted.message);
        for member in &posted.room.members {
            let event = ServerEvent::NewMessage { message: dto.clone() };
            self.hub.publish(&Channel::User(*member), event).await;
        }
        self.notify_members(&posted.room, posted.room.members.iter().copied())
            .await;

        Ok(dto)
    }

    /// Mark messages read. Each sender learns about their newly read
    /// messages; every member gets a refreshed room view.
    pub async fn mark_read(&self, reader: UserId, room_id: RoomId, ids: &[MessageId]) -> Result<Vec<MessageId>> {
        let batch = self.messages.mark_read(reader, room_id, ids).await?;

        for message in &batch.messages {
            let event = ServerEvent::MessageRead {
                message_id: message.id,
                room_id,
                read_by: reader,
                read_at: batch.read_at,
            };
            self.hub.publish(&Channel::User(message.sender), event).await;
        }

        let room = self.rooms.get(room_id).await?;
        self.notify_members(&room, room.members.iter().copied()).await;

        Ok(batch.messages.iter().map(|m| m.id).collect())
    }

    /// A page of history. Loading it counts as reading whatever foreign
    /// messages on the page the user had not read yet.
    pub async fn list_messages(
        &self,
        user: UserId,
        room_id: RoomId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<MessageDto>> {
        let messages = self.messages.list_page(user, room_id, page, page_size).await?;
        let unread: Vec<MessageId> = messages
            .iter()
            .filter(|m| m.sender != user && !m.read_by.iter().any(|r| r.user_id == user))
            .map(|m| m.id)
            .collect();

        if unread.is_empty() {
            return Ok(messages.iter().map(message_dto).collect());
        }

        self.mark_read(user, room_id, &unread).await?;
        let refreshed = self.messages.list_page(user, room_id, page, page_size).await?;
        Ok(refreshed.iter().map(message_dto).collect())
    }

    // ------------------------------------------------------------------
    // Typing
    // ------------------------------------------------------------------

    pub async fn typing_start(&self, user: UserId, room_id: RoomId) -> Result<()> {
        self.typing.start_typing(user, room_id).await
    }

    pub async fn typing_stop(&self, user: UserId, room_id: RoomId) -> Result<()> {
        self.typing.stop_typing(user, room_id).await
    }

    pub async fn typing_in(&self, room_id: RoomId) -> Vec<UserId> {
        self.typing.list_typing(room_id).await.into_iter().collect()
    }

    // ------------------------------------------------------------------
    // Feed
    // ------------------------------------------------------------------

    pub async fn join_post(&self, conn: ConnectionId, post: PostId) {
        self.feed.join_post(conn, post).await;
    }

    pub async fn leave_post(&self, conn: ConnectionId, post: PostId) {
        self.feed.leave_post(conn, post).await;
    }

    pub async fn post_liked(&self, post: PostId, liked_by: Vec<UserId>) {
        self.feed.post_liked(post, liked_by).await;
    }

    pub async fn comment_liked(&self, post: PostId, comment: CommentId, liked_by: Vec<UserId>) {
        self.feed.comment_liked(post, comment, liked_by).await;
    }

    pub async fn ingest_feed_event(&self, event: FeedEvent) -> usize {
        self.feed.apply(event).await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Send each user their own view of `room` on their personal channel.
    async fn notify_members(&self, room: &Room, users: impl IntoIterator<Item = UserId>) {
        let mut notified = 0usize;
        for user in users {
            match self.rooms.view(room, user).await {
                Ok(view) => {
                    notified += self
                        .hub
                        .publish(&Channel::User(user), ServerEvent::RoomUpdated { room: view })
                        .await;
                }
                Err(e) => warn!(room = %room.id, user = %user, "Failed to build room view: {e}"),
            }
        }
        info!(room = %room.id, connections = notified, "Room update fanned out");
    }
}
