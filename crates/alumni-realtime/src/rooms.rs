//! Room membership, admin rights and per-member room views.

use chrono::Utc;
use tracing::{debug, info};

use alumni_shared::constants::{DEFAULT_DIRECT_NAME, DEFAULT_GROUP_NAME};
use alumni_shared::protocol::RoomDto;
use alumni_shared::types::{ConnectionId, RoomId, UserId};
use alumni_store::{Database, Room, StoreError};

use crate::error::{ChatError, Result};
use crate::hub::{Channel, EventHub};
use crate::unread::UnreadCounter;
use crate::views::room_dto;
use crate::SharedDatabase;

/// Result of [`RoomRegistry::create`].
#[derive(Debug, Clone)]
pub struct Created {
    pub room: Room,
    /// `false` when an existing direct room was returned.
    pub created: bool,
}

/// Result of [`RoomRegistry::leave_group`].
#[derive(Debug, Clone)]
pub enum LeaveOutcome {
    /// The user left; `promoted` is set when the first remaining member
    /// inherited admin rights.
    Left { room: Room, promoted: Option<UserId> },
    /// The user was the last member and the room is gone.
    Deleted { room_id: RoomId },
}

#[derive(Clone)]
pub struct RoomRegistry {
    db: SharedDatabase,
    hub: EventHub,
    unread: UnreadCounter,
}

impl RoomRegistry {
    pub fn new(db: SharedDatabase, hub: EventHub) -> Self {
        let unread = UnreadCounter::new(db.clone());
        Self { db, hub, unread }
    }

    /// Open a conversation. A two-person direct request returns the existing
    /// room for that pair when there is one.
    pub async fn create(
        &self,
        initiator: UserId,
        member_ids: &[UserId],
        is_group: bool,
        name: Option<String>,
    ) -> Result<Created> {
        if member_ids.is_empty() {
            return Err(ChatError::BadRequest("At least one member is required".into()));
        }

        let mut members = vec![initiator];
        for id in member_ids {
            if !members.contains(id) {
                members.push(*id);
            }
        }
        if members.len() < 2 {
            return Err(ChatError::BadRequest("A room needs at least two members".into()));
        }

        let db = self.db.lock().await;
        if !is_group && members.len() == 2 {
            if let Some(existing) = db.find_direct_room(members[0], members[1])? {
                debug!(room = %existing.id, "Reusing direct room");
                return Ok(Created {
                    room: existing,
                    created: false,
                });
            }
        }

        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| {
                let default = if is_group { DEFAULT_GROUP_NAME } else { DEFAULT_DIRECT_NAME };
                default.to_string()
            });
        let now = Utc::now();
        let room = Room {
            id: RoomId::new(),
            name,
            is_group,
            admins: if is_group { vec![initiator] } else { Vec::new() },
            members,
            avatar_url: None,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_room(&room)?;

        info!(
            room = %room.id,
            initiator = %initiator,
            members = room.members.len(),
            is_group,
            "Room created"
        );
        Ok(Created { room, created: true })
    }

    /// Attach a connection to the room channel and zero the user's counter.
    pub async fn join(&self, user: UserId, conn: ConnectionId, room_id: RoomId) -> Result<Room> {
        let room = self.require_member(room_id, user).await?;
        self.hub.subscribe(conn, Channel::Room(room_id)).await;
        self.unread.reset(room_id, user).await?;
        debug!(room = %room_id, user = %user, connection = %conn, "Joined room");
        Ok(room)
    }

    /// Detach a connection from the room channel. Membership is unchanged.
    pub async fn leave(&self, conn: ConnectionId, room_id: RoomId) {
        self.hub.unsubscribe(conn, &Channel::Room(room_id)).await;
    }

    /// Add new members to a group. Returns the room and the ids actually added.
    pub async fn add_members(
        &self,
        actor: UserId,
        room_id: RoomId,
        member_ids: &[UserId],
    ) -> Result<(Room, Vec<UserId>)> {
        let db = self.db.lock().await;
        let room = load_group(&db, room_id)?;
        require_admin(&room, actor)?;

        let added = db.add_room_members(room_id, member_ids)?;
        if !added.is_empty() {
            db.set_room_updated(room_id, Utc::now())?;
        }
        info!(room = %room_id, actor = %actor, added = added.len(), "Members added");
        Ok((db.get_room(room_id)?, added))
    }

    pub async fn promote_admin(&self, actor: UserId, room_id: RoomId, target: UserId) -> Result<Room> {
        let db = self.db.lock().await;
        let room = load_group(&db, room_id)?;
        require_admin(&room, actor)?;
        if !room.is_member(&target) {
            return Err(ChatError::NotFound("User is not a member of this room".into()));
        }
        if room.is_admin(&target) {
            return Err(ChatError::Conflict("User is already an admin".into()));
        }

        db.add_room_admin(room_id, target)?;
        db.set_room_updated(room_id, Utc::now())?;
        info!(room = %room_id, actor = %actor, target = %target, "Admin promoted");
        Ok(db.get_room(room_id)?)
    }

    /// Remove another member from a group. The target's connections stop
    /// receiving room events.
    pub async fn remove_member(&self, actor: UserId, room_id: RoomId, target: UserId) -> Result<Room> {
        if actor == target {
            return Err(ChatError::BadRequest("Use leave to remove yourself".into()));
        }

        let room = {
            let db = self.db.lock().await;
            let room = load_group(&db, room_id)?;
            require_admin(&room, actor)?;
            db.atomically(|db| -> Result<Room> {
                if !db.remove_room_member(room_id, target)? {
                    return Err(ChatError::NotFound("User is not a member of this room".into()));
                }
                db.set_room_updated(room_id, Utc::now())?;
                Ok(db.get_room(room_id)?)
            })?
        };

        self.hub.unsubscribe_user(target, &Channel::Room(room_id)).await;
        info!(room = %room_id, actor = %actor, target = %target, "Member removed");
        Ok(room)
    }

    /// Leave a room for good. The last member out deletes it along with its
    /// messages; the last admin out hands admin rights to the first member.
    pub async fn leave_group(&self, user: UserId, room_id: RoomId) -> Result<LeaveOutcome> {
        let outcome = {
            let db = self.db.lock().await;
            let room = load_room(&db, room_id)?;
            if !room.is_member(&user) {
                return Err(ChatError::NotFound("Not a member of this room".into()));
            }

            db.atomically(|db| -> Result<LeaveOutcome> {
                db.remove_room_member(room_id, user)?;
                let mut room = db.get_room(room_id)?;
                if room.members.is_empty() {
                    db.delete_room(room_id)?;
                    return Ok(LeaveOutcome::Deleted { room_id });
                }

                let promoted = match (room.is_group, room.admins.is_empty()) {
                    (true, true) => {
                        let heir = room.members[0];
                        db.add_room_admin(room_id, heir)?;
                        room.admins.push(heir);
                        Some(heir)
                    }
                    _ => None,
                };
                db.set_room_updated(room_id, Utc::now())?;
                Ok(LeaveOutcome::Left { room, promoted })
            })?
        };

        self.hub.unsubscribe_user(user, &Channel::Room(room_id)).await;
        match &outcome {
            LeaveOutcome::Deleted { .. } => info!(room = %room_id, user = %user, "Last member left, room deleted"),
            LeaveOutcome::Left { promoted, .. } => {
                info!(room = %room_id, user = %user, promoted = ?promoted, "Member left")
            }
        }
        Ok(outcome)
    }

    pub async fn get(&self, room_id: RoomId) -> Result<Room> {
        load_room(&*self.db.lock().await, room_id)
    }

    /// `NotFound` for an unknown room, `Forbidden` for a non-member.
    pub async fn require_member(&self, room_id: RoomId, user: UserId) -> Result<Room> {
        let room = self.get(room_id).await?;
        if !room.is_member(&user) {
            return Err(ChatError::Forbidden("Not a member of this room".into()));
        }
        Ok(room)
    }

    /// The user's rooms, most recently active first, each with their unread count.
    pub async fn list_for(&self, user: UserId) -> Result<Vec<RoomDto>> {
        let db = self.db.lock().await;
        let rooms = db.list_rooms_for_user(user)?;
        rooms.iter().map(|room| view(&db, room, user)).collect()
    }

    /// `room` as `viewer` sees it.
    pub async fn view(&self, room: &Room, viewer: UserId) -> Result<RoomDto> {
        view(&*self.db.lock().await, room, viewer)
    }
}

fn view(db: &Database, room: &Room, viewer: UserId) -> Result<RoomDto> {
    let last = match room.last_message_id {
        Some(id) => match db.get_message(id) {
            Ok(message) => Some(message),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };
    let unread = db.get_unread(room.id, viewer)?;
    Ok(room_dto(room, last.as_ref(), unread))
}

fn load_room(db: &Database, room_id: RoomId) -> Result<Room> {
    db.get_room(room_id).map_err(|e| match e {
        StoreError::NotFound => ChatError::NotFound("Room not found".into()),
        other => other.into(),
    })
}

fn load_group(db: &Database, room_id: RoomId) -> Result<Room> {
    let room = load_room(db, room_id)?;
    if !room.is_group {
        return Err(ChatError::NotFound("Group not found".into()));
    }
    Ok(room)
}

fn require_admin(room: &Room, actor: UserId) -> Result<()> {
    if !room.is_admin(&actor) {
        return Err(ChatError::Forbidden("Only group admins can do this".into()));
    }
    Ok(())
}
