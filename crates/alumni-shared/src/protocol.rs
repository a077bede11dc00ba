use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{
    CommentId, MessageId, MessageStatus, MessageType, PostId, RoomId, UserId,
};

/// Events a client may send over its live connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    SendMessage {
        room_id: RoomId,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        media_url: Option<String>,
    },
    MarkAsRead {
        room_id: RoomId,
        message_ids: Vec<MessageId>,
    },
    TypingStart {
        room_id: RoomId,
    },
    TypingStop {
        room_id: RoomId,
    },
    GetOnlineUsers,
    JoinPost {
        post_id: PostId,
    },
    LeavePost {
        post_id: PostId,
    },
    /// Like snapshot returned by the posts collaborator, relayed to viewers.
    PostLiked {
        post_id: PostId,
        liked_user_ids: Vec<UserId>,
    },
    CommentLiked {
        comment_id: CommentId,
        post_id: PostId,
        liked_user_ids: Vec<UserId>,
    },
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "joinRoom",
            Self::LeaveRoom { .. } => "leaveRoom",
            Self::SendMessage { .. } => "sendMessage",
            Self::MarkAsRead { .. } => "markAsRead",
            Self::TypingStart { .. } => "typingStart",
            Self::TypingStop { .. } => "typingStop",
            Self::GetOnlineUsers => "getOnlineUsers",
            Self::JoinPost { .. } => "joinPost",
            Self::LeavePost { .. } => "leavePost",
            Self::PostLiked { .. } => "postLiked",
            Self::CommentLiked { .. } => "commentLiked",
        }
    }
}

/// Events the server pushes to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    NewMessage {
        message: MessageDto,
    },
    RoomUpdated {
        room: RoomDto,
    },
    MessageRead {
        message_id: MessageId,
        room_id: RoomId,
        read_by: UserId,
        read_at: DateTime<Utc>,
    },
    MessagesDelivered {
        room_id: RoomId,
        message_ids: Vec<MessageId>,
        delivered_to: UserId,
    },
    UserTyping {
        room_id: RoomId,
        user_id: UserId,
        is_typing: bool,
    },
    UserOnline {
        user_id: UserId,
    },
    UserOffline {
        user_id: UserId,
    },
    OnlineUsers {
        user_ids: Vec<UserId>,
    },
    PostLikeUpdate {
        post_id: PostId,
        likes_count: usize,
        liked_user_ids: Vec<UserId>,
    },
    CommentLikeUpdate {
        comment_id: CommentId,
        likes_count: usize,
        liked_user_ids: Vec<UserId>,
    },
    NewPost {
        post: serde_json::Value,
    },
    NewComment {
        comment: serde_json::Value,
        parent_comment: Option<CommentId>,
    },
    CommentEdited {
        comment: serde_json::Value,
    },
    CommentDeleted {
        comment_id: CommentId,
        parent_comment: Option<CommentId>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "newMessage",
            Self::RoomUpdated { .. } => "roomUpdated",
            Self::MessageRead { .. } => "messageRead",
            Self::MessagesDelivered { .. } => "messagesDelivered",
            Self::UserTyping { .. } => "userTyping",
            Self::UserOnline { .. } => "userOnline",
            Self::UserOffline { .. } => "userOffline",
            Self::OnlineUsers { .. } => "onlineUsers",
            Self::PostLikeUpdate { .. } => "postLikeUpdate",
            Self::CommentLikeUpdate { .. } => "commentLikeUpdate",
            Self::NewPost { .. } => "newPost",
            Self::NewComment { .. } => "newComment",
            Self::CommentEdited { .. } => "commentEdited",
            Self::CommentDeleted { .. } => "commentDeleted",
            Self::Error { .. } => "error",
        }
    }
}

/// Post/comment activity pushed by the posts collaborator for fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FeedEvent {
    NewPost {
        post: serde_json::Value,
    },
    NewComment {
        post_id: PostId,
        comment: serde_json::Value,
        #[serde(default)]
        parent_comment: Option<CommentId>,
    },
    CommentEdited {
        post_id: PostId,
        comment: serde_json::Value,
    },
    CommentDeleted {
        post_id: PostId,
        comment_id: CommentId,
        #[serde(default)]
        parent_comment: Option<CommentId>,
    },
    PostLikeUpdate {
        post_id: PostId,
        liked_user_ids: Vec<UserId>,
    },
    CommentLikeUpdate {
        post_id: PostId,
        comment_id: CommentId,
        liked_user_ids: Vec<UserId>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDto {
    pub user_id: UserId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender: UserId,
    /// Server-assigned persistence order within the room.
    pub sequence: i64,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub delivered_to: Vec<ReceiptDto>,
    pub read_by: Vec<ReceiptDto>,
    pub created_at: DateTime<Utc>,
}

/// A room as seen by one member: carries that member's unread count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    pub id: RoomId,
    pub name: String,
    pub is_group: bool,
    pub members: Vec<UserId>,
    pub admins: Vec<UserId>,
    pub avatar_url: Option<String>,
    pub last_message: Option<MessageDto>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_shape() {
        let room = RoomId::new();
        let raw = format!(r#"{{"event":"sendMessage","roomId":"{room}","text":"hi"}}"#);
        let event = ClientEvent::from_json(&raw).unwrap();

        assert_eq!(
            event,
            ClientEvent::SendMessage {
                room_id: room,
                text: Some("hi".into()),
                media_url: None,
            }
        );
        assert_eq!(event.name(), "sendMessage");
    }

    #[test]
    fn test_unit_client_event() {
        let event = ClientEvent::from_json(r#"{"event":"getOnlineUsers"}"#).unwrap();
        assert_eq!(event, ClientEvent::GetOnlineUsers);
    }

    #[test]
    fn test_unknown_or_malformed_event_is_rejected() {
        assert!(ClientEvent::from_json(r#"{"event":"dropTables"}"#).is_err());
        assert!(ClientEvent::from_json(r#"{"event":"joinRoom","roomId":"nope"}"#).is_err());
        assert!(ClientEvent::from_json("not json").is_err());
    }

    #[test]
    fn test_server_event_tag_matches_name() {
        let event = ServerEvent::UserTyping {
            room_id: RoomId::new(),
            user_id: UserId::new(),
            is_typing: true,
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["event"], event.name());
        assert_eq!(value["isTyping"], true);
    }
}
