//! Store records to wire DTOs.

use alumni_shared::protocol::{MessageDto, ReceiptDto, RoomDto};
use alumni_store::{Message, Receipt, Room};

pub fn message_dto(message: &Message) -> MessageDto {
    MessageDto {
        id: message.id,
        room_id: message.room_id,
        sender: message.sender,
        sequence: message.seq,
        text: message.text.clone(),
        media_url: message.media_url.clone(),
        message_type: message.message_type,
        status: message.status,
        delivered_to: message.delivered_to.iter().map(receipt_dto).collect(),
        read_by: message.read_by.iter().map(receipt_dto).collect(),
        created_at: message.created_at,
    }
}

/// `room` as seen by one member, with their own unread count.
pub fn room_dto(room: &Room, last_message: Option<&Message>, unread_count: u32) -> RoomDto {
    RoomDto {
        id: room.id,
        name: room.name.clone(),
        is_group: room.is_group,
        members: room.members.clone(),
        admins: room.admins.clone(),
        avatar_url: room.avatar_url.clone(),
        last_message: last_message.map(message_dto),
        unread_count,
        created_at: room.created_at,
        updated_at: room.updated_at,
    }
}

fn receipt_dto(receipt: &Receipt) -> ReceiptDto {
    ReceiptDto {
        user_id: receipt.user_id,
        at: receipt.at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alumni_shared::types::{MessageId, MessageStatus, MessageType, RoomId, UserId};
    use chrono::Utc;

    #[test]
    fn room_view_serializes_camel_case() {
        let a = UserId::new();
        let now = Utc::now();
        let room = Room {
            id: RoomId::new(),
            name: "Group Chat".into(),
            is_group: true,
            members: vec![a],
            admins: vec![a],
            avatar_url: None,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        };
        let message = Message {
            seq: 7,
            id: MessageId::new(),
            room_id: room.id,
            sender: a,
            text: Some("hi".into()),
            media_url: None,
            message_type: MessageType::Text,
            status: MessageStatus::Sent,
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            created_at: now,
        };

        let json = serde_json::to_value(room_dto(&room, Some(&message), 3)).unwrap();
        assert_eq!(json["unreadCount"], 3);
        assert_eq!(json["isGroup"], true);
        assert_eq!(json["lastMessage"]["sequence"], 7);
        assert_eq!(json["lastMessage"]["messageType"], "text");
    }
}
