use alumni_shared::types::{RoomId, UserId};

use crate::error::Result;
use crate::SharedDatabase;

/// Per-(room, user) unread counters backed by atomic SQL upserts.
#[derive(Clone)]
pub struct UnreadCounter {
    db: SharedDatabase,
}

impl UnreadCounter {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub async fn increment(&self, room: RoomId, user: UserId) -> Result<()> {
        Ok(self.db.lock().await.increment_unread(room, user)?)
    }

    pub async fn reset(&self, room: RoomId, user: UserId) -> Result<()> {
        Ok(self.db.lock().await.reset_unread(room, user)?)
    }

    pub async fn get(&self, room: RoomId, user: UserId) -> Result<u32> {
        Ok(self.db.lock().await.get_unread(room, user)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::Mutex;

    use alumni_store::{Database, Room};

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let now = Utc::now();
        let room = Room {
            id: RoomId::new(),
            name: "Direct Chat".into(),
            is_group: false,
            members: vec![a, b],
            admins: Vec::new(),
            avatar_url: None,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_room(&room).unwrap();
        let counter = UnreadCounter::new(Arc::new(Mutex::new(db)));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let counter = counter.clone();
                tokio::spawn(async move { counter.increment(room.id, b).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(counter.get(room.id, b).await.unwrap(), 20);
        counter.reset(room.id, b).await.unwrap();
        assert_eq!(counter.get(room.id, b).await.unwrap(), 0);
    }
}
