//! Like and comment broadcasts for the post feed.
//!
//! Posts and comments are owned by an external collaborator; this relay only
//! forwards snapshots it is handed to whoever is viewing the post.

use std::collections::BTreeSet;

use tracing::debug;

use alumni_shared::protocol::{FeedEvent, ServerEvent};
use alumni_shared::types::{CommentId, ConnectionId, PostId, UserId};

use crate::hub::{Channel, EventHub};

#[derive(Clone)]
pub struct FeedRelay {
    hub: EventHub,
}

impl FeedRelay {
    pub fn new(hub: EventHub) -> Self {
        Self { hub }
    }

    pub async fn join_post(&self, conn: ConnectionId, post: PostId) -> bool {
        self.hub.subscribe(conn, Channel::Post(post)).await
    }

    pub async fn leave_post(&self, conn: ConnectionId, post: PostId) {
        self.hub.unsubscribe(conn, &Channel::Post(post)).await;
    }

    pub async fn post_liked(&self, post: PostId, liked_by: Vec<UserId>) -> usize {
        let liked_user_ids = dedup(liked_by);
        let event = ServerEvent::PostLikeUpdate {
            post_id: post,
            likes_count: liked_user_ids.len(),
            liked_user_ids,
        };
        self.hub.publish(&Channel::Post(post), event).await
    }

    pub async fn comment_liked(&self, post: PostId, comment: CommentId, liked_by: Vec<UserId>) -> usize {
        let liked_user_ids = dedup(liked_by);
        let event = ServerEvent::CommentLikeUpdate {
            comment_id: comment,
            likes_count: liked_user_ids.len(),
            liked_user_ids,
        };
        self.hub.publish(&Channel::Post(post), event).await
    }

    /// Forward an event pushed by the posts collaborator. New posts go to
    /// every connection, everything else to the post's viewers.
    pub async fn apply(&self, event: FeedEvent) -> usize {
        let delivered = match event {
            FeedEvent::NewPost { post } => self.hub.broadcast(ServerEvent::NewPost { post }).await,
            FeedEvent::NewComment {
                post_id,
                comment,
                parent_comment,
            } => {
                let event = ServerEvent::NewComment {
                    comment,
                    parent_comment,
                };
                self.hub.publish(&Channel::Post(post_id), event).await
            }
            FeedEvent::CommentEdited { post_id, comment } => {
                self.hub
                    .publish(&Channel::Post(post_id), ServerEvent::CommentEdited { comment })
                    .await
            }
            FeedEvent::CommentDeleted {
                post_id,
                comment_id,
                parent_comment,
            } => {
                let event = ServerEvent::CommentDeleted {
                    comment_id,
                    parent_comment,
                };
                self.hub.publish(&Channel::Post(post_id), event).await
            }
            FeedEvent::PostLikeUpdate {
                post_id,
                liked_user_ids,
            } => self.post_liked(post_id, liked_user_ids).await,
            FeedEvent::CommentLikeUpdate {
                post_id,
                comment_id,
                liked_user_ids,
            } => self.comment_liked(post_id, comment_id, liked_user_ids).await,
        };

        debug!(delivered, "Feed event relayed");
        delivered
    }
}

/// Unique ids in first-seen order.
fn dedup(ids: Vec<UserId>) -> Vec<UserId> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
