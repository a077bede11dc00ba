//! Event fan-out to live connections.
//!
//! Every connection owns a bounded outbound queue. Publishing pushes onto the
//! queue of each subscribed connection with `try_send`: a full or closed queue
//! drops that one event for that one connection and never blocks the caller.
//! Nothing is buffered for users who are offline.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use alumni_shared::constants::{CONNECTION_BUFFER, POST_CHANNEL_PREFIX};
use alumni_shared::protocol::ServerEvent;
use alumni_shared::types::{ConnectionId, PostId, RoomId, UserId};

/// A broadcast destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Personal channel: every connection of one user.
    User(UserId),
    /// Connections currently viewing a chat room.
    Room(RoomId),
    /// Connections currently viewing a feed post.
    Post(PostId),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Room(id) => write!(f, "room:{id}"),
            Self::Post(id) => write!(f, "{POST_CHANNEL_PREFIX}{id}"),
        }
    }
}

struct Connection {
    user: UserId,
    tx: mpsc::Sender<ServerEvent>,
    channels: HashSet<Channel>,
}

#[derive(Default)]
struct HubInner {
    connections: HashMap<ConnectionId, Connection>,
    channels: HashMap<Channel, HashSet<ConnectionId>>,
}

impl HubInner {
    fn attach(&mut self, conn: ConnectionId, channel: Channel) -> bool {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return false;
        };
        connection.channels.insert(channel);
        self.channels.entry(channel).or_default().insert(conn)
    }

    fn detach(&mut self, conn: ConnectionId, channel: &Channel) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.channels.remove(channel);
        }
        let now_empty = match self.channels.get_mut(channel) {
            Some(subscribers) => {
                subscribers.remove(&conn);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.channels.remove(channel);
        }
    }

    fn deliver(&self, conn: &ConnectionId, event: &ServerEvent) -> bool {
        let Some(connection) = self.connections.get(conn) else {
            return false;
        };
        match connection.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                debug!(
                    connection = %conn,
                    user = %connection.user,
                    event = event.name(),
                    "Dropping event for slow or closed connection"
                );
                false
            }
        }
    }
}

/// Registry of live connections and the channels they listen on.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<RwLock<HubInner>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user` and subscribe it to the user's
    /// personal channel. Returns the receiving end of its outbound queue.
    pub async fn register(&self, conn: ConnectionId, user: UserId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
        let mut inner = self.inner.write().await;

        // Re-registering replaces the old queue and its subscriptions.
        if let Some(old) = inner.connections.remove(&conn) {
            for channel in old.channels {
                if let Some(subscribers) = inner.channels.get_mut(&channel) {
                    subscribers.remove(&conn);
                }
            }
        }

        inner.connections.insert(
            conn,
            Connection {
                user,
                tx,
                channels: HashSet::new(),
            },
        );
        inner.attach(conn, Channel::User(user));

        info!(
            connection = %conn,
            user = %user,
            connections = inner.connections.len(),
            "Connection registered"
        );

        rx
    }

    /// Drop a connection and all of its subscriptions. Returns its owner.
    pub async fn unregister(&self, conn: ConnectionId) -> Option<UserId> {
        let mut inner = self.inner.write().await;
        let connection = inner.connections.remove(&conn)?;

        for channel in &connection.channels {
            let now_empty = match inner.channels.get_mut(channel) {
                Some(subscribers) => {
                    subscribers.remove(&conn);
                    subscribers.is_empty()
                }
                None => false,
            };
            if now_empty {
                inner.channels.remove(channel);
            }
        }

        info!(
            connection = %conn,
            user = %connection.user,
            connections = inner.connections.len(),
            "Connection unregistered"
        );

        Some(connection.user)
    }

    /// Subscribe a registered connection to a channel.
    pub async fn subscribe(&self, conn: ConnectionId, channel: Channel) -> bool {
        let attached = self.inner.write().await.attach(conn, channel);
        if attached {
            debug!(connection = %conn, channel = %channel, "Subscribed");
        }
        attached
    }

    pub async fn unsubscribe(&self, conn: ConnectionId, channel: &Channel) {
        self.inner.write().await.detach(conn, channel);
        debug!(connection = %conn, channel = %channel, "Unsubscribed");
    }

    /// Detach every connection of `user` from `channel`.
    pub async fn unsubscribe_user(&self, user: UserId, channel: &Channel) {
        let mut inner = self.inner.write().await;
        let conns: Vec<ConnectionId> = inner
            .channels
            .get(channel)
            .map(|subs| {
                subs.iter()
                    .copied()
                    .filter(|c| inner.connections.get(c).is_some_and(|x| x.user == user))
                    .collect()
            })
            .unwrap_or_default();

        for conn in conns {
            inner.detach(conn, channel);
        }
    }

    /// Deliver to every subscriber of `channel`. Returns the number of
    /// connections that accepted the event.
    pub async fn publish(&self, channel: &Channel, event: ServerEvent) -> usize {
        self.fan_out(channel, &event, None).await
    }

    /// Like [`publish`](Self::publish), skipping every connection of `except`.
    pub async fn publish_except(&self, channel: &Channel, event: ServerEvent, except: UserId) -> usize {
        self.fan_out(channel, &event, Some(except)).await
    }

    /// Deliver to every live connection.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        let inner = self.inner.read().await;
        inner
            .connections
            .keys()
            .filter(|conn| inner.deliver(conn, &event))
            .count()
    }

    /// Deliver to every live connection not owned by `except`.
    pub async fn broadcast_except(&self, event: ServerEvent, except: UserId) -> usize {
        let inner = self.inner.read().await;
        inner
            .connections
            .iter()
            .filter(|(_, c)| c.user != except)
            .filter(|(conn, _)| inner.deliver(conn, &event))
            .count()
    }

    /// Reply on a single connection.
    pub async fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        self.inner.read().await.deliver(&conn, &event)
    }

    /// Distinct users with at least one live connection.
    pub async fn connected_users(&self) -> BTreeSet<UserId> {
        self.inner
            .read()
            .await
            .connections
            .values()
            .map(|c| c.user)
            .collect()
    }

    pub async fn is_subscribed(&self, conn: ConnectionId, channel: &Channel) -> bool {
        self.inner
            .read()
            .await
            .channels
            .get(channel)
            .is_some_and(|subs| subs.contains(&conn))
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    async fn fan_out(&self, channel: &Channel, event: &ServerEvent, except: Option<UserId>) -> usize {
        let inner = self.inner.read().await;
        let Some(subscribers) = inner.channels.get(channel) else {
            debug!(channel = %channel, event = event.name(), "No subscribers");
            return 0;
        };

        subscribers
            .iter()
            .filter(|conn| match except {
                Some(user) => inner.connections.get(conn).is_some_and(|c| c.user != user),
                None => true,
            })
            .filter(|conn| inner.deliver(conn, event))
            .count()
    }
}
