//! Online/offline tracking.
//!
//! A user is online while at least one connection is live. Transitions are
//! mirrored to the `users` table and announced to every other connected
//! user; persistence failures are logged and never fail the connection.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use alumni_shared::protocol::ServerEvent;
use alumni_shared::types::{ConnectionId, UserId};

use crate::hub::EventHub;
use crate::SharedDatabase;

/// Result of closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub user: UserId,
    /// `true` when this was the user's last live connection.
    pub went_offline: bool,
}

#[derive(Default)]
struct Sessions {
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, UserId>,
}

#[derive(Clone)]
pub struct PresenceTracker {
    db: SharedDatabase,
    hub: EventHub,
    sessions: Arc<Mutex<Sessions>>,
}

impl PresenceTracker {
    pub fn new(db: SharedDatabase, hub: EventHub) -> Self {
        Self {
            db,
            hub,
            sessions: Arc::new(Mutex::new(Sessions::default())),
        }
    }

    /// Associate a live connection with `user`. Returns `true` when the user
    /// just came online. Connecting the same connection twice is a no-op.
    pub async fn connect(&self, user: UserId, conn: ConnectionId) -> bool {
        let came_online = {
            let mut sessions = self.sessions.lock().await;
            if sessions.by_connection.contains_key(&conn) {
                return false;
            }
            sessions.by_connection.insert(conn, user);
            let conns = sessions.by_user.entry(user).or_default();
            conns.insert(conn);
            conns.len() == 1
        };

        if !came_online {
            debug!(user = %user, connection = %conn, "Additional connection");
            return false;
        }

        if let Err(e) = self.db.lock().await.set_presence(user, true, Utc::now()) {
            error!(user = %user, "Failed to persist online status: {e}");
        }
        let notified = self
            .hub
            .broadcast_except(ServerEvent::UserOnline { user_id: user }, user)
            .await;
        info!(user = %user, notified, "User online");
        true
    }

    /// Forget a connection. `None` if it was never connected or already gone.
    pub async fn disconnect(&self, conn: ConnectionId) -> Option<Departure> {
        let departure = {
            let mut sessions = self.sessions.lock().await;
            let user = sessions.by_connection.remove(&conn)?;
            let went_offline = match sessions.by_user.get_mut(&user) {
                Some(conns) => {
                    conns.remove(&conn);
                    conns.is_empty()
                }
                None => true,
            };
            if went_offline {
                sessions.by_user.remove(&user);
            }
            Departure { user, went_offline }
        };

        if departure.went_offline {
            let user = departure.user;
            if let Err(e) = self.db.lock().await.set_presence(user, false, Utc::now()) {
                error!(user = %user, "Failed to persist offline status: {e}");
            }
            let notified = self
                .hub
                .broadcast_except(ServerEvent::UserOffline { user_id: user }, user)
                .await;
            info!(user = %user, notified, "User offline");
        }

        Some(departure)
    }

    pub async fn list_online(&self) -> BTreeSet<UserId> {
        self.sessions.lock().await.by_user.keys().copied().collect()
    }

    pub async fn is_online(&self, user: UserId) -> bool {
        self.sessions.lock().await.by_user.contains_key(&user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alumni_store::Database;

    fn tracker() -> (PresenceTracker, EventHub, SharedDatabase) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let hub = EventHub::new();
        (PresenceTracker::new(db.clone(), hub.clone()), hub, db)
    }

    #[tokio::test]
    async fn test_online_until_last_connection_closes() {
        let (presence, _hub, db) = tracker();
        let user = UserId::new();
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());

        assert!(presence.connect(user, c1).await);
        assert!(!presence.connect(user, c2).await);
        assert!(!presence.connect(user, c2).await);
        assert!(db.lock().await.get_user(user).unwrap().is_online);

        let first = presence.disconnect(c1).await.unwrap();
        assert!(!first.went_offline);
        assert!(presence.is_online(user).await);

        let last = presence.disconnect(c2).await.unwrap();
        assert!(last.went_offline);
        assert!(!presence.is_online(user).await);
        assert!(!db.lock().await.get_user(user).unwrap().is_online);

        assert_eq!(presence.disconnect(c2).await, None);
    }

    #[tokio::test]
    async fn test_transitions_reach_other_users_only() {
        let (presence, hub, _db) = tracker();
        let (alice, bob) = (UserId::new(), UserId::new());
        let (a_conn, b_conn) = (ConnectionId::new(), ConnectionId::new());

        let mut a_rx = hub.register(a_conn, alice).await;
        presence.connect(alice, a_conn).await;
        let mut b_rx = hub.register(b_conn, bob).await;
        presence.connect(bob, b_conn).await;

        assert_eq!(a_rx.try_recv().unwrap(), ServerEvent::UserOnline { user_id: bob });
        assert!(b_rx.try_recv().is_err());

        hub.unregister(b_conn).await;
        presence.disconnect(b_conn).await;
        assert_eq!(a_rx.try_recv().unwrap(), ServerEvent::UserOffline { user_id: bob });
    }

    #[tokio::test]
    async fn test_list_online() {
        let (presence, _hub, _db) = tracker();
        let (a, b) = (UserId::new(), UserId::new());
        presence.connect(a, ConnectionId::new()).await;
        presence.connect(b, ConnectionId::new()).await;

        let online = presence.list_online().await;
        assert_eq!(online.len(), 2);
        assert!(online.contains(&a) && online.contains(&b));
    }
}
