use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use kalp_types::events::ServerEvent;

/// Tracks connected sockets and the session room each one is in.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// Per-connection outbound channels: conn_id -> sender
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>>,

    /// Rooms: session_id -> conn_ids
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,

    /// Reverse index: conn_id -> session_id. A connection is in at most one room.
    memberships: RwLock<HashMap<Uuid, String>>,

    /// Authenticated user per connection: conn_id -> user_id
    identities: RwLock<HashMap<Uuid, Uuid>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Returns (conn_id, receiver).
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    pub async fn unregister(&self, conn_id: Uuid) {
        self.leave_room(conn_id).await;
        self.inner.identities.write().await.remove(&conn_id);
        self.inner.connections.write().await.remove(&conn_id);
    }

    /// Record who a connection is authenticated as. Switching users leaves
    /// the current room.
    pub async fn identify(&self, conn_id: Uuid, user_id: Uuid) {
        let previous = self.inner.identities.write().await.insert(conn_id, user_id);
        if previous.is_some_and(|p| p != user_id) {
            self.leave_room(conn_id).await;
        }
    }

    /// Move a connection into a session room, leaving any previous one.
    pub async fn join_room(&self, conn_id: Uuid, session_id: &str) {
        let mut memberships = self.inner.memberships.write().await;
        let mut rooms = self.inner.rooms.write().await;

        if let Some(previous) = memberships.insert(conn_id, session_id.to_string()) {
            if previous == session_id {
                return;
            }
            remove_member(&mut rooms, &previous, conn_id);
        }

        rooms.entry(session_id.to_string()).or_default().insert(conn_id);
    }

    pub async fn leave_room(&self, conn_id: Uuid) {
        let mut memberships = self.inner.memberships.write().await;
        if let Some(session_id) = memberships.remove(&conn_id) {
            let mut rooms = self.inner.rooms.write().await;
            remove_member(&mut rooms, &session_id, conn_id);
        }
    }

    /// Drop every member of a room, e.g. after the session was deleted.
    pub async fn close_room(&self, session_id: &str) {
        let mut memberships = self.inner.memberships.write().await;
        let mut rooms = self.inner.rooms.write().await;
        if let Some(members) = rooms.remove(session_id) {
            for conn_id in members {
                memberships.remove(&conn_id);
            }
        }
    }

    /// Drop every member of a room not authenticated as `owner`.
    pub async fn claim_room(&self, session_id: &str, owner: Uuid) {
        let mut memberships = self.inner.memberships.write().await;
        let mut rooms = self.inner.rooms.write().await;
        let identities = self.inner.identities.read().await;

        let Some(members) = rooms.get_mut(session_id) else {
            return;
        };
        members.retain(|conn_id| {
            let keep = identities.get(conn_id) == Some(&owner);
            if !keep {
                memberships.remove(conn_id);
            }
            keep
        });
        if members.is_empty() {
            rooms.remove(session_id);
        }
    }

    /// The room a connection is currently in.
    pub async fn room_of(&self, conn_id: Uuid) -> Option<String> {
        self.inner.memberships.read().await.get(&conn_id).cloned()
    }

    pub async fn room_size(&self, session_id: &str) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(session_id)
            .map_or(0, HashSet::len)
    }

    /// Send a targeted event to one connection.
    pub async fn send_to(&self, conn_id: Uuid, event: ServerEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(tx) = connections.get(&conn_id) {
            let _ = tx.send(event);
        }
    }

    /// Send an event to the connections in a room that are authenticated as
    /// `owner`, optionally skipping one.
    pub async fn broadcast_to_room(
        &self,
        session_id: &str,
        owner: Uuid,
        event: ServerEvent,
        except: Option<Uuid>,
    ) {
        let rooms = self.inner.rooms.read().await;
        let Some(members) = rooms.get(session_id) else {
            return;
        };

        let identities = self.inner.identities.read().await;
        let connections = self.inner.connections.read().await;
        for conn_id in members {
            if Some(*conn_id) == except || identities.get(conn_id) != Some(&owner) {
                continue;
            }
            if let Some(tx) = connections.get(conn_id) {
                let _ = tx.send(event.clone());
            }
        }
    }
}

fn remove_member(rooms: &mut HashMap<String, HashSet<Uuid>>, session_id: &str, conn_id: Uuid) {
    if let Some(members) = rooms.get_mut(session_id) {
        members.remove(&conn_id);
        if members.is_empty() {
            rooms.remove(session_id);
        }
    }
}
