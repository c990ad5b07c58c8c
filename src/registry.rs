use crate::session::{Session, SessionId};
use crate::{default_name, Packet, Result};
use futures_util::future::join_all;
use slog::{debug, info, Logger};
use std::collections::{hash_map::Entry, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Every live session, by id.
///
/// The map's lock is the one place where joins, departures, renames and
/// broadcasts meet. Broadcasts work from a snapshot and never hold the lock
/// while writing to the network, so a session joining or leaving at the same
/// time may or may not be included.
pub struct Registry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU32,
    capacity: usize,
    logger: Logger,
}

impl Registry {
    pub fn new(capacity: usize, logger: &Logger) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(0),
            capacity,
            logger: logger.clone(),
        }
    }

    /// Ids increase for the life of the registry and are never handed out twice.
    pub fn allocate_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn insert(&self, session: Arc<Session>) -> Result<SessionId> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.capacity {
            Err(format!(
                "registry is full ({} of {} sessions)",
                sessions.len(),
                self.capacity
            ))?;
        }

        let id = session.id();
        match sessions.entry(id) {
            Entry::Occupied(..) => Err(format!("session {} is already registered", id))?,
            Entry::Vacant(entry) => {
                entry.insert(session);
            }
        };
        info!(self.logger, "session registered"; "session" => id, "active" => sessions.len());

        Ok(id)
    }

    pub async fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&id);
        if removed.is_some() {
            info!(self.logger, "session removed"; "session" => id, "active" => sessions.len());
        }
        removed
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn find_by_name(&self, name: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            if session.name().await == name {
                return Some(session.clone());
            }
        }
        None
    }

    /// Snapshot of the registered sessions, in id order.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|session| session.id());
        sessions
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for session in self.sessions().await {
            names.push(session.name().await);
        }
        names
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_full(&self) -> bool {
        self.len().await >= self.capacity
    }

    /// Send `packet` to every registered session. A failed send is logged and
    /// otherwise ignored; the failing session's own receive loop removes it.
    pub async fn broadcast(&self, packet: &Packet) {
        let sessions = self.sessions().await;
        let sends = sessions.iter().map(|session| async move {
            if let Err(error) = session.send(packet.clone()).await {
                debug!(session.logger(), "broadcast not delivered"; "error" => %error);
            }
        });
        join_all(sends).await;
    }

    /// Give session `id` the name `requested`, or its default name if
    /// `requested` is blank, belongs to another session, or is another
    /// session's default name. Returns `(old, new)`.
    pub async fn rename(&self, id: SessionId, requested: &str) -> Option<(String, String)> {
        // Held exclusively so that two renames can't both claim a free name.
        let sessions = self.sessions.write().await;
        let session = sessions.get(&id)?;

        let requested = requested.trim();
        let mut taken = requested.is_empty() || is_default_name_of_other(requested, id);
        if !taken {
            for (other_id, other) in sessions.iter() {
                if *other_id != id && other.name().await == requested {
                    taken = true;
                    break;
                }
            }
        }

        let new_name = if taken {
            default_name(id)
        } else {
            requested.to_string()
        };
        let old_name = session.set_name(new_name.clone()).await;
        debug!(self.logger, "session renamed";
            "session" => id, "old" => &old_name, "new" => &new_name, "fallback" => taken);

        Some((old_name, new_name))
    }
}

fn is_default_name_of_other(name: &str, id: SessionId) -> bool {
    match name.strip_prefix("Client ") {
        Some(number) => number.parse::<SessionId>().map_or(false, |owner| owner != id),
        None => false,
    }
}
