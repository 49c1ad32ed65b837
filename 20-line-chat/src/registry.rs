//! The live set of connected sessions.
//!
//! The accept loop inserts members and every connection handler removes its
//! own member on the way out, while any handler may broadcast or list at the
//! same time. All of that goes through one `std::sync::Mutex`; the lock is
//! only taken for non-blocking work and is never held across an `.await`.
//!
//! A member whose outbound queue is full when a broadcast arrives is evicted:
//! it leaves the registry and its eviction token is cancelled, which ends the
//! owning handler. Lines are never skipped for a member that stays.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type ConnectionId = u64;

/// Registry entry for one open connection.
#[derive(Debug)]
pub struct Member {
    outbound: mpsc::Sender<String>,
    eviction: CancellationToken,
    login: String,
}

impl Member {
    /// Current login, empty while unauthenticated.
    pub fn login(&self) -> &str {
        &self.login
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    members: Arc<Mutex<BTreeMap<ConnectionId, Member>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, Member>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an unauthenticated member. Returns `false` if `id` was already
    /// present, in which case the existing entry is replaced.
    ///
    /// `eviction` is cancelled if the member is dropped for falling behind.
    pub fn add(
        &self,
        id: ConnectionId,
        outbound: mpsc::Sender<String>,
        eviction: CancellationToken,
    ) -> bool {
        let member = Member {
            outbound,
            eviction,
            login: String::new(),
        };
        self.lock().insert(id, member).is_none()
    }

    /// Removes a member. Removing an absent id is a no-op returning `false`.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Records the login shown by `snapshot_logins`; `None` clears it.
    pub fn set_login(&self, id: ConnectionId, login: Option<&str>) -> bool {
        match self.lock().get_mut(&id) {
            Some(member) => {
                member.login = login.unwrap_or_default().to_string();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Visits members in connection-id order while holding the lock, so
    /// `f` must not block.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(ConnectionId, &Member),
    {
        for (id, member) in self.lock().iter() {
            f(*id, member);
        }
    }

    /// Logins of every member in connection-id order. Unauthenticated
    /// members appear as empty strings.
    pub fn snapshot_logins(&self) -> Vec<String> {
        let mut logins = Vec::new();
        self.for_each(|_, member| logins.push(member.login().to_string()));
        logins
    }

    /// Queues `line` for every member and returns how many accepted it.
    ///
    /// Delivery never waits: a member whose outbound queue is full is evicted
    /// instead of silently missing the line.
    pub fn broadcast(&self, line: &str) -> usize {
        let mut delivered = 0;
        self.lock()
            .retain(|id, member| match member.outbound.try_send(line.to_string()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(connection = id, "outbound queue full; evicting connection");
                    member.eviction.cancel();
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = id, "writer already stopped; skipping broadcast");
                    true
                }
            });
        delivered
    }
}
