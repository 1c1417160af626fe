//! Collaborative session registry.
//!
//! A session correlates an editing connection with an authenticated user. It
//! is identified by an opaque random token and holds a small string bag,
//! principally the `user` key.
//!
//! Lifecycle: `Unborn -> Active` on [`SessionRegistry::create`], `Active -> Gone`
//! on [`SessionRegistry::delete`] or, with an idle TTL configured, once the TTL
//! elapses without access.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Deserialize;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::logging::redact_session_id;

/// Key holding the authenticated username.
pub const USER_KEY: &str = "user";

/// Default identifier length (62^32 identifier space).
pub const DEFAULT_ID_LENGTH: usize = 32;

/// Shortest identifier the registry will issue.
pub const MIN_ID_LENGTH: usize = 16;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Draw a fresh identifier of `len` alphanumeric characters from the
    /// OS-seeded thread rng.
    fn generate(len: usize) -> Self {
        let id: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Snapshot of one session's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    values: HashMap<String, String>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            values: HashMap::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The authenticated username, if one has been recorded.
    pub fn user(&self) -> Option<&str> {
        self.get_string(USER_KEY)
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Session registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Characters per identifier. Values below [`MIN_ID_LENGTH`] are raised to it.
    pub id_length: usize,
    /// Idle expiry in seconds. `None` keeps sessions until deleted.
    pub ttl_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id_length: DEFAULT_ID_LENGTH,
            ttl_secs: None,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug)]
struct Slot {
    session: Session,
    last_access: Instant,
}

impl Slot {
    fn expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.duration_since(self.last_access) >= ttl)
    }
}

/// Process-wide table of active sessions.
///
/// Clones share the same table. Different identifiers live in different map
/// shards and do not contend; operations on one identifier are serialized by
/// its shard lock.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, Slot>>,
    id_length: usize,
    ttl: Option<Duration>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Registry with default identifier length and no expiry.
    pub fn new() -> Self {
        Self::with_config(&SessionConfig::default())
    }

    pub fn with_config(config: &SessionConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            id_length: config.id_length.max(MIN_ID_LENGTH),
            ttl: config.ttl(),
        }
    }

    /// Idle expiry, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Open a new empty session and return its identifier.
    pub fn create(&self) -> SessionId {
        self.insert_new(Vec::new())
    }

    /// Open a new session already bound to `user`.
    pub fn create_for_user(&self, user: &str) -> SessionId {
        self.insert_new(vec![(USER_KEY.to_string(), user.to_string())])
    }

    fn insert_new(&self, values: Vec<(String, String)>) -> SessionId {
        loop {
            let id = SessionId::generate(self.id_length);
            match self.sessions.entry(id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    let mut session = Session::new(id.clone());
                    session.values.extend(values);
                    vacant.insert(Slot {
                        session,
                        last_access: Instant::now(),
                    });
                    tracing::debug!(session = %redact_session_id(id.as_str()), "session created");
                    return id;
                }
            }
        }
    }

    /// Snapshot of the session, refreshing its idle timer.
    ///
    /// Absence is a normal answer. An expired session is removed and reported absent.
    pub fn get(&self, id: &str) -> Option<Session> {
        self.with_active(id, |slot| slot.session.clone())
    }

    /// Set one key in the session's state bag.
    pub fn set(&self, id: &str, key: &str, value: &str) -> Result<()> {
        self.with_active(id, |slot| {
            slot.session
                .values
                .insert(key.to_string(), value.to_string());
        })
        .ok_or(Error::UnknownSession)
    }

    /// Read one key from the session's state bag.
    pub fn get_string(&self, id: &str, key: &str) -> Option<String> {
        self.with_active(id, |slot| slot.session.get_string(key).map(str::to_string))
            .flatten()
    }

    /// Remove a session. Returns false when it was not active.
    pub fn delete(&self, id: &str) -> bool {
        let now = Instant::now();
        match self.sessions.remove(id) {
            Some((_, slot)) => {
                tracing::debug!(session = %redact_session_id(id), "session deleted");
                !slot.expired(self.ttl, now)
            }
            None => false,
        }
    }

    /// Drop every session whose idle TTL has elapsed. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, slot| !slot.expired(Some(ttl), now));
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            tracing::debug!(purged, "expired sessions purged");
        }
        purged
    }

    /// Number of stored sessions, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Run `f` against a live session, refreshing its idle timer.
    fn with_active<T>(&self, id: &str, f: impl FnOnce(&mut Slot) -> T) -> Option<T> {
        let now = Instant::now();
        {
            let mut slot = self.sessions.get_mut(id)?;
            if !slot.expired(self.ttl, now) {
                slot.last_access = now;
                return Some(f(slot.value_mut()));
            }
        }
        // Shard guard is released above; re-check so a concurrent refresh wins.
        let ttl = self.ttl;
        if self
            .sessions
            .remove_if(id, |_, slot| slot.expired(ttl, now))
            .is_some()
        {
            tracing::debug!(session = %redact_session_id(id), "session expired");
        }
        None
    }
}
