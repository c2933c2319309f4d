//! Chat sessions and their conversation threads.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default session timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// One user's chat session.
///
/// A session is bound to at most one conversation thread on the agent
/// runtime, created lazily on the first message. Cloning is cheap; clones
/// share state.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    id: String,
    /// Cached thread id. Held across thread creation so concurrent first
    /// messages create a single thread.
    thread_id: tokio::sync::Mutex<Option<String>>,
    /// Cancellation handle of the turn in flight.
    active_turn: RwLock<Option<CancellationToken>>,
    /// Held for the whole of a turn, run cleanup included.
    turn_gate: tokio::sync::Mutex<()>,
    created_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(SessionInner {
                id,
                thread_id: tokio::sync::Mutex::new(None),
                active_turn: RwLock::new(None),
                turn_gate: tokio::sync::Mutex::new(()),
                created_at: now,
                last_activity: RwLock::new(now),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The cached thread id, if a thread has been created.
    pub async fn thread_id(&self) -> Option<String> {
        self.inner.thread_id.lock().await.clone()
    }

    pub(crate) fn thread_slot(&self) -> &tokio::sync::Mutex<Option<String>> {
        &self.inner.thread_id
    }

    /// Register a new turn and return its cancellation token.
    ///
    /// A turn still in flight is cancelled first.
    pub fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut guard = write(&self.inner.active_turn);
        if let Some(previous) = guard.replace(token.clone()) {
            previous.cancel();
        }
        drop(guard);
        self.touch();
        token
    }

    /// Wait until no other turn runs on this session.
    ///
    /// The previous turn releases the gate only after its runs were
    /// cleaned up, so the thread accepts the next message. Waiters are
    /// served in arrival order.
    pub async fn lock_turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.turn_gate.lock().await
    }

    /// Clear the active turn once `token`'s turn finishes.
    ///
    /// A superseded turn has a cancelled token and leaves the newer turn in place.
    pub fn end_turn(&self, token: &CancellationToken) {
        let mut guard = write(&self.inner.active_turn);
        if !token.is_cancelled() {
            *guard = None;
        }
        drop(guard);
        self.touch();
    }

    /// Stop the turn in flight. Returns `false` when no turn is active.
    pub fn cancel_turn(&self) -> bool {
        match write(&self.inner.active_turn).take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_active_turn(&self) -> bool {
        read(&self.inner.active_turn).is_some()
    }

    fn touch(&self) {
        *write(&self.inner.last_activity) = Utc::now();
    }

    /// Check if the session has been idle longer than `timeout`.
    ///
    /// Sessions with a turn in flight never expire.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        if self.has_active_turn() {
            return false;
        }
        let last = *read(&self.inner.last_activity);
        // Negative duration means clock skew; treat as fresh.
        (Utc::now() - last)
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }

    /// Get the session age.
    #[must_use]
    pub fn age(&self) -> Duration {
        (Utc::now() - self.inner.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Thread-safe store for sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session and return it.
    #[must_use]
    pub fn create(&self) -> Session {
        self.create_with_id(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn create_with_id(&self, id: impl Into<String>) -> Session {
        let id = id.into();
        let session = Session::new(id.clone());
        write(&self.sessions).insert(id, session.clone());
        session
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        read(&self.sessions).get(id).cloned()
    }

    /// Get a session by ID, creating it if it doesn't exist.
    #[must_use]
    pub fn get_or_create(&self, id: &str) -> Session {
        if let Some(session) = self.get(id) {
            return session;
        }
        write(&self.sessions)
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id.to_string()))
            .clone()
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        write(&self.sessions).remove(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.sessions).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove sessions that have been inactive longer than the timeout.
    ///
    /// Returns the number of sessions removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = write(&self.sessions);
        let before = guard.len();
        guard.retain(|_, session| !session.is_expired_with_timeout(timeout));
        before - guard.len()
    }
}
