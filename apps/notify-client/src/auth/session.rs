//! Session state as seen by this client: bootstrap flag, auth flag, credential.

use parking_lot::RwLock;
use tokio::sync::watch;

/// The `(initialized, authenticated)` pair the binding reacts to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session bootstrap has completed.
    pub initialized: bool,
    /// A valid credential is present.
    pub authenticated: bool,
}

impl SessionSnapshot {
    /// Whether a live channel should exist for this session.
    pub fn is_usable(&self) -> bool {
        self.initialized && self.authenticated
    }
}

/// Abstraction over the application's session layer.
///
/// Backed by the host application's auth state in production and by
/// [`MemorySession`] in the binary and tests.
pub trait SessionGate: Send + Sync {
    /// Current flags.
    fn snapshot(&self) -> SessionSnapshot;

    /// Bearer credential, if one is held.
    fn credential(&self) -> Option<String>;

    /// Receiver that is notified whenever the flags change.
    fn watch(&self) -> watch::Receiver<SessionSnapshot>;

    fn initialized(&self) -> bool {
        self.snapshot().initialized
    }

    fn authenticated(&self) -> bool {
        self.snapshot().authenticated
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

pub struct MemorySession {
    state: watch::Sender<SessionSnapshot>,
    credential: RwLock<Option<String>>,
}

impl MemorySession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            state,
            credential: RwLock::new(None),
        }
    }

    /// A session that has finished bootstrapping and holds `credential`.
    pub fn logged_in(credential: impl Into<String>) -> Self {
        let session = Self::new();
        session.set_initialized(true);
        session.login(credential);
        session
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.update(|s| s.initialized = initialized);
    }

    /// Store a credential and flip `authenticated` on.
    pub fn login(&self, credential: impl Into<String>) {
        // Credential first, so a watcher woken by the flag change can read it.
        *self.credential.write() = Some(credential.into());
        self.update(|s| s.authenticated = true);
    }

    /// Drop the credential and flip `authenticated` off.
    pub fn logout(&self) {
        self.update(|s| s.authenticated = false);
        *self.credential.write() = None;
    }

    /// Replace the credential without touching the flags.
    pub fn set_credential(&self, credential: Option<String>) {
        *self.credential.write() = credential;
    }

    fn update(&self, apply: impl FnOnce(&mut SessionSnapshot)) {
        self.state.send_if_modified(|snapshot| {
            let before = *snapshot;
            apply(snapshot);
            before != *snapshot
        });
    }
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGate for MemorySession {
    fn snapshot(&self) -> SessionSnapshot {
        *self.state.borrow()
    }

    fn credential(&self) -> Option<String> {
        self.credential.read().clone()
    }

    fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_not_usable() {
        let session = MemorySession::new();
        assert!(!session.initialized());
        assert!(!session.authenticated());
        assert!(session.credential().is_none());
    }

    #[test]
    fn logged_in_session_is_usable() {
        let session = MemorySession::logged_in("tok");
        assert!(session.snapshot().is_usable());
        assert_eq!(session.credential().as_deref(), Some("tok"));
    }

    #[test]
    fn logout_clears_credential() {
        let session = MemorySession::logged_in("tok");
        session.logout();
        assert!(!session.authenticated());
        assert!(session.credential().is_none());
    }

    #[tokio::test]
    async fn watchers_see_changes_but_not_repeats() {
        let session = MemorySession::new();
        let mut rx = session.watch();

        session.set_initialized(true);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().initialized);

        // Same value again: no notification.
        session.set_initialized(true);
        assert!(!rx.has_changed().unwrap());

        session.login("tok");
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_usable());
    }
}
