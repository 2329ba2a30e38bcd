use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Shared login state: the current bearer token and a login signal the
/// notification hub follows.
///
/// The signal carries a login generation (`None` while logged out). Every
/// `login` gets a fresh generation, so a logout immediately followed by a
/// login still reads as a different session to a watcher that only sees the
/// latest value.
///
/// The token is read on every request and every (re)connect, so a token
/// refreshed by the HTTP layer is picked up without restarting the session.
#[derive(Clone)]
pub struct AuthSession {
    token: Arc<RwLock<Option<String>>>,
    generation: Arc<AtomicU64>,
    signal: Arc<watch::Sender<Option<u64>>>,
}

impl AuthSession {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(None);
        Self {
            token: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            signal: Arc::new(signal),
        }
    }

    pub async fn login(&self, token: impl Into<String>) {
        {
            let mut guard = self.token.write().await;
            *guard = Some(token.into());
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.signal.send_replace(Some(generation));
    }

    /// Replaces the token without starting a new login generation.
    pub async fn refresh_token(&self, token: impl Into<String>) {
        let mut guard = self.token.write().await;
        *guard = Some(token.into());
    }

    pub async fn logout(&self) {
        {
            let mut guard = self.token.write().await;
            *guard = None;
        }
        self.signal.send_replace(None);
    }

    pub async fn bearer_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.signal.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
        self.signal.subscribe()
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_login_and_logout() {
        let session = AuthSession::new();
        let mut rx = session.subscribe();
        assert!(!session.is_authenticated());

        session.login("abc").await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(1));
        assert!(session.is_authenticated());
        assert_eq!(session.bearer_token().await.as_deref(), Some("abc"));

        session.logout().await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), None);
        assert!(!session.is_authenticated());
        assert_eq!(session.bearer_token().await, None);
    }

    #[tokio::test]
    async fn test_refresh_keeps_signal() {
        let session = AuthSession::new();
        session.login("old").await;
        let rx = session.subscribe();
        session.refresh_token("new").await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(session.bearer_token().await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_relogin_gets_new_generation() {
        let session = AuthSession::new();
        let mut rx = session.subscribe();

        session.login("user-a").await;
        let first = *rx.borrow_and_update();

        session.logout().await;
        session.login("user-b").await;
        assert!(rx.has_changed().unwrap());
        let second = *rx.borrow_and_update();

        assert!(first.is_some());
        assert!(second.is_some());
        assert_ne!(first, second);
    }
}
