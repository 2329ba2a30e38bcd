use std::time::Duration;
use tokio::time::Instant;

use crate::models::notification::{Notification, NotificationId};
use crate::models::snapshot::ToastItem;

/// Holds at most one on-screen announcement. A newer admission replaces the
/// current one, and with it the pending expiry deadline.
#[derive(Debug)]
pub struct ToastQueue {
    duration: Duration,
    current: Option<ToastItem>,
}

impl ToastQueue {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            current: None,
        }
    }

    pub fn admit(&mut self, notification: Notification, now: Instant) -> &ToastItem {
        self.current.insert(ToastItem {
            notification,
            expires_at: now + self.duration,
        })
    }

    /// Clears the toast for `id`. A stale expiry for a superseded toast is a
    /// no-op. Returns whether anything was cleared.
    pub fn clear(&mut self, id: NotificationId) -> bool {
        match &self.current {
            Some(toast) if toast.notification.id == id => {
                self.current = None;
                true
            }
            _ => false,
        }
    }

    /// User dismissal of whatever is showing.
    pub fn dismiss(&mut self) -> Option<ToastItem> {
        self.current.take()
    }

    /// Expires the current toast if its deadline has passed.
    pub fn expire_due(&mut self, now: Instant) -> Option<NotificationId> {
        let id = self
            .current
            .as_ref()
            .filter(|toast| toast.expires_at <= now)
            .map(|toast| toast.notification.id)?;
        self.clear(id);
        Some(id)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().map(|toast| toast.expires_at)
    }

    pub fn current(&self) -> Option<&ToastItem> {
        self.current.as_ref()
    }
}
