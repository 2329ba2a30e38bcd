use serde::Serialize;
use std::fmt;
use tokio::time::Instant;

use crate::models::notification::Notification;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// The notification currently announced on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastItem {
    pub notification: Notification,
    pub expires_at: Instant,
}

/// Everything a UI needs to render the notification bell, panel and toast.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationSnapshot {
    pub notifications: Vec<Notification>,
    pub unread_count: u64,
    pub connection: ConnectionState,
    pub loading: bool,
    pub has_more: bool,
    pub page: u32,
    pub total: Option<u64>,
    pub toast: Option<ToastItem>,
    pub authenticated: bool,
}
