//! Real-time notification sync for the FoodTrack client.
//!
//! A push socket and a polling fallback feed one canonical, de-duplicated
//! notification list, driven by the user's login state.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use auth::AuthSession;
pub use config::{Config, SyncConfig};
pub use error::{NotifyError, Result};
pub use models::{
    ConnectionState, Notification, NotificationCategory, NotificationId, NotificationPage,
    NotificationPreferences, NotificationSnapshot, ToastItem,
};
pub use services::gateway::{HttpGateway, NotificationGateway};
pub use services::lifecycle::{FridgeSignal, NotificationHandle, NotificationHub};
