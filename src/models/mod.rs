pub mod frame;
pub mod notification;
pub mod snapshot;

pub use frame::{ClientFrame, ServerFrame};
pub use notification::{
    Notification, NotificationCategory, NotificationId, NotificationPage, NotificationPreferences,
    UnreadCount,
};
pub use snapshot::{ConnectionState, NotificationSnapshot, ToastItem};
