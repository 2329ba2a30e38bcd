use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend-assigned notification id. Ids grow monotonically server-side, which
/// is what lets the poll watermark compare them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub i64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for NotificationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    MealReminder,
    WaterReminder,
    Progress,
    Group,
    WeeklyReport,
    Friend,
    Fridge,
    System,
    #[serde(other)]
    Other,
}

impl NotificationCategory {
    /// Screen a notification of this category opens when it carries no url.
    pub fn default_target(&self) -> &'static str {
        match self {
            NotificationCategory::MealReminder => "/diary",
            NotificationCategory::Progress => "/progress",
            NotificationCategory::Group => "/groups",
            NotificationCategory::WeeklyReport => "/analytics",
            NotificationCategory::Friend => "/friends",
            NotificationCategory::Fridge => "/fridge",
            NotificationCategory::WaterReminder
            | NotificationCategory::System
            | NotificationCategory::Other => "/",
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationCategory::MealReminder => write!(f, "meal_reminder"),
            NotificationCategory::WaterReminder => write!(f, "water_reminder"),
            NotificationCategory::Progress => write!(f, "progress"),
            NotificationCategory::Group => write!(f, "group"),
            NotificationCategory::WeeklyReport => write!(f, "weekly_report"),
            NotificationCategory::Friend => write!(f, "friend"),
            NotificationCategory::Fridge => write!(f, "fridge"),
            NotificationCategory::System => write!(f, "system"),
            NotificationCategory::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub category: NotificationCategory,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Notification {
    pub fn navigation_target(&self) -> &str {
        self.url
            .as_deref()
            .unwrap_or_else(|| self.category.default_target())
    }

    pub fn is_unread(&self) -> bool {
        !self.is_read
    }
}

/// One page of `GET /notifications/get`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub pages: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCount {
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub meal_reminders: bool,
    pub water_reminders: bool,
    pub progress_updates: bool,
    pub group_activity: bool,
    pub weekly_reports: bool,
    pub breakfast_time: Option<String>,
    pub lunch_time: Option<String>,
    pub dinner_time: Option<String>,
    pub push_enabled: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            meal_reminders: true,
            water_reminders: true,
            progress_updates: true,
            group_activity: true,
            weekly_reports: true,
            breakfast_time: Some("08:00".to_string()),
            lunch_time: Some("13:00".to_string()),
            dinner_time: Some("19:00".to_string()),
            push_enabled: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PreferencesEnvelope {
    pub preferences: NotificationPreferences,
}
