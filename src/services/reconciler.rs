//! Canonical notification list and unread counter.
//!
//! Push frames, poll passes, page loads and UI mutations all land here. Every
//! admission path is idempotent by [`NotificationId`], so the two delivery
//! paths can race without duplicating items or double-counting them.

use std::collections::HashSet;

use crate::models::notification::{Notification, NotificationId, NotificationPage};

/// Page counter plus has-more flag behind "load more".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub has_more: bool,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self {
            page: 1,
            has_more: true,
        }
    }
}

impl PageCursor {
    pub fn next_page(&self) -> Option<u32> {
        self.has_more.then_some(self.page + 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted(Notification),
    Duplicate,
}

/// Result of folding one poll pass into the canonical list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollOutcome {
    pub admitted: Vec<Notification>,
    /// Set only when exactly one newly admitted item is unread.
    pub toast: Option<Notification>,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    notifications: Vec<Notification>,
    ids: HashSet<NotificationId>,
    unread_count: u64,
    watermark: Option<NotificationId>,
    cursor: PageCursor,
    total: Option<u64>,
    loading: bool,
    /// Page-1 requests issued and not yet applied or abandoned.
    resyncs_pending: u32,
    /// Ids admitted by push or poll while a resync was in flight.
    admitted_during_resync: HashSet<NotificationId>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: NotificationId) -> bool {
        self.ids.contains(&id)
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    pub fn watermark(&self) -> Option<NotificationId> {
        self.watermark
    }

    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// Authoritative server count; replaces whatever the client approximated.
    pub fn set_unread_count(&mut self, count: u64) {
        self.unread_count = count;
    }

    /// Seeds the poll watermark so history that predates the session is
    /// never announced as new. Never moves the watermark backwards.
    pub fn seed_watermark(&mut self, newest: Option<NotificationId>) {
        if let Some(id) = newest {
            self.advance_watermark(id);
        }
    }

    /// Marks a page-1 request as issued. Items admitted until it lands are
    /// newer than the server snapshot it returns and survive the replace.
    pub fn begin_resync(&mut self) {
        self.resyncs_pending += 1;
    }

    /// A page-1 request failed; nothing will be applied for it.
    pub fn abort_resync(&mut self) {
        self.finish_resync();
    }

    /// Folds a list page in. Page 1 is a full resync: it replaces the list,
    /// resets the cursor and moves the watermark to the newest item. Items
    /// admitted while the request was in flight and missing from the page
    /// stay at the head. Later pages append older items, skipping ids
    /// already held.
    pub fn apply_page(&mut self, page: u32, result: NotificationPage) {
        if page <= 1 {
            let page_ids: HashSet<NotificationId> =
                result.notifications.iter().map(|n| n.id).collect();
            let previous = std::mem::take(&mut self.notifications);
            let mut retained: Vec<Notification> = previous
                .into_iter()
                .filter(|n| self.admitted_during_resync.contains(&n.id) && !page_ids.contains(&n.id))
                .collect();
            retained.sort_by(|a, b| b.id.cmp(&a.id));
            if !retained.is_empty() {
                log::debug!("Resync kept {} notification(s) admitted in flight", retained.len());
            }
            self.finish_resync();

            retained.extend(result.notifications);
            self.ids = retained.iter().map(|n| n.id).collect();
            if let Some(newest) = retained.iter().map(|n| n.id).max() {
                self.advance_watermark(newest);
            }
            self.notifications = retained;
        } else {
            for notification in result.notifications {
                if self.ids.insert(notification.id) {
                    self.notifications.push(notification);
                }
            }
        }

        self.cursor = PageCursor {
            page: page.max(1),
            has_more: result.has_more,
        };
        if result.total.is_some() {
            self.total = result.total;
        }
    }

    /// Admits a pushed notification at the head of the list.
    pub fn admit_push(&mut self, notification: Notification) -> Admission {
        self.advance_watermark(notification.id);

        if !self.ids.insert(notification.id) {
            log::debug!("Ignoring duplicate push for notification {}", notification.id);
            return Admission::Duplicate;
        }

        if notification.is_unread() {
            self.unread_count += 1;
        }
        self.note_admitted(notification.id);
        self.notifications.insert(0, notification.clone());
        Admission::Admitted(notification)
    }

    /// Folds one poll pass: `fresh` is the newest-first head of the server
    /// list, `server_count` the unread count fetched alongside it (if that
    /// call succeeded).
    pub fn admit_poll(&mut self, server_count: Option<u64>, fresh: Vec<Notification>) -> PollOutcome {
        let newest_fetched = fresh.iter().map(|n| n.id).max();
        let watermark = self.watermark;

        let mut admitted = Vec::new();
        for notification in fresh {
            let is_newer = watermark.map_or(true, |mark| notification.id > mark);
            if is_newer && self.ids.insert(notification.id) {
                admitted.push(notification);
            }
        }

        let unread_admitted = admitted.iter().filter(|n| n.is_unread()).count() as u64;
        match server_count {
            Some(count) => self.unread_count = count,
            None => self.unread_count += unread_admitted,
        }

        if let Some(newest) = newest_fetched {
            self.advance_watermark(newest);
        }

        let toast = if unread_admitted == 1 {
            admitted.iter().find(|n| n.is_unread()).cloned()
        } else {
            None
        };

        for notification in &admitted {
            self.note_admitted(notification.id);
        }
        if !admitted.is_empty() {
            let mut head = admitted.clone();
            head.append(&mut self.notifications);
            self.notifications = head;
        }

        PollOutcome { admitted, toast }
    }

    /// Optimistically flips one read flag. Returns whether anything changed.
    pub fn mark_read(&mut self, id: NotificationId) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) if notification.is_read => false,
            Some(notification) => {
                notification.is_read = true;
                self.unread_count = self.unread_count.saturating_sub(1);
                true
            }
            // Not loaded locally (an older page); the server still counts it.
            None => {
                self.unread_count = self.unread_count.saturating_sub(1);
                true
            }
        }
    }

    pub fn mark_all_read(&mut self) {
        for notification in &mut self.notifications {
            notification.is_read = true;
        }
        self.unread_count = 0;
    }

    pub fn remove(&mut self, id: NotificationId) -> Option<Notification> {
        let index = self.notifications.iter().position(|n| n.id == id)?;
        let removed = self.notifications.remove(index);
        self.ids.remove(&id);
        if removed.is_unread() {
            self.unread_count = self.unread_count.saturating_sub(1);
        }
        Some(removed)
    }

    /// Back to the logged-out empty state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn note_admitted(&mut self, id: NotificationId) {
        if self.resyncs_pending > 0 {
            self.admitted_during_resync.insert(id);
        }
    }

    fn finish_resync(&mut self) {
        self.resyncs_pending = self.resyncs_pending.saturating_sub(1);
        if self.resyncs_pending == 0 {
            self.admitted_during_resync.clear();
        }
    }

    fn advance_watermark(&mut self, id: NotificationId) {
        if self.watermark.map_or(true, |mark| id > mark) {
            self.watermark = Some(id);
        }
    }
}
