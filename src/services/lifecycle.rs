//! Notification session lifecycle.
//!
//! [`NotificationHub`] is one event loop that owns all notification state for
//! the process: the canonical list, the toast, the socket bookkeeping, the poll
//! timer and the focus registration. It follows the [`AuthSession`] signal,
//! starting everything on login and tearing everything down on logout. UI code
//! talks to it through a cloneable [`NotificationHandle`].
//!
//! Network calls never run inside the loop. They are spawned and their results
//! come back as [`Internal`] messages tagged with the session epoch; results
//! that belong to an earlier session are dropped.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::auth::AuthSession;
use crate::config::{Config, SyncConfig};
use crate::error::{NotifyError, Result};
use crate::models::frame::ServerFrame;
use crate::models::notification::{
    Notification, NotificationCategory, NotificationId, NotificationPage, NotificationPreferences,
};
use crate::models::snapshot::{ConnectionState, NotificationSnapshot};
use crate::services::gateway::NotificationGateway;
use crate::services::reconciler::{Admission, Reconciler};
use crate::services::toast::ToastQueue;
use crate::services::transport::{TransportChannel, TransportEvent};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Fridge screens refetch on either of these.
#[derive(Debug, Clone, PartialEq)]
pub enum FridgeSignal {
    Update(Value),
    Notification(Notification),
}

enum Command {
    FetchNotifications { page: u32, reply: Reply<()> },
    LoadMore { reply: Reply<bool> },
    FetchUnreadCount { reply: Reply<u64> },
    MarkAsRead { id: NotificationId, reply: Reply<()> },
    MarkAllAsRead { reply: Reply<()> },
    Delete { id: NotificationId, reply: Reply<()> },
    Preferences { reply: Reply<NotificationPreferences> },
    SavePreferences { prefs: NotificationPreferences, reply: Reply<NotificationPreferences> },
    ClearToast { id: NotificationId },
    WindowFocused,
}

enum Internal {
    UnreadCount { session: u64, result: Result<u64>, reply: Option<Reply<u64>> },
    WatermarkSeed { session: u64, result: Result<NotificationPage> },
    Poll { session: u64, count: Result<u64>, fresh: Result<NotificationPage> },
    Page { session: u64, page: u32, result: Result<NotificationPage>, reply: Reply<()> },
}

/// Command and subscription surface handed to UI code.
#[derive(Clone)]
pub struct NotificationHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<NotificationSnapshot>,
    fridge: broadcast::Sender<FridgeSignal>,
}

impl NotificationHandle {
    pub fn subscribe(&self) -> watch::Receiver<NotificationSnapshot> {
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe_fridge(&self) -> broadcast::Receiver<FridgeSignal> {
        self.fridge.subscribe()
    }

    /// Page 1 is a full resync; later pages append older items.
    pub async fn fetch_notifications(&self, page: u32) -> Result<()> {
        self.request(|reply| Command::FetchNotifications { page, reply }).await
    }

    /// Loads the next page if there is one and no load is running. Returns
    /// whether a page was requested.
    pub async fn load_more(&self) -> Result<bool> {
        self.request(|reply| Command::LoadMore { reply }).await
    }

    pub async fn fetch_unread_count(&self) -> Result<u64> {
        self.request(|reply| Command::FetchUnreadCount { reply }).await
    }

    pub async fn mark_as_read(&self, id: NotificationId) -> Result<()> {
        self.request(|reply| Command::MarkAsRead { id, reply }).await
    }

    pub async fn mark_all_as_read(&self) -> Result<()> {
        self.request(|reply| Command::MarkAllAsRead { reply }).await
    }

    pub async fn delete_notification(&self, id: NotificationId) -> Result<()> {
        self.request(|reply| Command::Delete { id, reply }).await
    }

    pub async fn preferences(&self) -> Result<NotificationPreferences> {
        self.request(|reply| Command::Preferences { reply }).await
    }

    pub async fn save_preferences(&self, prefs: NotificationPreferences) -> Result<NotificationPreferences> {
        self.request(|reply| Command::SavePreferences { prefs, reply }).await
    }

    /// Dismisses the toast for `id`. A dismissal that arrives after a newer
    /// toast replaced it leaves the newer one on screen.
    pub fn clear_new_notification(&self, id: NotificationId) {
        let _ = self.commands.send(Command::ClearToast { id });
    }

    /// Window regained focus: resync now and reopen the socket if it is down.
    pub fn window_focused(&self) {
        let _ = self.commands.send(Command::WindowFocused);
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| NotifyError::HubStopped)?;
        rx.await.map_err(|_| NotifyError::HubStopped)?
    }
}

pub struct NotificationHub<G: NotificationGateway> {
    config: SyncConfig,
    gateway: Arc<G>,
    session: AuthSession,
    reconciler: Reconciler,
    toasts: ToastQueue,
    transport: TransportChannel,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    snapshot_tx: watch::Sender<NotificationSnapshot>,
    fridge_tx: broadcast::Sender<FridgeSignal>,
    poll: Option<Interval>,
    focus_registered: bool,
    login: Option<u64>,
    session_epoch: u64,
    watermark_ready: bool,
    poll_in_flight: bool,
    pending_pages: u32,
}

impl<G: NotificationGateway> NotificationHub<G> {
    pub fn new(config: &Config, gateway: G, session: AuthSession) -> Result<(Self, NotificationHandle)> {
        let endpoint = config.ws_endpoint()?;
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(NotificationSnapshot::default());
        let (fridge_tx, _) = broadcast::channel(32);

        let hub = Self {
            config: config.sync.clone(),
            gateway: Arc::new(gateway),
            session,
            reconciler: Reconciler::new(),
            toasts: ToastQueue::new(config.sync.toast_duration),
            transport: TransportChannel::new(endpoint, &config.sync, transport_tx),
            transport_rx,
            commands,
            internal_tx,
            internal_rx,
            snapshot_tx,
            fridge_tx: fridge_tx.clone(),
            poll: None,
            focus_registered: false,
            login: None,
            session_epoch: 0,
            watermark_ready: false,
            poll_in_flight: false,
            pending_pages: 0,
        };

        let handle = NotificationHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            fridge: fridge_tx,
        };

        Ok((hub, handle))
    }

    pub fn spawn(config: &Config, gateway: G, session: AuthSession) -> Result<(NotificationHandle, JoinHandle<()>)> {
        let (hub, handle) = Self::new(config, gateway, session)?;
        Ok((handle, tokio::spawn(hub.run())))
    }

    /// Runs until every [`NotificationHandle`] is dropped.
    pub async fn run(mut self) {
        let mut auth = self.session.subscribe();
        let login = *auth.borrow_and_update();
        self.follow_login(login).await;
        self.publish();

        loop {
            let reconnect_at = self.transport.reconnect_deadline();
            let toast_at = self.toasts.deadline();

            tokio::select! {
                // Login/logout must be seen before any command sent after it.
                biased;
                changed = auth.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let login = *auth.borrow_and_update();
                    self.follow_login(login).await;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.transport_rx.recv() => self.handle_transport(event),
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
                _ = next_tick(&mut self.poll) => self.poll_tick().await,
                _ = sleep_until(reconnect_at) => {
                    if self.transport.take_due_reconnect(Instant::now()) && self.is_active() {
                        self.connect_transport().await;
                    }
                }
                _ = sleep_until(toast_at) => {
                    if let Some(id) = self.toasts.expire_due(Instant::now()) {
                        log::debug!("Toast for notification {} expired", id);
                    }
                }
            }

            self.publish();
        }

        self.stop();
        self.publish();
    }

    /// Moves to the session of `login`. A different generation than the
    /// running one tears the old session down before the new one starts,
    /// even when the logout in between was never observed.
    async fn follow_login(&mut self, login: Option<u64>) {
        if login == self.login {
            return;
        }
        if self.is_active() {
            self.stop();
        }
        if let Some(generation) = login {
            self.start(generation).await;
        }
    }

    fn is_active(&self) -> bool {
        self.poll.is_some()
    }

    async fn start(&mut self, login: u64) {
        if self.is_active() {
            return;
        }

        self.login = Some(login);
        self.session_epoch += 1;
        log::info!("Starting notification session {} (login {})", self.session_epoch, login);

        self.spawn_unread_count(None);
        self.spawn_watermark_seed();
        self.connect_transport().await;

        let period = self.config.poll_interval;
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poll = Some(poll);
        self.focus_registered = true;
    }

    fn stop(&mut self) {
        self.transport.close();
        let was_active = self.poll.take().is_some();
        self.login = None;
        self.focus_registered = false;
        self.session_epoch += 1;
        self.reconciler.reset();
        self.toasts.dismiss();
        self.watermark_ready = false;
        self.poll_in_flight = false;
        self.pending_pages = 0;

        if was_active {
            log::info!("Notification session stopped");
        }
    }

    async fn connect_transport(&mut self) {
        if self.transport.state() != ConnectionState::Disconnected {
            return;
        }
        match self.session.bearer_token().await {
            Some(token) => {
                self.transport.connect(&token);
            }
            None => log::warn!("No bearer token, notification socket not opened"),
        }
    }

    async fn poll_tick(&mut self) {
        self.spawn_poll();
        if self.transport.state() == ConnectionState::Disconnected {
            self.connect_transport().await;
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::ClearToast { id } => {
                if !self.toasts.clear(id) {
                    log::debug!("Ignoring dismissal of superseded toast {}", id);
                }
            }
            Command::WindowFocused => {
                if self.focus_registered {
                    log::debug!("Window focused, resyncing notifications");
                    self.poll_tick().await;
                }
            }
            Command::FetchNotifications { page, reply } => {
                if !self.is_active() {
                    let _ = reply.send(Err(NotifyError::Unauthenticated));
                    return;
                }
                self.spawn_page(page.max(1), reply);
            }
            Command::LoadMore { reply } => {
                if !self.is_active() {
                    let _ = reply.send(Err(NotifyError::Unauthenticated));
                    return;
                }
                let next = match self.reconciler.cursor().next_page() {
                    Some(next) if !self.reconciler.is_loading() => next,
                    _ => {
                        let _ = reply.send(Ok(false));
                        return;
                    }
                };
                let (page_reply, page_result) = oneshot::channel();
                self.spawn_page(next, page_reply);
                tokio::spawn(async move {
                    let result = match page_result.await {
                        Ok(result) => result.map(|_| true),
                        Err(_) => Err(NotifyError::HubStopped),
                    };
                    let _ = reply.send(result);
                });
            }
            Command::FetchUnreadCount { reply } => {
                if !self.is_active() {
                    let _ = reply.send(Err(NotifyError::Unauthenticated));
                    return;
                }
                self.spawn_unread_count(Some(reply));
            }
            Command::MarkAsRead { id, reply } => {
                if !self.is_active() {
                    let _ = reply.send(Err(NotifyError::Unauthenticated));
                    return;
                }
                self.reconciler.mark_read(id);
                let gateway = self.gateway.clone();
                confirm(format!("mark notification {} read", id), reply, async move {
                    gateway.mark_read(id).await
                });
            }
            Command::MarkAllAsRead { reply } => {
                if !self.is_active() {
                    let _ = reply.send(Err(NotifyError::Unauthenticated));
                    return;
                }
                self.reconciler.mark_all_read();
                let gateway = self.gateway.clone();
                confirm("mark all notifications read".to_string(), reply, async move {
                    gateway.mark_all_read().await
                });
            }
            Command::Delete { id, reply } => {
                if !self.is_active() {
                    let _ = reply.send(Err(NotifyError::Unauthenticated));
                    return;
                }
                self.reconciler.remove(id);
                if self.toasts.clear(id) {
                    log::debug!("Cleared toast for deleted notification {}", id);
                }
                let gateway = self.gateway.clone();
                confirm(format!("delete notification {}", id), reply, async move {
                    gateway.delete(id).await
                });
            }
            Command::Preferences { reply } => {
                let gateway = self.gateway.clone();
                tokio::spawn(async move {
                    let _ = reply.send(gateway.preferences().await);
                });
            }
            Command::SavePreferences { prefs, reply } => {
                let gateway = self.gateway.clone();
                tokio::spawn(async move {
                    let _ = reply.send(gateway.save_preferences(&prefs).await);
                });
            }
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        let Some(frame) = self.transport.handle_event(event) else {
            return;
        };

        match frame {
            ServerFrame::Notification(notification) => {
                if let Admission::Admitted(notification) = self.reconciler.admit_push(notification) {
                    log::info!("Pushed notification {} ({})", notification.id, notification.category);
                    self.announce(notification);
                }
            }
            ServerFrame::UnreadCount(count) => self.reconciler.set_unread_count(count),
            ServerFrame::FridgeUpdate(payload) => {
                let _ = self.fridge_tx.send(FridgeSignal::Update(payload));
            }
            ServerFrame::Pong => log::debug!("Heartbeat acknowledged"),
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::UnreadCount { session, result, reply } => {
                if session != self.session_epoch {
                    reply_stale(reply);
                    return;
                }
                match result {
                    Ok(count) => {
                        self.reconciler.set_unread_count(count);
                        if let Some(reply) = reply {
                            let _ = reply.send(Ok(count));
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to fetch unread count: {}", e);
                        if let Some(reply) = reply {
                            let _ = reply.send(Err(e));
                        }
                    }
                }
            }
            Internal::WatermarkSeed { session, result } => {
                if session != self.session_epoch {
                    return;
                }
                match result {
                    Ok(page) => {
                        self.reconciler.seed_watermark(newest_id(&page));
                        self.watermark_ready = true;
                    }
                    Err(e) => log::warn!("Failed to seed poll watermark: {}", e),
                }
            }
            Internal::Poll { session, count, fresh } => {
                if session != self.session_epoch {
                    return;
                }
                self.poll_in_flight = false;

                let count = match count {
                    Ok(count) => Some(count),
                    Err(e) => {
                        log::warn!("Poll: failed to fetch unread count: {}", e);
                        None
                    }
                };

                match fresh {
                    Ok(page) if !self.watermark_ready => {
                        // No seed yet: this pass only establishes the baseline.
                        self.reconciler.seed_watermark(newest_id(&page));
                        self.watermark_ready = true;
                        if let Some(count) = count {
                            self.reconciler.set_unread_count(count);
                        }
                    }
                    Ok(page) => {
                        let outcome = self.reconciler.admit_poll(count, page.notifications);
                        if !outcome.admitted.is_empty() {
                            log::info!("Poll admitted {} notification(s)", outcome.admitted.len());
                        }
                        for notification in &outcome.admitted {
                            self.signal_fridge(notification);
                        }
                        if let Some(notification) = outcome.toast {
                            self.toasts.admit(notification, Instant::now());
                        }
                    }
                    Err(e) => {
                        log::warn!("Poll: failed to fetch notifications: {}", e);
                        if let Some(count) = count {
                            self.reconciler.set_unread_count(count);
                        }
                    }
                }
            }
            Internal::Page { session, page, result, reply } => {
                if session != self.session_epoch {
                    let _ = reply.send(Err(NotifyError::Unauthenticated));
                    return;
                }
                self.pending_pages = self.pending_pages.saturating_sub(1);
                self.reconciler.set_loading(self.pending_pages > 0);

                match result {
                    Ok(notifications) => {
                        self.reconciler.apply_page(page, notifications);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        log::warn!("Failed to fetch notifications page {}: {}", page, e);
                        if page <= 1 {
                            self.reconciler.abort_resync();
                        }
                        let _ = reply.send(Err(e));
                    }
                }
            }
        }
    }

    fn announce(&mut self, notification: Notification) {
        self.signal_fridge(&notification);
        self.toasts.admit(notification, Instant::now());
    }

    fn signal_fridge(&self, notification: &Notification) {
        if notification.category == NotificationCategory::Fridge {
            let _ = self.fridge_tx.send(FridgeSignal::Notification(notification.clone()));
        }
    }

    fn spawn_unread_count(&self, reply: Option<Reply<u64>>) {
        let gateway = self.gateway.clone();
        let internal = self.internal_tx.clone();
        let session = self.session_epoch;
        tokio::spawn(async move {
            let result = gateway.unread_count().await;
            let _ = internal.send(Internal::UnreadCount { session, result, reply });
        });
    }

    fn spawn_watermark_seed(&self) {
        let gateway = self.gateway.clone();
        let internal = self.internal_tx.clone();
        let session = self.session_epoch;
        tokio::spawn(async move {
            let result = gateway.list(1, 1).await;
            let _ = internal.send(Internal::WatermarkSeed { session, result });
        });
    }

    fn spawn_poll(&mut self) {
        if self.poll_in_flight {
            log::debug!("Previous poll still running, skipping tick");
            return;
        }
        self.poll_in_flight = true;

        let gateway = self.gateway.clone();
        let internal = self.internal_tx.clone();
        let session = self.session_epoch;
        let fresh_items = self.config.poll_fresh_items.max(1);
        tokio::spawn(async move {
            let (count, fresh) = tokio::join!(gateway.unread_count(), gateway.list(1, fresh_items));
            let _ = internal.send(Internal::Poll { session, count, fresh });
        });
    }

    fn spawn_page(&mut self, page: u32, reply: Reply<()>) {
        self.pending_pages += 1;
        self.reconciler.set_loading(true);
        if page <= 1 {
            self.reconciler.begin_resync();
        }

        let gateway = self.gateway.clone();
        let internal = self.internal_tx.clone();
        let session = self.session_epoch;
        let per_page = self.config.per_page;
        tokio::spawn(async move {
            let result = gateway.list(page, per_page).await;
            let _ = internal.send(Internal::Page { session, page, result, reply });
        });
    }

    fn publish(&self) {
        let cursor = self.reconciler.cursor();
        let snapshot = NotificationSnapshot {
            notifications: self.reconciler.notifications().to_vec(),
            unread_count: self.reconciler.unread_count(),
            connection: self.transport.state(),
            loading: self.reconciler.is_loading(),
            has_more: cursor.has_more,
            page: cursor.page,
            total: self.reconciler.total(),
            toast: self.toasts.current().cloned(),
            authenticated: self.is_active(),
        };

        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

/// Sends the server confirmation for an optimistic mutation. The local change
/// stays in place on failure; the error goes back to the caller.
fn confirm<F>(action: String, reply: Reply<()>, call: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = call.await;
        if let Err(e) = &result {
            log::error!("Failed to {}: {}", action, e);
        }
        let _ = reply.send(result);
    });
}

fn reply_stale<T>(reply: Option<Reply<T>>) {
    if let Some(reply) = reply {
        let _ = reply.send(Err(NotifyError::Unauthenticated));
    }
}

fn newest_id(page: &NotificationPage) -> Option<NotificationId> {
    page.notifications.iter().map(|n| n.id).max()
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
