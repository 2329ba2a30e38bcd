//! Push channel to `/ws/notifications`.
//!
//! [`TransportChannel`] is the bookkeeping half, owned by the hub loop: state
//! machine, backoff, pending reconnect deadline. The socket itself lives in a
//! spawned task that reports back through [`TransportEvent`]s tagged with the
//! connection epoch, so events from a connection that was already replaced or
//! closed are recognised and ignored.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::SyncConfig;
use crate::error::NotifyError;
use crate::models::frame::{ClientFrame, ServerFrame};
use crate::models::snapshot::ConnectionState;

/// Exponential reconnect delay: `min(base * 2^attempt, cap)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, advancing the counter. `None` once the
    /// optional attempt ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }

        let factor = 2u32.checked_pow(self.attempt).unwrap_or(u32::MAX);
        let delay = self.base.checked_mul(factor).unwrap_or(self.cap).min(self.cap);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[derive(Debug)]
pub enum TransportEvent {
    Opened { epoch: u64 },
    Frame { epoch: u64, frame: ServerFrame },
    Closed { epoch: u64, deliberate: bool },
}

impl TransportEvent {
    fn epoch(&self) -> u64 {
        match self {
            TransportEvent::Opened { epoch }
            | TransportEvent::Frame { epoch, .. }
            | TransportEvent::Closed { epoch, .. } => *epoch,
        }
    }
}

pub struct TransportChannel {
    endpoint: Url,
    heartbeat: Duration,
    backoff: Backoff,
    state: ConnectionState,
    epoch: u64,
    shutdown: Option<oneshot::Sender<()>>,
    reconnect_at: Option<Instant>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportChannel {
    pub fn new(
        endpoint: Url,
        config: &SyncConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            endpoint,
            heartbeat: config.heartbeat_interval,
            backoff: Backoff::new(
                config.reconnect_base,
                config.reconnect_cap,
                config.max_reconnect_attempts,
            ),
            state: ConnectionState::Disconnected,
            epoch: 0,
            shutdown: None,
            reconnect_at: None,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Opens the socket with `token`. No-op while a connection is open or
    /// opening. Returns whether a new connection attempt was started.
    pub fn connect(&mut self, token: &str) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }

        self.reconnect_at = None;
        self.epoch += 1;
        self.state = ConnectionState::Connecting;

        let mut url = self.endpoint.clone();
        url.query_pairs_mut().clear().append_pair("token", token);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown = Some(shutdown_tx);
        tokio::spawn(run_connection(
            url,
            self.epoch,
            self.heartbeat,
            self.events.clone(),
            shutdown_rx,
        ));

        log::info!("Connecting notification socket (epoch {})", self.epoch);
        true
    }

    /// Deliberate close (logout or teardown): no reconnect is scheduled and
    /// any pending one is cancelled.
    pub fn close(&mut self) {
        self.reconnect_at = None;
        self.backoff.reset();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        // Later events from the old socket must not touch the new state.
        self.epoch += 1;
        if self.state != ConnectionState::Disconnected {
            log::info!("Notification socket closed by client");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Applies a socket event. Frames from the live connection are handed
    /// back to the caller; everything else only updates channel state.
    pub fn handle_event(&mut self, event: TransportEvent) -> Option<ServerFrame> {
        if event.epoch() != self.epoch {
            log::debug!("Dropping event from stale socket epoch {}", event.epoch());
            return None;
        }

        match event {
            TransportEvent::Opened { .. } => {
                log::info!("Notification socket connected");
                self.state = ConnectionState::Connected;
                self.backoff.reset();
                None
            }
            TransportEvent::Frame { frame, .. } => Some(frame),
            TransportEvent::Closed { deliberate, .. } => {
                self.state = ConnectionState::Disconnected;
                self.shutdown = None;

                if deliberate {
                    return None;
                }

                match self.backoff.next_delay() {
                    Some(delay) => {
                        log::info!(
                            "Notification socket lost, reconnecting in {:?} (attempt {})",
                            delay,
                            self.backoff.attempt()
                        );
                        self.reconnect_at = Some(Instant::now() + delay);
                    }
                    None => {
                        log::warn!(
                            "Notification socket lost, giving up after {} attempts",
                            self.backoff.attempt()
                        );
                    }
                }
                None
            }
        }
    }

    /// Clears a reconnect deadline that has come due and reports whether the
    /// caller should reconnect now.
    pub fn take_due_reconnect(&mut self, now: Instant) -> bool {
        match self.reconnect_at {
            Some(at) if at <= now => {
                self.reconnect_at = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn run_connection(
    url: Url,
    epoch: u64,
    heartbeat: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
        _ = &mut shutdown => {
            let _ = events.send(TransportEvent::Closed { epoch, deliberate: true });
            return;
        }
    };

    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            log::warn!("Notification socket failed to open: {}", NotifyError::from(e));
            let _ = events.send(TransportEvent::Closed { epoch, deliberate: false });
            return;
        }
    };

    let _ = events.send(TransportEvent::Opened { epoch });
    let (mut write, mut read) = stream.split();

    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let deliberate = loop {
        tokio::select! {
            _ = &mut shutdown => {
                let close = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "User logout".into(),
                };
                if let Err(e) = write.send(Message::Close(Some(close))).await {
                    log::debug!("Close frame not delivered: {}", e);
                }
                break true;
            }
            _ = ticker.tick() => {
                match ClientFrame::Ping.to_text() {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            log::warn!("Heartbeat ping failed: {}", e);
                        }
                    }
                    Err(e) => log::error!("Failed to encode ping: {}", e),
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match ServerFrame::parse(&text) {
                    Ok(frame) => {
                        let _ = events.send(TransportEvent::Frame { epoch, frame });
                    }
                    Err(e) => log::warn!("Dropping push frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    log::info!("Notification socket closed by server: {:?}", frame);
                    break false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("Notification socket error: {}", e);
                    break false;
                }
                None => break false,
            },
        }
    };

    let _ = events.send(TransportEvent::Closed { epoch, deliberate });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let mut backoff = Backoff::new(Duration::from_millis(1000), Duration::from_millis(30000), None);
        let delays: Vec<u64> = (0..8)
            .map(|_| backoff.next_delay().unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]);
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let cap = Duration::from_millis(30000);
        let mut backoff = Backoff::new(Duration::from_millis(750), cap, None);
        let mut previous = Duration::ZERO;
        for _ in 0..64 {
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= previous);
            assert!(delay <= cap);
            previous = delay;
        }
        assert_eq!(previous, cap);
    }

    #[test]
    fn test_backoff_reset_and_ceiling() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), Some(2));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    fn channel() -> (TransportChannel, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = Url::parse("ws://127.0.0.1:9/ws/notifications").unwrap();
        (TransportChannel::new(endpoint, &SyncConfig::default(), tx), rx)
    }

    #[tokio::test]
    async fn test_connect_is_noop_while_connecting() {
        let (mut channel, _rx) = channel();
        assert!(channel.connect("token"));
        assert_eq!(channel.state(), ConnectionState::Connecting);
        assert!(!channel.connect("token"));
        channel.close();
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unclean_close_schedules_reconnect() {
        let (mut channel, _rx) = channel();
        channel.connect("token");
        let epoch = channel.epoch;

        channel.handle_event(TransportEvent::Opened { epoch });
        assert_eq!(channel.state(), ConnectionState::Connected);

        channel.handle_event(TransportEvent::Closed { epoch, deliberate: false });
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        let deadline = channel.reconnect_deadline().unwrap();
        assert!(deadline > Instant::now());
        assert!(!channel.take_due_reconnect(Instant::now()));
        assert!(channel.take_due_reconnect(deadline));
        assert!(channel.reconnect_deadline().is_none());
    }

    #[tokio::test]
    async fn test_deliberate_close_cancels_reconnect() {
        let (mut channel, _rx) = channel();
        channel.connect("token");
        let epoch = channel.epoch;
        channel.handle_event(TransportEvent::Closed { epoch, deliberate: false });
        assert!(channel.reconnect_deadline().is_some());

        channel.close();
        assert!(channel.reconnect_deadline().is_none());
    }

    #[tokio::test]
    async fn test_stale_events_are_ignored() {
        let (mut channel, _rx) = channel();
        channel.connect("token");
        let old_epoch = channel.epoch;
        channel.close();
        channel.connect("token");

        let frame = channel.handle_event(TransportEvent::Frame {
            epoch: old_epoch,
            frame: ServerFrame::Pong,
        });
        assert!(frame.is_none());
        channel.handle_event(TransportEvent::Closed { epoch: old_epoch, deliberate: false });
        assert_eq!(channel.state(), ConnectionState::Connecting);
        assert!(channel.reconnect_deadline().is_none());
        channel.close();
    }
}
