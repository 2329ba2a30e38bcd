#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use foodtrack_notify::{
    Config, Notification, NotificationCategory, NotificationGateway, NotificationId,
    NotificationPage, NotificationPreferences, NotificationSnapshot, NotifyError, Result,
    SyncConfig,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn notification(id: i64, is_read: bool) -> Notification {
    Notification {
        id: NotificationId(id),
        category: NotificationCategory::Friend,
        title: format!("Notification {}", id),
        body: "body".to_string(),
        is_read,
        created_at: None,
        url: None,
    }
}

pub fn notification_json(id: i64, category: &str) -> Value {
    json!({
        "id": id,
        "category": category,
        "title": format!("Notification {}", id),
        "body": "body",
        "isRead": false,
        "createdAt": "2024-03-01T10:00:00Z"
    })
}

/// Config pointing the push channel at `ws_url` with test-friendly timings.
pub fn test_config(ws_url: &str) -> Config {
    Config {
        api_base_url: "http://127.0.0.1:1/api".to_string(),
        ws_url: Some(ws_url.to_string()),
        sync: SyncConfig {
            poll_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(60),
            reconnect_base: Duration::from_millis(50),
            reconnect_cap: Duration::from_millis(200),
            ..SyncConfig::default()
        },
    }
}

#[derive(Default)]
pub struct MockState {
    /// Server-side list, newest first.
    pub notifications: Vec<Notification>,
    pub unread: u64,
    pub calls: Vec<String>,
    pub fail_mutations: bool,
    pub fail_lists: bool,
    /// Delay before a list response is returned; the page content is taken
    /// when the request arrives.
    pub list_delay: Option<Duration>,
    pub preferences: NotificationPreferences,
}

#[derive(Clone, Default)]
pub struct MockGateway {
    pub state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn with_notifications(notifications: Vec<Notification>) -> Self {
        let gateway = Self::default();
        {
            let mut state = gateway.state.lock().unwrap();
            state.unread = notifications.iter().filter(|n| !n.is_read).count() as u64;
            state.notifications = notifications;
        }
        gateway
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn push_server_side(&self, notification: Notification) {
        let mut state = self.state.lock().unwrap();
        if !notification.is_read {
            state.unread += 1;
        }
        state.notifications.insert(0, notification);
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, MockState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }

    fn failure(endpoint: &str) -> NotifyError {
        NotifyError::Status {
            endpoint: endpoint.to_string(),
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        }
    }
}

#[async_trait]
impl NotificationGateway for MockGateway {
    async fn list(&self, page: u32, per_page: u32) -> Result<NotificationPage> {
        let (result, delay) = {
            let state = self.record(format!("list {} {}", page, per_page));
            let result = if state.fail_lists {
                Err(Self::failure("list"))
            } else {
                let start = ((page.max(1) - 1) * per_page) as usize;
                let items: Vec<Notification> = state
                    .notifications
                    .iter()
                    .skip(start)
                    .take(per_page as usize)
                    .cloned()
                    .collect();
                let has_more = start + items.len() < state.notifications.len();
                Ok(NotificationPage {
                    notifications: items,
                    has_more,
                    total: Some(state.notifications.len() as u64),
                    page: Some(page),
                    pages: None,
                })
            };
            (result, state.list_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn unread_count(&self) -> Result<u64> {
        let state = self.record("unread_count".to_string());
        Ok(state.unread)
    }

    async fn mark_read(&self, id: NotificationId) -> Result<()> {
        let mut state = self.record(format!("read {}", id));
        if state.fail_mutations {
            return Err(Self::failure("read"));
        }
        if let Some(n) = state.notifications.iter_mut().find(|n| n.id == id && !n.is_read) {
            n.is_read = true;
            state.unread = state.unread.saturating_sub(1);
        }
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<()> {
        let mut state = self.record("read-all".to_string());
        if state.fail_mutations {
            return Err(Self::failure("read-all"));
        }
        state.notifications.iter_mut().for_each(|n| n.is_read = true);
        state.unread = 0;
        Ok(())
    }

    async fn delete(&self, id: NotificationId) -> Result<()> {
        let mut state = self.record(format!("delete {}", id));
        if state.fail_mutations {
            return Err(Self::failure("delete"));
        }
        state.notifications.retain(|n| n.id != id);
        Ok(())
    }

    async fn preferences(&self) -> Result<NotificationPreferences> {
        let state = self.record("preferences".to_string());
        Ok(state.preferences.clone())
    }

    async fn save_preferences(&self, prefs: &NotificationPreferences) -> Result<NotificationPreferences> {
        let mut state = self.record("save_preferences".to_string());
        state.preferences = prefs.clone();
        Ok(prefs.clone())
    }
}

/// One accepted push connection, seen from the server side.
pub struct PushConnection {
    pub token: Option<String>,
    ws: WebSocketStream<TcpStream>,
}

impl PushConnection {
    pub async fn send(&mut self, frame: Value) {
        self.ws.send(Message::Text(frame.to_string())).await.unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn push(&mut self, notification: Value) {
        self.send(json!({"type": "notification", "payload": notification})).await;
    }

    /// Next frame from the client; `None` once the client closed.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            match timeout(WAIT, self.ws.next()).await.ok()?? {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Drops the TCP connection without a closing handshake.
    pub fn drop_connection(self) {
        drop(self.ws);
    }
}

pub struct PushServer {
    pub url: String,
    connections: mpsc::UnboundedReceiver<PushConnection>,
}

impl PushServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut token = None;
                let callback = |request: &Request, response: Response| {
                    token = request.uri().query().and_then(|query| {
                        query
                            .split('&')
                            .find_map(|pair| pair.strip_prefix("token=").map(str::to_string))
                    });
                    Ok::<_, ErrorResponse>(response)
                };
                let accepted = tokio_tungstenite::accept_hdr_async(stream, callback).await;
                if let Ok(ws) = accepted {
                    let _ = tx.send(PushConnection { token, ws });
                }
            }
        });

        Self {
            url: format!("ws://{}/ws/notifications", addr),
            connections,
        }
    }

    pub async fn accept(&mut self) -> PushConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("no push connection within timeout")
            .expect("push server stopped")
    }

    pub async fn try_accept(&mut self, wait: Duration) -> Option<PushConnection> {
        timeout(wait, self.connections.recv()).await.ok().flatten()
    }
}

/// A ws url nobody listens on.
pub async fn dead_ws_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}/ws/notifications", addr)
}

pub async fn wait_for<F>(rx: &mut watch::Receiver<NotificationSnapshot>, mut predicate: F) -> NotificationSnapshot
where
    F: FnMut(&NotificationSnapshot) -> bool,
{
    timeout(WAIT, async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.expect("hub stopped");
        }
    })
    .await
    .expect("snapshot condition not reached in time")
}

pub async fn wait_for_call(gateway: &MockGateway, call: &str) {
    timeout(WAIT, async {
        while !gateway.calls().iter().any(|c| c == call) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("expected gateway call not issued");
}

pub fn ids(snapshot: &NotificationSnapshot) -> Vec<i64> {
    snapshot.notifications.iter().map(|n| n.id.0).collect()
}
