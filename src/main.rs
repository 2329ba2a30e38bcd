use anyhow::{Context, Result};
use dotenv::dotenv;
use std::env;

use foodtrack_notify::{AuthSession, Config, HttpGateway, NotificationHub};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let token = env::var("FOODTRACK_ACCESS_TOKEN").context("FOODTRACK_ACCESS_TOKEN must be set")?;

    let session = AuthSession::new();
    let gateway = HttpGateway::new(&config, session.clone())?;
    let (handle, hub) = NotificationHub::spawn(&config, gateway, session.clone())?;

    log::info!(
        "Watching notifications at {} (push: {})",
        config.api_base_url,
        config.ws_endpoint()?
    );

    session.login(token).await;
    if let Err(e) = handle.fetch_notifications(1).await {
        log::warn!("Initial notification load failed: {}", e);
    }

    let mut snapshots = handle.subscribe();
    let mut fridge = handle.subscribe_fridge();
    let mut last_toast = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                log::info!(
                    "{} notifications, {} unread, socket {}",
                    snapshot.notifications.len(),
                    snapshot.unread_count,
                    snapshot.connection
                );
                let toast_id = snapshot.toast.as_ref().map(|t| t.notification.id);
                if let Some(toast) = snapshot.toast.filter(|_| toast_id != last_toast) {
                    log::info!(
                        "New notification [{}] {}: {} -> {}",
                        toast.notification.category,
                        toast.notification.title,
                        toast.notification.body,
                        toast.notification.navigation_target()
                    );
                }
                last_toast = toast_id;
            }
            signal = fridge.recv() => {
                if let Ok(signal) = signal {
                    log::info!("Fridge refresh requested: {:?}", signal);
                }
            }
        }
    }

    session.logout().await;
    drop(snapshots);
    drop(handle);
    hub.await.context("Notification hub panicked")?;
    Ok(())
}
