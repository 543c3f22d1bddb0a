//! Long-polling update loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::client::TelegramClient;
use super::types::Update;
use crate::error::Result;

const POLL_TIMEOUT_SECS: u64 = 9;
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Skip updates that queued up while the bot was offline.
///
/// Returns the offset to poll from next.
async fn drop_pending_updates(client: &TelegramClient) -> Result<i64> {
    let pending = client.get_updates(-1, 0).await?;
    Ok(match pending.last() {
        Some(update) => {
            info!("Dropped pending updates up to {}", update.update_id);
            update.update_id + 1
        }
        None => 0,
    })
}

/// Poll forever, running `handler` on its own task for every update
pub async fn run_polling<F, Fut>(client: Arc<TelegramClient>, handler: F)
where
    F: Fn(Update) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut offset = loop {
        match drop_pending_updates(&client).await {
            Ok(offset) => break offset,
            Err(e) => {
                warn!("Failed to drop pending updates: {}", e);
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    };

    info!("Polling for updates");
    loop {
        let updates = match client.get_updates(offset, POLL_TIMEOUT_SECS).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!("getUpdates failed: {}", e);
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            debug!("Received update {}", update.update_id);
            tokio::spawn(handler(update));
        }
    }
}
