//! Periodic expiry of old sessions

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::session::registry::SessionRegistry;

/// Run [`SessionRegistry::sweep_expired`] every `period` until aborted
pub fn spawn_expiry_sweeper(registry: Arc<SessionRegistry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let removed = registry.sweep_expired(Utc::now()).await;
            if !removed.is_empty() {
                tracing::info!("Expired {} session(s): {}", removed.len(), removed.join(", "));
            }
        }
    })
}
