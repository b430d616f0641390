use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use parley_db::models::parse_uuid;
use parley_db::{Database, now_ms};
use parley_gateway::dispatcher::Dispatcher;
use parley_types::events::ChatEvent;

/// Background task that flips stale online users offline.
///
/// A user counts as stale when their last heartbeat is older than the
/// presence threshold. Each flipped user gets a presence event so
/// connected clients refresh their rosters.
pub async fn run_presence_sweep(db: Arc<Database>, dispatcher: Dispatcher, period: Duration) {
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        let db = db.clone();
        let swept = tokio::task::spawn_blocking(move || db.mark_stale_offline(now_ms())).await;
        match swept {
            Ok(Ok(users)) => {
                if !users.is_empty() {
                    info!("Presence sweep: marked {} stale users offline", users.len());
                }
                for user in users {
                    dispatcher.broadcast(ChatEvent::PresenceUpdate {
                        user_id: parse_uuid(&user.id, "user id"),
                        online: false,
                        last_seen: user.last_seen,
                    });
                }
            }
            Ok(Err(e)) => warn!("Presence sweep error: {}", e),
            Err(e) => warn!("Presence sweep task failed: {}", e),
        }
    }
}

/// Background task that prunes expired typing indicator rows. Expiry is
/// already enforced at read time, so this only keeps the table small.
pub async fn run_typing_sweep(db: Arc<Database>, period: Duration) {
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        let db = db.clone();
        let pruned = tokio::task::spawn_blocking(move || db.delete_expired_typing(now_ms())).await;
        match pruned {
            Ok(Ok(count)) => {
                if count > 0 {
                    info!("Typing sweep: pruned {} expired indicators", count);
                }
            }
            Ok(Err(e)) => warn!("Typing sweep error: {}", e),
            Err(e) => warn!("Typing sweep task failed: {}", e),
        }
    }
}
