use std::sync::Arc;

use tokio::time;
use tracing::{debug, info};

use crate::dispatcher::{Dispatcher, Sessions};

pub async fn start_cleanup_task(dispatcher: Arc<Dispatcher>) {
    let config = dispatcher.config();
    let mut interval = time::interval(config.cleanup_interval);

    info!(
        "Started session cleanup task: checking every {}s, inactive timeout: {}s, active timeout: {}s",
        config.cleanup_interval.as_secs(),
        config.inactive_timeout_secs,
        config.active_timeout_secs
    );

    loop {
        interval.tick().await;
        cleanup_sessions(
            dispatcher.sessions(),
            config.inactive_timeout_secs,
            config.active_timeout_secs,
        );
    }
}

/// Drops sessions that have been idle with no players, or that outlived the
/// active timeout. Players still attached keep their session handle; only the
/// registry entry goes away. Returns how many were removed.
pub fn cleanup_sessions(
    sessions: &Sessions,
    inactive_timeout_secs: u64,
    active_timeout_secs: u64,
) -> usize {
    let mut sessions_to_remove = Vec::new();

    for entry in sessions.iter() {
        // Busy sessions are in use, so not idle.
        if let Ok(session) = entry.value().try_lock()
            && session.should_cleanup(inactive_timeout_secs, active_timeout_secs)
        {
            sessions_to_remove.push(entry.key().clone());
        }
    }

    let removed_count = sessions_to_remove.len();
    for session_id in sessions_to_remove {
        sessions.remove(&session_id);
        debug!("Cleaned up session: {}", session_id);
    }

    if removed_count > 0 {
        info!("Cleaned up {} inactive sessions", removed_count);
    }
    removed_count
}
