use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task that periodically completes reservations whose end has passed.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let completed = sweep_once(&engine).await;
        if completed > 0 {
            info!("sweeper completed {completed} reservations");
        }
        engine.notify.prune();
    }
}

/// One pass; returns how many reservations were completed.
pub async fn sweep_once(engine: &Engine) -> usize {
    let now = engine.local_now();
    let mut completed = 0;
    for reservation_id in engine.collect_expired_reservations(now).await {
        match engine.complete(reservation_id).await {
            Ok(_) => completed += 1,
            Err(e) => {
                // May have been cancelled in between
                debug!("sweeper skip {reservation_id}: {e}");
            }
        }
    }
    metrics::counter!(crate::observability::SWEEP_COMPLETED_TOTAL).increment(completed as u64);
    completed
}
