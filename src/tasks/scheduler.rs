use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, sleep};

use crate::core::state::AppState;
use crate::tasks::deadlines::{DeadlineReceiver, DeadlineScheduler};
use crate::tasks::grading;

/// Grading workers plus the maintenance loop, until `shutdown` flips.
pub(crate) async fn run_workers(state: AppState, shutdown: watch::Receiver<bool>) -> Result<()> {
    match state.queue().recover_unacked().await {
        Ok(0) => {}
        Ok(recovered) => tracing::warn!(recovered, "Returned unacked grading messages to the queue"),
        Err(err) => tracing::error!(error = %err, "Failed to recover unacked grading messages"),
    }

    let workers = state.settings().grading().workers;
    let mut handles = Vec::with_capacity(workers + 1);
    for worker_id in 0..workers {
        handles.push(tokio::spawn(grading_worker(state.clone(), worker_id, shutdown.clone())));
    }
    handles.push(tokio::spawn(maintenance_loop(state.clone(), shutdown.clone())));
    tracing::info!(workers, "Grading workers started");

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

/// The deadline loop. Without a receiver it relies on resync alone.
pub(crate) async fn run_deadlines(
    state: AppState,
    receiver: Option<DeadlineReceiver>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let receiver = receiver.unwrap_or_else(|| crate::tasks::deadlines::deadline_channel().1);
    let scheduler = DeadlineScheduler::new(
        state.store().clone(),
        state.sessions().clone(),
        state.clock().clone(),
        receiver,
        state.backoff(),
        state.settings().scheduler().resync_interval(),
    );
    scheduler.run(shutdown).await;
    Ok(())
}

async fn grading_worker(state: AppState, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
    let poll = state.settings().grading().poll_interval();

    loop {
        if *shutdown.borrow() {
            break;
        }

        match state.queue().consume().await {
            Ok(Some(delivery)) => {
                grading::handle_delivery(&state, delivery).await;
                continue;
            }
            Ok(None) => {}
            Err(err) => tracing::error!(worker_id, error = %err, "Failed to consume grading queue"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(poll) => {}
        }
    }

    tracing::debug!(worker_id, "Grading worker stopped");
}

async fn maintenance_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(state.settings().grading().reaper_interval());
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => grading::run_maintenance_pass(&state).await,
        }
    }
}
