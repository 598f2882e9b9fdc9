//! Durable deadline scheduler.
//!
//! The store holds the authoritative deadline entries; the heap here is a cache
//! rebuilt on start and on every resync. Registrations from the same process
//! arrive through [`DeadlineHandle`] and wake the loop immediately. Due entries
//! fire as separate tasks, so one slow expiry does not hold back the rest.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use time::PrimitiveDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use crate::core::backoff::Backoff;
use crate::core::clock::Clock;
use crate::core::errors::ExamError;
use crate::core::time::{add_std, until};
use crate::db::models::DeadlineEntry;
use crate::repositories::SessionStore;
use crate::services::session_manager::ExamSessionManager;

/// Upper bound on one sleep so the loop re-reads the clock now and then.
const MAX_IDLE: Duration = Duration::from_secs(60);

#[derive(Debug)]
enum DeadlineCommand {
    Register(DeadlineEntry),
    Cancel(String),
}

/// Sender side used by the session manager. Cheap to clone; sends never block.
#[derive(Debug, Clone)]
pub(crate) struct DeadlineHandle {
    tx: Option<mpsc::UnboundedSender<DeadlineCommand>>,
}

pub(crate) struct DeadlineReceiver {
    rx: mpsc::UnboundedReceiver<DeadlineCommand>,
}

pub(crate) fn deadline_channel() -> (DeadlineHandle, DeadlineReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeadlineHandle { tx: Some(tx) }, DeadlineReceiver { rx })
}

impl DeadlineHandle {
    /// A handle for processes without an in-process scheduler; resync picks entries up.
    pub(crate) fn detached() -> Self {
        Self { tx: None }
    }

    pub(crate) fn register(&self, entry: DeadlineEntry) {
        self.send(DeadlineCommand::Register(entry));
    }

    pub(crate) fn cancel(&self, session_id: &str) {
        self.send(DeadlineCommand::Cancel(session_id.to_string()));
    }

    fn send(&self, command: DeadlineCommand) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(command).is_err() {
            tracing::debug!("Deadline scheduler is not running; entry left for resync");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    due: PrimitiveDateTime,
    seq: i64,
    session_id: String,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    due: PrimitiveDateTime,
    fires_at: PrimitiveDateTime,
    seq: i64,
    failures: u32,
}

struct Fired {
    slot: Slot,
    pending: Pending,
    outcome: Result<bool, ExamError>,
}

pub(crate) struct DeadlineScheduler {
    store: Arc<dyn SessionStore>,
    sessions: ExamSessionManager,
    clock: Arc<dyn Clock>,
    commands: Option<DeadlineReceiver>,
    backoff: Backoff,
    resync_interval: Duration,
    heap: BinaryHeap<Reverse<Slot>>,
    pending: HashMap<String, Pending>,
    in_flight: JoinSet<Fired>,
    firing: HashSet<String>,
}

impl DeadlineScheduler {
    pub(crate) fn new(
        store: Arc<dyn SessionStore>,
        sessions: ExamSessionManager,
        clock: Arc<dyn Clock>,
        commands: DeadlineReceiver,
        backoff: Backoff,
        resync_interval: Duration,
    ) -> Self {
        Self {
            store,
            sessions,
            clock,
            commands: Some(commands),
            backoff,
            resync_interval,
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            in_flight: JoinSet::new(),
            firing: HashSet::new(),
        }
    }

    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        if let Err(err) = self.resync().await {
            tracing::error!(error = %err, "Initial deadline load failed; retrying on next resync");
        }
        tracing::info!(pending = self.pending.len(), "Deadline scheduler started");

        let mut resync = interval_at(Instant::now() + self.resync_interval, self.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.fire_due();
            let idle = self.time_to_next();

            tokio::select! {
                _ = shutdown.changed() => break,
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.settle(joined);
                }
                command = recv(&mut self.commands) => match command {
                    Some(command) => self.apply(command),
                    None => self.commands = None,
                },
                _ = resync.tick() => {
                    if let Err(err) = self.resync().await {
                        tracing::warn!(error = %err, "Deadline resync failed");
                    }
                }
                _ = sleep(idle) => {}
            }
        }

        // aborted fires are unmarked and run again after restart
        self.in_flight.shutdown().await;
        tracing::info!(pending = self.pending.len(), "Deadline scheduler stopped");
    }

    fn apply(&mut self, command: DeadlineCommand) {
        match command {
            DeadlineCommand::Register(entry) if !entry.fired => {
                let known = self
                    .pending
                    .get(&entry.session_id)
                    .is_some_and(|pending| pending.seq == entry.seq);
                if known || self.firing.contains(&entry.session_id) {
                    return;
                }
                tracing::debug!(session_id = %entry.session_id, fires_at = %entry.fires_at, "Deadline registered");
                self.schedule(entry.session_id, entry.fires_at, entry.seq, entry.fires_at, 0);
            }
            DeadlineCommand::Register(_) => {}
            DeadlineCommand::Cancel(session_id) => {
                self.pending.remove(&session_id);
            }
        }
    }

    fn schedule(
        &mut self,
        session_id: String,
        fires_at: PrimitiveDateTime,
        seq: i64,
        due: PrimitiveDateTime,
        failures: u32,
    ) {
        self.pending.insert(session_id.clone(), Pending { due, fires_at, seq, failures });
        self.heap.push(Reverse(Slot { due, seq, session_id }));
    }

    /// Rebuilds the cache from the store. Retry delays of entries still unfired are kept.
    async fn resync(&mut self) -> Result<(), ExamError> {
        let entries = self.store.list_unfired_deadlines().await?;
        let previous = std::mem::take(&mut self.pending);
        self.heap.clear();

        for entry in entries {
            if self.firing.contains(&entry.session_id) {
                continue;
            }
            let (due, failures) = match previous.get(&entry.session_id) {
                Some(kept) if kept.seq == entry.seq => (kept.due, kept.failures),
                _ => (entry.fires_at, 0),
            };
            self.schedule(entry.session_id, entry.fires_at, entry.seq, due, failures);
        }

        tracing::debug!(pending = self.pending.len(), "Deadline cache resynced");
        Ok(())
    }

    fn time_to_next(&mut self) -> Duration {
        match self.peek_live() {
            Some(slot) => until(self.clock.now(), slot.due).min(MAX_IDLE),
            None => MAX_IDLE,
        }
    }

    /// Drops heap slots that were cancelled or superseded by a later reschedule.
    fn peek_live(&mut self) -> Option<Slot> {
        while let Some(Reverse(slot)) = self.heap.peek() {
            let live = self
                .pending
                .get(&slot.session_id)
                .is_some_and(|pending| pending.due == slot.due && pending.seq == slot.seq);
            if live {
                return Some(slot.clone());
            }
            self.heap.pop();
        }
        None
    }

    fn fire_due(&mut self) {
        while let Some(slot) = self.peek_live() {
            if slot.due > self.clock.now() {
                break;
            }
            self.heap.pop();
            let Some(pending) = self.pending.remove(&slot.session_id) else {
                continue;
            };

            self.firing.insert(slot.session_id.clone());
            let sessions = self.sessions.clone();
            let store = Arc::clone(&self.store);
            let clock = Arc::clone(&self.clock);
            self.in_flight.spawn(async move {
                let outcome =
                    expire_and_mark(&sessions, store.as_ref(), clock.as_ref(), &slot.session_id).await;
                Fired { slot, pending, outcome }
            });
        }
    }

    fn settle(&mut self, joined: Result<Fired, JoinError>) {
        match joined {
            Ok(fired) => self.finish(fired),
            Err(err) => {
                // the session id is lost with the task; resync reloads every unfired entry
                tracing::error!(error = %err, "Deadline fire task aborted");
                self.firing.clear();
            }
        }
    }

    fn finish(&mut self, fired: Fired) {
        let Fired { slot, pending, outcome } = fired;
        self.firing.remove(&slot.session_id);

        match outcome {
            Ok(marked) => {
                if marked {
                    metrics::counter!("deadlines_fired_total").increment(1);
                }
                let now = self.clock.now();
                tracing::info!(
                    session_id = %slot.session_id,
                    fires_at = %pending.fires_at,
                    lag_ms = until(pending.fires_at, now).as_millis() as u64,
                    first_fire = marked,
                    "Deadline fired"
                );
            }
            Err(err) => {
                let failures = pending.failures + 1;
                let delay = self.backoff.delay(failures);
                metrics::counter!("deadline_expire_degraded_total").increment(1);
                tracing::warn!(
                    session_id = %slot.session_id,
                    failures,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "Deadline expiry degraded; rescheduling"
                );
                let due = add_std(self.clock.now(), delay);
                self.schedule(slot.session_id, pending.fires_at, pending.seq, due, failures);
            }
        }
    }
}

/// Expires the session, then marks its entry fired. Returns whether this call
/// was the one that marked it.
async fn expire_and_mark(
    sessions: &ExamSessionManager,
    store: &dyn SessionStore,
    clock: &dyn Clock,
    session_id: &str,
) -> Result<bool, ExamError> {
    match sessions.expire_session(session_id).await {
        Ok(_) => {}
        Err(ExamError::NotFound(what)) => {
            tracing::warn!(session_id, what = %what, "Deadline for a missing session");
        }
        Err(err) => return Err(err),
    }
    Ok(store.mark_deadline_fired(session_id, clock.now()).await?)
}

async fn recv(commands: &mut Option<DeadlineReceiver>) -> Option<DeadlineCommand> {
    match commands {
        Some(receiver) => receiver.rx.recv().await,
        None => std::future::pending().await,
    }
}
