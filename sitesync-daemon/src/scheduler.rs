//! Tick loop: plan due pair-directions, dispatch invocations, record results.
//!
//! The scheduler is the single owner of the [`StateStore`], so record writes
//! are serialized. Invocations run on blocking worker threads; a key stays in
//! the in-flight map (by task id) from dispatch until its task is joined, and
//! a due key that is still in flight is skipped.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;

use sitesync_core::{
    clock, due_pairs, PairDirectionKey, StateStore, SyncInvocationError, SyncInvoker, SyncRequest,
};

type Outcome = Result<DateTime<Utc>, SyncInvocationError>;

pub struct Scheduler {
    store: StateStore,
    invoker: Arc<dyn SyncInvoker>,
    in_flight: HashMap<Id, PairDirectionKey>,
    tasks: JoinSet<Outcome>,
    tick: Duration,
    grace: Duration,
    checkpoint: Option<Duration>,
}

impl Scheduler {
    pub fn new(store: StateStore, invoker: Arc<dyn SyncInvoker>) -> Self {
        let settings = &store.config().daemon;
        let (tick, grace, checkpoint) = (
            settings.tick_interval(),
            settings.shutdown_grace(),
            settings.checkpoint_interval(),
        );
        Self {
            store,
            invoker,
            in_flight: HashMap::new(),
            tasks: JoinSet::new(),
            tick,
            grace,
            checkpoint,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn is_in_flight(&self, key: &PairDirectionKey) -> bool {
        self.in_flight.values().any(|k| k == key)
    }

    /// Run until a shutdown is broadcast, then give in-flight syncs the grace
    /// period and hand the store back for the final flush.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> StateStore {
        tracing::info!(
            tick_ms = self.tick.as_millis() as u64,
            source_sites = self.store.config().source.enabled().count(),
            destination_sites = self.store.config().destination.enabled().count(),
            "scheduler started",
        );
        let mut last_checkpoint = Instant::now();

        loop {
            if shutdown_requested(&mut shutdown_rx) {
                break;
            }
            self.tick_at(clock::now_minute());
            if self.wait_for_next_tick(&mut shutdown_rx).await {
                break;
            }
            self.maybe_checkpoint(&mut last_checkpoint);
        }

        tracing::info!("scheduler stopping");
        self.drain().await;
        self.store
    }

    /// Evaluate every enabled pair-direction at `now` and dispatch the due
    /// ones that are not already in flight. Returns the number dispatched.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> usize {
        let due = due_pairs(self.store.config(), self.store.state(), now);
        let mut dispatched = 0;
        for due in due {
            if self.is_in_flight(&due.key) {
                tracing::debug!(pair = %due.key, direction = %due.key.direction, "previous sync still running; skipping");
                continue;
            }
            let request = SyncRequest::from_due(due, true, self.store.origin().to_path_buf());
            self.dispatch(request);
            dispatched += 1;
        }
        dispatched
    }

    fn dispatch(&mut self, request: SyncRequest) {
        let key = request.key.clone();
        tracing::info!(
            pair = %key,
            direction = %key.direction,
            from = %key.from,
            to = %key.to,
            last_run = %request.last_run,
            "initiating sync",
        );

        let invoker = Arc::clone(&self.invoker);
        let handle = self.tasks.spawn_blocking(move || {
            panic::catch_unwind(AssertUnwindSafe(|| invoker.invoke(&request))).unwrap_or_else(|_| {
                Err(SyncInvocationError::Failed(
                    "sync routine panicked".to_string(),
                ))
            })
        });
        self.in_flight.insert(handle.id(), key);
    }

    /// Sleep one tick, collecting finished syncs meanwhile. Returns `true` if
    /// a shutdown interrupted the wait.
    async fn wait_for_next_tick(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        let sleep = tokio::time::sleep(self.tick);
        tokio::pin!(sleep);
        loop {
            let joined = tokio::select! {
                _ = shutdown_rx.recv() => return true,
                _ = &mut sleep => return false,
                Some(joined) = self.tasks.join_next_with_id() => joined,
            };
            self.complete(joined);
        }
    }

    fn complete(&mut self, joined: Result<(Id, Outcome), JoinError>) {
        let (id, outcome) = match joined {
            Ok(joined) => joined,
            Err(err) => {
                let key = self.in_flight.remove(&err.id());
                tracing::warn!(
                    pair = ?key.map(|k| k.to_string()),
                    error = %err,
                    "sync task did not complete",
                );
                return;
            }
        };
        let Some(key) = self.in_flight.remove(&id) else {
            return;
        };

        match outcome {
            Ok(completed_at) => {
                self.store.record(&key, completed_at);
                tracing::info!(
                    pair = %key,
                    direction = %key.direction,
                    timestamp = %clock::truncate_to_minute(completed_at),
                    "sync completed",
                );
            }
            Err(err) => {
                tracing::error!(
                    pair = %key,
                    direction = %key.direction,
                    from = %key.from,
                    to = %key.to,
                    error = %err,
                    "sync failed; retrying on next eligible tick",
                );
            }
        }
    }

    fn maybe_checkpoint(&mut self, last_checkpoint: &mut Instant) {
        let Some(every) = self.checkpoint else {
            return;
        };
        if last_checkpoint.elapsed() < every || !self.store.is_dirty() {
            return;
        }
        *last_checkpoint = Instant::now();
        match self.store.flush() {
            Ok(()) => tracing::debug!(path = %self.store.origin().display(), "sync state checkpointed"),
            Err(err) => tracing::warn!(error = %err, "sync state checkpoint failed"),
        }
    }

    /// Wait up to the grace period for in-flight syncs; whatever is still
    /// running afterwards is abandoned and never recorded.
    async fn drain(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        tracing::info!(
            in_flight = self.tasks.len(),
            grace_secs = self.grace.as_secs(),
            "waiting for in-flight syncs",
        );
        let deadline = Instant::now() + self.grace;
        while !self.tasks.is_empty() {
            match tokio::time::timeout_at(deadline, self.tasks.join_next_with_id()).await {
                Ok(Some(joined)) => self.complete(joined),
                Ok(None) => break,
                Err(_) => {
                    let mut abandoned: Vec<String> =
                        self.in_flight.values().map(ToString::to_string).collect();
                    abandoned.sort();
                    tracing::warn!(pairs = ?abandoned, "abandoning in-flight syncs");
                    self.tasks.abort_all();
                    self.in_flight.clear();
                    break;
                }
            }
        }
    }

    #[cfg(test)]
    async fn wait_idle(&mut self) {
        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.complete(joined);
        }
    }
}

fn shutdown_requested(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty))
}
