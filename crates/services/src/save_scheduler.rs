//! Debounced, retrying remote writes.
//!
//! A single actor task owns every remote write, so pushes for one user never
//! overlap. Callers hand it full snapshots by value; the local cache is written
//! synchronously before the actor sees anything.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use tracker_core::model::{Category, Role};

use crate::config::SchedulerConfig;
use crate::sync_service::SyncService;

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// Observable state of the scheduler's single pending write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// A trailing debounce timer is armed.
    DebouncedPending,
    InFlight,
    /// Waiting to run retry number `retry`.
    BackoffPending { retry: u32 },
    /// The actor has exited; further calls only touch the local cache.
    Stopped,
}

#[derive(PartialEq)]
struct Snapshot {
    categories: Vec<Category>,
    role: Role,
}

enum Command {
    Schedule(Snapshot),
    Immediate(Snapshot),
    Flush(oneshot::Sender<()>),
    Teardown(Snapshot),
}

enum PendingKind {
    Debounced,
    Backoff { retry: u32, started: Instant },
}

struct Pending {
    snapshot: Snapshot,
    deadline: Instant,
    kind: PendingKind,
}

//
// ─── HANDLE ────────────────────────────────────────────────────────────────────
//

/// Handle to the save actor. Dropping every handle stops the actor once its
/// queue drains; pending timers are abandoned.
pub struct SaveScheduler {
    sync: Arc<SyncService>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SchedulerState>,
    task: JoinHandle<()>,
}

impl SaveScheduler {
    /// Spawn the actor on the current tokio runtime.
    #[must_use]
    pub fn spawn(sync: Arc<SyncService>, config: SchedulerConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SchedulerState::Idle);
        let worker = Worker {
            sync: Arc::clone(&sync),
            config,
            state: state_tx,
            last_save_time: None,
            last_synced: None,
            pending: None,
            flush_waiters: Vec::new(),
        };
        let task = tokio::spawn(worker.run(rx));
        Self {
            sync,
            commands,
            state,
            task,
        }
    }

    /// Save locally now and remotely soon.
    ///
    /// The remote write happens at once when the last one is older than the
    /// minimum interval; otherwise a trailing timer is (re)armed and this
    /// snapshot replaces whatever was pending.
    pub fn schedule(&self, categories: Vec<Category>, role: &Role) {
        self.sync.write_local(&categories);
        if *role == Role::Unauthenticated {
            return;
        }
        self.send(Command::Schedule(Snapshot {
            categories,
            role: role.clone(),
        }));
    }

    /// Save locally and push right away, cancelling any pending write.
    pub fn schedule_immediate(&self, categories: Vec<Category>, role: &Role) {
        self.sync.write_local(&categories);
        if *role == Role::Unauthenticated {
            return;
        }
        self.send(Command::Immediate(Snapshot {
            categories,
            role: role.clone(),
        }));
    }

    /// Last-chance save on shutdown: one attempt, no retries. Replaces any
    /// pending write. Skipped for an empty tree and for the tree the last
    /// successful write already pushed. The actor stops afterwards.
    pub fn teardown(&self, categories: Vec<Category>, role: &Role) {
        if categories.is_empty() {
            debug!("teardown with empty tree; skipping save");
        } else {
            self.sync.write_local(&categories);
        }
        self.send(Command::Teardown(Snapshot {
            categories,
            role: role.clone(),
        }));
    }

    /// Push any pending snapshot now and wait until nothing is pending.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx));
        // A closed channel means the actor is gone, which is idle enough.
        let _ = rx.await;
    }

    /// Wait for the actor task to exit.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == SchedulerState::Stopped).await;
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("save scheduler stopped; remote write dropped");
        }
    }
}

//
// ─── ACTOR ─────────────────────────────────────────────────────────────────────
//

struct Worker {
    sync: Arc<SyncService>,
    config: SchedulerConfig,
    state: watch::Sender<SchedulerState>,
    last_save_time: Option<Instant>,
    /// Snapshot the remote last accepted in full.
    last_synced: Option<Snapshot>,
    pending: Option<Pending>,
    flush_waiters: Vec<oneshot::Sender<()>>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let command = match self.pending.as_ref().map(|p| p.deadline) {
                Some(deadline) => {
                    tokio::select! {
                        biased;
                        command = rx.recv() => command,
                        () = sleep_until(deadline) => {
                            self.fire_pending().await;
                            self.settle();
                            continue;
                        }
                    }
                }
                None => rx.recv().await,
            };

            let Some(command) = command else {
                debug!("all scheduler handles dropped");
                break;
            };

            match command {
                Command::Schedule(snapshot) => self.on_schedule(snapshot).await,
                Command::Immediate(snapshot) => {
                    self.cancel_pending("immediate save");
                    self.write(snapshot, 0, Instant::now()).await;
                }
                Command::Flush(waiter) => {
                    self.flush_waiters.push(waiter);
                    if self.pending.is_some() {
                        self.fire_pending().await;
                    }
                }
                Command::Teardown(snapshot) => {
                    self.cancel_pending("teardown");
                    self.teardown(snapshot).await;
                    break;
                }
            }
            self.settle();
        }

        self.pending = None;
        self.set_state(SchedulerState::Stopped);
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn set_state(&self, next: SchedulerState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(from = ?*current, to = ?next, "save scheduler transition");
                *current = next;
                true
            }
        });
    }

    /// Publish the resting state and release flush waiters once idle.
    fn settle(&mut self) {
        match &self.pending {
            None => {
                self.set_state(SchedulerState::Idle);
                for waiter in self.flush_waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
            Some(Pending {
                kind: PendingKind::Debounced,
                ..
            }) => self.set_state(SchedulerState::DebouncedPending),
            Some(Pending {
                kind: PendingKind::Backoff { retry, .. },
                ..
            }) => self.set_state(SchedulerState::BackoffPending { retry: *retry }),
        }
    }

    fn cancel_pending(&mut self, reason: &'static str) {
        if let Some(pending) = self.pending.take() {
            if let PendingKind::Backoff { retry, .. } = pending.kind {
                debug!(retry, reason, "superseding pending retry");
            }
        }
    }

    async fn on_schedule(&mut self, snapshot: Snapshot) {
        let now = Instant::now();
        let cooled_down = self
            .last_save_time
            .is_none_or(|last| now.duration_since(last) >= self.config.min_save_interval);

        if cooled_down {
            self.cancel_pending("fresh save");
            self.write(snapshot, 0, now).await;
        } else {
            self.cancel_pending("debounced save");
            self.pending = Some(Pending {
                snapshot,
                deadline: now + self.config.debounce_delay,
                kind: PendingKind::Debounced,
            });
        }
    }

    async fn fire_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        match pending.kind {
            PendingKind::Debounced => self.write(pending.snapshot, 0, Instant::now()).await,
            PendingKind::Backoff { retry, started } => {
                self.write(pending.snapshot, retry, started).await;
            }
        }
    }

    /// Run one push. `retry` is 0 for the first attempt.
    async fn write(&mut self, snapshot: Snapshot, retry: u32, started: Instant) {
        self.set_state(SchedulerState::InFlight);
        let result = self.sync.push(&snapshot.categories, &snapshot.role).await;

        let err = match result {
            Ok(report) => {
                self.last_save_time = Some(Instant::now());
                self.last_synced = Some(snapshot);
                if retry > 0 {
                    info!(retry, "save succeeded after retrying");
                }
                debug!(?report, "scheduled save done");
                return;
            }
            Err(err) => err,
        };
        self.last_synced = None;

        if !err.is_retryable() {
            warn!(error = %err, "save failed; not retrying");
            return;
        }

        let next = retry + 1;
        if next > self.config.max_retries {
            warn!(error = %err, retries = retry, "save retries exhausted");
            self.last_save_time = None;
            return;
        }

        let delay = self.config.backoff_delay(next);
        let now = Instant::now();
        if now.duration_since(started) + delay > self.config.max_retry_window {
            warn!(error = %err, retries = retry, "save retry window exceeded");
            self.last_save_time = None;
            return;
        }

        debug!(retry = next, ?delay, "scheduling save retry");
        self.pending = Some(Pending {
            snapshot,
            deadline: now + delay,
            kind: PendingKind::Backoff {
                retry: next,
                started,
            },
        });
    }

    async fn teardown(&mut self, snapshot: Snapshot) {
        if snapshot.categories.is_empty() || snapshot.role == Role::Unauthenticated {
            return;
        }
        if self.last_synced.as_ref() == Some(&snapshot) {
            debug!("teardown tree already synced; skipping push");
            return;
        }
        self.set_state(SchedulerState::InFlight);
        match self.sync.push(&snapshot.categories, &snapshot.role).await {
            Ok(report) => info!(?report, "teardown save done"),
            Err(err) => warn!(error = %err, "teardown save failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use storage::repository::RemoteError;
    use storage::{InMemoryRemote, LocalCache};
    use tracker_core::model::{CategoryId, Session, UserId};
    use tracker_core::time::{fixed_clock, fixed_now};

    fn setup() -> (InMemoryRemote, SaveScheduler, Role) {
        let remote = InMemoryRemote::new();
        let admin = UserId::new("admin");
        remote.grant_admin(&admin);
        remote.set_session(Some(Session {
            user_id: admin.clone(),
            email: "admin@example.com".into(),
            signed_in_at: fixed_now(),
        }));
        let sync = Arc::new(SyncService::new(
            fixed_clock(),
            Arc::new(remote.clone()),
            LocalCache::in_memory("scheduler.test"),
        ));
        let scheduler = SaveScheduler::spawn(sync, SchedulerConfig::default());
        (remote, scheduler, Role::Admin(admin))
    }

    fn tree(title: &str) -> Vec<Category> {
        vec![Category::new(CategoryId::new("c1"), title, 0)]
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_write_publishes_pending_state() {
        let (remote, scheduler, role) = setup();
        scheduler.schedule(tree("one"), &role);
        scheduler.flush().await;

        let mut states = scheduler.subscribe();
        scheduler.schedule(tree("two"), &role);
        states
            .wait_for(|s| *s == SchedulerState::DebouncedPending)
            .await
            .unwrap();
        assert_eq!(remote.stats().write_attempts, 1);

        states.wait_for(|s| *s == SchedulerState::Idle).await.unwrap();
        assert_eq!(remote.stats().write_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_halt() {
        let (remote, scheduler, role) = setup();
        remote.fail_next_writes(1, &RemoteError::Write("denied".into()));
        scheduler.schedule_immediate(tree("one"), &role);
        scheduler.flush().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(remote.stats().write_attempts, 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_save_supersedes_pending_retry() {
        let (remote, scheduler, role) = setup();
        remote.fail_next_writes(1, &RemoteError::ResourceExhausted("busy".into()));
        let mut states = scheduler.subscribe();
        scheduler.schedule_immediate(tree("stale"), &role);
        states
            .wait_for(|s| matches!(s, SchedulerState::BackoffPending { retry: 1 }))
            .await
            .unwrap();

        scheduler.schedule_immediate(tree("fresh"), &role);
        scheduler.flush().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(remote.stats().write_attempts, 2);
        let owner = role.user_id().unwrap();
        let (categories, _) = remote.catalog_ids(owner);
        assert_eq!(categories, vec![CategoryId::new("c1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_fetch_before_write_is_retried() {
        let (remote, scheduler, role) = setup();
        remote.fail_next_reads(1, &RemoteError::ResourceExhausted("pool timed out".into()));
        let mut states = scheduler.subscribe();
        scheduler.schedule_immediate(tree("one"), &role);
        states
            .wait_for(|s| matches!(s, SchedulerState::BackoffPending { retry: 1 }))
            .await
            .unwrap();
        assert_eq!(remote.stats().write_attempts, 0);

        states.wait_for(|s| *s == SchedulerState::Idle).await.unwrap();
        assert_eq!(remote.stats().write_attempts, 1);
        let (categories, _) = remote.catalog_ids(role.user_id().unwrap());
        assert_eq!(categories, vec![CategoryId::new("c1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_skips_tree_the_last_write_synced() {
        let (remote, scheduler, role) = setup();
        scheduler.schedule_immediate(tree("final"), &role);
        scheduler.teardown(tree("final"), &role);
        scheduler.stopped().await;
        assert_eq!(remote.stats().write_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_pushes_a_tree_that_differs_from_the_last_write() {
        let (remote, scheduler, role) = setup();
        scheduler.schedule_immediate(tree("draft"), &role);
        scheduler.teardown(tree("final"), &role);
        scheduler.stopped().await;
        assert_eq!(remote.stats().write_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_skips_empty_tree_and_stops() {
        let (remote, scheduler, role) = setup();
        scheduler.teardown(Vec::new(), &role);
        scheduler.stopped().await;
        assert_eq!(remote.stats().write_attempts, 0);

        scheduler.schedule_immediate(tree("late"), &role);
        scheduler.flush().await;
        assert_eq!(remote.stats().write_attempts, 0);
    }
}
