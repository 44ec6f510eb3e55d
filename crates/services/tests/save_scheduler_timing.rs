use std::sync::Arc;
use std::time::Duration;

use services::{Clock, SaveScheduler, SchedulerConfig, SchedulerState, SyncService};
use storage::repository::{RemoteError, RemoteStore};
use storage::{InMemoryRemote, LocalCache};
use tracker_core::catalog::{set_note, toggle_completed};
use tracker_core::model::{Category, ProblemId, Role, Session, UserId};
use tracker_core::sample::sample_catalog;
use tracker_core::time::fixed_now;

struct Harness {
    remote: InMemoryRemote,
    sync: Arc<SyncService>,
    scheduler: SaveScheduler,
    role: Role,
    user: UserId,
    /// Write calls spent publishing the catalog.
    seed_writes: usize,
}

/// A sub-user signed in against a published sample catalog.
async fn harness() -> Harness {
    let remote = InMemoryRemote::new();
    let admin = UserId::new("admin");
    remote.grant_admin(&admin);
    remote.set_session(Some(Session {
        user_id: admin.clone(),
        email: "admin@example.com".into(),
        signed_in_at: fixed_now(),
    }));
    let rows = storage::repository::CatalogRows::from_tree(&sample_catalog());
    remote
        .upsert_catalog(&rows.categories, &rows.problems, &admin)
        .await
        .unwrap();

    let user = UserId::new("u");
    remote.set_session(Some(Session {
        user_id: user.clone(),
        email: "u@example.com".into(),
        signed_in_at: fixed_now(),
    }));

    let seed_writes = remote.stats().write_attempts;

    let sync = Arc::new(SyncService::new(
        Clock::fixed(fixed_now()),
        Arc::new(remote.clone()),
        LocalCache::in_memory("timing.catalog"),
    ));
    let scheduler = SaveScheduler::spawn(Arc::clone(&sync), SchedulerConfig::default());
    Harness {
        remote,
        sync,
        scheduler,
        role: Role::SubUser(user.clone()),
        user,
        seed_writes,
    }
}

fn two_sum() -> ProblemId {
    ProblemId::new("sample-two-sum")
}

fn with_note(note: &str) -> Vec<Category> {
    let mut tree = sample_catalog();
    set_note(&mut tree, &two_sum(), note).unwrap();
    tree
}

#[tokio::test(start_paused = true)]
async fn rapid_saves_collapse_into_one_write_with_last_payload() {
    let h = harness().await;
    h.scheduler.schedule(with_note("first"), &h.role);
    h.scheduler.flush().await;
    assert_eq!(h.remote.stats().overlay_batches, 1);

    for i in 0..5 {
        h.scheduler.schedule(with_note(&format!("edit {i}")), &h.role);
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.remote.stats().overlay_batches, 1);
    assert_eq!(h.scheduler.state(), SchedulerState::DebouncedPending);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.remote.stats().overlay_batches, 2);
    let row = h.remote.overlay_row(&h.user, &two_sum()).unwrap();
    assert_eq!(row.note, "edit 4");
    assert_eq!(h.sync.cache().read(), with_note("edit 4"));
}

#[tokio::test(start_paused = true)]
async fn immediate_save_always_writes_again() {
    let h = harness().await;
    h.scheduler.schedule(with_note("first"), &h.role);
    h.scheduler.flush().await;

    h.scheduler.schedule_immediate(with_note("second"), &h.role);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(h.remote.stats().overlay_batches, 2);
    let row = h.remote.overlay_row(&h.user, &two_sum()).unwrap();
    assert_eq!(row.note, "second");
}

#[tokio::test(start_paused = true)]
async fn exhausted_writes_retry_with_growing_delays_then_give_up() {
    let h = harness().await;
    let config = SchedulerConfig::default();
    h.remote.fail_next_writes(
        1 + config.max_retries as usize,
        &RemoteError::ResourceExhausted("too many connections".into()),
    );

    let mut tree = sample_catalog();
    toggle_completed(&mut tree, &two_sum()).unwrap();
    h.scheduler.schedule_immediate(tree, &h.role);
    tokio::time::sleep(Duration::from_secs(60)).await;

    let stats = h.remote.stats();
    assert_eq!(
        stats.write_attempts - h.seed_writes,
        1 + config.max_retries as usize
    );
    assert_eq!(stats.overlay_batches, 0);
    let gaps: Vec<Duration> = stats.write_attempt_times[h.seed_writes..]
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect();
    assert!(gaps.windows(2).all(|pair| pair[1] > pair[0]), "{gaps:?}");
    assert!(gaps[0] >= config.retry_base_delay);
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);

    // Giving up clears the throttle, so the next edit goes out at once.
    h.scheduler.schedule(with_note("after outage"), &h.role);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(h.remote.stats().overlay_batches, 1);
}

#[tokio::test(start_paused = true)]
async fn retry_window_caps_total_backoff() {
    let config = SchedulerConfig {
        max_retries: 10,
        max_retry_window: Duration::from_secs(5),
        ..SchedulerConfig::default()
    };
    let h = harness().await;
    let scheduler = SaveScheduler::spawn(Arc::clone(&h.sync), config);
    h.remote
        .fail_all_writes(Some(RemoteError::ResourceExhausted("disk full".into())));

    scheduler.schedule_immediate(with_note("x"), &h.role);
    tokio::time::sleep(Duration::from_secs(120)).await;

    // Delays of 1s and 2s fit in 5s; the next 4s would not.
    assert_eq!(h.remote.stats().write_attempts - h.seed_writes, 3);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn teardown_makes_one_attempt_and_stops() {
    let h = harness().await;
    h.remote
        .fail_all_writes(Some(RemoteError::ResourceExhausted("busy".into())));
    h.scheduler.teardown(with_note("closing"), &h.role);
    h.scheduler.stopped().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.remote.stats().write_attempts - h.seed_writes, 1);
    assert_eq!(h.sync.cache().read(), with_note("closing"));
}
