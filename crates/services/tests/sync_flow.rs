use std::sync::Arc;

use services::{Clock, LoadSource, SaveOutcome, SyncService};
use storage::{InMemoryRemote, LocalCache};
use tracker_core::catalog::{
    ProblemDraft, add_category, add_problem, remove_category, remove_problem, set_note,
    toggle_completed,
};
use tracker_core::model::{
    Category, CategoryId, Difficulty, Platform, ProblemId, Role, Session, UserId,
};
use tracker_core::sample::sample_catalog;
use tracker_core::time::fixed_now;

fn session(id: &UserId) -> Session {
    Session {
        user_id: id.clone(),
        email: format!("{id}@example.com"),
        signed_in_at: fixed_now(),
    }
}

fn service(remote: &InMemoryRemote) -> SyncService {
    SyncService::new(
        Clock::fixed(fixed_now()),
        Arc::new(remote.clone()),
        LocalCache::in_memory("practice-tracker.catalog"),
    )
}

fn draft(title: &str) -> ProblemDraft {
    ProblemDraft {
        title: title.to_owned(),
        url: format!("https://leetcode.com/problems/{}/", title.to_lowercase()),
        platform: Platform::LeetCode,
        difficulty: Difficulty::Easy,
    }
}

fn one_problem_catalog() -> Vec<Category> {
    let mut tree = Vec::new();
    add_category(&mut tree, CategoryId::new("c1"), "Arrays").unwrap();
    add_problem(&mut tree, &CategoryId::new("c1"), ProblemId::new("p1"), draft("Two-Sum")).unwrap();
    tree
}

/// Remote with an admin who has published `catalog`.
async fn published(catalog: &[Category]) -> (InMemoryRemote, UserId) {
    let remote = InMemoryRemote::new();
    let admin = UserId::new("admin");
    remote.grant_admin(&admin);
    remote.set_session(Some(session(&admin)));
    let outcome = service(&remote)
        .save(catalog, &Role::Admin(admin.clone()))
        .await;
    assert!(matches!(outcome, SaveOutcome::Synced(_)));
    (remote, admin)
}

#[tokio::test]
async fn sub_user_toggle_stays_private() {
    let (remote, admin) = published(&one_problem_catalog()).await;
    let user = UserId::new("u");
    remote.set_session(Some(session(&user)));

    let sub = service(&remote);
    let loaded = sub.load().await;
    assert_eq!(loaded.role, Role::SubUser(user.clone()));
    assert_eq!(loaded.source, LoadSource::Remote);

    let mut tree = loaded.categories;
    assert!(toggle_completed(&mut tree, &ProblemId::new("p1")).unwrap());
    let outcome = sub.save(&tree, &loaded.role).await;
    assert!(matches!(outcome, SaveOutcome::Synced(report) if report.overlays_upserted == 1));

    let row = remote
        .overlay_row(&user, &ProblemId::new("p1"))
        .expect("overlay row written");
    assert!(row.completed);
    assert_eq!(row.note, "");

    let admin_view = service(&remote).load_as(Role::Admin(admin)).await;
    assert!(!admin_view.categories[0].problems[0].completed);
}

#[tokio::test]
async fn sub_user_sees_defaults_until_overlay_exists() {
    let mut catalog = one_problem_catalog();
    // The admin's own progress must not leak into other users' views.
    toggle_completed(&mut catalog, &ProblemId::new("p1")).unwrap();
    set_note(&mut catalog, &ProblemId::new("p1"), "admin only").unwrap();
    let (remote, _) = published(&catalog).await;

    let user = UserId::new("u");
    remote.set_session(Some(session(&user)));
    let sub = service(&remote);

    let fresh = sub.load().await;
    let p1 = &fresh.categories[0].problems[0];
    assert!(!p1.completed);
    assert!(p1.note.is_empty());

    let mut tree = fresh.categories.clone();
    set_note(&mut tree, &ProblemId::new("p1"), "use a hash map").unwrap();
    sub.save(&tree, &fresh.role).await;

    let again = sub.load().await;
    let p1 = &again.categories[0].problems[0];
    assert!(!p1.completed);
    assert_eq!(p1.note, "use a hash map");
}

#[tokio::test]
async fn sub_user_untouched_problems_write_nothing() {
    let (remote, _) = published(&sample_catalog()).await;
    let user = UserId::new("u");
    remote.set_session(Some(session(&user)));
    let sub = service(&remote);

    let loaded = sub.load().await;
    let before = remote.stats();
    let outcome = sub.save(&loaded.categories, &loaded.role).await;
    assert!(matches!(outcome, SaveOutcome::Synced(report) if report.is_noop()));
    assert_eq!(remote.stats().overlay_batches, before.overlay_batches);
}

#[tokio::test]
async fn admin_save_deletes_exact_complement_and_is_idempotent() {
    let (remote, admin) = published(&sample_catalog()).await;
    let role = Role::Admin(admin.clone());
    let sync = service(&remote);

    let mut edited = sample_catalog();
    remove_category(&mut edited, &CategoryId::new("sample-strings")).unwrap();
    remove_problem(&mut edited, &ProblemId::new("sample-kadane")).unwrap();
    add_problem(
        &mut edited,
        &CategoryId::new("sample-arrays"),
        ProblemId::new("p-new"),
        draft("Rotate-Array"),
    )
    .unwrap();

    let SaveOutcome::Synced(first) = sync.save(&edited, &role).await else {
        panic!("expected synced save");
    };
    assert_eq!(first.categories_deleted, 1);
    assert_eq!(first.problems_deleted, 3);

    let (categories, mut problems) = remote.catalog_ids(&admin);
    assert_eq!(categories, vec![CategoryId::new("sample-arrays")]);
    let mut expected: Vec<_> = edited[0].problems.iter().map(|p| p.id.clone()).collect();
    expected.sort();
    problems.sort();
    assert_eq!(problems, expected);

    let stats = remote.stats();
    let SaveOutcome::Synced(second) = sync.save(&edited, &role).await else {
        panic!("expected synced save");
    };
    assert!(second.is_noop());
    let after = remote.stats();
    assert_eq!(after.catalog_rows_upserted, stats.catalog_rows_upserted);
    assert_eq!(after.catalog_rows_deleted, stats.catalog_rows_deleted);
    assert_eq!(after.write_attempts, stats.write_attempts);

    let reloaded = sync.load_as(role).await;
    assert_eq!(reloaded.categories, edited);
}

#[tokio::test]
async fn admin_emptied_catalog_loads_empty_from_remote() {
    let (remote, admin) = published(&one_problem_catalog()).await;
    let sync = service(&remote);
    let role = Role::Admin(admin.clone());

    let outcome = sync.save(&[], &role).await;
    assert!(matches!(outcome, SaveOutcome::Synced(report) if report.categories_deleted == 1));
    assert_eq!(remote.catalog_ids(&admin), (Vec::new(), Vec::new()));

    let loaded = sync.load().await;
    assert_eq!(loaded.role, role);
    assert_eq!(loaded.source, LoadSource::Remote);
    assert!(loaded.categories.is_empty());
    assert!(sync.cache().read().is_empty());

    // Pushing what was loaded must not bring anything back.
    let report = sync.push(&loaded.categories, &loaded.role).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(remote.catalog_ids(&admin), (Vec::new(), Vec::new()));
}

#[tokio::test]
async fn offline_load_falls_back_to_cache_and_save_still_caches() {
    let (remote, admin) = published(&one_problem_catalog()).await;
    remote.set_session(Some(session(&admin)));
    let sync = service(&remote);
    let online = sync.load().await;
    assert_eq!(online.source, LoadSource::Remote);

    remote.go_offline();
    let offline = sync.load().await;
    assert_eq!(offline.source, LoadSource::Cache);
    assert_eq!(offline.role, Role::Unauthenticated);
    assert_eq!(offline.categories, online.categories);

    let mut tree = offline.categories;
    toggle_completed(&mut tree, &ProblemId::new("p1")).unwrap();
    let outcome = sync.save(&tree, &online.role).await;
    assert!(matches!(outcome, SaveOutcome::Deferred(_)));

    let after = sync.load().await;
    assert_eq!(after.source, LoadSource::Cache);
    assert!(after.categories[0].problems[0].completed);
}

#[tokio::test]
async fn first_run_offline_gets_sample_catalog() {
    let remote = InMemoryRemote::new();
    remote.go_offline();
    let loaded = service(&remote).load().await;
    assert_eq!(loaded.source, LoadSource::Sample);
    assert_eq!(loaded.categories, sample_catalog());
}

#[tokio::test]
async fn remote_changes_trigger_reload() {
    let (remote, admin) = published(&one_problem_catalog()).await;
    remote.set_session(Some(session(&admin)));
    let watcher_side = Arc::new(service(&remote));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _watcher = watcher_side.watch_and_reload(move |loaded| {
        let _ = tx.send(loaded);
    });

    let mut edited = one_problem_catalog();
    add_category(&mut edited, CategoryId::new("c2"), "Graphs").unwrap();
    service(&remote).save(&edited, &Role::Admin(admin)).await;

    let reloaded = rx.recv().await.expect("reload delivered");
    assert_eq!(reloaded.source, LoadSource::Remote);
    assert_eq!(reloaded.categories.len(), 2);
}
