use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracker_core::model::{
    Category, CategoryId, Difficulty, Platform, Problem, ProblemId, ProgressOverlay, Session,
    UserId,
};

/// Errors surfaced by remote store adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("session lookup failed: {0}")]
    Session(String),

    #[error("remote read failed: {0}")]
    Read(String),

    #[error("remote write failed: {0}")]
    Write(String),

    /// The remote is saturated (quota, lock contention, pool exhaustion). Can
    /// surface from the reads a save starts with as well as from its writes.
    /// The only kind worth retrying with backoff.
    #[error("remote resources exhausted: {0}")]
    ResourceExhausted(String),
}

impl RemoteError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::ResourceExhausted(_))
    }
}

//
// ─── ROWS ──────────────────────────────────────────────────────────────────────
//

/// Persisted shape of a category, without its problems.
///
/// The owning admin is not part of the row; adapters scope by the `owner_id`
/// argument of each call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRow {
    pub id: CategoryId,
    pub title: String,
    pub order_index: i64,
}

impl CategoryRow {
    #[must_use]
    pub fn from_category(category: &Category) -> Self {
        Self {
            id: category.id.clone(),
            title: category.title.clone(),
            order_index: category.order_index,
        }
    }
}

/// Persisted shape of a problem. `position` keeps the order inside its category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemRow {
    pub id: ProblemId,
    pub category_id: CategoryId,
    pub title: String,
    pub url: String,
    pub platform: Platform,
    pub difficulty: Difficulty,
    pub completed: bool,
    pub note: String,
    pub position: i64,
}

impl ProblemRow {
    #[must_use]
    pub fn from_problem(category_id: &CategoryId, problem: &Problem, position: i64) -> Self {
        Self {
            id: problem.id.clone(),
            category_id: category_id.clone(),
            title: problem.title.clone(),
            url: problem.url.clone(),
            platform: problem.platform,
            difficulty: problem.difficulty,
            completed: problem.completed,
            note: problem.note.clone(),
            position,
        }
    }

    #[must_use]
    pub fn into_problem(self) -> Problem {
        Problem {
            id: self.id,
            title: self.title,
            url: self.url,
            platform: self.platform,
            difficulty: self.difficulty,
            completed: self.completed,
            note: self.note,
        }
    }
}

/// Flat catalog rows as returned by the catalog fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogRows {
    pub categories: Vec<CategoryRow>,
    pub problems: Vec<ProblemRow>,
}

impl CatalogRows {
    /// Flatten a tree into rows, numbering problems by their index.
    #[must_use]
    pub fn from_tree(categories: &[Category]) -> Self {
        let mut rows = Self::default();
        for category in categories {
            rows.categories.push(CategoryRow::from_category(category));
            for (pos, problem) in category.problems.iter().enumerate() {
                let position = i64::try_from(pos).unwrap_or(i64::MAX);
                rows.problems
                    .push(ProblemRow::from_problem(&category.id, problem, position));
            }
        }
        rows
    }
}

//
// ─── CHANGE NOTIFICATIONS ──────────────────────────────────────────────────────
//

/// Which table-set a change touched. A hint only; subscribers must re-fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Catalog,
    Overlay,
}

/// Live subscription to remote change signals. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    #[must_use]
    pub fn new(rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next change signal.
    ///
    /// Returns `false` once the remote side has gone away. Missed signals
    /// collapse into one, since the only contract is "something changed".
    pub async fn changed(&mut self) -> bool {
        match self.rx.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => true,
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }
}

//
// ─── REMOTE CONTRACT ───────────────────────────────────────────────────────────
//

/// Role-aware read/write contract of the authoritative remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current session, or `None` when signed out.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Session` if identity cannot be determined.
    async fn get_session(&self) -> Result<Option<Session>, RemoteError>;

    /// Membership test against the admin allow-list.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Read` if the allow-list cannot be read.
    async fn is_admin(&self, user_id: &UserId) -> Result<bool, RemoteError>;

    /// Catalog rows owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Read` on fetch failure.
    async fn fetch_catalog_as_admin(&self, user_id: &UserId) -> Result<CatalogRows, RemoteError>;

    /// The admin-owned catalog, readable by any authenticated identity.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Read` on fetch failure.
    async fn fetch_catalog_shared(&self) -> Result<CatalogRows, RemoteError>;

    /// Overlay rows belonging to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Read` on fetch failure.
    async fn fetch_overlay(&self, user_id: &UserId) -> Result<Vec<ProgressOverlay>, RemoteError>;

    /// Insert or update catalog rows owned by `owner_id`, keyed by id.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Write` or `RemoteError::ResourceExhausted`.
    async fn upsert_catalog(
        &self,
        categories: &[CategoryRow],
        problems: &[ProblemRow],
        owner_id: &UserId,
    ) -> Result<(), RemoteError>;

    /// Delete catalog rows owned by `owner_id`. Problems go before categories.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Write` or `RemoteError::ResourceExhausted`.
    async fn delete_catalog_rows(
        &self,
        category_ids: &[CategoryId],
        problem_ids: &[ProblemId],
        owner_id: &UserId,
    ) -> Result<(), RemoteError>;

    /// Insert or update overlay rows keyed by `(user_id, problem_id)`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Write` or `RemoteError::ResourceExhausted`.
    async fn upsert_overlay(&self, rows: &[ProgressOverlay]) -> Result<(), RemoteError>;

    fn subscribe_to_changes(&self) -> ChangeSubscription;
}

//
// ─── IN-MEMORY REMOTE ──────────────────────────────────────────────────────────
//

/// Counters kept by [`InMemoryRemote`] for assertions.
#[derive(Debug, Clone, Default)]
pub struct RemoteStats {
    /// Every write call, successful or not.
    pub write_attempts: usize,
    /// Tokio instants of each write attempt, in order.
    pub write_attempt_times: Vec<Instant>,
    pub catalog_rows_upserted: usize,
    pub catalog_rows_deleted: usize,
    pub overlay_rows_upserted: usize,
    pub overlay_batches: usize,
}

#[derive(Default)]
struct RemoteState {
    session: Option<Session>,
    admins: HashSet<UserId>,
    categories: HashMap<CategoryId, (UserId, CategoryRow)>,
    problems: HashMap<ProblemId, (UserId, ProblemRow)>,
    overlays: HashMap<(UserId, ProblemId), ProgressOverlay>,
    fail_session: bool,
    fail_reads: bool,
    fail_admin_check: bool,
    queued_read_failures: VecDeque<RemoteError>,
    queued_write_failures: VecDeque<RemoteError>,
    persistent_write_failure: Option<RemoteError>,
    stats: RemoteStats,
}

impl RemoteState {
    fn begin_write(&mut self) -> Result<(), RemoteError> {
        self.stats.write_attempts += 1;
        self.stats.write_attempt_times.push(Instant::now());
        if let Some(err) = self.queued_write_failures.pop_front() {
            return Err(err);
        }
        if let Some(err) = &self.persistent_write_failure {
            return Err(err.clone());
        }
        Ok(())
    }

    fn check_read(&mut self) -> Result<(), RemoteError> {
        if let Some(err) = self.queued_read_failures.pop_front() {
            return Err(err);
        }
        if self.fail_reads {
            return Err(RemoteError::Read("remote unreachable".into()));
        }
        Ok(())
    }

    /// Catalog writes need the owner to be signed in and on the allow-list.
    fn check_catalog_owner(&self, owner_id: &UserId) -> Result<(), RemoteError> {
        if self.session.as_ref().map(|s| &s.user_id) != Some(owner_id) {
            return Err(RemoteError::Write(format!(
                "permission denied: {owner_id} is not the signed-in user"
            )));
        }
        if !self.admins.contains(owner_id) {
            return Err(RemoteError::Write(format!(
                "permission denied: {owner_id} may not write catalog rows"
            )));
        }
        Ok(())
    }

    fn rows_owned_by(&self, owner: Option<&UserId>) -> CatalogRows {
        let owned = |row_owner: &UserId| match owner {
            Some(owner) => row_owner == owner,
            None => self.admins.contains(row_owner),
        };

        let mut categories: Vec<CategoryRow> = self
            .categories
            .values()
            .filter(|(o, _)| owned(o))
            .map(|(_, row)| row.clone())
            .collect();
        categories.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));

        let mut problems: Vec<ProblemRow> = self
            .problems
            .values()
            .filter(|(o, _)| owned(o))
            .map(|(_, row)| row.clone())
            .collect();
        problems.sort_by(|a, b| {
            a.category_id
                .cmp(&b.category_id)
                .then(a.position.cmp(&b.position))
                .then(a.id.cmp(&b.id))
        });

        CatalogRows {
            categories,
            problems,
        }
    }
}

/// Remote store held in process memory, with failure injection for tests.
#[derive(Clone)]
pub struct InMemoryRemote {
    state: Arc<Mutex<RemoteState>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(RemoteState::default())),
            changes,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RemoteState>, RemoteError> {
        self.state
            .lock()
            .map_err(|e| RemoteError::Read(format!("state poisoned: {e}")))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut RemoteState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn notify(&self, event: ChangeEvent) {
        // No subscribers is fine.
        let _ = self.changes.send(event);
    }

    pub fn set_session(&self, session: Option<Session>) {
        self.with_state(|s| s.session = session);
    }

    pub fn grant_admin(&self, user_id: &UserId) {
        self.with_state(|s| {
            s.admins.insert(user_id.clone());
        });
    }

    pub fn fail_session(&self, fail: bool) {
        self.with_state(|s| s.fail_session = fail);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.with_state(|s| s.fail_reads = fail);
    }

    pub fn fail_admin_check(&self, fail: bool) {
        self.with_state(|s| s.fail_admin_check = fail);
    }

    /// Make the next `count` read calls fail with `error`.
    pub fn fail_next_reads(&self, count: usize, error: &RemoteError) {
        self.with_state(|s| {
            for _ in 0..count {
                s.queued_read_failures.push_back(error.clone());
            }
        });
    }

    /// Make the next `count` write calls fail with `error`.
    pub fn fail_next_writes(&self, count: usize, error: &RemoteError) {
        self.with_state(|s| {
            for _ in 0..count {
                s.queued_write_failures.push_back(error.clone());
            }
        });
    }

    /// Make every write fail with `error` until cleared with `None`.
    pub fn fail_all_writes(&self, error: Option<RemoteError>) {
        self.with_state(|s| s.persistent_write_failure = error);
    }

    /// Make the whole remote unusable: session, reads, and writes all fail.
    pub fn go_offline(&self) {
        self.with_state(|s| {
            s.fail_session = true;
            s.fail_reads = true;
            s.persistent_write_failure = Some(RemoteError::Write("remote unreachable".into()));
        });
    }

    #[must_use]
    pub fn stats(&self) -> RemoteStats {
        self.with_state(|s| s.stats.clone())
    }

    #[must_use]
    pub fn overlay_row(&self, user_id: &UserId, problem_id: &ProblemId) -> Option<ProgressOverlay> {
        self.with_state(|s| {
            s.overlays
                .get(&(user_id.clone(), problem_id.clone()))
                .cloned()
        })
    }

    /// Ids of every catalog row owned by `owner`.
    #[must_use]
    pub fn catalog_ids(&self, owner: &UserId) -> (Vec<CategoryId>, Vec<ProblemId>) {
        self.with_state(|s| {
            let rows = s.rows_owned_by(Some(owner));
            let mut categories: Vec<_> = rows.categories.into_iter().map(|c| c.id).collect();
            let mut problems: Vec<_> = rows.problems.into_iter().map(|p| p.id).collect();
            categories.sort();
            problems.sort();
            (categories, problems)
        })
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn get_session(&self) -> Result<Option<Session>, RemoteError> {
        let guard = self.lock()?;
        if guard.fail_session {
            return Err(RemoteError::Session("identity service unreachable".into()));
        }
        Ok(guard.session.clone())
    }

    async fn is_admin(&self, user_id: &UserId) -> Result<bool, RemoteError> {
        let mut guard = self.lock()?;
        guard.check_read()?;
        if guard.fail_admin_check {
            return Err(RemoteError::Read("allow-list unreachable".into()));
        }
        Ok(guard.admins.contains(user_id))
    }

    async fn fetch_catalog_as_admin(&self, user_id: &UserId) -> Result<CatalogRows, RemoteError> {
        let mut guard = self.lock()?;
        guard.check_read()?;
        Ok(guard.rows_owned_by(Some(user_id)))
    }

    async fn fetch_catalog_shared(&self) -> Result<CatalogRows, RemoteError> {
        let mut guard = self.lock()?;
        guard.check_read()?;
        Ok(guard.rows_owned_by(None))
    }

    async fn fetch_overlay(&self, user_id: &UserId) -> Result<Vec<ProgressOverlay>, RemoteError> {
        let mut guard = self.lock()?;
        guard.check_read()?;
        let mut rows: Vec<_> = guard
            .overlays
            .values()
            .filter(|row| &row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.problem_id.cmp(&b.problem_id));
        Ok(rows)
    }

    async fn upsert_catalog(
        &self,
        categories: &[CategoryRow],
        problems: &[ProblemRow],
        owner_id: &UserId,
    ) -> Result<(), RemoteError> {
        {
            let mut guard = self.lock()?;
            guard.begin_write()?;
            guard.check_catalog_owner(owner_id)?;
            let foreign = categories
                .iter()
                .map(|c| guard.categories.get(&c.id).map(|(o, _)| o))
                .chain(problems.iter().map(|p| guard.problems.get(&p.id).map(|(o, _)| o)))
                .flatten()
                .any(|o| o != owner_id);
            if foreign {
                return Err(RemoteError::Write("row owned by another identity".into()));
            }
            if let Some(orphan) = problems.iter().find(|p| {
                !guard.categories.contains_key(&p.category_id)
                    && !categories.iter().any(|c| c.id == p.category_id)
            }) {
                return Err(RemoteError::Write(format!(
                    "foreign key violation: category {} missing",
                    orphan.category_id
                )));
            }
            for row in categories {
                guard
                    .categories
                    .insert(row.id.clone(), (owner_id.clone(), row.clone()));
            }
            for row in problems {
                guard
                    .problems
                    .insert(row.id.clone(), (owner_id.clone(), row.clone()));
            }
            guard.stats.catalog_rows_upserted += categories.len() + problems.len();
        }
        self.notify(ChangeEvent::Catalog);
        Ok(())
    }

    async fn delete_catalog_rows(
        &self,
        category_ids: &[CategoryId],
        problem_ids: &[ProblemId],
        owner_id: &UserId,
    ) -> Result<(), RemoteError> {
        {
            let mut guard = self.lock()?;
            guard.begin_write()?;
            guard.check_catalog_owner(owner_id)?;
            let mut deleted = 0;

            let mut doomed: HashSet<ProblemId> = problem_ids.iter().cloned().collect();
            // ON DELETE CASCADE from categories to problems.
            for (id, (owner, row)) in &guard.problems {
                if owner == owner_id && category_ids.contains(&row.category_id) {
                    doomed.insert(id.clone());
                }
            }
            for id in &doomed {
                if guard.problems.get(id).is_some_and(|(o, _)| o == owner_id) {
                    guard.problems.remove(id);
                    guard.overlays.retain(|(_, pid), _| pid != id);
                    deleted += 1;
                }
            }
            for id in category_ids {
                if guard.categories.get(id).is_some_and(|(o, _)| o == owner_id) {
                    guard.categories.remove(id);
                    deleted += 1;
                }
            }
            guard.stats.catalog_rows_deleted += deleted;
        }
        self.notify(ChangeEvent::Catalog);
        Ok(())
    }

    async fn upsert_overlay(&self, rows: &[ProgressOverlay]) -> Result<(), RemoteError> {
        {
            let mut guard = self.lock()?;
            guard.begin_write()?;
            let session_user = guard.session.as_ref().map(|s| s.user_id.clone());
            if rows.iter().any(|r| Some(&r.user_id) != session_user.as_ref()) {
                return Err(RemoteError::Write(
                    "overlay rows must belong to the signed-in user".into(),
                ));
            }
            if let Some(orphan) = rows
                .iter()
                .find(|r| !guard.problems.contains_key(&r.problem_id))
            {
                return Err(RemoteError::Write(format!(
                    "foreign key violation: problem {} missing",
                    orphan.problem_id
                )));
            }
            for row in rows {
                guard
                    .overlays
                    .insert((row.user_id.clone(), row.problem_id.clone()), row.clone());
            }
            guard.stats.overlay_rows_upserted += rows.len();
            guard.stats.overlay_batches += 1;
        }
        self.notify(ChangeEvent::Overlay);
        Ok(())
    }

    fn subscribe_to_changes(&self) -> ChangeSubscription {
        ChangeSubscription::new(self.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker_core::sample::sample_catalog;
    use tracker_core::time::fixed_now;

    fn session(id: &str) -> Session {
        Session {
            user_id: UserId::new(id),
            email: format!("{id}@example.com"),
            signed_in_at: fixed_now(),
        }
    }

    async fn seeded() -> (InMemoryRemote, UserId) {
        let remote = InMemoryRemote::new();
        let admin = UserId::new("admin");
        remote.grant_admin(&admin);
        remote.set_session(Some(session("admin")));
        let rows = CatalogRows::from_tree(&sample_catalog());
        remote
            .upsert_catalog(&rows.categories, &rows.problems, &admin)
            .await
            .unwrap();
        (remote, admin)
    }

    #[test]
    fn from_tree_numbers_problems_per_category() {
        let rows = CatalogRows::from_tree(&sample_catalog());
        assert_eq!(rows.categories.len(), 2);
        let positions: Vec<_> = rows
            .problems
            .iter()
            .filter(|p| p.category_id.as_str() == "sample-strings")
            .map(|p| p.position)
            .collect();
        assert_eq!(positions, vec![0, 1]);
    }

    #[tokio::test]
    async fn non_admin_cannot_write_catalog_rows() {
        let (remote, _) = seeded().await;
        remote.set_session(Some(session("intruder")));
        let rows = CatalogRows::from_tree(&sample_catalog());
        let err = remote
            .upsert_catalog(&rows.categories, &[], &UserId::new("intruder"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Write(_)));
    }

    #[tokio::test]
    async fn catalog_writes_require_owner_to_be_signed_in() {
        let (remote, admin) = seeded().await;
        let rows = CatalogRows::from_tree(&[Category::new(CategoryId::new("evil"), "Evil", 9)]);

        remote.set_session(Some(session("sub")));
        let upsert = remote.upsert_catalog(&rows.categories, &[], &admin).await;
        assert!(matches!(upsert, Err(RemoteError::Write(_))));
        let delete = remote
            .delete_catalog_rows(&[CategoryId::new("sample-arrays")], &[], &admin)
            .await;
        assert!(matches!(delete, Err(RemoteError::Write(_))));

        remote.set_session(None);
        assert!(remote.upsert_catalog(&rows.categories, &[], &admin).await.is_err());

        let (categories, _) = remote.catalog_ids(&admin);
        assert_eq!(
            categories,
            vec![CategoryId::new("sample-arrays"), CategoryId::new("sample-strings")]
        );
    }

    #[tokio::test]
    async fn queued_read_failures_hit_the_next_fetch_only() {
        let (remote, admin) = seeded().await;
        remote.fail_next_reads(1, &RemoteError::ResourceExhausted("pool timed out".into()));
        let err = remote.fetch_catalog_as_admin(&admin).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(remote.fetch_catalog_as_admin(&admin).await.unwrap().categories.len(), 2);
    }

    #[tokio::test]
    async fn deleting_category_cascades_to_problems_and_overlays() {
        let (remote, admin) = seeded().await;
        let user = UserId::new("u1");
        remote.set_session(Some(session("u1")));
        let overlay = ProgressOverlay {
            user_id: user.clone(),
            problem_id: ProblemId::new("sample-two-sum"),
            completed: true,
            note: String::new(),
            updated_at: fixed_now(),
        };
        remote.upsert_overlay(&[overlay]).await.unwrap();

        remote.set_session(Some(session("admin")));
        remote
            .delete_catalog_rows(&[CategoryId::new("sample-arrays")], &[], &admin)
            .await
            .unwrap();

        let (categories, problems) = remote.catalog_ids(&admin);
        assert_eq!(categories, vec![CategoryId::new("sample-strings")]);
        assert_eq!(problems.len(), 2);
        assert!(
            remote
                .overlay_row(&user, &ProblemId::new("sample-two-sum"))
                .is_none()
        );
    }

    #[tokio::test]
    async fn overlay_rows_for_other_users_are_rejected() {
        let (remote, _) = seeded().await;
        remote.set_session(Some(session("u1")));
        let row = ProgressOverlay {
            user_id: UserId::new("u2"),
            problem_id: ProblemId::new("sample-two-sum"),
            completed: true,
            note: String::new(),
            updated_at: fixed_now(),
        };
        assert!(remote.upsert_overlay(&[row]).await.is_err());
    }

    #[tokio::test]
    async fn queued_failures_are_consumed_in_order() {
        let remote = InMemoryRemote::new();
        remote.fail_next_writes(1, &RemoteError::ResourceExhausted("quota".into()));
        remote.set_session(Some(session("u1")));
        assert!(remote.upsert_overlay(&[]).await.unwrap_err().is_retryable());
        remote.upsert_overlay(&[]).await.unwrap();
        assert_eq!(remote.stats().write_attempts, 2);
    }

    #[tokio::test]
    async fn writes_notify_subscribers() {
        let remote = InMemoryRemote::new();
        let mut sub = remote.subscribe_to_changes();
        remote.set_session(Some(session("u1")));
        remote.upsert_overlay(&[]).await.unwrap();
        assert!(sub.changed().await);
    }
}
