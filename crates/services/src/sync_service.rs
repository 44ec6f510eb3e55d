use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use storage::LocalCache;
use storage::repository::{CatalogRows, CategoryRow, ProblemRow, RemoteError, RemoteStore};
use tracker_core::model::{
    Category, CategoryId, ProblemId, ProgressOverlay, Role, UserId,
};
use tracker_core::sample::sample_catalog;
use tracker_core::time::Clock;

//
// ─── RESULT TYPES ──────────────────────────────────────────────────────────────
//

/// Where the tree returned by a load came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    Cache,
    Sample,
}

/// Outcome of [`SyncService::load`]. A fallback load is never empty: the
/// sample catalog stands in when the cache has nothing. A successful remote
/// load is returned as is, even when empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub categories: Vec<Category>,
    pub role: Role,
    pub source: LoadSource,
}

/// Row counts written by one push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub categories_upserted: usize,
    pub problems_upserted: usize,
    pub categories_deleted: usize,
    pub problems_deleted: usize,
    pub overlays_upserted: usize,
}

impl PushReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The remote accepted the tree.
    Synced(PushReport),
    /// Nobody is signed in; only the local cache was written.
    LocalOnly,
    /// The remote write failed; the local cache still holds the tree.
    Deferred(RemoteError),
}

/// Last observed reachability of the remote store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Connectivity {
    #[default]
    Unknown,
    Online,
    Offline,
}

//
// ─── TREE PROJECTION ───────────────────────────────────────────────────────────
//

/// Assemble flat catalog rows into an ordered tree.
///
/// Categories sort by `order_index`, problems by `position`. Problems whose
/// category is missing are dropped.
#[must_use]
pub fn build_tree(rows: CatalogRows) -> Vec<Category> {
    let CatalogRows {
        categories,
        mut problems,
    } = rows;

    let mut tree: Vec<Category> = categories
        .into_iter()
        .map(|row| Category::new(row.id, row.title, row.order_index))
        .collect();
    tree.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));

    let index: HashMap<CategoryId, usize> = tree
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.clone(), i))
        .collect();

    problems.sort_by(|a, b| a.position.cmp(&b.position).then(a.id.cmp(&b.id)));
    for row in problems {
        match index.get(&row.category_id) {
            Some(&i) => tree[i].problems.push(row.into_problem()),
            None => debug!(problem = %row.id, category = %row.category_id, "dropping orphan problem row"),
        }
    }
    tree
}

/// Replace per-problem progress with the user's overlay.
///
/// Problems without an overlay row read as not completed with an empty note,
/// whatever the catalog row says.
#[must_use]
pub fn merge_overlay(mut tree: Vec<Category>, overlay: &[ProgressOverlay]) -> Vec<Category> {
    let by_problem: HashMap<&ProblemId, &ProgressOverlay> =
        overlay.iter().map(|row| (&row.problem_id, row)).collect();

    for problem in tree.iter_mut().flat_map(|c| c.problems.iter_mut()) {
        match by_problem.get(&problem.id) {
            Some(row) => {
                problem.completed = row.completed;
                problem.note.clone_from(&row.note);
            }
            None => {
                problem.completed = false;
                problem.note.clear();
            }
        }
    }
    tree
}

//
// ─── CATALOG DIFF ──────────────────────────────────────────────────────────────
//

/// Minimal set of row operations turning `existing` into `desired`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogDiff {
    pub upsert_categories: Vec<CategoryRow>,
    pub upsert_problems: Vec<ProblemRow>,
    pub delete_categories: Vec<CategoryId>,
    pub delete_problems: Vec<ProblemId>,
}

impl CatalogDiff {
    #[must_use]
    pub fn between(existing: &CatalogRows, desired: &CatalogRows) -> Self {
        let old_categories: HashMap<&CategoryId, &CategoryRow> =
            existing.categories.iter().map(|r| (&r.id, r)).collect();
        let old_problems: HashMap<&ProblemId, &ProblemRow> =
            existing.problems.iter().map(|r| (&r.id, r)).collect();

        let upsert_categories = desired
            .categories
            .iter()
            .filter(|row| old_categories.get(&row.id).copied() != Some(*row))
            .cloned()
            .collect();
        let upsert_problems = desired
            .problems
            .iter()
            .filter(|row| old_problems.get(&row.id).copied() != Some(*row))
            .cloned()
            .collect();

        let keep_categories: HashSet<&CategoryId> =
            desired.categories.iter().map(|r| &r.id).collect();
        let keep_problems: HashSet<&ProblemId> = desired.problems.iter().map(|r| &r.id).collect();

        let delete_categories = existing
            .categories
            .iter()
            .filter(|row| !keep_categories.contains(&row.id))
            .map(|row| row.id.clone())
            .collect();
        let delete_problems = existing
            .problems
            .iter()
            .filter(|row| !keep_problems.contains(&row.id))
            .map(|row| row.id.clone())
            .collect();

        Self {
            upsert_categories,
            upsert_problems,
            delete_categories,
            delete_problems,
        }
    }

    #[must_use]
    pub fn has_upserts(&self) -> bool {
        !self.upsert_categories.is_empty() || !self.upsert_problems.is_empty()
    }

    #[must_use]
    pub fn has_deletes(&self) -> bool {
        !self.delete_categories.is_empty() || !self.delete_problems.is_empty()
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Reconciles the local cache with the remote store for one role at a time.
pub struct SyncService {
    clock: Clock,
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    connectivity: watch::Sender<Connectivity>,
}

impl SyncService {
    #[must_use]
    pub fn new(clock: Clock, remote: Arc<dyn RemoteStore>, cache: LocalCache) -> Self {
        let (connectivity, _) = watch::channel(Connectivity::Unknown);
        Self {
            clock,
            remote,
            cache,
            connectivity,
        }
    }

    #[must_use]
    pub fn remote(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.remote)
    }

    #[must_use]
    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    #[must_use]
    pub fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.subscribe()
    }

    fn mark(&self, state: Connectivity) {
        self.connectivity.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = ?*current, to = ?state, "connectivity changed");
                *current = state;
                true
            }
        });
    }

    /// Resolve who the caller is.
    ///
    /// Session failures read as signed out. A failed allow-list check reads as
    /// "not an admin".
    pub async fn resolve_role(&self) -> Role {
        let session = match self.remote.get_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return Role::Unauthenticated,
            Err(err) => {
                warn!(error = %err, "session lookup failed; continuing signed out");
                self.mark(Connectivity::Offline);
                return Role::Unauthenticated;
            }
        };

        let is_admin = match self.remote.is_admin(&session.user_id).await {
            Ok(is_admin) => is_admin,
            Err(err) => {
                warn!(user = %session.user_id, error = %err, "admin check failed; treating as sub-user");
                false
            }
        };
        Role::authenticated(session.user_id, is_admin)
    }

    /// Resolve the role, then load the tree for it.
    pub async fn load(&self) -> Loaded {
        let role = self.resolve_role().await;
        self.load_as(role).await
    }

    /// Load the tree for an already-resolved role.
    pub async fn load_as(&self, role: Role) -> Loaded {
        let fetched = match &role {
            Role::Unauthenticated => None,
            Role::Admin(user_id) => Some(self.fetch_admin_tree(user_id).await),
            Role::SubUser(user_id) => Some(self.fetch_sub_user_tree(user_id).await),
        };
        let Some(fetched) = fetched else {
            return self.local_fallback(role);
        };

        match fetched {
            Ok(categories) => {
                self.mark(Connectivity::Online);
                self.cache.write(&categories);
                info!(role = role.label(), categories = categories.len(), "loaded catalog from remote");
                Loaded {
                    categories,
                    role,
                    source: LoadSource::Remote,
                }
            }
            Err(err) => {
                warn!(role = role.label(), error = %err, "remote load failed; using local data");
                self.mark(Connectivity::Offline);
                self.local_fallback(role)
            }
        }
    }

    fn local_fallback(&self, role: Role) -> Loaded {
        let cached = self.cache.read();
        if cached.is_empty() {
            Loaded {
                categories: sample_catalog(),
                role,
                source: LoadSource::Sample,
            }
        } else {
            Loaded {
                categories: cached,
                role,
                source: LoadSource::Cache,
            }
        }
    }

    async fn fetch_admin_tree(&self, user_id: &UserId) -> Result<Vec<Category>, RemoteError> {
        let rows = self.remote.fetch_catalog_as_admin(user_id).await?;
        Ok(build_tree(rows))
    }

    async fn fetch_sub_user_tree(&self, user_id: &UserId) -> Result<Vec<Category>, RemoteError> {
        let (rows, overlay) = tokio::try_join!(
            self.remote.fetch_catalog_shared(),
            self.remote.fetch_overlay(user_id)
        )?;
        Ok(merge_overlay(build_tree(rows), &overlay))
    }

    /// Overwrite the local cache with `categories`.
    pub fn write_local(&self, categories: &[Category]) {
        self.cache.write(categories);
    }

    /// Write `categories` locally, then push it for `role`.
    ///
    /// Remote failures are absorbed into [`SaveOutcome::Deferred`].
    pub async fn save(&self, categories: &[Category], role: &Role) -> SaveOutcome {
        self.write_local(categories);
        if *role == Role::Unauthenticated {
            return SaveOutcome::LocalOnly;
        }
        match self.push(categories, role).await {
            Ok(report) => SaveOutcome::Synced(report),
            Err(err) => SaveOutcome::Deferred(err),
        }
    }

    /// Push the remote half of a save.
    ///
    /// # Errors
    ///
    /// Returns the first `RemoteError` hit while reading the stored state or
    /// writing the difference.
    pub async fn push(&self, categories: &[Category], role: &Role) -> Result<PushReport, RemoteError> {
        let result = match role {
            Role::Unauthenticated => return Ok(PushReport::default()),
            Role::Admin(user_id) => self.push_catalog(categories, user_id).await,
            Role::SubUser(user_id) => self.push_overlay(categories, user_id).await,
        };

        match &result {
            Ok(report) => {
                self.mark(Connectivity::Online);
                info!(role = role.label(), ?report, "pushed to remote");
            }
            Err(err) => {
                self.mark(Connectivity::Offline);
                warn!(role = role.label(), error = %err, "push failed");
            }
        }
        result
    }

    async fn push_catalog(&self, categories: &[Category], owner: &UserId) -> Result<PushReport, RemoteError> {
        let existing = self.remote.fetch_catalog_as_admin(owner).await?;
        let desired = CatalogRows::from_tree(categories);
        let diff = CatalogDiff::between(&existing, &desired);

        if diff.has_upserts() {
            self.remote
                .upsert_catalog(&diff.upsert_categories, &diff.upsert_problems, owner)
                .await?;
        }
        if diff.has_deletes() {
            self.remote
                .delete_catalog_rows(&diff.delete_categories, &diff.delete_problems, owner)
                .await?;
        }

        Ok(PushReport {
            categories_upserted: diff.upsert_categories.len(),
            problems_upserted: diff.upsert_problems.len(),
            categories_deleted: diff.delete_categories.len(),
            problems_deleted: diff.delete_problems.len(),
            overlays_upserted: 0,
        })
    }

    async fn push_overlay(&self, categories: &[Category], user_id: &UserId) -> Result<PushReport, RemoteError> {
        let (shared, stored) = tokio::try_join!(
            self.remote.fetch_catalog_shared(),
            self.remote.fetch_overlay(user_id)
        )?;
        let known: HashSet<&ProblemId> = shared.problems.iter().map(|p| &p.id).collect();
        let stored: HashMap<&ProblemId, &ProgressOverlay> =
            stored.iter().map(|row| (&row.problem_id, row)).collect();

        let now = self.clock.now();
        let mut rows = Vec::new();
        for problem in categories.iter().flat_map(|c| c.problems.iter()) {
            if !known.contains(&problem.id) {
                debug!(problem = %problem.id, "skipping progress for a problem not in the shared catalog");
                continue;
            }
            let row = ProgressOverlay::from_problem(user_id, problem, now);
            let changed = match stored.get(&problem.id) {
                Some(previous) => !previous.same_progress(&row),
                None => !row.is_default(),
            };
            if changed {
                rows.push(row);
            }
        }

        if !rows.is_empty() {
            self.remote.upsert_overlay(&rows).await?;
        }
        Ok(PushReport {
            overlays_upserted: rows.len(),
            ..PushReport::default()
        })
    }
}
