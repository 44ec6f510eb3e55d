use std::path::Path;
use std::sync::Arc;

use tokio::sync::OnceCell;

use storage::repository::RemoteStore;
use storage::{FileSlot, IdentityProvider, LocalCache, SqliteRemote};
use tracker_core::model::{Category, Role};

use crate::Clock;
use crate::change_watcher::ChangeWatcher;
use crate::config::SyncConfig;
use crate::error::ServicesError;
use crate::save_scheduler::SaveScheduler;
use crate::sync_service::{Loaded, SyncService};

static SHARED_REMOTE: OnceCell<Arc<SqliteRemote>> = OnceCell::const_new();

/// Process-wide SQLite remote.
///
/// The first call connects; later calls return the same handle and ignore
/// their arguments.
///
/// # Errors
///
/// Returns `ServicesError::Sqlite` if the first connection attempt fails.
pub async fn shared_remote(
    db_url: &str,
    identity: Arc<dyn IdentityProvider>,
    clock: Clock,
) -> Result<Arc<SqliteRemote>, ServicesError> {
    let remote = SHARED_REMOTE
        .get_or_try_init(|| async move {
            tracing::info!(db_url, "connecting shared remote");
            SqliteRemote::connect(db_url, identity, clock)
                .await
                .map(Arc::new)
        })
        .await?;
    Ok(Arc::clone(remote))
}

/// Assembles the sync service and its save scheduler.
pub struct AppServices {
    sync: Arc<SyncService>,
    scheduler: SaveScheduler,
}

impl AppServices {
    /// Wire services over an arbitrary remote and cache.
    #[must_use]
    pub fn new(
        clock: Clock,
        remote: Arc<dyn RemoteStore>,
        cache: LocalCache,
        config: SyncConfig,
    ) -> Self {
        let sync = Arc::new(SyncService::new(clock, remote, cache));
        let scheduler = SaveScheduler::spawn(Arc::clone(&sync), config.scheduler);
        Self { sync, scheduler }
    }

    /// Build services backed by the shared `SQLite` remote and a file cache.
    ///
    /// # Errors
    ///
    /// Returns `ServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        cache_dir: &Path,
        identity: Arc<dyn IdentityProvider>,
        clock: Clock,
        config: SyncConfig,
    ) -> Result<Self, ServicesError> {
        let remote = shared_remote(db_url, identity, clock).await?;
        let cache = LocalCache::new(Arc::new(FileSlot::new(cache_dir)), config.cache_key.clone());
        Ok(Self::new(clock, remote, cache, config))
    }

    #[must_use]
    pub fn sync(&self) -> Arc<SyncService> {
        Arc::clone(&self.sync)
    }

    #[must_use]
    pub fn scheduler(&self) -> &SaveScheduler {
        &self.scheduler
    }

    pub async fn load(&self) -> Loaded {
        self.sync.load().await
    }

    pub fn watch_and_reload<F>(&self, on_reload: F) -> ChangeWatcher
    where
        F: Fn(Loaded) + Send + 'static,
    {
        self.sync.watch_and_reload(on_reload)
    }

    /// Hand the final tree to the scheduler and wait for it to stop.
    ///
    /// Any pending debounced write or retry is replaced by a single attempt
    /// with `categories`.
    pub async fn shutdown(&self, categories: Vec<Category>, role: &Role) {
        self.scheduler.teardown(categories, role);
        self.scheduler.stopped().await;
    }
}
