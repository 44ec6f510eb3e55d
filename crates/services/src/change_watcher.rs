use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use storage::repository::RemoteStore;

use crate::sync_service::{Loaded, SyncService};

/// Live subscription to remote change signals. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeWatcher {
    task: JoinHandle<()>,
}

impl ChangeWatcher {
    pub fn unsubscribe(self) {}

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Call `on_change` for every change signal from `remote`.
///
/// Signals carry no payload; a burst may collapse into a single call.
pub fn watch_changes<F>(remote: &dyn RemoteStore, mut on_change: F) -> ChangeWatcher
where
    F: FnMut() + Send + 'static,
{
    let mut subscription = remote.subscribe_to_changes();
    let task = tokio::spawn(async move {
        while subscription.changed().await {
            on_change();
        }
        debug!("change feed closed");
    });
    ChangeWatcher { task }
}

impl SyncService {
    /// Re-run [`SyncService::load`] on every remote change and hand the
    /// result to `on_reload`.
    pub fn watch_and_reload<F>(self: &Arc<Self>, on_reload: F) -> ChangeWatcher
    where
        F: Fn(Loaded) + Send + 'static,
    {
        let mut subscription = self.remote().subscribe_to_changes();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            while subscription.changed().await {
                debug!("remote changed; reloading");
                let loaded = this.load().await;
                on_reload(loaded);
            }
        });
        ChangeWatcher { task }
    }
}
