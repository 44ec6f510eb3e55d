use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use thiserror::Error;
use tokio::sync::broadcast;
use tracker_core::Clock;
use tracker_core::model::{CategoryId, ProblemId, ProgressOverlay, Session, UserId};

use crate::identity::IdentityProvider;
use crate::repository::{
    CatalogRows, CategoryRow, ChangeEvent, ChangeSubscription, ProblemRow, RemoteError,
    RemoteStore,
};

mod catalog_repo;
mod mapping;
mod overlay_repo;
mod schema;

/// Authoritative remote store backed by `SQLite`.
#[derive(Clone)]
pub struct SqliteRemote {
    pool: SqlitePool,
    identity: Arc<dyn IdentityProvider>,
    clock: Clock,
    changes: broadcast::Sender<ChangeEvent>,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl SqliteRemote {
    /// Connect to `SQLite` using the given URL and create the schema if absent.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the connection cannot be established or
    /// the schema cannot be created.
    pub async fn connect(
        database_url: &str,
        identity: Arc<dyn IdentityProvider>,
        clock: Clock,
    ) -> Result<Self, SqliteInitError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA journal_mode = WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 5000;")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;
        schema::ensure_schema(&pool).await?;
        let (changes, _) = broadcast::channel(64);
        tracing::info!(url = %database_url, "sqlite remote ready");
        Ok(Self {
            pool,
            identity,
            clock,
            changes,
        })
    }

    /// Add a user to the admin allow-list.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the allow-list cannot be written.
    pub async fn grant_admin(&self, user_id: &UserId) -> Result<(), RemoteError> {
        sqlx::query("INSERT INTO admin_users (user_id) VALUES (?1) ON CONFLICT(user_id) DO NOTHING")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(mapping::write_error)?;
        Ok(())
    }

    /// Catalog rows may only be written by their owner's own session.
    async fn require_signed_in_owner(&self, owner_id: &UserId) -> Result<(), RemoteError> {
        let session = self.get_session().await?;
        if session.as_ref().map(|s| &s.user_id) != Some(owner_id) {
            return Err(RemoteError::Write(format!(
                "permission denied: {owner_id} is not the signed-in user"
            )));
        }
        Ok(())
    }

    fn notify(&self, event: ChangeEvent) {
        let _ = self.changes.send(event);
    }
}

#[async_trait]
impl RemoteStore for SqliteRemote {
    async fn get_session(&self) -> Result<Option<Session>, RemoteError> {
        self.identity
            .get_session()
            .await
            .map_err(|e| RemoteError::Session(e.to_string()))
    }

    async fn is_admin(&self, user_id: &UserId) -> Result<bool, RemoteError> {
        catalog_repo::is_admin(&self.pool, user_id).await
    }

    async fn fetch_catalog_as_admin(&self, user_id: &UserId) -> Result<CatalogRows, RemoteError> {
        catalog_repo::fetch_owned(&self.pool, Some(user_id)).await
    }

    async fn fetch_catalog_shared(&self) -> Result<CatalogRows, RemoteError> {
        catalog_repo::fetch_owned(&self.pool, None).await
    }

    async fn fetch_overlay(&self, user_id: &UserId) -> Result<Vec<ProgressOverlay>, RemoteError> {
        overlay_repo::fetch(&self.pool, user_id).await
    }

    async fn upsert_catalog(
        &self,
        categories: &[CategoryRow],
        problems: &[ProblemRow],
        owner_id: &UserId,
    ) -> Result<(), RemoteError> {
        self.require_signed_in_owner(owner_id).await?;
        catalog_repo::upsert(&self.pool, categories, problems, owner_id, self.clock.now()).await?;
        self.notify(ChangeEvent::Catalog);
        Ok(())
    }

    async fn delete_catalog_rows(
        &self,
        category_ids: &[CategoryId],
        problem_ids: &[ProblemId],
        owner_id: &UserId,
    ) -> Result<(), RemoteError> {
        self.require_signed_in_owner(owner_id).await?;
        catalog_repo::delete(&self.pool, category_ids, problem_ids, owner_id).await?;
        self.notify(ChangeEvent::Catalog);
        Ok(())
    }

    async fn upsert_overlay(&self, rows: &[ProgressOverlay]) -> Result<(), RemoteError> {
        let session = self.get_session().await?;
        let session_user = session.as_ref().map(|s| &s.user_id);
        if rows.iter().any(|r| Some(&r.user_id) != session_user) {
            return Err(RemoteError::Write(
                "overlay rows must belong to the signed-in user".into(),
            ));
        }
        overlay_repo::upsert(&self.pool, rows).await?;
        self.notify(ChangeEvent::Overlay);
        Ok(())
    }

    fn subscribe_to_changes(&self) -> ChangeSubscription {
        ChangeSubscription::new(self.changes.subscribe())
    }
}
