use sqlx::SqlitePool;
use tracker_core::model::{ProgressOverlay, UserId};

use super::mapping::{bool_to_i64, map_overlay_row, read_error, write_error};
use crate::repository::RemoteError;

pub(super) async fn fetch(
    pool: &SqlitePool,
    user_id: &UserId,
) -> Result<Vec<ProgressOverlay>, RemoteError> {
    let rows = sqlx::query(
        r"
        SELECT user_id, problem_id, completed, note, updated_at
        FROM progress_overlay
        WHERE user_id = ?1
        ORDER BY problem_id ASC
        ",
    )
    .bind(user_id.as_str())
    .fetch_all(pool)
    .await
    .map_err(read_error)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(map_overlay_row(&row)?);
    }
    Ok(out)
}

pub(super) async fn upsert(pool: &SqlitePool, rows: &[ProgressOverlay]) -> Result<(), RemoteError> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await.map_err(write_error)?;
    for row in rows {
        sqlx::query(
            r"
            INSERT INTO progress_overlay (user_id, problem_id, completed, note, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, problem_id) DO UPDATE SET
                completed = excluded.completed,
                note = excluded.note,
                updated_at = excluded.updated_at
            ",
        )
        .bind(row.user_id.as_str())
        .bind(row.problem_id.as_str())
        .bind(bool_to_i64(row.completed))
        .bind(&row.note)
        .bind(row.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;
    }
    tx.commit().await.map_err(write_error)?;
    Ok(())
}
