use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracker_core::model::{CategoryId, ProblemId, UserId};

use super::mapping::{bool_to_i64, map_category_row, map_problem_row, read_error, write_error};
use crate::repository::{CatalogRows, CategoryRow, ProblemRow, RemoteError};

pub(super) async fn is_admin(pool: &SqlitePool, user_id: &UserId) -> Result<bool, RemoteError> {
    let row = sqlx::query("SELECT 1 FROM admin_users WHERE user_id = ?1")
        .bind(user_id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(read_error)?;
    Ok(row.is_some())
}

/// Rows owned by `owner`, or by any allow-listed admin when `owner` is `None`.
pub(super) async fn fetch_owned(
    pool: &SqlitePool,
    owner: Option<&UserId>,
) -> Result<CatalogRows, RemoteError> {
    let filter = if owner.is_some() {
        "owner_id = ?1"
    } else {
        "owner_id IN (SELECT user_id FROM admin_users)"
    };

    let category_sql = format!(
        "SELECT id, title, order_index FROM categories WHERE {filter} ORDER BY order_index ASC, id ASC"
    );
    let problem_sql = format!(
        r"
        SELECT id, category_id, title, url, platform, difficulty, completed, note, position
        FROM problems
        WHERE {filter}
        ORDER BY category_id ASC, position ASC, id ASC
        "
    );

    let mut category_query = sqlx::query(&category_sql);
    let mut problem_query = sqlx::query(&problem_sql);
    if let Some(owner) = owner {
        category_query = category_query.bind(owner.as_str());
        problem_query = problem_query.bind(owner.as_str());
    }

    let category_rows = category_query.fetch_all(pool).await.map_err(read_error)?;
    let problem_rows = problem_query.fetch_all(pool).await.map_err(read_error)?;

    let mut rows = CatalogRows::default();
    for row in category_rows {
        rows.categories.push(map_category_row(&row)?);
    }
    for row in problem_rows {
        rows.problems.push(map_problem_row(&row)?);
    }
    Ok(rows)
}

pub(super) async fn upsert(
    pool: &SqlitePool,
    categories: &[CategoryRow],
    problems: &[ProblemRow],
    owner: &UserId,
    now: DateTime<Utc>,
) -> Result<(), RemoteError> {
    let mut tx = pool.begin().await.map_err(write_error)?;

    let allowed = sqlx::query("SELECT 1 FROM admin_users WHERE user_id = ?1")
        .bind(owner.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(write_error)?;
    if allowed.is_none() {
        return Err(RemoteError::Write(format!(
            "permission denied: {owner} may not write catalog rows"
        )));
    }

    for category in categories {
        let res = sqlx::query(
            r"
            INSERT INTO categories (id, owner_id, title, order_index, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                order_index = excluded.order_index,
                updated_at = excluded.updated_at
            WHERE categories.owner_id = excluded.owner_id
            ",
        )
        .bind(category.id.as_str())
        .bind(owner.as_str())
        .bind(&category.title)
        .bind(category.order_index)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;
        if res.rows_affected() == 0 {
            return Err(RemoteError::Write(format!(
                "category {} is owned by another identity",
                category.id
            )));
        }
    }

    for problem in problems {
        let res = sqlx::query(
            r"
            INSERT INTO problems (
                id, category_id, owner_id, title, url, platform, difficulty,
                completed, note, position, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                category_id = excluded.category_id,
                title = excluded.title,
                url = excluded.url,
                platform = excluded.platform,
                difficulty = excluded.difficulty,
                completed = excluded.completed,
                note = excluded.note,
                position = excluded.position,
                updated_at = excluded.updated_at
            WHERE problems.owner_id = excluded.owner_id
            ",
        )
        .bind(problem.id.as_str())
        .bind(problem.category_id.as_str())
        .bind(owner.as_str())
        .bind(&problem.title)
        .bind(&problem.url)
        .bind(problem.platform.as_str())
        .bind(problem.difficulty.as_str())
        .bind(bool_to_i64(problem.completed))
        .bind(&problem.note)
        .bind(problem.position)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;
        if res.rows_affected() == 0 {
            return Err(RemoteError::Write(format!(
                "problem {} is owned by another identity",
                problem.id
            )));
        }
    }

    tx.commit().await.map_err(write_error)?;
    tracing::debug!(
        owner = %owner,
        categories = categories.len(),
        problems = problems.len(),
        "catalog rows upserted"
    );
    Ok(())
}

/// Deletes problems first so the category foreign key is never violated.
pub(super) async fn delete(
    pool: &SqlitePool,
    category_ids: &[CategoryId],
    problem_ids: &[ProblemId],
    owner: &UserId,
) -> Result<(), RemoteError> {
    let mut tx = pool.begin().await.map_err(write_error)?;

    for id in problem_ids {
        sqlx::query("DELETE FROM problems WHERE id = ?1 AND owner_id = ?2")
            .bind(id.as_str())
            .bind(owner.as_str())
            .execute(&mut *tx)
            .await
            .map_err(write_error)?;
    }
    for id in category_ids {
        sqlx::query("DELETE FROM categories WHERE id = ?1 AND owner_id = ?2")
            .bind(id.as_str())
            .bind(owner.as_str())
            .execute(&mut *tx)
            .await
            .map_err(write_error)?;
    }

    tx.commit().await.map_err(write_error)?;
    tracing::debug!(
        owner = %owner,
        categories = category_ids.len(),
        problems = problem_ids.len(),
        "catalog rows deleted"
    );
    Ok(())
}
