use sqlx::SqlitePool;

use super::SqliteInitError;

/// Creates the catalog, overlay, and allow-list tables if they do not exist.
///
/// Idempotent; safe to run on every connect.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS admin_users (
                user_id TEXT PRIMARY KEY
            );
        ",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                order_index INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
        ",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS problems (
                id TEXT PRIMARY KEY,
                category_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                platform TEXT NOT NULL,
                difficulty TEXT NOT NULL CHECK (difficulty IN ('Easy', 'Medium', 'Hard')),
                completed INTEGER NOT NULL DEFAULT 0 CHECK (completed IN (0, 1)),
                note TEXT NOT NULL DEFAULT '',
                position INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
            );
        ",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS progress_overlay (
                user_id TEXT NOT NULL,
                problem_id TEXT NOT NULL,
                completed INTEGER NOT NULL CHECK (completed IN (0, 1)),
                note TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, problem_id),
                FOREIGN KEY (problem_id) REFERENCES problems(id) ON DELETE CASCADE
            );
        ",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
            CREATE INDEX IF NOT EXISTS idx_categories_owner_order
                ON categories (owner_id, order_index);
        ",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
            CREATE INDEX IF NOT EXISTS idx_problems_category_position
                ON problems (category_id, position);
        ",
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
