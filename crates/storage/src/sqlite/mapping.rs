use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracker_core::model::{
    CategoryId, Difficulty, Platform, ProblemId, ProgressOverlay, UserId,
};

use crate::repository::{CategoryRow, ProblemRow, RemoteError};

// Primary SQLite result codes that mean "try again later".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_FULL: i32 = 13;

fn ser<E: core::fmt::Display>(e: E) -> RemoteError {
    RemoteError::Read(format!("invalid row: {e}"))
}

fn is_exhausted(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            // extended codes keep the primary code in the low byte
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED | SQLITE_FULL)),
        _ => false,
    }
}

pub(crate) fn read_error(e: sqlx::Error) -> RemoteError {
    if is_exhausted(&e) {
        RemoteError::ResourceExhausted(e.to_string())
    } else {
        RemoteError::Read(e.to_string())
    }
}

pub(crate) fn write_error(e: sqlx::Error) -> RemoteError {
    if is_exhausted(&e) {
        RemoteError::ResourceExhausted(e.to_string())
    } else {
        RemoteError::Write(e.to_string())
    }
}

pub(crate) fn bool_to_i64(value: bool) -> i64 {
    i64::from(value)
}

pub(crate) fn map_category_row(row: &SqliteRow) -> Result<CategoryRow, RemoteError> {
    Ok(CategoryRow {
        id: CategoryId::new(row.try_get::<String, _>("id").map_err(ser)?),
        title: row.try_get("title").map_err(ser)?,
        order_index: row.try_get("order_index").map_err(ser)?,
    })
}

pub(crate) fn map_problem_row(row: &SqliteRow) -> Result<ProblemRow, RemoteError> {
    let platform: String = row.try_get("platform").map_err(ser)?;
    let difficulty: String = row.try_get("difficulty").map_err(ser)?;
    Ok(ProblemRow {
        id: ProblemId::new(row.try_get::<String, _>("id").map_err(ser)?),
        category_id: CategoryId::new(row.try_get::<String, _>("category_id").map_err(ser)?),
        title: row.try_get("title").map_err(ser)?,
        url: row.try_get("url").map_err(ser)?,
        platform: platform.parse::<Platform>().map_err(ser)?,
        difficulty: difficulty.parse::<Difficulty>().map_err(ser)?,
        completed: row.try_get::<i64, _>("completed").map_err(ser)? != 0,
        note: row.try_get("note").map_err(ser)?,
        position: row.try_get("position").map_err(ser)?,
    })
}

pub(crate) fn map_overlay_row(row: &SqliteRow) -> Result<ProgressOverlay, RemoteError> {
    Ok(ProgressOverlay {
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?),
        problem_id: ProblemId::new(row.try_get::<String, _>("problem_id").map_err(ser)?),
        completed: row.try_get::<i64, _>("completed").map_err(ser)? != 0,
        note: row.try_get("note").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}
