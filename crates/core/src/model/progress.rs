use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{ProblemId, UserId};
use crate::model::problem::Problem;

/// A sub-user's private completion/note state for one problem.
///
/// Keyed by `(user_id, problem_id)`. `updated_at` is bookkeeping only and is
/// ignored by [`ProgressOverlay::same_progress`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOverlay {
    pub user_id: UserId,
    pub problem_id: ProblemId,
    pub completed: bool,
    #[serde(default)]
    pub note: String,
    pub updated_at: DateTime<Utc>,
}

impl ProgressOverlay {
    /// Derive the overlay row a user's view of `problem` implies.
    #[must_use]
    pub fn from_problem(user_id: &UserId, problem: &Problem, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.clone(),
            problem_id: problem.id.clone(),
            completed: problem.completed,
            note: problem.note.clone(),
            updated_at: now,
        }
    }

    /// Compares the user-visible part of two overlay rows.
    #[must_use]
    pub fn same_progress(&self, other: &Self) -> bool {
        self.completed == other.completed && self.note == other.note
    }

    /// Overlay rows with the default state carry no information.
    #[must_use]
    pub fn is_default(&self) -> bool {
        !self.completed && self.note.is_empty()
    }
}
