use serde::{Deserialize, Serialize};

use crate::model::ids::CategoryId;
use crate::model::problem::Problem;

/// Completed/total counts for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Completion as a whole percentage, rounded down. Empty categories report 0.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation)]
        let pct = (self.completed * 100 / self.total) as u8;
        pct
    }
}

/// A titled, ordered group of problems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: CategoryId,
    pub title: String,
    pub order_index: i64,
    #[serde(default)]
    pub problems: Vec<Problem>,
}

impl Category {
    #[must_use]
    pub fn new(id: CategoryId, title: impl Into<String>, order_index: i64) -> Self {
        Self {
            id,
            title: title.into(),
            order_index,
            problems: Vec::new(),
        }
    }

    #[must_use]
    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.problems.iter().filter(|p| p.completed).count(),
            total: self.problems.len(),
        }
    }
}
