use thiserror::Error;

use crate::model::{CategoryId, ProblemId};

/// Errors raised by the catalog editing helpers in [`crate::catalog`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("title cannot be empty")]
    EmptyTitle,

    #[error("invalid problem url: {0}")]
    InvalidUrl(String),

    #[error("category {0} already exists")]
    DuplicateCategory(CategoryId),

    #[error("problem {0} already exists")]
    DuplicateProblem(ProblemId),

    #[error("category {0} not found")]
    CategoryNotFound(CategoryId),

    #[error("problem {0} not found")]
    ProblemNotFound(ProblemId),
}
