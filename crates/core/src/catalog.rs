//! Pure editing helpers over a catalog tree.
//!
//! The tree is always passed as a full snapshot (`Vec<Category>`); nothing here
//! touches storage. Callers hand the edited snapshot to the save scheduler.

use crate::error::CatalogError;
use crate::model::{Category, CategoryId, Difficulty, Platform, Problem, ProblemId};

/// Unvalidated input for a new problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemDraft {
    pub title: String,
    pub url: String,
    pub platform: Platform,
    pub difficulty: Difficulty,
}

impl ProblemDraft {
    /// Validate the draft and assign it an id.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::EmptyTitle` for a blank title and
    /// `CatalogError::InvalidUrl` if `url` is not an absolute URL.
    pub fn validate(self, id: ProblemId) -> Result<Problem, CatalogError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(CatalogError::EmptyTitle);
        }
        let url = url::Url::parse(self.url.trim())
            .map_err(|e| CatalogError::InvalidUrl(format!("{}: {e}", self.url)))?;
        Ok(Problem {
            id,
            title: title.to_owned(),
            url: url.to_string(),
            platform: self.platform,
            difficulty: self.difficulty,
            completed: false,
            note: String::new(),
        })
    }
}

/// Sorts categories by `order_index` and renumbers them densely from zero.
pub fn normalize_order(categories: &mut [Category]) {
    categories.sort_by_key(|c| c.order_index);
    for (idx, category) in categories.iter_mut().enumerate() {
        category.order_index = i64::try_from(idx).unwrap_or(i64::MAX);
    }
}

#[must_use]
pub fn find_problem<'a>(categories: &'a [Category], id: &ProblemId) -> Option<&'a Problem> {
    categories
        .iter()
        .flat_map(|c| c.problems.iter())
        .find(|p| &p.id == id)
}

fn find_problem_mut<'a>(
    categories: &'a mut [Category],
    id: &ProblemId,
) -> Result<&'a mut Problem, CatalogError> {
    categories
        .iter_mut()
        .flat_map(|c| c.problems.iter_mut())
        .find(|p| &p.id == id)
        .ok_or_else(|| CatalogError::ProblemNotFound(id.clone()))
}

/// Flip `completed` on a problem and return the new value.
///
/// # Errors
///
/// Returns `CatalogError::ProblemNotFound` if no problem has this id.
pub fn toggle_completed(categories: &mut [Category], id: &ProblemId) -> Result<bool, CatalogError> {
    let problem = find_problem_mut(categories, id)?;
    problem.completed = !problem.completed;
    Ok(problem.completed)
}

/// Replace a problem's note. Surrounding whitespace is dropped.
///
/// # Errors
///
/// Returns `CatalogError::ProblemNotFound` if no problem has this id.
pub fn set_note(
    categories: &mut [Category],
    id: &ProblemId,
    note: impl Into<String>,
) -> Result<(), CatalogError> {
    let problem = find_problem_mut(categories, id)?;
    problem.note = note.into().trim().to_owned();
    Ok(())
}

/// Append a new, empty category after the existing ones.
///
/// # Errors
///
/// Returns `CatalogError::EmptyTitle` or `CatalogError::DuplicateCategory`.
pub fn add_category(
    categories: &mut Vec<Category>,
    id: CategoryId,
    title: &str,
) -> Result<(), CatalogError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(CatalogError::EmptyTitle);
    }
    if categories.iter().any(|c| c.id == id) {
        return Err(CatalogError::DuplicateCategory(id));
    }
    let next = categories
        .iter()
        .map(|c| c.order_index)
        .max()
        .map_or(0, |max| max + 1);
    categories.push(Category::new(id, title, next));
    Ok(())
}

/// Append a validated problem to a category.
///
/// # Errors
///
/// Returns `CatalogError::CategoryNotFound`, `CatalogError::DuplicateProblem`,
/// or a validation error from [`ProblemDraft::validate`].
pub fn add_problem(
    categories: &mut [Category],
    category_id: &CategoryId,
    id: ProblemId,
    draft: ProblemDraft,
) -> Result<(), CatalogError> {
    if find_problem(categories, &id).is_some() {
        return Err(CatalogError::DuplicateProblem(id));
    }
    let problem = draft.validate(id)?;
    let category = categories
        .iter_mut()
        .find(|c| &c.id == category_id)
        .ok_or_else(|| CatalogError::CategoryNotFound(category_id.clone()))?;
    category.problems.push(problem);
    Ok(())
}

/// Remove a problem from whichever category holds it.
///
/// # Errors
///
/// Returns `CatalogError::ProblemNotFound` if no problem has this id.
pub fn remove_problem(categories: &mut [Category], id: &ProblemId) -> Result<Problem, CatalogError> {
    for category in categories.iter_mut() {
        if let Some(pos) = category.problems.iter().position(|p| &p.id == id) {
            return Ok(category.problems.remove(pos));
        }
    }
    Err(CatalogError::ProblemNotFound(id.clone()))
}

/// Remove a category together with its problems.
///
/// # Errors
///
/// Returns `CatalogError::CategoryNotFound` if no category has this id.
pub fn remove_category(
    categories: &mut Vec<Category>,
    id: &CategoryId,
) -> Result<Category, CatalogError> {
    let pos = categories
        .iter()
        .position(|c| &c.id == id)
        .ok_or_else(|| CatalogError::CategoryNotFound(id.clone()))?;
    let removed = categories.remove(pos);
    normalize_order(categories);
    Ok(removed)
}

/// Move a category to `new_index` (clamped) and renumber the order.
///
/// # Errors
///
/// Returns `CatalogError::CategoryNotFound` if no category has this id.
pub fn move_category(
    categories: &mut Vec<Category>,
    id: &CategoryId,
    new_index: usize,
) -> Result<(), CatalogError> {
    normalize_order(categories);
    let pos = categories
        .iter()
        .position(|c| &c.id == id)
        .ok_or_else(|| CatalogError::CategoryNotFound(id.clone()))?;
    let category = categories.remove(pos);
    let target = new_index.min(categories.len());
    categories.insert(target, category);
    for (idx, category) in categories.iter_mut().enumerate() {
        category.order_index = i64::try_from(idx).unwrap_or(i64::MAX);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str) -> ProblemDraft {
        ProblemDraft {
            title: title.to_owned(),
            url: "https://leetcode.com/problems/two-sum/".to_owned(),
            platform: Platform::LeetCode,
            difficulty: Difficulty::Easy,
        }
    }

    fn catalog() -> Vec<Category> {
        let mut categories = Vec::new();
        add_category(&mut categories, CategoryId::new("c1"), "Arrays").unwrap();
        add_category(&mut categories, CategoryId::new("c2"), "Graphs").unwrap();
        add_problem(
            &mut categories,
            &CategoryId::new("c1"),
            ProblemId::new("p1"),
            draft("Two Sum"),
        )
        .unwrap();
        categories
    }

    #[test]
    fn add_category_appends_with_next_order_index() {
        let categories = catalog();
        assert_eq!(categories[0].order_index, 0);
        assert_eq!(categories[1].order_index, 1);
    }

    #[test]
    fn add_category_rejects_duplicates_and_blank_titles() {
        let mut categories = catalog();
        assert_eq!(
            add_category(&mut categories, CategoryId::new("c1"), "Again"),
            Err(CatalogError::DuplicateCategory(CategoryId::new("c1")))
        );
        assert_eq!(
            add_category(&mut categories, CategoryId::new("c3"), "   "),
            Err(CatalogError::EmptyTitle)
        );
    }

    #[test]
    fn add_problem_validates_url() {
        let mut categories = catalog();
        let mut bad = draft("Broken");
        bad.url = "not a url".into();
        let err = add_problem(&mut categories, &CategoryId::new("c2"), ProblemId::new("p2"), bad)
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidUrl(_)));
    }

    #[test]
    fn add_problem_rejects_duplicate_ids_across_categories() {
        let mut categories = catalog();
        let err = add_problem(
            &mut categories,
            &CategoryId::new("c2"),
            ProblemId::new("p1"),
            draft("Dup"),
        )
        .unwrap_err();
        assert_eq!(err, CatalogError::DuplicateProblem(ProblemId::new("p1")));
    }

    #[test]
    fn toggle_and_note_edit_in_place() {
        let mut categories = catalog();
        let id = ProblemId::new("p1");
        assert!(toggle_completed(&mut categories, &id).unwrap());
        set_note(&mut categories, &id, "  use a hash map ").unwrap();
        let problem = find_problem(&categories, &id).unwrap();
        assert!(problem.completed);
        assert_eq!(problem.note, "use a hash map");
        assert!(!toggle_completed(&mut categories, &id).unwrap());
    }

    #[test]
    fn unknown_problem_is_reported() {
        let mut categories = catalog();
        assert_eq!(
            toggle_completed(&mut categories, &ProblemId::new("nope")),
            Err(CatalogError::ProblemNotFound(ProblemId::new("nope")))
        );
    }

    #[test]
    fn remove_category_renumbers_remaining() {
        let mut categories = catalog();
        add_category(&mut categories, CategoryId::new("c3"), "Trees").unwrap();
        let removed = remove_category(&mut categories, &CategoryId::new("c1")).unwrap();
        assert_eq!(removed.problems.len(), 1);
        let order: Vec<_> = categories.iter().map(|c| (c.id.as_str(), c.order_index)).collect();
        assert_eq!(order, vec![("c2", 0), ("c3", 1)]);
    }

    #[test]
    fn move_category_clamps_target() {
        let mut categories = catalog();
        add_category(&mut categories, CategoryId::new("c3"), "Trees").unwrap();
        move_category(&mut categories, &CategoryId::new("c1"), 99).unwrap();
        let ids: Vec<_> = categories.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c3", "c1"]);
        assert_eq!(categories[2].order_index, 2);
    }

    #[test]
    fn remove_problem_returns_it() {
        let mut categories = catalog();
        let removed = remove_problem(&mut categories, &ProblemId::new("p1")).unwrap();
        assert_eq!(removed.title, "Two Sum");
        assert!(categories[0].problems.is_empty());
    }
}
