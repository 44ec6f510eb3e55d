//! Catalog shipped with the app for first-run users with no cache.

use crate::model::{Category, CategoryId, Difficulty, Platform, Problem, ProblemId};

fn problem(id: &str, title: &str, url: &str, platform: Platform, difficulty: Difficulty) -> Problem {
    Problem {
        id: ProblemId::new(id),
        title: title.to_owned(),
        url: url.to_owned(),
        platform,
        difficulty,
        completed: false,
        note: String::new(),
    }
}

/// A small, fully incomplete catalog.
#[must_use]
pub fn sample_catalog() -> Vec<Category> {
    let mut arrays = Category::new(CategoryId::new("sample-arrays"), "Arrays", 0);
    arrays.problems = vec![
        problem(
            "sample-two-sum",
            "Two Sum",
            "https://leetcode.com/problems/two-sum/",
            Platform::LeetCode,
            Difficulty::Easy,
        ),
        problem(
            "sample-kadane",
            "Maximum Subarray",
            "https://leetcode.com/problems/maximum-subarray/",
            Platform::LeetCode,
            Difficulty::Medium,
        ),
        problem(
            "sample-trapping-rain",
            "Trapping Rain Water",
            "https://www.geeksforgeeks.org/trapping-rain-water/",
            Platform::GeeksForGeeks,
            Difficulty::Hard,
        ),
    ];

    let mut strings = Category::new(CategoryId::new("sample-strings"), "Strings", 1);
    strings.problems = vec![
        problem(
            "sample-valid-anagram",
            "Valid Anagram",
            "https://leetcode.com/problems/valid-anagram/",
            Platform::LeetCode,
            Difficulty::Easy,
        ),
        problem(
            "sample-longest-palindrome",
            "Longest Palindromic Substring",
            "https://www.naukri.com/code360/problems/longest-palindromic-substring_758900",
            Platform::CodeStudio,
            Difficulty::Medium,
        ),
    ];

    vec![arrays, strings]
}
