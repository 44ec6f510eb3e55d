use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::ProblemId;

//
// ─── ENUMS ─────────────────────────────────────────────────────────────────────
//

/// Judge or practice site a problem is hosted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "leetcode")]
    LeetCode,
    #[serde(rename = "gfg")]
    GeeksForGeeks,
    #[serde(rename = "codestudio")]
    CodeStudio,
    #[serde(rename = "hackerrank")]
    HackerRank,
}

impl Platform {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::LeetCode => "leetcode",
            Platform::GeeksForGeeks => "gfg",
            Platform::CodeStudio => "codestudio",
            Platform::HackerRank => "hackerrank",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseEnumError {
    #[error("unknown platform: {0}")]
    Platform(String),
    #[error("unknown difficulty: {0}")]
    Difficulty(String),
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leetcode" => Ok(Platform::LeetCode),
            "gfg" => Ok(Platform::GeeksForGeeks),
            "codestudio" => Ok(Platform::CodeStudio),
            "hackerrank" => Ok(Platform::HackerRank),
            other => Err(ParseEnumError::Platform(other.to_owned())),
        }
    }
}

impl FromStr for Difficulty {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Easy" => Ok(Difficulty::Easy),
            "Medium" => Ok(Difficulty::Medium),
            "Hard" => Ok(Difficulty::Hard),
            other => Err(ParseEnumError::Difficulty(other.to_owned())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── PROBLEM ───────────────────────────────────────────────────────────────────
//

/// A single practice problem as seen by the current viewer.
///
/// `completed` and `note` are the viewer's state: the admin's own values when
/// the viewer is the admin, the viewer's overlay otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: ProblemId,
    pub title: String,
    pub url: String,
    pub platform: Platform,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub note: String,
}

impl Problem {
    /// Returns true if this problem carries any viewer progress.
    #[must_use]
    pub fn has_progress(&self) -> bool {
        self.completed || !self.note.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_str() {
        for platform in [
            Platform::LeetCode,
            Platform::GeeksForGeeks,
            Platform::CodeStudio,
            Platform::HackerRank,
        ] {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert!("codeforces".parse::<Platform>().is_err());
    }

    #[test]
    fn difficulty_rejects_lowercase() {
        assert_eq!(
            "easy".parse::<Difficulty>(),
            Err(ParseEnumError::Difficulty("easy".into()))
        );
    }

    #[test]
    fn problem_deserializes_without_progress_fields() {
        let json = r#"{"id":"p1","title":"Two Sum","url":"https://leetcode.com/problems/two-sum","platform":"leetcode","difficulty":"Easy"}"#;
        let problem: Problem = serde_json::from_str(json).unwrap();
        assert!(!problem.completed);
        assert_eq!(problem.note, "");
        assert!(!problem.has_progress());
    }
}
