//! Validation outcome with an explicit "skipped" state

use crate::set::ProblemSet;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};

static NO_PROBLEMS: ProblemSet = ProblemSet::new();

/// Outcome of the validation step of a task
///
/// Keeps "validation did not run" apart from "validation ran and found
/// nothing", which an empty [`ProblemSet`] alone cannot express.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "problems", rename_all = "snake_case")]
pub enum Validation {
    /// Validation was not requested
    #[default]
    Skipped,
    /// Validation ran and produced these findings
    Completed(ProblemSet),
}

impl Validation {
    /// Whether validation ran
    #[inline]
    #[must_use]
    pub fn ran(&self) -> bool {
        matches!(self, Validation::Completed(_))
    }

    /// Findings; empty when validation was skipped
    #[inline]
    #[must_use]
    pub fn problems(&self) -> &ProblemSet {
        match self {
            Validation::Skipped => &NO_PROBLEMS,
            Validation::Completed(problems) => problems,
        }
    }

    /// Keep only findings at or above `threshold`
    #[must_use]
    pub fn filtered(&self, threshold: Severity) -> Validation {
        match self {
            Validation::Skipped => Validation::Skipped,
            Validation::Completed(problems) => {
                Validation::Completed(problems.filter_by_severity(threshold))
            }
        }
    }
}

impl From<ProblemSet> for Validation {
    fn from(problems: ProblemSet) -> Self {
        Validation::Completed(problems)
    }
}
