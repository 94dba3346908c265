//! Ordered collection of findings from one validation pass

use crate::problem::Problem;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};

/// Findings accumulated during one validation pass, in discovery order
///
/// An empty set means validation ran and found nothing. Whether validation ran
/// at all is tracked separately by [`crate::Validation`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProblemSet {
    problems: Vec<Problem>,
}

impl ProblemSet {
    /// Create an empty set
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            problems: Vec::new(),
        }
    }

    /// Append a finding
    #[inline]
    pub fn add_problem(&mut self, problem: Problem) {
        self.problems.push(problem);
    }

    /// Append a finding, builder style
    #[inline]
    #[must_use]
    pub fn with_problem(mut self, problem: Problem) -> Self {
        self.add_problem(problem);
        self
    }

    /// Append every finding of `other`, keeping order
    pub fn extend(&mut self, other: ProblemSet) {
        self.problems.extend(other.problems);
    }

    /// Findings at or above `threshold`, in original order
    #[must_use]
    pub fn filter_by_severity(&self, threshold: Severity) -> ProblemSet {
        self.problems
            .iter()
            .filter(|p| p.severity().meets(threshold))
            .cloned()
            .collect()
    }

    /// Whether any finding is at or above `threshold`
    ///
    /// Always false for an empty set.
    #[inline]
    #[must_use]
    pub fn has_severity_at_least(&self, threshold: Severity) -> bool {
        self.problems.iter().any(|p| p.severity().meets(threshold))
    }

    /// Highest severity present, `None` when empty
    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.problems.iter().map(Problem::severity).max()
    }

    /// Number of findings
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.problems.len()
    }

    /// True when no findings were recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Iterate findings in order
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Problem> {
        self.problems.iter()
    }
}

impl FromIterator<Problem> for ProblemSet {
    fn from_iter<I: IntoIterator<Item = Problem>>(iter: I) -> Self {
        Self {
            problems: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Problem>> for ProblemSet {
    fn from(problems: Vec<Problem>) -> Self {
        Self { problems }
    }
}

impl IntoIterator for ProblemSet {
    type Item = Problem;
    type IntoIter = std::vec::IntoIter<Problem>;

    fn into_iter(self) -> Self::IntoIter {
        self.problems.into_iter()
    }
}

impl<'a> IntoIterator for &'a ProblemSet {
    type Item = &'a Problem;
    type IntoIter = std::slice::Iter<'a, Problem>;

    fn into_iter(self) -> Self::IntoIter {
        self.problems.iter()
    }
}
