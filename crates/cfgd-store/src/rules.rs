//! Rule-based validation of configuration documents

use crate::path;
use cfgd_problem::{Problem, ProblemSet, Severity};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// One structural check against a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    /// `path` must be present and non-null
    Required {
        /// Dotted path
        path: String,
        /// Severity of a violation
        #[serde(default = "default_severity")]
        severity: Severity,
    },
    /// `path`, when present, must be a boolean
    Boolean {
        /// Dotted path
        path: String,
        /// Severity of a violation
        #[serde(default = "default_severity")]
        severity: Severity,
    },
    /// `path` must be present whenever the boolean at `flag` is true
    RequiredWhen {
        /// Dotted path of the enabling flag
        flag: String,
        /// Dotted path
        path: String,
        /// Severity of a violation
        #[serde(default = "default_severity")]
        severity: Severity,
    },
}

fn default_severity() -> Severity {
    Severity::Error
}

impl Rule {
    /// Findings of this rule against `document`
    pub fn check(&self, document: &Value) -> Option<Problem> {
        match self {
            Rule::Required { path, severity } => {
                if present(document, path) {
                    None
                } else {
                    Some(
                        Problem::new(*severity, format!("{path} is required"))
                            .with_location(path.as_str())
                            .with_remediation(format!("set {path}")),
                    )
                }
            }
            Rule::Boolean { path, severity } => match get(document, path) {
                None | Some(Value::Null | Value::Bool(_)) => None,
                Some(other) => Some(
                    Problem::new(
                        *severity,
                        format!("{path} must be a boolean, found {}", path::kind(other)),
                    )
                    .with_location(path.as_str())
                    .with_remediation(format!("set {path} to true or false")),
                ),
            },
            Rule::RequiredWhen {
                flag,
                path,
                severity,
            } => {
                let enabled = matches!(get(document, flag), Some(Value::Bool(true)));
                if !enabled || present(document, path) {
                    None
                } else {
                    Some(
                        Problem::new(*severity, format!("{path} is required when {flag} is true"))
                            .with_location(path.as_str())
                            .with_remediation(format!("set {path} or disable {flag}")),
                    )
                }
            }
        }
    }

    /// Dotted paths this rule reads
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Rule::Required { path, .. } | Rule::Boolean { path, .. } => vec![path.as_str()],
            Rule::RequiredWhen { flag, path, .. } => vec![flag.as_str(), path.as_str()],
        }
    }

    /// True if any path this rule reads overlaps `section`
    ///
    /// An empty `section` names the whole document.
    #[must_use]
    pub fn applies_to(&self, section: &str) -> bool {
        section.is_empty()
            || self
                .paths()
                .into_iter()
                .any(|path| overlaps(path, section))
    }
}

fn overlaps(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    long.strip_prefix(short)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

fn get<'a>(document: &'a Value, dotted: &str) -> Option<&'a Value> {
    path::segments(dotted)
        .ok()
        .and_then(|segments| path::lookup(document, &segments))
}

fn present(document: &Value, dotted: &str) -> bool {
    get(document, dotted).is_some_and(|value| !value.is_null())
}

/// Ordered collection of rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Empty rule set; checks always pass
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Require `path` at error severity
    #[must_use]
    pub fn require(self, path: impl Into<String>) -> Self {
        self.with_rule(Rule::Required {
            path: path.into(),
            severity: Severity::Error,
        })
    }

    /// Require `path` to be a boolean, at error severity
    #[must_use]
    pub fn boolean(self, path: impl Into<String>) -> Self {
        self.with_rule(Rule::Boolean {
            path: path.into(),
            severity: Severity::Error,
        })
    }

    /// Require `path` whenever `flag` is true, at error severity
    #[must_use]
    pub fn require_when(self, flag: impl Into<String>, path: impl Into<String>) -> Self {
        self.with_rule(Rule::RequiredWhen {
            flag: flag.into(),
            path: path.into(),
            severity: Severity::Error,
        })
    }

    /// Rules in evaluation order
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if there are no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules that read a path overlapping `section`
    #[must_use]
    pub fn scoped(&self, section: &str) -> RuleSet {
        RuleSet {
            rules: self
                .rules
                .iter()
                .filter(|rule| rule.applies_to(section))
                .cloned()
                .collect(),
        }
    }

    /// Run every rule; problems appear in rule order
    #[must_use]
    pub fn check(&self, document: &Value) -> ProblemSet {
        self.rules
            .iter()
            .filter_map(|rule| rule.check(document))
            .collect()
    }
}
