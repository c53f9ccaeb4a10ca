//! Element-level value validation and bounded backtrack repair.
//!
//! Validation is deliberately outside the strategy automaton: the
//! automaton gates token shape, and these checks judge the finished value
//! once an element boundary is crossed. A failing value triggers a
//! backtrack over exactly the element's token span, up to a configured
//! attempt budget; past the budget a deterministic fallback applies
//! instead of looping.

use regex::Regex;

/// A predicate applied to a completed element value.
#[derive(Debug, Clone)]
pub enum ValueCheck {
    /// Numeric value within `min..=max`.
    Range { min: f64, max: f64 },
    /// Numeric value divisible by `divisor` (within float tolerance).
    MultipleOf { divisor: f64 },
    /// Full-string regex match.
    Matches(Regex),
    /// Value must not repeat an earlier sibling element.
    UniqueAmongSiblings,
}

const MULTIPLE_OF_EPSILON: f64 = 1e-9;

impl ValueCheck {
    /// Whether `value` passes, given the element's earlier siblings.
    #[must_use]
    pub fn passes(&self, value: &str, siblings: &[String]) -> bool {
        match self {
            ValueCheck::Range { min, max } => value
                .parse::<f64>()
                .map(|n| n >= *min && n <= *max)
                .unwrap_or(false),
            ValueCheck::MultipleOf { divisor } => value
                .parse::<f64>()
                .map(|n| {
                    let ratio = n / divisor;
                    (ratio - ratio.round()).abs() < MULTIPLE_OF_EPSILON
                })
                .unwrap_or(false),
            ValueCheck::Matches(regex) => regex
                .find(value)
                .is_some_and(|m| m.start() == 0 && m.end() == value.len()),
            ValueCheck::UniqueAmongSiblings => !siblings.iter().any(|s| s == value),
        }
    }
}

/// What to do when the attempt budget is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// Keep the failing value as-is.
    Accept,
    /// Backtrack once more and force this replacement value.
    Replace(String),
}

/// Bound on repair attempts and the terminal behavior past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPolicy {
    pub max_attempts: u32,
    pub fallback: Fallback,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            fallback: Fallback::Accept,
        }
    }
}

/// Checks plus policy, attached to a self-prompt's list elements.
#[derive(Debug, Clone)]
pub struct ElementValidation {
    pub checks: Vec<ValueCheck>,
    pub policy: RepairPolicy,
}

impl ElementValidation {
    #[must_use]
    pub fn new(checks: Vec<ValueCheck>, policy: RepairPolicy) -> Self {
        Self { checks, policy }
    }

    /// Whether `value` passes every check.
    #[must_use]
    pub fn passes(&self, value: &str, siblings: &[String]) -> bool {
        self.checks.iter().all(|c| c.passes(value, siblings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_and_multiple_of_parse_numerically() {
        let range = ValueCheck::Range { min: 1.0, max: 10.0 };
        assert!(range.passes("5", &[]));
        assert!(!range.passes("11", &[]));
        assert!(!range.passes("abc", &[]));

        let mult = ValueCheck::MultipleOf { divisor: 0.5 };
        assert!(mult.passes("2.5", &[]));
        assert!(!mult.passes("2.7", &[]));
    }

    #[test]
    fn regex_requires_full_match() {
        let check = ValueCheck::Matches(Regex::new(r"\d{3}").unwrap());
        assert!(check.passes("123", &[]));
        assert!(!check.passes("1234", &[]));
        assert!(!check.passes("a123", &[]));
    }

    #[test]
    fn uniqueness_consults_siblings() {
        let check = ValueCheck::UniqueAmongSiblings;
        let siblings = vec!["a".to_string(), "b".to_string()];
        assert!(check.passes("c", &siblings));
        assert!(!check.passes("b", &siblings));
    }
}
