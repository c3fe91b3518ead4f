//! Rules deciding which responses win a race.

use std::ops::RangeInclusive;

/// A single acceptance rule on the response status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusRule {
    /// Exactly this status code.
    Exact(u16),
    /// Any status code in the inclusive range.
    Range(RangeInclusive<u16>),
}

impl StatusRule {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            Self::Exact(code) => *code == status,
            Self::Range(range) => range.contains(&status),
        }
    }
}

impl From<u16> for StatusRule {
    fn from(code: u16) -> Self {
        Self::Exact(code)
    }
}

impl From<RangeInclusive<u16>> for StatusRule {
    fn from(range: RangeInclusive<u16>) -> Self {
        Self::Range(range)
    }
}

/// Ordered set of rules; a response is accepted if ANY rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityPolicy {
    rules: Vec<StatusRule>,
}

impl ValidityPolicy {
    pub fn new(rules: impl IntoIterator<Item = impl Into<StatusRule>>) -> Self {
        Self {
            rules: rules.into_iter().map(Into::into).collect(),
        }
    }

    pub fn rules(&self) -> &[StatusRule] {
        &self.rules
    }

    pub fn accepts(&self, status: u16) -> bool {
        self.rules.iter().any(|rule| rule.matches(status))
    }
}

impl Default for ValidityPolicy {
    fn default() -> Self {
        Self::new([StatusRule::Range(200..=300)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_accepts_2xx_and_300() {
        let policy = ValidityPolicy::default();
        assert!(policy.accepts(200));
        assert!(policy.accepts(204));
        assert!(policy.accepts(300));
        assert!(!policy.accepts(199));
        assert!(!policy.accepts(301));
        assert!(!policy.accepts(404));
    }

    #[test]
    fn any_rule_matching_is_enough() {
        let policy = ValidityPolicy::new([
            StatusRule::Exact(404),
            StatusRule::Range(200..=204),
        ]);
        assert!(policy.accepts(404));
        assert!(policy.accepts(201));
        assert!(!policy.accepts(403));
        assert!(!policy.accepts(205));
    }

    #[test]
    fn empty_policy_accepts_nothing() {
        let policy = ValidityPolicy::new(Vec::<StatusRule>::new());
        assert!(!policy.accepts(200));
    }
}
