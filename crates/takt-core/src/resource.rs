//! Resources: capacity providers.

use serde::{Deserialize, Serialize};

use crate::dates::TimeSpan;
use crate::{CalendarId, ResourceId, SetupMatrixId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKind {
    /// Continuous capacity bounded by the maximum calendar.
    Default,
    /// Never constrains.
    Infinite,
    /// Discrete capacity per calendar bucket. `max_early` bounds how far
    /// before the requested date an earlier bucket may be used.
    Buckets { max_early: TimeSpan },
}

/// One conversion rule of a setup matrix. Patterns match setup names,
/// with `*` as a wildcard for any name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupRule {
    pub from_setup: String,
    pub to_setup: String,
    pub duration: TimeSpan,
    pub cost: f64,
    pub priority: i32,
}

impl SetupRule {
    fn matches(pattern: &str, name: &str) -> bool {
        pattern == "*" || pattern == name
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupMatrix {
    pub name: String,
    pub rules: Vec<SetupRule>,
}

impl SetupMatrix {
    /// The lowest-priority rule converting between two setups.
    pub fn rule_for(&self, from: &str, to: &str) -> Option<&SetupRule> {
        self.rules
            .iter()
            .filter(|r| SetupRule::matches(&r.from_setup, from) && SetupRule::matches(&r.to_setup, to))
            .min_by_key(|r| r.priority)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    /// Capacity when no maximum calendar is given.
    pub maximum: f64,
    pub maximum_calendar: Option<CalendarId>,
    /// Skills offered; matched against the skill required by a load.
    pub skills: Vec<String>,
    /// Current setup, consulted when a setup matrix applies.
    pub setup: Option<String>,
    pub setup_matrix: Option<SetupMatrixId>,
    /// Parent pool for skill-aggregate resources.
    pub parent: Option<ResourceId>,
}

impl Resource {
    pub fn new(name: impl Into<String>, maximum: f64) -> Self {
        Resource {
            name: name.into(),
            kind: ResourceKind::Default,
            maximum,
            maximum_calendar: None,
            skills: Vec::new(),
            setup: None,
            setup_matrix: None,
            parent: None,
        }
    }

    pub fn infinite(name: impl Into<String>) -> Self {
        let mut r = Resource::new(name, f64::INFINITY);
        r.kind = ResourceKind::Infinite;
        r
    }

    pub fn buckets(name: impl Into<String>, maximum: f64, max_early: TimeSpan) -> Self {
        let mut r = Resource::new(name, maximum);
        r.kind = ResourceKind::Buckets { max_early };
        r
    }

    pub fn with_calendar(mut self, calendar: CalendarId) -> Self {
        self.maximum_calendar = Some(calendar);
        self
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skills.push(skill.into());
        self
    }

    pub fn with_parent(mut self, parent: ResourceId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self.kind, ResourceKind::Infinite)
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.iter().any(|s| s == skill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_rule_wildcards() {
        let matrix = SetupMatrix {
            name: "colors".into(),
            rules: vec![
                SetupRule {
                    from_setup: "*".into(),
                    to_setup: "red".into(),
                    duration: TimeSpan::hours(2),
                    cost: 50.0,
                    priority: 2,
                },
                SetupRule {
                    from_setup: "red".into(),
                    to_setup: "red".into(),
                    duration: TimeSpan::ZERO,
                    cost: 0.0,
                    priority: 1,
                },
            ],
        };
        assert_eq!(matrix.rule_for("red", "red").unwrap().cost, 0.0);
        assert_eq!(matrix.rule_for("blue", "red").unwrap().cost, 50.0);
        assert!(matrix.rule_for("red", "blue").is_none());
    }
}
