//! Problem records: constraints hit while planning a demand.
//!
//! Constraints are collected on a stack while the ask/reply recursion
//! runs. When a subtree of the search ends up fully satisfied, the
//! records pushed inside it are popped again; only shortages leave a
//! trace on the demand.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dates::DateRange;
use crate::OperationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    /// The plan would have to start before the current date.
    BeforeCurrent,
    /// The plan would have to start inside the release fence.
    BeforeFence,
    /// Not enough capacity on a resource.
    Capacity,
    /// Not enough material in a buffer.
    Material,
    /// Surplus inventory created.
    Excess,
    /// The demand is satisfied after its due date.
    Late,
    /// The demand is satisfied below the requested quantity.
    Short,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub kind: ProblemKind,
    pub operation: Option<OperationId>,
    pub dates: DateRange,
    pub quantity: f64,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} qty {}", self.kind, self.dates, self.quantity)
    }
}

/// A stack of problems with mark/rewind semantics.
#[derive(Debug, Clone, Default)]
pub struct ProblemStack {
    entries: Vec<Problem>,
}

/// Opaque rewind point into a [`ProblemStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemMark(usize);

impl ProblemStack {
    pub fn new() -> Self {
        ProblemStack::default()
    }

    pub fn push(&mut self, problem: Problem) {
        self.entries.push(problem);
    }

    /// Remember the current top of the stack.
    pub fn mark(&self) -> ProblemMark {
        ProblemMark(self.entries.len())
    }

    /// Drop everything pushed since the mark.
    pub fn rewind(&mut self, mark: ProblemMark) {
        self.entries.truncate(mark.0);
    }

    pub fn entries(&self) -> &[Problem] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<Problem> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::{Date, DateRange};

    fn material(qty: f64) -> Problem {
        Problem {
            kind: ProblemKind::Material,
            operation: None,
            dates: DateRange::new(Date(0), Date(100)),
            quantity: qty,
        }
    }

    #[test]
    fn rewind_drops_only_newer_entries() {
        let mut stack = ProblemStack::new();
        stack.push(material(1.0));
        let mark = stack.mark();
        stack.push(material(2.0));
        stack.push(material(3.0));
        stack.rewind(mark);
        assert_eq!(stack.entries().len(), 1);
        assert_eq!(stack.entries()[0].quantity, 1.0);
    }
}
