//! Operations: the transforming steps of the supply network.
//!
//! An operation is one of five kinds. Fixed-time and time-per operations
//! are the leaves that actually occupy time; routing, alternate and
//! split operations compose other operations and only own the shared
//! flows and loads of the composition.

use serde::{Deserialize, Serialize};

use crate::dates::{Date, DateRange, TimeSpan, INFINITE_FUTURE, INFINITE_PAST};
use crate::{FlowId, LoadId, OperationId};

pub const ROUNDING_ERROR: f64 = 1e-6;

/// Selection strategy for alternate operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Walk alternates in priority order, planning the residual on each.
    #[default]
    Priority,
    /// Evaluate all alternates, pick the lowest cost per unit.
    MinCost,
    /// Evaluate all alternates, pick the lowest penalty per unit.
    MinPenalty,
    /// Evaluate all alternates, pick the lowest cost + penalty per unit.
    MinCostPenalty,
}

/// Membership record of an alternate operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubOperation {
    pub operation: OperationId,
    /// Priority 0 marks the alternate temporarily unavailable.
    pub priority: i32,
    pub effective: DateRange,
}

impl SubOperation {
    pub fn new(operation: OperationId, priority: i32) -> Self {
        SubOperation {
            operation,
            priority,
            effective: DateRange::horizon(),
        }
    }

    pub fn with_effective(mut self, effective: DateRange) -> Self {
        self.effective = effective;
        self
    }
}

/// Membership record of a split operation. Percentages need not add up
/// to 100; they are rescaled over the effective members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitShare {
    pub operation: OperationId,
    pub percentage: f64,
    pub effective: DateRange,
}

impl SplitShare {
    pub fn new(operation: OperationId, percentage: f64) -> Self {
        SplitShare {
            operation,
            percentage,
            effective: DateRange::horizon(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Takes the same time regardless of the planned quantity.
    FixedTime { duration: TimeSpan },
    /// Takes a setup time plus a per-unit time.
    TimePer {
        duration: TimeSpan,
        duration_per: TimeSpan,
    },
    /// An ordered sequence of sub-operations.
    Routing { steps: Vec<OperationId> },
    /// A choice between sub-operations.
    Alternate {
        alternates: Vec<SubOperation>,
        search: SearchMode,
    },
    /// A fixed percentage split across sub-operations.
    Split { shares: Vec<SplitShare> },
}

/// The concrete window and quantity computed for an operation plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanShape {
    pub start: Date,
    pub end: Date,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub kind: OperationKind,
    /// Release fence: no unlocked plan may start before now + fence.
    pub fence: TimeSpan,
    /// Soft gap kept between this operation's end and the need date.
    pub post_time: TimeSpan,
    pub size_minimum: f64,
    pub size_multiple: f64,
    pub size_maximum: f64,
    /// Cost per planned unit, accumulated into the reply cost.
    pub cost: f64,
    pub flows: Vec<FlowId>,
    pub loads: Vec<LoadId>,
}

impl Operation {
    pub fn new(name: impl Into<String>, kind: OperationKind) -> Self {
        Operation {
            name: name.into(),
            kind,
            fence: TimeSpan::ZERO,
            post_time: TimeSpan::ZERO,
            size_minimum: 0.0,
            size_multiple: 0.0,
            size_maximum: f64::INFINITY,
            cost: 0.0,
            flows: Vec::new(),
            loads: Vec::new(),
        }
    }

    pub fn fixed_time(name: impl Into<String>, duration: TimeSpan) -> Self {
        Operation::new(name, OperationKind::FixedTime { duration })
    }

    pub fn time_per(name: impl Into<String>, duration: TimeSpan, duration_per: TimeSpan) -> Self {
        Operation::new(
            name,
            OperationKind::TimePer {
                duration,
                duration_per,
            },
        )
    }

    pub fn with_fence(mut self, fence: TimeSpan) -> Self {
        self.fence = fence;
        self
    }

    pub fn with_post_time(mut self, post: TimeSpan) -> Self {
        self.post_time = post;
        self
    }

    pub fn with_sizes(mut self, minimum: f64, multiple: f64, maximum: f64) -> Self {
        self.size_minimum = minimum;
        self.size_multiple = multiple;
        self.size_maximum = maximum;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// True for kinds that own sub-operation plans rather than time.
    pub fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            OperationKind::Routing { .. }
                | OperationKind::Alternate { .. }
                | OperationKind::Split { .. }
        )
    }

    /// Round a requested quantity into the allowed size grid: up to the
    /// minimum, up to the next multiple, down to the maximum. Zero stays
    /// zero.
    pub fn apply_size(&self, qty: f64) -> f64 {
        if qty <= ROUNDING_ERROR {
            return 0.0;
        }
        let mut q = qty.max(self.size_minimum);
        if self.size_multiple > ROUNDING_ERROR {
            let steps = (q / self.size_multiple - ROUNDING_ERROR).ceil();
            q = steps * self.size_multiple;
        }
        if q > self.size_maximum {
            // Clip to the largest feasible size under the maximum.
            if self.size_multiple > ROUNDING_ERROR {
                q = (self.size_maximum / self.size_multiple + ROUNDING_ERROR).floor()
                    * self.size_multiple;
            } else {
                q = self.size_maximum;
            }
            if q < self.size_minimum - ROUNDING_ERROR {
                return 0.0;
            }
        }
        q
    }

    /// Compute the concrete window for a plan of `qty` units.
    ///
    /// `start` and `end` bound the window; `None` leaves that side free.
    /// With both sides bound and too little room, a time-per operation
    /// shrinks its quantity to fit and a fixed-time operation collapses
    /// to zero quantity. `prefer_end` resolves the over-determined case
    /// where both sides are given and there is slack.
    pub fn plan_shape(
        &self,
        qty: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
    ) -> PlanShape {
        let start = start.filter(|d| *d > INFINITE_PAST);
        let end = end.filter(|d| *d < INFINITE_FUTURE);
        let sized = self.apply_size(qty);
        match self.kind {
            OperationKind::FixedTime { duration } => {
                let (s, e) = match (start, end) {
                    (Some(s), Some(e)) => {
                        if e - s < duration {
                            // Window too small for a fixed-time operation.
                            return PlanShape {
                                start: s,
                                end: s + duration,
                                quantity: 0.0,
                            };
                        }
                        if prefer_end {
                            (e - duration, e)
                        } else {
                            (s, s + duration)
                        }
                    }
                    (Some(s), None) => (s, s + duration),
                    (None, Some(e)) => (e - duration, e),
                    (None, None) => (INFINITE_PAST, INFINITE_PAST + duration),
                };
                PlanShape {
                    start: s,
                    end: e,
                    quantity: sized,
                }
            }
            OperationKind::TimePer {
                duration,
                duration_per,
            } => {
                let span_for = |q: f64| {
                    duration + TimeSpan((duration_per.as_seconds() as f64 * q).round() as i64)
                };
                match (start, end) {
                    (Some(s), Some(e)) => {
                        let available = (e - s) - duration;
                        if available.is_negative() {
                            return PlanShape {
                                start: s,
                                end: s,
                                quantity: 0.0,
                            };
                        }
                        let max_qty = if duration_per.is_zero() {
                            f64::INFINITY
                        } else {
                            available.as_seconds() as f64 / duration_per.as_seconds() as f64
                        };
                        let mut q = sized;
                        if q > max_qty + ROUNDING_ERROR {
                            // Shrink to the window, staying on the size grid.
                            q = self.apply_size(max_qty);
                            if q > max_qty + ROUNDING_ERROR {
                                // Rounding up overshot the window.
                                q = if self.size_multiple > ROUNDING_ERROR {
                                    (max_qty / self.size_multiple + ROUNDING_ERROR).floor()
                                        * self.size_multiple
                                } else {
                                    max_qty
                                };
                                if q < self.size_minimum - ROUNDING_ERROR {
                                    q = 0.0;
                                }
                            }
                        }
                        let span = span_for(q);
                        if prefer_end {
                            PlanShape {
                                start: e - span,
                                end: e,
                                quantity: q,
                            }
                        } else {
                            PlanShape {
                                start: s,
                                end: s + span,
                                quantity: q,
                            }
                        }
                    }
                    (Some(s), None) => PlanShape {
                        start: s,
                        end: s + span_for(sized),
                        quantity: sized,
                    },
                    (None, Some(e)) => PlanShape {
                        start: e - span_for(sized),
                        end: e,
                        quantity: sized,
                    },
                    (None, None) => PlanShape {
                        start: INFINITE_PAST,
                        end: INFINITE_PAST + span_for(sized),
                        quantity: sized,
                    },
                }
            }
            // Composite operations occupy no time of their own; their
            // window is pinned to the given date and later widened to
            // span the children.
            _ => {
                let d = if prefer_end {
                    end.or(start).unwrap_or(INFINITE_PAST)
                } else {
                    start.or(end).unwrap_or(INFINITE_PAST)
                };
                PlanShape {
                    start: d,
                    end: d,
                    quantity: sized,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01 plus n days, comfortably inside the horizon.
    fn day(n: i64) -> Date {
        Date(1_704_067_200 + n * 86_400)
    }

    #[test]
    fn size_rounding() {
        let op = Operation::fixed_time("pack", TimeSpan::days(1)).with_sizes(10.0, 5.0, 100.0);
        assert_eq!(op.apply_size(0.0), 0.0);
        assert_eq!(op.apply_size(3.0), 10.0);
        assert_eq!(op.apply_size(11.0), 15.0);
        assert_eq!(op.apply_size(15.0), 15.0);
        assert_eq!(op.apply_size(120.0), 100.0);
    }

    #[test]
    fn size_maximum_off_grid_clips_down() {
        let op = Operation::fixed_time("pack", TimeSpan::days(1)).with_sizes(0.0, 7.0, 24.0);
        assert_eq!(op.apply_size(30.0), 21.0);
    }

    #[test]
    fn fixed_time_window_from_end() {
        let op = Operation::fixed_time("make", TimeSpan::days(2));
        let shape = op.plan_shape(10.0, None, Some(day(10)), true);
        assert_eq!(shape.start, day(8));
        assert_eq!(shape.end, day(10));
        assert_eq!(shape.quantity, 10.0);
    }

    #[test]
    fn time_per_shrinks_into_window() {
        let op = Operation::time_per("machine", TimeSpan::ZERO, TimeSpan::hours(1));
        // A 5 hour window fits only 5 units of a 10 unit ask.
        let shape = op.plan_shape(
            10.0,
            Some(day(0)),
            Some(day(0) + TimeSpan::hours(5)),
            true,
        );
        assert!((shape.quantity - 5.0).abs() < 1e-9);
        assert_eq!(shape.start, day(0));
        assert_eq!(shape.end, day(0) + TimeSpan::hours(5));
    }

    #[test]
    fn fixed_time_too_small_window_zeroes() {
        let op = Operation::fixed_time("make", TimeSpan::days(3));
        let shape = op.plan_shape(4.0, Some(day(0)), Some(day(1)), true);
        assert_eq!(shape.quantity, 0.0);
    }
}
