//! The solver state stack.
//!
//! Every ask/reply hop communicates through the top frame: the caller
//! writes the question fields (`q_*`), the callee writes the answer
//! fields (`a_*`). A frame is pushed when a solver needs a nested
//! conversation with its own question (planning a demand, asking a
//! buffer's producer) and popped when the reply has been read. The
//! stack has a fixed capacity; blowing it is a runtime error that
//! aborts the cluster.

use takt_core::dates::{Date, INFINITE_FUTURE};
use takt_core::{BufferId, CoreError, CoreResult, DemandId, FlowPlanId, LoadPlanId, PlanId};

/// Fatal ask/reply nesting depth: at most `MAX_STATES - 1` frames are
/// ever live, and the push that would reach this depth fails.
pub const MAX_STATES: usize = 256;

/// One ask/reply frame.
#[derive(Debug, Clone)]
pub struct State {
    /// The demand being planned; set only while driving its delivery
    /// operation.
    pub cur_demand: Option<DemandId>,
    /// Owner plan for nested operations (routing steps, alternates).
    pub cur_owner: Option<PlanId>,
    /// The buffer whose replenishment is being asked for.
    pub cur_buffer: Option<BufferId>,
    /// Set when a resource already moved the plan late; later loads may
    /// not pull it early again.
    pub force_late: bool,
    /// Quantity asked.
    pub q_qty: f64,
    /// Date asked.
    pub q_date: Date,
    /// Latest acceptable date; differs from `q_date` by the post-op time.
    pub q_date_max: Date,
    /// Quantity answered.
    pub a_qty: f64,
    /// Earliest date extra availability was found.
    pub a_date: Date,
    /// Flowplan under discussion between operation and buffer solver.
    pub q_flowplan: Option<FlowPlanId>,
    /// Loadplan under discussion between operation and resource solver.
    pub q_loadplan: Option<LoadPlanId>,
    /// The plan being checked.
    pub q_operationplan: Option<PlanId>,
    /// Direct cost of the reply.
    pub a_cost: f64,
    /// Indirect cost of the reply (setup changes, early inventory).
    pub a_penalty: f64,
}

impl Default for State {
    fn default() -> Self {
        State {
            cur_demand: None,
            cur_owner: None,
            cur_buffer: None,
            force_late: false,
            q_qty: 0.0,
            q_date: INFINITE_FUTURE,
            q_date_max: INFINITE_FUTURE,
            a_qty: 0.0,
            a_date: INFINITE_FUTURE,
            q_flowplan: None,
            q_loadplan: None,
            q_operationplan: None,
            a_cost: 0.0,
            a_penalty: 0.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct StateStack {
    frames: Vec<State>,
}

impl StateStack {
    pub fn new() -> Self {
        StateStack { frames: Vec::new() }
    }

    /// Push a fresh frame carrying a question. Reaching a depth of
    /// [`MAX_STATES`] is fatal.
    pub fn push(&mut self, q_qty: f64, q_date: Date) -> CoreResult<()> {
        if self.frames.len() + 1 >= MAX_STATES {
            return Err(CoreError::Runtime(
                "maximum ask/reply recursion depth exceeded".into(),
            ));
        }
        self.frames.push(State {
            q_qty,
            q_date,
            q_date_max: q_date,
            ..State::default()
        });
        Ok(())
    }

    pub fn pop(&mut self) -> CoreResult<State> {
        self.frames
            .pop()
            .ok_or_else(|| CoreError::Logic("state stack empty".into()))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> &State {
        self.frames.last().expect("state stack not empty")
    }

    pub fn top_mut(&mut self) -> &mut State {
        self.frames.last_mut().expect("state stack not empty")
    }

    /// The frame one level up: the caller's question.
    pub fn prev(&self) -> &State {
        &self.frames[self.frames.len() - 2]
    }

    pub fn prev_mut(&mut self) -> &mut State {
        let n = self.frames.len();
        &mut self.frames[n - 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_initializes_question() {
        let mut stack = StateStack::new();
        stack.push(10.0, Date(500)).unwrap();
        assert_eq!(stack.top().q_qty, 10.0);
        assert_eq!(stack.top().q_date, Date(500));
        assert_eq!(stack.top().q_date_max, Date(500));
        assert_eq!(stack.top().a_cost, 0.0);
    }

    #[test]
    fn depth_255_succeeds_256_fails() {
        let mut stack = StateStack::new();
        for _ in 0..MAX_STATES - 1 {
            stack.push(1.0, Date(0)).unwrap();
        }
        assert_eq!(stack.depth(), 255);
        // The push that would reach depth 256 is the fatal one.
        let err = stack.push(1.0, Date(0)).unwrap_err();
        assert!(matches!(err, CoreError::Runtime(_)));
    }

    #[test]
    fn pop_on_empty_is_logic_error() {
        let mut stack = StateStack::new();
        assert!(matches!(stack.pop(), Err(CoreError::Logic(_))));
    }
}
