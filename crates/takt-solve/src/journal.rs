//! The command journal: all-or-nothing semantics over plan mutations.
//!
//! Every plan created, moved, deleted or rebound during a solve is
//! recorded here with enough information to undo it. `bookmark` marks a
//! point in the command list, `rollback` undoes everything after a mark
//! in reverse order, and `commit` discards the history, making the
//! mutations final.

use takt_core::model::Model;
use takt_core::operation::PlanShape;
use takt_core::plan::{PlanSnapshot, PlanState};
use takt_core::{FlowId, FlowPlanId, PlanId};

#[derive(Debug)]
pub enum Command {
    /// A plan (and subtree) was created; undo deletes it.
    Create { plan: PlanId },
    /// A plan was reshaped; undo restores the previous shape.
    Move { plan: PlanId, prev: PlanShape },
    /// A plan was deleted; undo restores the snapshot.
    Delete { snapshot: PlanSnapshot },
    /// A flowplan was rebound to an alternate flow; undo rebinds back.
    SwitchFlow { flowplan: FlowPlanId, prev: FlowId },
}

/// Opaque marker into the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bookmark(usize);

#[derive(Debug, Default)]
pub struct Journal {
    commands: Vec<Command>,
}

impl Journal {
    pub fn new() -> Self {
        Journal::default()
    }

    pub fn record(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn bookmark(&self) -> Bookmark {
        Bookmark(self.commands.len())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Undo every command recorded after the bookmark, newest first.
    ///
    /// Commands referring to plans that were torn down by a later undo
    /// (a child created inside a deleted subtree) are skipped.
    pub fn rollback(&mut self, model: &Model, plan: &mut PlanState, mark: Bookmark) {
        while self.commands.len() > mark.0 {
            match self.commands.pop().expect("command present") {
                Command::Create { plan: id } => {
                    if plan.contains(id) {
                        let _ = plan.delete_plan(id);
                    }
                }
                Command::Move { plan: id, prev } => {
                    if plan.contains(id) {
                        plan.apply_shape(model, id, prev);
                    }
                }
                Command::Delete { snapshot } => {
                    plan.restore_plan(snapshot);
                }
                Command::SwitchFlow { flowplan, prev } => {
                    if plan.contains_flowplan(flowplan) {
                        plan.switch_flowplan_flow(model, flowplan, prev);
                    }
                }
            }
        }
    }

    /// Undo the whole journal.
    pub fn rollback_all(&mut self, model: &Model, plan: &mut PlanState) {
        self.rollback(model, plan, Bookmark(0));
    }

    /// Make everything recorded so far final.
    pub fn commit(&mut self) {
        self.commands.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use takt_core::dates::{Date, TimeSpan};
    use takt_core::flow::{Flow, FlowKind};
    use takt_core::operation::Operation;
    use takt_core::Buffer;

    fn day(n: i64) -> Date {
        // 2024-01-01 plus n days, comfortably inside the horizon.
        Date(1_704_067_200 + n * 86_400)
    }

    fn fixture() -> (Model, takt_core::OperationId, takt_core::BufferId) {
        let mut model = Model::new(day(0));
        let buffer = model.add_buffer(Buffer::new("stock"));
        let op = model.add_operation(Operation::fixed_time("make", TimeSpan::days(1)));
        model.add_flow(Flow::new(op, buffer, FlowKind::End, 1.0));
        (model, op, buffer)
    }

    #[test]
    fn rollback_undoes_create_and_move() {
        let (model, op, buffer) = fixture();
        let mut plan = PlanState::new();
        let mut journal = Journal::new();

        let mark = journal.bookmark();
        let id = plan.create_plan(&model, op, 10.0, None, Some(day(5)), true, None, None, false);
        journal.record(Command::Create { plan: id });
        let prev = plan.shape_of(id);
        plan.set_shape(&model, id, 10.0, None, Some(day(8)), true);
        journal.record(Command::Move { plan: id, prev });

        assert_eq!(plan.onhand_at(&model, buffer, day(8)), 10.0);
        journal.rollback(&model, &mut plan, mark);
        assert!(!plan.contains(id));
        assert_eq!(plan.onhand_at(&model, buffer, day(10)), 0.0);
    }

    #[test]
    fn rollback_restores_deleted_plan() {
        let (model, op, buffer) = fixture();
        let mut plan = PlanState::new();
        let mut journal = Journal::new();

        let id = plan.create_plan(&model, op, 4.0, None, Some(day(5)), true, None, None, false);
        journal.commit();

        let mark = journal.bookmark();
        let snapshot = plan.delete_plan(id);
        journal.record(Command::Delete { snapshot });
        assert_eq!(plan.onhand_at(&model, buffer, day(5)), 0.0);

        journal.rollback(&model, &mut plan, mark);
        assert_eq!(plan.onhand_at(&model, buffer, day(5)), 4.0);
    }

    #[test]
    fn commit_discards_history() {
        let (model, op, _) = fixture();
        let mut plan = PlanState::new();
        let mut journal = Journal::new();
        let id = plan.create_plan(&model, op, 4.0, None, Some(day(5)), true, None, None, false);
        journal.record(Command::Create { plan: id });
        journal.commit();
        assert!(journal.is_empty());
        // Rolling back after commit must not touch the plan.
        journal.rollback_all(&model, &mut plan);
        assert!(plan.contains(id));
    }
}
