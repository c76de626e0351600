//! # takt-solve: Constrained Planning Solvers
//!
//! The solver side of the takt planning engine:
//!
//! - [`SolverMrp`]: the demand-driven MRP solver. Demands ask their
//!   delivery operation for `(quantity, date)`; operations ask their
//!   buffers and resources; buffers ask their producing operations. The
//!   replies carry the feasible quantity and the earliest date extra
//!   availability exists, and every tentative branch of the search can
//!   be rolled back through the command [`Journal`].
//! - [`OperatorDelete`]: removes surplus supply by walking the producer
//!   graph upstream from buffers, demands or resources.
//! - [`OperatorMoveOut`]: pushes plans out of the release fence and
//!   resolves the resulting shortages by displacing the consumers with
//!   the least urgent pegged demands.
//!
//! ## Concurrency
//!
//! Planning is parallel across clusters (connected components of the
//! supply network). Each worker owns a private state stack, journal and
//! plan fragment; the model is shared read-only. Verbose logging or
//! `autocommit = false` force a single worker.

pub mod buffer;
pub mod context;
pub mod delete_excess;
pub mod demand;
pub mod flow;
pub mod hooks;
pub mod journal;
pub mod move_out;
pub mod operation;
pub mod resource;
pub mod scheduler;
pub mod solver;
pub mod state;

pub use context::SolveCtx;
pub use delete_excess::OperatorDelete;
pub use hooks::{Hooks, NoHooks};
pub use journal::{Bookmark, Command, Journal};
pub use move_out::OperatorMoveOut;
pub use solver::{Constraints, PlanResult, PlanType, SolverConfig, SolverMrp};
pub use state::{State, StateStack, MAX_STATES};
