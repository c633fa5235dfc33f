//! Task configurations.
//!
//! A task declares an instruction for the agent, the reset actions that bring
//! each environment to a known baseline, and the evaluation steps that score
//! the final state. Vocabularies are closed sum types, so a task with an
//! unknown evaluator or action never loads.

pub mod actions;
pub mod loader;
pub mod types;

pub use actions::{
    CalendarAction, CalendarCheck, Entries, EvalKind, EventSpec, FileKind, FileMetadata, FsAction,
    FsCheck, FsStep, GmailAction, GmailCheck, MessageInfo, ResetAction,
};
pub use loader::{apply_env_vars, load_suite, load_tasks, parse_var_assignments};
pub use types::{EvalSpec, TaskConfig, TaskSuite};
