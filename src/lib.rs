//! agent-studio: task evaluation and control-plane orchestration for desktop
//! agent playgrounds.
//!
//! Tasks are declarative JSON configurations. The [`eval`] module routes each
//! task's evaluation steps to evaluators bound to live [`connectors`]
//! (filesystem, Google Calendar, Gmail) and combines their scores. The
//! [`control`] module drives tasks through a remote environment server as an
//! explicit state machine, and [`results`] persists what each run produced.

pub mod cli;
pub mod config;
pub mod connectors;
pub mod control;
pub mod error;
pub mod eval;
pub mod results;
pub mod task;

pub use config::{ConfigError, StudioConfig};
pub use error::{
    ConnectorError, ControlPlaneError, EvalError, ResultStoreError, SessionError, TaskConfigError,
};
