//! Remote control plane: HTTP client, agents and the task session.

pub mod agent;
pub mod client;
pub mod protocol;
pub mod session;

pub use agent::{Agent, ProposedAction, ScriptedAgent, StepOutcome};
pub use client::ControlPlaneClient;
pub use protocol::{RemoteEvaluation, RemoteStatus, ResultResponse, StatusResponse};
pub use session::{InputKind, SessionEvent, SessionHandle, SessionState, TaskSession};
