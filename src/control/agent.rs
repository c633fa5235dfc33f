//! Agents driven by a task session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::SessionError;

/// An action the agent wants to take next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Free-text reasoning shown to the user.
    pub response: String,
    /// The action itself, e.g. a line of code.
    pub action: String,
}

/// Result of executing (or rejecting) a proposed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub output: String,
    /// Whether the agent considers the task complete.
    pub done: bool,
}

/// An agent stepping through a task one confirmed action at a time.
#[async_trait]
pub trait Agent: Send {
    /// Clears the trajectory and starts a new task.
    async fn reset(&mut self, instruction: &str);

    /// Proposes the next action, or `None` when there is nothing left to do.
    async fn generate_action(&mut self) -> Result<Option<ProposedAction>, SessionError>;

    /// Executes the last proposed action if `confirmed`, otherwise records
    /// the rejection.
    async fn step_action(&mut self, confirmed: bool) -> Result<StepOutcome, SessionError>;

    /// Trajectory recorded since the last reset.
    fn trajectory(&self) -> Value;

    /// Tokens consumed since the last reset.
    fn token_count(&self) -> u64 {
        0
    }
}

/// Replays a fixed list of actions, typically a task's `reference_actions`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    script: Vec<String>,
    cursor: usize,
    pending: Option<ProposedAction>,
    instruction: String,
    steps: Vec<Value>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<String>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn reset(&mut self, instruction: &str) {
        self.instruction = instruction.to_string();
        self.cursor = 0;
        self.pending = None;
        self.steps.clear();
    }

    async fn generate_action(&mut self) -> Result<Option<ProposedAction>, SessionError> {
        let Some(action) = self.script.get(self.cursor) else {
            return Ok(None);
        };
        let proposed = ProposedAction {
            response: format!("Step {} of {}", self.cursor + 1, self.script.len()),
            action: action.clone(),
        };
        self.pending = Some(proposed.clone());
        Ok(Some(proposed))
    }

    async fn step_action(&mut self, confirmed: bool) -> Result<StepOutcome, SessionError> {
        let proposed = self
            .pending
            .take()
            .ok_or_else(|| SessionError::Agent("no action has been proposed".to_string()))?;

        let output = if confirmed {
            self.cursor += 1;
            format!("executed: {}", proposed.action)
        } else {
            "rejected by user".to_string()
        };

        self.steps.push(json!({
            "step": self.steps.len() + 1,
            "response": proposed.response,
            "action": proposed.action,
            "confirmed": confirmed,
            "output": output,
        }));

        Ok(StepOutcome {
            output,
            done: !confirmed || self.cursor >= self.script.len(),
        })
    }

    fn trajectory(&self) -> Value {
        Value::Array(self.steps.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_agent_replays_actions() {
        let mut agent = ScriptedAgent::new(vec!["open()".to_string(), "save()".to_string()]);
        agent.reset("edit the file").await;

        let first = agent.generate_action().await.unwrap().unwrap();
        assert_eq!(first.action, "open()");
        assert!(!agent.step_action(true).await.unwrap().done);

        agent.generate_action().await.unwrap().unwrap();
        assert!(agent.step_action(true).await.unwrap().done);
        assert!(agent.generate_action().await.unwrap().is_none());

        let trajectory = agent.trajectory();
        assert_eq!(trajectory.as_array().unwrap().len(), 2);
        assert_eq!(trajectory[1]["action"], "save()");
    }

    #[tokio::test]
    async fn test_rejection_finishes() {
        let mut agent = ScriptedAgent::new(vec!["rm -rf /".to_string(), "ls".to_string()]);
        agent.reset("clean up").await;
        agent.generate_action().await.unwrap();
        let outcome = agent.step_action(false).await.unwrap();
        assert!(outcome.done);
        assert_eq!(agent.trajectory()[0]["confirmed"], false);
    }

    #[tokio::test]
    async fn test_step_without_proposal_fails() {
        let mut agent = ScriptedAgent::new(Vec::new());
        assert!(matches!(
            agent.step_action(true).await,
            Err(SessionError::Agent(_))
        ));
    }
}
