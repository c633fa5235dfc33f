//! Task session state machine.
//!
//! A [`TaskSession`] drives one task at a time through
//! reset → run → evaluate → save against the remote control plane:
//!
//! ```text
//! Idle ─► Resetting ─► Running ─► Evaluating ─► Saved
//!             │  ▲        │  ▲        │  ▲
//!             ▼  │        ▼  │        ▼  │
//!           AwaitingInput (remote prompt or action confirmation)
//! ```
//!
//! Any phase may fall into `Failed`. Both terminal states return to `Idle`
//! when the next task starts. User input arrives on one `mpsc` channel and
//! progress is reported as [`SessionEvent`]s. Every wait is bounded by a
//! timeout and observes the session's cancellation token.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::agent::Agent;
use super::client::ControlPlaneClient;
use super::protocol::{RemoteEvaluation, RemoteStatus};
use crate::config::StudioConfig;
use crate::error::SessionError;
use crate::results::{ResultStore, TaskResult};
use crate::task::TaskConfig;

/// Capacity of the user input channel.
const INPUT_BUFFER: usize = 16;

/// Phase of a task session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Resetting,
    Running,
    AwaitingInput,
    Evaluating,
    Saved,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Resetting => "resetting",
            SessionState::Running => "running",
            SessionState::AwaitingInput => "awaiting_input",
            SessionState::Evaluating => "evaluating",
            SessionState::Saved => "saved",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Saved | SessionState::Failed)
    }

    /// Checks whether the session may move from `self` to `target`.
    pub fn can_transition(&self, target: SessionState) -> bool {
        use SessionState::*;

        if target == Failed {
            return !self.is_terminal();
        }
        match self {
            Idle => target == Resetting,
            Resetting => matches!(target, Running | AwaitingInput),
            Running => matches!(target, AwaitingInput | Evaluating),
            AwaitingInput => matches!(target, Resetting | Running | Evaluating),
            Evaluating => matches!(target, AwaitingInput | Saved),
            Saved | Failed => target == Idle,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a pending input request is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Free-text answer to a remote `wait_for_input` prompt.
    RemotePrompt,
    /// Yes/no confirmation of the agent's next action.
    ActionConfirmation,
}

/// Progress notifications emitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Remote task progress while polling.
    RemoteStatus(RemoteStatus),
    InputRequested {
        kind: InputKind,
        prompt: String,
    },
    ActionProposed {
        step: usize,
        response: String,
        action: String,
    },
    StepCompleted {
        step: usize,
        output: String,
        confirmed: bool,
    },
    Evaluated {
        score: f64,
        feedback: String,
    },
    Saved {
        task_id: String,
        path: PathBuf,
    },
    Failed(String),
}

/// Caller side of a session: input sender, event receiver, cancellation.
#[derive(Debug)]
pub struct SessionHandle {
    pub input: mpsc::Sender<String>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Cancels the running task; the session ends in `Failed`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Drives tasks through the control plane.
pub struct TaskSession {
    config: StudioConfig,
    client: ControlPlaneClient,
    store: ResultStore,
    agent: Box<dyn Agent>,
    state: SessionState,
    input: mpsc::Receiver<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
}

impl TaskSession {
    pub fn new(
        config: StudioConfig,
        client: ControlPlaneClient,
        store: ResultStore,
        agent: Box<dyn Agent>,
    ) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = Self {
            config,
            client,
            store,
            agent,
            state: SessionState::Idle,
            input: input_rx,
            events: events_tx,
            cancel: cancel.clone(),
        };
        let handle = SessionHandle {
            input: input_tx,
            events: events_rx,
            cancel,
        };
        (session, handle)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs one task end to end and returns the saved result.
    ///
    /// On error the session is left in `Failed` and the error is returned.
    pub async fn run(&mut self, task: &TaskConfig) -> Result<TaskResult, SessionError> {
        if self.state.is_terminal() {
            self.transition(SessionState::Idle)?;
        }

        info!("Starting task {}", task.task_id);
        match self.run_phases(task).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("Task {} failed: {}", task.task_id, e);
                if self.state.can_transition(SessionState::Failed) {
                    self.transition(SessionState::Failed)?;
                }
                self.emit(SessionEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self, task: &TaskConfig) -> Result<TaskResult, SessionError> {
        self.transition(SessionState::Resetting)?;
        self.reset_task(task).await?;

        self.transition(SessionState::Running)?;
        self.run_agent(task).await?;

        self.transition(SessionState::Evaluating)?;
        let evaluation = self.evaluate(task).await?;

        let result = TaskResult::new(task, self.agent.trajectory())
            .with_score(evaluation.score, evaluation.feedback)
            .with_token_count(self.agent.token_count());
        let stored = self.store.export(&result).await?;

        self.transition(SessionState::Saved)?;
        self.emit(SessionEvent::Saved {
            task_id: stored.task_id.clone(),
            path: self.store.results_path(),
        });
        Ok(stored)
    }

    /// Resets the runtime and the task, then hands the instruction to the agent.
    async fn reset_task(&mut self, task: &TaskConfig) -> Result<(), SessionError> {
        let timeout = self.config.request_timeout;
        let deadline = Deadline::new(&self.cancel, timeout);
        deadline.run(self.client.reset_runtime(), "resetting runtime").await??;
        deadline.run(self.client.submit_reset(task), "submitting reset").await??;

        self.wait_finish(SessionState::Resetting).await?;

        let deadline = Deadline::new(&self.cancel, timeout);
        let result = deadline.run(self.client.result(), "fetching reset result").await??;
        result.into_reset_outcome()?;

        self.agent.reset(&task.instruction).await;
        debug!("Task {} reset", task.task_id);
        Ok(())
    }

    /// Steps the agent until it is done, an action is rejected, or `max_step`
    /// actions have run.
    async fn run_agent(&mut self, task: &TaskConfig) -> Result<(), SessionError> {
        let timeout = self.config.poll_timeout;
        for step in 1..=self.config.max_step {
            let deadline = Deadline::new(&self.cancel, timeout);
            let proposed = deadline
                .run(self.agent.generate_action(), "generating action")
                .await??;
            let Some(proposed) = proposed else {
                debug!("Agent has no further actions for {}", task.task_id);
                break;
            };
            self.emit(SessionEvent::ActionProposed {
                step,
                response: proposed.response.clone(),
                action: proposed.action.clone(),
            });

            let confirmed = if self.config.need_human_confirmation {
                let answer = self
                    .ask(
                        InputKind::ActionConfirmation,
                        format!("Execute action: {}? [y/n]", proposed.action),
                        SessionState::Running,
                    )
                    .await?;
                is_affirmative(&answer)
            } else {
                true
            };

            let deadline = Deadline::new(&self.cancel, timeout);
            let outcome = deadline
                .run(self.agent.step_action(confirmed), "executing action")
                .await??;
            self.emit(SessionEvent::StepCompleted {
                step,
                output: outcome.output,
                confirmed,
            });

            if outcome.done {
                break;
            }
            if step == self.config.max_step {
                warn!("Task {} reached max_step ({})", task.task_id, step);
            }
        }
        Ok(())
    }

    async fn evaluate(&mut self, task: &TaskConfig) -> Result<RemoteEvaluation, SessionError> {
        let timeout = self.config.request_timeout;
        let deadline = Deadline::new(&self.cancel, timeout);
        deadline
            .run(self.client.submit_eval(task), "submitting evaluation")
            .await??;

        self.wait_finish(SessionState::Evaluating).await?;

        let deadline = Deadline::new(&self.cancel, timeout);
        let result = deadline.run(self.client.result(), "fetching evaluation").await??;
        let evaluation = result.into_evaluation()?;
        info!("Task {} scored {}", task.task_id, evaluation.score);
        self.emit(SessionEvent::Evaluated {
            score: evaluation.score,
            feedback: evaluation.feedback.clone(),
        });
        Ok(evaluation)
    }

    /// Polls `/task/status` until `finished`, answering `wait_for_input`
    /// prompts on the way. Time spent waiting for the user does not count
    /// against `poll_timeout`.
    async fn wait_finish(&mut self, phase: SessionState) -> Result<(), SessionError> {
        let timeout = self.config.poll_timeout;
        let mut deadline = Deadline::new(&self.cancel, timeout);

        loop {
            let response = deadline
                .run(self.client.status(), "waiting for remote task")
                .await??;
            let status = response.remote_status()?;
            debug!("Remote status: {}", status);

            match status {
                RemoteStatus::Finished => return Ok(()),
                RemoteStatus::Pending | RemoteStatus::InProgress => {
                    self.emit(SessionEvent::RemoteStatus(status));
                }
                RemoteStatus::WaitForInput => {
                    self.emit(SessionEvent::RemoteStatus(status));
                    let answer = if self.config.need_human_confirmation {
                        let asked_at = Instant::now();
                        let prompt = response.content.unwrap_or_default();
                        let answer = self.ask(InputKind::RemotePrompt, prompt, phase).await?;
                        deadline.extend(asked_at.elapsed());
                        answer
                    } else {
                        "y".to_string()
                    };
                    deadline
                        .run(self.client.confirm(&answer), "confirming input")
                        .await??;
                }
            }

            deadline
                .run(
                    tokio::time::sleep(self.config.poll_interval),
                    "waiting for remote task",
                )
                .await?;
        }
    }

    /// Moves to `AwaitingInput`, waits for one line of input, then returns to
    /// `resume`.
    async fn ask(
        &mut self,
        kind: InputKind,
        prompt: String,
        resume: SessionState,
    ) -> Result<String, SessionError> {
        self.transition(SessionState::AwaitingInput)?;
        self.emit(SessionEvent::InputRequested { kind, prompt });

        let input_timeout = self.config.input_timeout;
        let answer = tokio::select! {
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            received = tokio::time::timeout(input_timeout, self.input.recv()) => match received {
                Err(_) => Err(SessionError::Timeout(
                    input_timeout,
                    "waiting for user input".to_string(),
                )),
                Ok(None) => Err(SessionError::InputClosed),
                Ok(Some(text)) => Ok(text),
            },
        }?;

        self.transition(resume)?;
        Ok(answer)
    }

    fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        let from = self.state;
        if !from.can_transition(to) {
            return Err(SessionError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        debug!("Session {} -> {}", from, to);
        self.state = to;
        self.emit(SessionEvent::StateChanged { from, to });
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event);
    }
}

/// A cancellable deadline shared by a sequence of awaits.
struct Deadline {
    cancel: CancellationToken,
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    fn new(cancel: &CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel: cancel.clone(),
            at: Instant::now() + timeout,
            timeout,
        }
    }

    fn extend(&mut self, by: Duration) {
        self.at += by;
    }

    /// Awaits `fut` unless the token is cancelled or the deadline passes first.
    async fn run<F: Future>(&self, fut: F, what: &str) -> Result<F::Output, SessionError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            res = tokio::time::timeout_at(self.at, fut) => {
                res.map_err(|_| SessionError::Timeout(self.timeout, what.to_string()))
            }
        }
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use SessionState::*;
        assert!(Idle.can_transition(Resetting));
        assert!(!Idle.can_transition(Running));
        assert!(Resetting.can_transition(AwaitingInput));
        assert!(AwaitingInput.can_transition(Resetting));
        assert!(Evaluating.can_transition(Saved));
        assert!(!Running.can_transition(Saved));
        assert!(Running.can_transition(Failed));
        assert!(!Saved.can_transition(Failed));
        assert!(Failed.can_transition(Idle));
        assert!(!Failed.can_transition(Resetting));
    }

    #[test]
    fn test_is_affirmative() {
        assert!(is_affirmative("y"));
        assert!(is_affirmative(" Yes\n"));
        assert!(!is_affirmative("n"));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionState::AwaitingInput).unwrap(),
            "\"awaiting_input\""
        );
    }
}
