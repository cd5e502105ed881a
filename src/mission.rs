//! Sequential execution of an approved plan inside one isolated session.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::brain::DecisionService;
use crate::error::{MissionError, StepError};
use crate::plan::{Command, Plan, Step};
use crate::session::{ActionKind, ActionResult, SessionHandle, SessionProvider};
use crate::template::{StepValue, resolve};
use crate::types::{ContextValue, ExecutionContext, SecretVault};
use crate::wait::{parse_timeout, wait_for_element, wait_for_load};

/// Pause after the last step before the session is torn down.
pub const COMPLETION_GRACE: Duration = Duration::from_millis(3000);

/// Context key overwritten by every `CALL_LLM` step.
pub const LLM_RESPONSE_KEY: &str = "llm_response";

/// One line of mission progress. Step numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Progress {
    Deploying,
    SessionFailed {
        reason: String,
    },
    StepStarted {
        number: usize,
        total: usize,
        command: Command,
        description: String,
    },
    StepOk {
        number: usize,
    },
    StepFailed {
        number: usize,
        message: String,
    },
    Report {
        message: String,
    },
    Accomplished,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Deploying => write!(f, "> Plan received. Deploying agent..."),
            Progress::SessionFailed { .. } => write!(
                f,
                "> CRITICAL ERROR: Could not create phantom tab. Mission aborted."
            ),
            Progress::StepStarted {
                number,
                total,
                command,
                description,
            } => write!(f, "> [{}/{}] {}: {}", number, total, command, description),
            Progress::StepOk { number } => write!(f, "> Step {} OK", number),
            Progress::StepFailed { number, message } => {
                write!(f, "> Step {} FAILED: {}", number, message)
            }
            Progress::Report { message } => write!(f, "> MISSION REPORT: {}", message),
            Progress::Accomplished => write!(f, "> Mission Accomplished."),
        }
    }
}

/// Receives progress lines in order. Sinks must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, progress: Progress);
}

impl ProgressSink for mpsc::UnboundedSender<Progress> {
    fn emit(&self, progress: Progress) {
        let _ = self.send(progress);
    }
}

impl ProgressSink for broadcast::Sender<Progress> {
    fn emit(&self, progress: Progress) {
        let _ = self.send(progress);
    }
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn emit(&self, progress: Progress) {
        self(progress)
    }
}

/// Optional sink; emitting into nothing is a no-op.
#[derive(Clone, Copy)]
struct Reporter<'a>(Option<&'a dyn ProgressSink>);

impl Reporter<'_> {
    fn send(&self, progress: Progress) {
        if let Some(sink) = self.0 {
            sink.emit(progress);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MissionOutcome {
    Completed {
        context: ExecutionContext,
    },
    /// `step` is the 1-based number of the failed step, `None` if no session could be created.
    Aborted {
        step: Option<usize>,
        reason: String,
    },
}

impl MissionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, MissionOutcome::Completed { .. })
    }
}

/// A mission running on its own task.
pub struct MissionHandle {
    /// Closes once the mission has finished.
    pub progress: mpsc::UnboundedReceiver<Progress>,
    pub task: JoinHandle<MissionOutcome>,
}

#[derive(Clone)]
pub struct MissionEngine {
    sessions: Arc<dyn SessionProvider>,
    decisions: Arc<dyn DecisionService>,
}

impl MissionEngine {
    pub fn new(sessions: Arc<dyn SessionProvider>, decisions: Arc<dyn DecisionService>) -> Self {
        Self {
            sessions,
            decisions,
        }
    }

    /// Runs the mission on a new task and hands back its progress stream.
    pub fn spawn(&self, plan: Plan, vault: SecretVault) -> MissionHandle {
        let engine = self.clone();
        let (tx, progress) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move { engine.run(&plan, &vault, Some(&tx)).await });
        MissionHandle { progress, task }
    }

    /// Runs every step in order, stopping at the first failure.
    ///
    /// The session is destroyed exactly once on every path that created one.
    pub async fn run(
        &self,
        plan: &Plan,
        vault: &SecretVault,
        sink: Option<&dyn ProgressSink>,
    ) -> MissionOutcome {
        let reporter = Reporter(sink);
        reporter.send(Progress::Deploying);
        info!(steps = plan.len(), secrets = vault.len(), "mission starting");

        let handle = match self.sessions.create().await {
            Ok(handle) => handle,
            Err(e) => {
                let err = MissionError::SessionCreation(e);
                error!(error = %err, "mission aborted before first step");
                reporter.send(Progress::SessionFailed {
                    reason: err.to_string(),
                });
                return MissionOutcome::Aborted {
                    step: None,
                    reason: err.to_string(),
                };
            }
        };

        let mut context = ExecutionContext::new();
        let total = plan.len();

        for (index, step) in plan.steps.iter().enumerate() {
            let number = index + 1;
            match self
                .execute_step(handle, step, number, total, vault, &mut context, reporter)
                .await
            {
                Ok(()) => reporter.send(Progress::StepOk { number }),
                Err(e) => {
                    let message = e.to_string();
                    warn!(step = number, command = %step.command, error = %message, "step failed");
                    reporter.send(Progress::StepFailed {
                        number,
                        message: message.clone(),
                    });
                    self.release(handle).await;
                    return MissionOutcome::Aborted {
                        step: Some(number),
                        reason: message,
                    };
                }
            }
        }

        info!(steps = total, "mission accomplished");
        reporter.send(Progress::Accomplished);
        tokio::time::sleep(COMPLETION_GRACE).await;
        self.release(handle).await;

        MissionOutcome::Completed { context }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        handle: SessionHandle,
        step: &Step,
        number: usize,
        total: usize,
        vault: &SecretVault,
        context: &mut ExecutionContext,
        reporter: Reporter<'_>,
    ) -> Result<(), StepError> {
        let command = step.command;
        let target = step.target.as_deref().map(|t| resolve(t, context));
        let raw_value = step.value.as_deref().map(StepValue::parse);
        let value = raw_value
            .as_ref()
            .map(|v| v.resolve(context, vault))
            .transpose()?;

        reporter.send(Progress::StepStarted {
            number,
            total,
            command,
            description: step.description.clone(),
        });
        debug!(step = number, %command, "dispatching");

        let sessions = self.sessions.as_ref();

        match command {
            Command::Navigate => {
                let url = required(target, command, true)?;
                sessions
                    .navigate(handle, &url)
                    .await
                    .map_err(StepError::Session)?;
                wait_for_load(sessions, handle).await?;
            }
            Command::WaitForElement => {
                let selector = required(target, command, true)?;
                let timeout = parse_timeout(value.as_deref());
                wait_for_element(sessions, handle, &selector, timeout).await?;
            }
            Command::Click => {
                let selector = required(target, command, true)?;
                let result = self.act(handle, ActionKind::Click, &selector, None).await?;
                if result == ActionResult::NoMatch {
                    debug!(%selector, "click target absent, skipping");
                }
            }
            Command::Fill => {
                let selector = required(target, command, true)?;
                let text = required(value, command, false)?;
                let result = self
                    .act(handle, ActionKind::Fill, &selector, Some(&text))
                    .await?;
                if result == ActionResult::NoMatch {
                    return Err(StepError::ElementNotFound(selector));
                }
            }
            Command::Submit => {
                let selector = required(target, command, true)?;
                let result = self.act(handle, ActionKind::Submit, &selector, None).await?;
                if result == ActionResult::NoMatch {
                    debug!(%selector, "submit target absent, skipping");
                }
                wait_for_load(sessions, handle).await?;
            }
            Command::ExtractData => {
                let selector = required(target, command, true)?;
                if raw_value.as_ref().is_some_and(StepValue::is_secret) {
                    return Err(StepError::SecretAsVariable);
                }
                let key = required(value, command, false)?;
                let result = self.act(handle, ActionKind::Extract, &selector, None).await?;
                let texts = match result {
                    ActionResult::Texts(texts) => texts,
                    ActionResult::Applied | ActionResult::NoMatch => Vec::new(),
                };
                debug!(%selector, %key, matches = texts.len(), "extracted");
                context.insert(key, ContextValue::from(texts));
            }
            Command::CallLlm => {
                let prompt = required(value, command, false)?;
                let answer = self.decisions.call_text(&prompt).await?;
                context.insert(LLM_RESPONSE_KEY, ContextValue::Scalar(answer));
            }
            Command::Notify => {
                let message = required(value, command, false)?;
                reporter.send(Progress::Report { message });
            }
        }

        Ok(())
    }

    async fn act(
        &self,
        handle: SessionHandle,
        kind: ActionKind,
        selector: &str,
        value: Option<&str>,
    ) -> Result<ActionResult, StepError> {
        self.sessions
            .run_action(handle, kind, selector, value)
            .await
            .map_err(StepError::Session)
    }

    /// Destruction failures are logged and swallowed.
    async fn release(&self, handle: SessionHandle) {
        if let Err(e) = self.sessions.destroy(handle).await {
            warn!(%handle, error = %e, "failed to destroy mission session");
        }
    }
}

fn required(
    field: Option<String>,
    command: Command,
    is_target: bool,
) -> Result<String, StepError> {
    field.ok_or(if is_target {
        StepError::MissingTarget {
            command: command.as_str(),
        }
    } else {
        StepError::MissingValue {
            command: command.as_str(),
        }
    })
}
