//! Per-task observe/decide/act state machine
//!
//! One [`TaskLoop`] drives one browser session toward one goal. Cancellation is
//! cooperative: it is checked on every phase entry and between retries, and an
//! in-flight driver call always runs to completion first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::action::{Action, ExecutionResult, ACTION_KINDS};
use crate::agent::events::TaskReporter;
use crate::agent::executor::ActionExecutor;
use crate::agent::history::{History, HistoryEntry};
use crate::agent::task::{LogLevel, ReplySlot, TaskRequest};
use crate::browser::{clean_url, BrowserDriver, DriverResult};
use crate::core::config::TaskConfig;
use crate::core::{
    ActionProposal, DriverError, ExecutionError, LoopPhase, ModelError, ModelErrorKind,
    Observation, TaskError, TaskId, TaskStatus, ValidationError,
};
use crate::llm::{LanguageModel, Prompt};

const CORRECTION_HINT: &str =
    "Reply with one JSON object containing \"action\" and \"reasoning\".";

/// Why the loop stopped before finishing
#[derive(Debug)]
enum Halt {
    Cancelled,
    Failed(TaskError),
}

impl From<TaskError> for Halt {
    fn from(err: TaskError) -> Self {
        Halt::Failed(err)
    }
}

/// Exponential backoff with jitter, capped at `max_ms`
///
/// `attempt` starts at 1. The delay lands in the upper half of the exponential step.
pub fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(20));
    let capped = exp.min(max_ms);
    let jittered = rand::rng().random_range(capped / 2..=capped);
    Duration::from_millis(jittered)
}

pub struct TaskLoop {
    request: TaskRequest,
    config: TaskConfig,
    model: Arc<dyn LanguageModel>,
    driver: Arc<dyn BrowserDriver>,
    executor: ActionExecutor,
    history: History,
    reporter: Arc<TaskReporter>,
    cancel: CancellationToken,
    replies: ReplySlot,
    iteration: usize,
    /// Observation returned by the last successful action
    carried: Option<Observation>,
    correction: Option<String>,
    consecutive_failures: u32,
}

impl TaskLoop {
    pub fn new(
        request: TaskRequest,
        config: TaskConfig,
        model: Arc<dyn LanguageModel>,
        driver: Arc<dyn BrowserDriver>,
        reporter: Arc<TaskReporter>,
        cancel: CancellationToken,
        replies: ReplySlot,
    ) -> Self {
        Self {
            executor: ActionExecutor::from_config(&config),
            history: History::new(config.history_limit),
            request,
            config,
            model,
            driver,
            reporter,
            cancel,
            replies,
            iteration: 0,
            carried: None,
            correction: None,
            consecutive_failures: 0,
        }
    }

    /// Run to a terminal phase, then freeze history and close the session
    pub async fn run(mut self) -> LoopPhase {
        let outcome = self.drive().await;
        self.history.freeze();
        self.close_session().await;

        let (phase, summary, error) = match outcome {
            Ok(summary) => (LoopPhase::Completed, Some(summary), None),
            Err(Halt::Cancelled) => (LoopPhase::Cancelled, None, None),
            Err(Halt::Failed(err)) => (LoopPhase::Failed, None, Some(err)),
        };
        self.reporter.finish(phase, summary, error);
        self.reporter.phase()
    }

    async fn drive(&mut self) -> Result<String, Halt> {
        loop {
            self.enter(
                LoopPhase::Observing,
                format!("observing (iteration {})", self.iteration + 1),
            )?;
            if self.iteration >= self.config.max_iterations {
                return Err(TaskError::MaxIterationsExceeded {
                    limit: self.config.max_iterations,
                }
                .into());
            }
            if self.iteration == 0 {
                self.open_start_url().await?;
            }
            let observation = match self.carried.take() {
                Some(observation) => observation,
                None => self.retry_driver("observe", || self.driver.observe()).await?,
            };
            self.reporter.observed(&observation);

            self.enter(LoopPhase::Deciding, format!("deciding on {}", observation.url))?;
            let (proposal, action) = self.decide(&observation).await?;

            self.enter(LoopPhase::Acting, format!("{} ({})", action, proposal.rationale))?;
            let result = match &action {
                Action::Finish { summary } => {
                    let summary = summary.clone();
                    let result = ExecutionResult::success(format!("Finished: {}", summary), None);
                    self.record(observation, proposal, result);
                    return Ok(summary);
                }
                Action::AskUser { question } => self.ask_user(question).await?,
                other => {
                    self.reporter.set_status(TaskStatus::WaitingOnBrowser);
                    let result = self
                        .executor
                        .execute(self.driver.as_ref(), other, Some(&observation))
                        .await;
                    self.reporter.set_status(TaskStatus::Running);
                    result
                }
            };

            let failure = self.settle(&result);
            self.record(observation, proposal, result);
            if let Some(err) = failure {
                return Err(err.into());
            }
        }
    }

    /// Cancellation checkpoint plus phase transition
    fn enter(&self, phase: LoopPhase, summary: String) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        self.reporter.transition(phase, summary);
        Ok(())
    }

    async fn open_start_url(&self) -> Result<(), Halt> {
        let Some(raw) = self.request.start_url.as_deref() else {
            return Ok(());
        };
        let url = clean_url(raw).map_err(|e| {
            Halt::Failed(TaskError::Driver {
                error: DriverError::command(format!("start url '{}': {}", raw, e)),
            })
        })?;
        self.retry_driver("navigate", || self.driver.navigate(&url)).await
    }

    /// Driver call bounded by the step timeout, retried `observe_retries` times
    async fn retry_driver<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, Halt>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let mut attempt = 0;
        loop {
            self.reporter.set_status(TaskStatus::WaitingOnBrowser);
            let outcome = match tokio::time::timeout(self.config.step_timeout(), call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(DriverError::timeout(format!(
                    "{} did not finish within {}ms",
                    what, self.config.step_timeout_ms
                ))),
            };
            self.reporter.set_status(TaskStatus::Running);

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.config.observe_retries => {
                    attempt += 1;
                    self.reporter.log(
                        LogLevel::Warn,
                        format!("{} failed ({}), retry {}", what, error, attempt),
                    );
                    self.backoff(attempt).await?;
                }
                Err(error) => return Err(TaskError::Driver { error }.into()),
            }
        }
    }

    /// Ask the model until it gives a valid action or the budgets run out
    async fn decide(
        &mut self,
        observation: &Observation,
    ) -> Result<(ActionProposal, Action), Halt> {
        let mut model_failures = 0;
        let mut reprompts = 0;

        loop {
            let prompt = Prompt::new(
                &self.request.role,
                &self.request.goal,
                &self.history,
                observation,
            )
            .with_correction(self.correction.as_deref());

            self.reporter.set_status(TaskStatus::WaitingOnModel);
            let call = self.model.propose(&prompt);
            let reply = match tokio::time::timeout(self.config.step_timeout(), call).await {
                Ok(reply) => reply,
                Err(_) => Err(ModelError::new(
                    ModelErrorKind::Timeout,
                    format!("no reply within {}ms", self.config.step_timeout_ms),
                )),
            };
            self.reporter.set_status(TaskStatus::Running);

            let error = match reply {
                Ok(proposal) => match self.executor.validate(&proposal) {
                    Ok(action) => {
                        debug!(
                            task_id = %self.reporter.task_id(),
                            proposal = %proposal.describe(),
                            "Proposal accepted"
                        );
                        self.correction = None;
                        return Ok((proposal, action));
                    }
                    Err(ValidationError::InvalidActionKind(kind)) => {
                        if reprompts >= self.config.invalid_action_reprompts {
                            return Err(TaskError::InvalidActionKind { kind }.into());
                        }
                        reprompts += 1;
                        self.reporter.log(
                            LogLevel::Warn,
                            format!("model proposed unknown action '{}', re-prompting", kind),
                        );
                        self.correction = Some(format!(
                            "'{}' is not a valid action. Use exactly one of: {}.",
                            kind,
                            ACTION_KINDS.join(", ")
                        ));
                        if self.cancel.is_cancelled() {
                            return Err(Halt::Cancelled);
                        }
                        continue;
                    }
                    Err(invalid) => ModelError::invalid_response(invalid.to_string()),
                },
                Err(error) => error,
            };

            if !error.kind.is_retryable() || model_failures >= self.config.model_retries {
                return Err(TaskError::Model { error }.into());
            }
            model_failures += 1;
            if error.kind == ModelErrorKind::InvalidResponse {
                self.correction = Some(format!(
                    "Your previous reply was rejected: {}. {}",
                    error.detail, CORRECTION_HINT
                ));
            }
            self.reporter.log(
                LogLevel::Warn,
                format!("model call failed ({}), retry {}", error, model_failures),
            );
            self.backoff(model_failures).await?;
        }
    }

    /// Publish the question and wait for exactly one answer to it
    async fn ask_user(&self, question: &str) -> Result<ExecutionResult, Halt> {
        // open before publishing so a reply to this question always has somewhere to go
        let answer = self.replies.open();
        self.reporter.ask(question);
        let wait = self.config.ask_user_timeout();

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => None,
            reply = tokio::time::timeout(wait, answer) => Some(reply),
        };
        self.replies.close();
        self.reporter.answered();

        match outcome {
            None => Err(Halt::Cancelled),
            Some(Ok(Ok(answer))) => Ok(ExecutionResult::success(
                format!("User replied: {}", answer),
                None,
            )),
            Some(_) => Ok(ExecutionResult::failure(ExecutionError::Timeout {
                elapsed: wait,
            })),
        }
    }

    /// Update failure bookkeeping after an action; returns the error that ends the task
    fn settle(&mut self, result: &ExecutionResult) -> Option<TaskError> {
        if result.success {
            self.consecutive_failures = 0;
            self.carried = result.observation.clone();
            return None;
        }

        self.consecutive_failures += 1;
        self.carried = None;
        self.reporter.log(
            LogLevel::Warn,
            format!(
                "action failed ({}/{}): {}",
                self.consecutive_failures,
                self.config.max_consecutive_action_failures,
                result.message
            ),
        );

        if self.consecutive_failures < self.config.max_consecutive_action_failures {
            return None;
        }
        Some(match result.error.clone() {
            Some(err) => TaskError::from(err),
            None => TaskError::Driver {
                error: DriverError::command(result.message.clone()),
            },
        })
    }

    fn record(
        &mut self,
        observation: Observation,
        proposal: ActionProposal,
        result: ExecutionResult,
    ) {
        let estimate = proposal.progress;
        self.history
            .record(HistoryEntry::new(observation, proposal, result));
        self.iteration += 1;
        self.reporter
            .progress(self.iteration, self.history.len(), estimate);
    }

    async fn backoff(&self, attempt: u32) -> Result<(), Halt> {
        let delay = backoff_delay(
            self.config.backoff_base_ms,
            self.config.backoff_max_ms,
            attempt,
        );
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn close_session(&self) {
        close_session(
            self.driver.as_ref(),
            self.config.step_timeout(),
            self.reporter.task_id(),
        )
        .await;
    }
}

/// Close a task's browser session, bounded by `timeout`; failures are only logged
pub async fn close_session(driver: &dyn BrowserDriver, timeout: Duration, task_id: TaskId) {
    match tokio::time::timeout(timeout, driver.close()).await {
        Ok(Ok(())) => debug!(task_id = %task_id, "Browser session closed"),
        Ok(Err(e)) => warn!(task_id = %task_id, error = %e, "Closing browser session failed"),
        Err(_) => warn!(task_id = %task_id, "Closing browser session timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        for _ in 0..20 {
            let first = backoff_delay(100, 1_000, 1);
            assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));

            let third = backoff_delay(100, 1_000, 3);
            assert!(third >= Duration::from_millis(200) && third <= Duration::from_millis(400));

            let capped = backoff_delay(100, 1_000, 30);
            assert!(capped <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn test_zero_backoff() {
        assert_eq!(backoff_delay(0, 0, 5), Duration::ZERO);
    }
}
