//! Action executor
//!
//! Validates proposals into [`Action`]s and performs them against a [`BrowserDriver`].
//! Targets are resolved against the latest observation before the browser is touched,
//! and each action costs exactly one driver operation, bounded by the step timeout.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::agent::action::{Action, ExecutionResult};
use crate::browser::{clean_url, BrowserDriver, DriverResult};
use crate::core::config::TaskConfig;
use crate::core::{ActionProposal, ElementRef, ExecutionError, Observation, ValidationError};

/// Performs validated actions, one driver call each
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    step_timeout: Duration,
}

/// A fully resolved driver operation
enum Operation {
    Navigate(String),
    Click(String),
    Type {
        target: String,
        text: String,
        submit: bool,
    },
    Scroll(crate::core::ScrollDirection, u32),
    Wait(Duration),
}

impl ActionExecutor {
    pub fn new(step_timeout: Duration) -> Self {
        Self { step_timeout }
    }

    pub fn from_config(config: &TaskConfig) -> Self {
        Self::new(config.step_timeout())
    }

    /// Map a proposal onto the closed action set
    pub fn validate(&self, proposal: &ActionProposal) -> Result<Action, ValidationError> {
        Action::from_proposal(proposal)
    }

    /// Execute one action. Never retries.
    pub async fn execute(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
        context: Option<&Observation>,
    ) -> ExecutionResult {
        let operation = match self.resolve(action, context) {
            Ok(op) => op,
            Err(error) => {
                debug!(action = %action, error = %error, "Action not executed");
                return ExecutionResult::failure(error);
            }
        };

        let started = Instant::now();
        let outcome = match &operation {
            Operation::Navigate(url) => self.timed(started, driver.navigate(url)).await,
            Operation::Click(target) => self.timed(started, driver.click(target)).await,
            Operation::Type {
                target,
                text,
                submit,
            } => {
                self.timed(started, driver.type_text(target, text, *submit))
                    .await
            }
            Operation::Scroll(direction, amount) => {
                self.timed(started, driver.scroll(*direction, *amount)).await
            }
            Operation::Wait(duration) => {
                tokio::time::sleep((*duration).min(self.step_timeout)).await;
                Ok(())
            }
        };

        if let Err(error) = outcome {
            debug!(action = %action, error = %error, "Action failed");
            return ExecutionResult::failure(error);
        }

        let observation = match tokio::time::timeout(self.step_timeout, driver.observe()).await {
            Ok(Ok(observation)) => Some(observation),
            Ok(Err(e)) => {
                debug!(error = %e, "Post-action observation failed");
                None
            }
            Err(_) => {
                debug!("Post-action observation timed out");
                None
            }
        };

        ExecutionResult::success(describe(&operation), observation)
    }

    async fn timed<F>(&self, started: Instant, call: F) -> Result<(), ExecutionError>
    where
        F: Future<Output = DriverResult<()>>,
    {
        match tokio::time::timeout(self.step_timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(ExecutionError::Driver { error }),
            Err(_) => Err(ExecutionError::Timeout {
                elapsed: started.elapsed(),
            }),
        }
    }

    fn resolve(
        &self,
        action: &Action,
        context: Option<&Observation>,
    ) -> Result<Operation, ExecutionError> {
        match action {
            Action::Navigate { url } => clean_url(url)
                .map(Operation::Navigate)
                .map_err(|_| ExecutionError::TargetNotFound {
                    target: url.clone(),
                }),
            Action::Click { target } => {
                resolve_element(target, context, false).map(|el| Operation::Click(el.id.clone()))
            }
            Action::Type {
                target,
                text,
                submit,
            } => resolve_element(target, context, true).map(|el| Operation::Type {
                target: el.id.clone(),
                text: text.clone(),
                submit: *submit,
            }),
            Action::Scroll { direction, amount } => Ok(Operation::Scroll(*direction, *amount)),
            Action::Wait { duration } => Ok(Operation::Wait(*duration)),
            Action::AskUser { .. } | Action::Finish { .. } => Err(ExecutionError::NotExecutable {
                kind: action.kind().to_string(),
            }),
        }
    }
}

/// Find the element a target names: by ref (`e5`, `@e5`) or by a unique accessible name
fn resolve_element<'a>(
    target: &str,
    context: Option<&'a Observation>,
    input_only: bool,
) -> Result<&'a ElementRef, ExecutionError> {
    let not_found = || ExecutionError::TargetNotFound {
        target: target.to_string(),
    };
    let observation = context.ok_or_else(not_found)?;

    let found = match observation.element(target) {
        Some(el) => Some(el),
        None => {
            let wanted = target.trim().to_lowercase();
            let mut matches = observation
                .elements
                .iter()
                .filter(|el| !input_only || el.is_input())
                .filter(|el| el.name.to_lowercase() == wanted);
            match (matches.next(), matches.next()) {
                (Some(el), None) => Some(el),
                _ => None,
            }
        }
    };

    match found {
        Some(el) if !input_only || el.is_input() => Ok(el),
        _ => Err(not_found()),
    }
}

fn describe(operation: &Operation) -> String {
    match operation {
        Operation::Navigate(url) => format!("Navigated to {}", url),
        Operation::Click(target) => format!("Clicked {}", target),
        Operation::Type {
            target,
            text,
            submit,
        } => {
            if *submit {
                format!("Typed '{}' into {} and submitted", text, target)
            } else {
                format!("Typed '{}' into {}", text, target)
            }
        }
        Operation::Scroll(direction, amount) => format!("Scrolled {} {}px", direction, amount),
        Operation::Wait(duration) => format!("Waited {:.1}s", duration.as_secs_f64()),
    }
}
