//! Task supervisor
//!
//! Owns every task loop. Enforces the concurrency ceiling, isolates failures (a panicking
//! loop only fails its own task) and exposes status snapshots plus an event stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::{broadcast, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::agent::events::{TaskEvent, TaskReporter};
use crate::agent::task::{ReplySlot, TaskRequest, TaskSnapshot};
use crate::agent::task_loop::{close_session, TaskLoop};
use crate::browser::{AgentBrowserFactory, DriverFactory};
use crate::core::config::{Config, OverflowPolicy};
use crate::core::{LoopPhase, Result, SupervisorError, TaskError, TaskId};
use crate::llm::{ChatModel, LanguageModel};

type SupervisorResult<T> = std::result::Result<T, SupervisorError>;

/// Runs tasks concurrently, one browser session each
#[derive(Clone)]
pub struct TaskSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    model: Arc<dyn LanguageModel>,
    drivers: Arc<dyn DriverFactory>,
    permits: Arc<Semaphore>,
    tasks: Mutex<HashMap<TaskId, TaskHandle>>,
    next_id: AtomicU64,
    events: broadcast::Sender<TaskEvent>,
    shutdown: CancellationToken,
}

struct TaskHandle {
    snapshot: watch::Receiver<TaskSnapshot>,
    cancel: CancellationToken,
    replies: ReplySlot,
    join: Option<JoinHandle<()>>,
}

/// Everything a spawned task needs
struct Launch {
    id: TaskId,
    request: TaskRequest,
    config: Config,
    model: Arc<dyn LanguageModel>,
    drivers: Arc<dyn DriverFactory>,
    permits: Arc<Semaphore>,
    permit: Option<OwnedSemaphorePermit>,
    reporter: Arc<TaskReporter>,
    cancel: CancellationToken,
    replies: ReplySlot,
}

impl TaskSupervisor {
    pub fn new(
        config: Config,
        model: Arc<dyn LanguageModel>,
        drivers: Arc<dyn DriverFactory>,
    ) -> Self {
        let limit = config.supervisor.max_concurrent_tasks.max(1);
        let (events, _) = broadcast::channel(config.supervisor.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(limit)),
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                events,
                shutdown: CancellationToken::new(),
                config,
                model,
                drivers,
            }),
        }
    }

    /// Supervisor backed by the configured chat provider and agent-browser
    pub fn from_config(config: Config) -> Result<Self> {
        let model = ChatModel::from_config(&config.provider)?;
        let drivers = AgentBrowserFactory::new(config.browser.clone());
        Ok(Self::new(config, Arc::new(model), Arc::new(drivers)))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.supervisor.max_concurrent_tasks.max(1)
    }

    /// Tasks currently holding a slot
    pub fn running(&self) -> usize {
        self.capacity() - self.inner.permits.available_permits()
    }

    pub fn start(
        &self,
        goal: impl Into<String>,
        role: impl Into<String>,
    ) -> SupervisorResult<TaskId> {
        self.start_task(TaskRequest::new(goal, role))
    }

    /// Register a task and spawn its loop
    ///
    /// Under [`OverflowPolicy::Reject`] this fails when every slot is taken. Under
    /// [`OverflowPolicy::Queue`] the task stays `Pending` until a slot frees.
    pub fn start_task(&self, request: TaskRequest) -> SupervisorResult<TaskId> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(SupervisorError::ShuttingDown);
        }

        let permit = match inner.config.supervisor.overflow {
            OverflowPolicy::Reject => Some(
                inner
                    .permits
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| SupervisorError::CapacityExceeded {
                        limit: self.capacity(),
                    })?,
            ),
            OverflowPolicy::Queue => None,
        };

        let id = TaskId(inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (snapshot_tx, snapshot_rx) = watch::channel(TaskSnapshot::new(id, &request));
        let reporter = Arc::new(TaskReporter::new(
            snapshot_tx,
            inner.events.clone(),
            inner.config.task.log_limit,
        ));
        let cancel = inner.shutdown.child_token();
        let replies = ReplySlot::new();

        info!(task_id = %id, goal = %request.goal, "Task started");
        reporter.created();

        let launch = Launch {
            id,
            request,
            config: inner.config.clone(),
            model: inner.model.clone(),
            drivers: inner.drivers.clone(),
            permits: inner.permits.clone(),
            permit,
            reporter,
            cancel: cancel.clone(),
            replies: replies.clone(),
        };

        // register before spawning so status() never misses a fast task
        let mut tasks = self.tasks();
        tasks.insert(
            id,
            TaskHandle {
                snapshot: snapshot_rx,
                cancel,
                replies,
                join: None,
            },
        );
        let join = tokio::spawn(run_task(launch).instrument(info_span!("task", task_id = %id)));
        if let Some(handle) = tasks.get_mut(&id) {
            handle.join = Some(join);
        }

        Ok(id)
    }

    /// Request cooperative cancellation
    pub fn cancel(&self, id: TaskId) -> SupervisorResult<()> {
        let tasks = self.tasks();
        let handle = tasks.get(&id).ok_or(SupervisorError::UnknownTask(id))?;
        handle.cancel.cancel();
        info!(task_id = %id, "Cancellation requested");
        Ok(())
    }

    /// Latest snapshot; never waits on the task
    pub fn status(&self, id: TaskId) -> SupervisorResult<TaskSnapshot> {
        let tasks = self.tasks();
        let handle = tasks.get(&id).ok_or(SupervisorError::UnknownTask(id))?;
        let snapshot = handle.snapshot.borrow().clone();
        Ok(snapshot)
    }

    /// Snapshots of all known tasks, oldest first
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut all: Vec<TaskSnapshot> = self
            .tasks()
            .values()
            .map(|h| h.snapshot.borrow().clone())
            .collect();
        all.sort_by_key(|s| s.id);
        all
    }

    /// Answer a task that is waiting on the user
    pub fn reply(&self, id: TaskId, text: impl Into<String>) -> SupervisorResult<()> {
        let tasks = self.tasks();
        let handle = tasks.get(&id).ok_or(SupervisorError::UnknownTask(id))?;
        // each question takes exactly one answer
        if !handle.replies.answer(text.into()) {
            return Err(SupervisorError::NotWaitingOnUser(id));
        }
        Ok(())
    }

    /// Wait until the task reaches a terminal phase
    pub async fn wait(&self, id: TaskId) -> SupervisorResult<TaskSnapshot> {
        let mut rx = {
            let tasks = self.tasks();
            tasks
                .get(&id)
                .ok_or(SupervisorError::UnknownTask(id))?
                .snapshot
                .clone()
        };
        // an error means the writer is gone; the last value is still the answer
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        let snapshot = rx.borrow().clone();
        Ok(snapshot)
    }

    /// Cancel, wait for the loop to exit and forget the task
    pub async fn close(&self, id: TaskId) -> SupervisorResult<TaskSnapshot> {
        self.cancel(id)?;
        let join = self.tasks().get_mut(&id).and_then(|h| h.join.take());
        if let Some(join) = join {
            let _ = join.await;
        }
        let snapshot = self.status(id)?;
        self.tasks().remove(&id);
        Ok(snapshot)
    }

    /// Remove terminal tasks, returning their ids
    pub fn reap(&self) -> Vec<TaskId> {
        let mut tasks = self.tasks();
        let mut done: Vec<TaskId> = tasks
            .iter()
            .filter(|(_, h)| h.snapshot.borrow().is_terminal())
            .map(|(id, _)| *id)
            .collect();
        for id in &done {
            tasks.remove(id);
        }
        done.sort();
        done
    }

    /// Cancel every task and wait for all loops to exit
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let joins: Vec<JoinHandle<()>> = self
            .tasks()
            .values_mut()
            .filter_map(|h| h.join.take())
            .collect();
        info!(tasks = joins.len(), "Shutting down");
        for join in joins {
            let _ = join.await;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Event stream; lagged events are skipped
    pub fn events(&self) -> impl Stream<Item = TaskEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|event| event.ok())
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TaskHandle>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wait for a slot, open a session and run the loop in its own task
async fn run_task(launch: Launch) {
    let Launch {
        id,
        request,
        config,
        model,
        drivers,
        permits,
        permit,
        reporter,
        cancel,
        replies,
    } = launch;

    let _permit = match permit {
        Some(permit) => permit,
        None => {
            let acquired = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = permits.acquire_owned() => permit.ok(),
            };
            match acquired {
                Some(permit) => permit,
                None => {
                    reporter.finish(LoopPhase::Cancelled, None, None);
                    return;
                }
            }
        }
    };

    if cancel.is_cancelled() {
        reporter.finish(LoopPhase::Cancelled, None, None);
        return;
    }

    let driver = match drivers.open_session(id).await {
        Ok(driver) => driver,
        Err(error) => {
            reporter.finish(LoopPhase::Failed, None, Some(TaskError::Session { error }));
            return;
        }
    };

    let step_timeout = config.task.step_timeout();
    let session = driver.clone();
    let task_loop = TaskLoop::new(
        request,
        config.task,
        model,
        driver,
        reporter.clone(),
        cancel,
        replies,
    );

    let joined = tokio::spawn(task_loop.run().in_current_span()).await;
    if let Err(err) = joined {
        let message = if err.is_panic() {
            panic_message(err.into_panic())
        } else {
            "task loop aborted".to_string()
        };
        error!(task_id = %id, "Task loop died: {}", message);
        close_session(session.as_ref(), step_timeout, id).await;
        reporter.finish(LoopPhase::Failed, None, Some(TaskError::Panicked { message }));
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
