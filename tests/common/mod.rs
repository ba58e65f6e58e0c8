//! Shared fakes for integration tests
//!
//! `ScriptedModel` replays canned proposals, `FakeDriver` serves a tiny in-memory
//! "web" and `FakeFactory` hands out one fake driver per task.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use agent_executive::browser::{BrowserDriver, DriverFactory, DriverResult};
use agent_executive::config::{OverflowPolicy, TaskConfig};
use agent_executive::core::{
    ActionProposal, DriverError, ElementRef, ModelError, Observation, ScrollDirection,
};
use agent_executive::llm::{LanguageModel, Prompt};
use agent_executive::{Config, TaskId, TaskSnapshot, TaskSupervisor};

/// Upper bound for anything a test waits on
pub const TEST_DEADLINE: Duration = Duration::from_secs(10);

pub fn finish(summary: &str) -> ActionProposal {
    ActionProposal::new("finish")
        .value(summary)
        .rationale("goal reached")
}

pub fn navigate(url: &str) -> ActionProposal {
    ActionProposal::new("navigate")
        .target(url)
        .rationale("open the page")
}

pub fn proposal(kind: &str) -> ActionProposal {
    ActionProposal::new(kind).rationale("scripted")
}

/// Task settings with fast backoff and short timeouts
pub fn fast_task_config() -> TaskConfig {
    TaskConfig {
        max_iterations: 10,
        history_limit: 10,
        step_timeout_ms: 2_000,
        observe_retries: 1,
        model_retries: 2,
        invalid_action_reprompts: 1,
        max_consecutive_action_failures: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        ask_user_timeout_secs: 5,
        log_limit: 200,
    }
}

pub fn fast_config(max_tasks: usize, overflow: OverflowPolicy) -> Config {
    let mut config = Config::default();
    config.task = fast_task_config();
    config.supervisor.max_concurrent_tasks = max_tasks;
    config.supervisor.overflow = overflow;
    config
}

pub fn supervisor(
    config: Config,
    model: Arc<ScriptedModel>,
    factory: Arc<FakeFactory>,
) -> TaskSupervisor {
    TaskSupervisor::new(config, model, factory)
}

/// Wait for a terminal snapshot, failing the test instead of hanging
pub async fn wait_done(supervisor: &TaskSupervisor, id: TaskId) -> TaskSnapshot {
    tokio::time::timeout(TEST_DEADLINE, supervisor.wait(id))
        .await
        .expect("task did not finish in time")
        .expect("task is known")
}

/// Poll until `check` holds for the task's snapshot
pub async fn wait_until<F>(supervisor: &TaskSupervisor, id: TaskId, check: F) -> TaskSnapshot
where
    F: Fn(&TaskSnapshot) -> bool,
{
    let poll = async {
        loop {
            let snapshot = supervisor.status(id).expect("task is known");
            if check(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(TEST_DEADLINE, poll)
        .await
        .expect("condition not reached in time")
}

type Reply = Result<ActionProposal, ModelError>;

/// Language model that replays a script
///
/// Once the script runs out every call returns `fallback`, or a `finish` when none is set.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Reply>>,
    fallback: Option<ActionProposal>,
    gate: Option<Arc<Semaphore>>,
    pub entered: Notify,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    history_lens: Mutex<Vec<usize>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            gate: None,
            entered: Notify::new(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            history_lens: Mutex::new(Vec::new()),
        }
    }

    pub fn proposals(proposals: Vec<ActionProposal>) -> Self {
        Self::new(proposals.into_iter().map(Ok).collect())
    }

    /// Always answer with the same proposal
    pub fn repeating(proposal: ActionProposal) -> Self {
        let mut model = Self::new(Vec::new());
        model.fallback = Some(proposal);
        model
    }

    /// Block every call until the gate hands out a permit
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User messages of every prompt seen so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn history_lens(&self) -> Vec<usize> {
        self.history_lens.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn propose(&self, prompt: &Prompt<'_>) -> Result<ActionProposal, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.user_message());
        self.history_lens.lock().unwrap().push(prompt.history.len());
        self.entered.notify_one();

        if let Some(ref gate) = self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(reply) => reply,
            None => Ok(self.fallback.clone().unwrap_or_else(|| finish("script exhausted"))),
        }
    }
}

/// Knobs for one fake browser session
#[derive(Clone, Default)]
pub struct DriverOptions {
    /// Fail this many navigate calls before succeeding
    pub navigate_failures: usize,
    /// Block observe until the gate hands out a permit
    pub observe_gate: Option<Arc<Semaphore>>,
    pub panic_on_observe: bool,
}

/// Counters and signals shared between a fake driver and the test
#[derive(Default)]
pub struct DriverState {
    pub navigates: AtomicUsize,
    pub observes_started: AtomicUsize,
    pub observes_finished: AtomicUsize,
    pub clicks: AtomicUsize,
    pub closes: AtomicUsize,
    pub observe_entered: Notify,
    failures_left: AtomicUsize,
    page: Mutex<Option<(String, String)>>,
}

impl DriverState {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FakeDriver {
    state: Arc<DriverState>,
    options: DriverOptions,
}

impl FakeDriver {
    pub fn new(options: DriverOptions) -> (Self, Arc<DriverState>) {
        let state = Arc::new(DriverState::default());
        state
            .failures_left
            .store(options.navigate_failures, Ordering::SeqCst);
        (
            Self {
                state: state.clone(),
                options,
            },
            state,
        )
    }

    fn current_page(&self) -> Observation {
        let page = self.state.page.lock().unwrap().clone();
        let (url, title) = page.unwrap_or_else(|| ("about:blank".to_string(), String::new()));
        Observation::new(url, title, "- heading \"Example Domain\" [ref=e1]").with_elements(vec![
            ElementRef::new("e1", "heading", "Example Domain"),
            ElementRef::new("e2", "link", "More information..."),
            ElementRef::new("e3", "textbox", "Search"),
        ])
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.state.navigates.fetch_add(1, Ordering::SeqCst);
        let remaining = self.state.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(DriverError::unreachable(format!("{} refused the connection", url)));
        }
        let title = if url.contains("example.com") {
            "Example Domain"
        } else {
            "Untitled"
        };
        *self.state.page.lock().unwrap() = Some((url.to_string(), title.to_string()));
        Ok(())
    }

    async fn observe(&self) -> DriverResult<Observation> {
        self.state.observes_started.fetch_add(1, Ordering::SeqCst);
        self.state.observe_entered.notify_one();
        if self.options.panic_on_observe {
            panic!("renderer crashed");
        }
        if let Some(ref gate) = self.options.observe_gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.state.observes_finished.fetch_add(1, Ordering::SeqCst);
        Ok(self.current_page())
    }

    async fn click(&self, target: &str) -> DriverResult<()> {
        self.state.clicks.fetch_add(1, Ordering::SeqCst);
        if target == "e2" {
            *self.state.page.lock().unwrap() = Some((
                "https://www.iana.org/help/example-domains".to_string(),
                "Example Domains".to_string(),
            ));
        }
        Ok(())
    }

    async fn type_text(&self, _target: &str, _text: &str, _submit: bool) -> DriverResult<()> {
        Ok(())
    }

    async fn scroll(&self, _direction: ScrollDirection, _amount: u32) -> DriverResult<()> {
        Ok(())
    }

    async fn screenshot(&self) -> DriverResult<String> {
        Ok("/tmp/fake.png".to_string())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.current_page().url)
    }

    async fn close(&self) -> DriverResult<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out fake drivers, remembering each session's shared state
#[derive(Default)]
pub struct FakeFactory {
    defaults: DriverOptions,
    per_task: Mutex<HashMap<TaskId, DriverOptions>>,
    refuse: Mutex<HashSet<TaskId>>,
    sessions: Mutex<HashMap<TaskId, Arc<DriverState>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: DriverOptions) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    pub fn configure(&self, id: TaskId, options: DriverOptions) {
        self.per_task.lock().unwrap().insert(id, options);
    }

    /// Make `open_session` fail for this task
    pub fn refuse(&self, id: TaskId) {
        self.refuse.lock().unwrap().insert(id);
    }

    pub fn session(&self, id: TaskId) -> Option<Arc<DriverState>> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    pub fn opened(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Wait until the task's session exists and has entered observe `n` times
    pub async fn wait_for_observe(&self, id: TaskId, n: usize) -> Arc<DriverState> {
        let poll = async {
            loop {
                if let Some(state) = self.session(id) {
                    if DriverState::count(&state.observes_started) >= n {
                        return state;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(TEST_DEADLINE, poll)
            .await
            .expect("observe never started")
    }
}

#[async_trait]
impl DriverFactory for FakeFactory {
    async fn open_session(&self, id: TaskId) -> DriverResult<Arc<dyn BrowserDriver>> {
        if self.refuse.lock().unwrap().contains(&id) {
            return Err(DriverError::unreachable("browser pool exhausted"));
        }
        let options = self
            .per_task
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone());
        let (driver, state) = FakeDriver::new(options);
        self.sessions.lock().unwrap().insert(id, state);
        Ok(Arc::new(driver))
    }
}
