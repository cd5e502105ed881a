#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use phantom_agent::{
    ActionKind, ActionResult, DecisionService, PageContext, PageContextProvider, Progress,
    ProgressSink, ServiceError, SessionHandle, SessionProvider,
};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio::time::Instant;

/// Every call a mission made against the session provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create,
    Destroy,
    Navigate(String),
    WaitForLoad,
    Action(ActionKind, String, Option<String>),
    Poll(String),
}

#[derive(Default)]
pub struct MockSessions {
    pub fail_create: bool,
    pub fail_destroy: bool,
    /// Selectors with no matching element.
    pub missing: HashSet<String>,
    /// Texts returned for extraction selectors.
    pub extracts: HashMap<String, Vec<String>>,
    /// Selector becomes present on this poll (1-based); absent selectors never appear.
    pub appears_on_poll: HashMap<String, usize>,
    pub calls: Mutex<Vec<Call>>,
    pub destroyed_at: Mutex<Vec<Instant>>,
    pub polls: Mutex<HashMap<String, usize>>,
}

impl MockSessions {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: &Call) -> usize {
        self.calls().iter().filter(|c| *c == wanted).count()
    }

    pub fn destroy_count(&self) -> usize {
        self.count(&Call::Destroy)
    }

    pub fn polls_for(&self, selector: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Poll(s) if s == selector))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SessionProvider for MockSessions {
    async fn create(&self) -> Result<SessionHandle> {
        self.record(Call::Create);
        if self.fail_create {
            return Err(anyhow!("tab limit reached"));
        }
        Ok(SessionHandle(7))
    }

    async fn destroy(&self, handle: SessionHandle) -> Result<()> {
        assert_eq!(handle, SessionHandle(7));
        self.record(Call::Destroy);
        self.destroyed_at.lock().unwrap().push(Instant::now());
        if self.fail_destroy {
            return Err(anyhow!("tab already closed"));
        }
        Ok(())
    }

    async fn navigate(&self, _handle: SessionHandle, url: &str) -> Result<()> {
        self.record(Call::Navigate(url.to_string()));
        Ok(())
    }

    async fn wait_for_load(&self, _handle: SessionHandle) -> Result<()> {
        self.record(Call::WaitForLoad);
        Ok(())
    }

    async fn run_action(
        &self,
        _handle: SessionHandle,
        kind: ActionKind,
        selector: &str,
        value: Option<&str>,
    ) -> Result<ActionResult> {
        self.record(Call::Action(
            kind,
            selector.to_string(),
            value.map(String::from),
        ));
        if kind == ActionKind::Extract {
            return Ok(ActionResult::Texts(
                self.extracts.get(selector).cloned().unwrap_or_default(),
            ));
        }
        if self.missing.contains(selector) {
            return Ok(ActionResult::NoMatch);
        }
        Ok(ActionResult::Applied)
    }

    async fn poll_presence(&self, _handle: SessionHandle, selector: &str) -> Result<bool> {
        self.record(Call::Poll(selector.to_string()));
        let mut polls = self.polls.lock().unwrap();
        let seen = polls.entry(selector.to_string()).or_insert(0);
        *seen += 1;
        Ok(self
            .appears_on_poll
            .get(selector)
            .is_some_and(|on| *seen >= *on))
    }
}

/// Decision service answering from a script, recording every prompt.
#[derive(Default)]
pub struct ScriptedService {
    answers: Mutex<VecDeque<Result<Value, ServiceError>>>,
    pub prompts: Mutex<Vec<(String, bool)>>,
}

impl ScriptedService {
    pub fn new(answers: Vec<Result<Value, ServiceError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].0.clone()
    }
}

#[async_trait]
impl DecisionService for ScriptedService {
    async fn call(&self, prompt: &str, expect_json: bool) -> Result<Value, ServiceError> {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), expect_json));
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Structural("script exhausted".into())))
    }
}

pub struct MockPage {
    pub url: String,
    pub snapshot: String,
    pub variables: Option<Map<String, Value>>,
    pub script_result: Option<Value>,
    pub captures: Mutex<usize>,
    pub scripts: Mutex<Vec<String>>,
}

impl MockPage {
    pub fn at(url: &str) -> Self {
        Self {
            url: url.to_string(),
            snapshot: "<html><body><h1>Shop</h1></body></html>".to_string(),
            variables: None,
            script_result: None,
            captures: Mutex::new(0),
            scripts: Mutex::new(Vec::new()),
        }
    }

    pub fn capture_count(&self) -> usize {
        *self.captures.lock().unwrap()
    }
}

#[async_trait]
impl PageContextProvider for MockPage {
    async fn current_url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    async fn capture(&self) -> Result<PageContext> {
        *self.captures.lock().unwrap() += 1;
        Ok(PageContext {
            snapshot: self.snapshot.clone(),
            variables: self.variables.clone(),
        })
    }

    async fn execute_script(&self, code: &str) -> Result<Value> {
        self.scripts.lock().unwrap().push(code.to_string());
        self.script_result
            .clone()
            .ok_or_else(|| anyhow!("ReferenceError: foo is not defined"))
    }
}

/// Collects progress lines in order.
#[derive(Default)]
pub struct Recorder {
    pub lines: Mutex<Vec<Progress>>,
}

impl Recorder {
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    pub fn events(&self) -> Vec<Progress> {
        self.lines.lock().unwrap().clone()
    }
}

impl ProgressSink for Recorder {
    fn emit(&self, progress: Progress) {
        self.lines.lock().unwrap().push(progress);
    }
}
