//! Capability seams the engine drives: isolated sessions and the user's page.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Opaque handle to one isolated, non-foreground browsing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Page-level actions a session can run against a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    Fill,
    Submit,
    /// Collect the text of every element matching the selector.
    Extract,
}

/// What a page action found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Applied,
    /// No element matched the selector; the engine decides whether that is an error.
    NoMatch,
    Texts(Vec<String>),
}

/// Creates, drives and destroys isolated browsing sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn create(&self) -> Result<SessionHandle>;

    async fn destroy(&self, handle: SessionHandle) -> Result<()>;

    async fn navigate(&self, handle: SessionHandle, url: &str) -> Result<()>;

    /// Resolves once the session's current document has finished loading.
    async fn wait_for_load(&self, handle: SessionHandle) -> Result<()>;

    async fn run_action(
        &self,
        handle: SessionHandle,
        kind: ActionKind,
        selector: &str,
        value: Option<&str>,
    ) -> Result<ActionResult>;

    async fn poll_presence(&self, handle: SessionHandle, selector: &str) -> Result<bool>;
}

/// The page the user is looking at, as seen by the decision protocol.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    /// Cleaned HTML of the page.
    pub snapshot: String,
    /// Primitive global variables, when they could be read.
    pub variables: Option<Map<String, Value>>,
}

#[async_trait]
pub trait PageContextProvider: Send + Sync {
    async fn current_url(&self) -> Result<String>;

    async fn capture(&self) -> Result<PageContext>;

    /// Evaluates caller-approved code in the page and returns its result.
    async fn execute_script(&self, code: &str) -> Result<Value>;
}
