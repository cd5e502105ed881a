//! Two-phase decision protocol for console requests, plus plan generation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::brain::DecisionService;
use crate::plan::Plan;
use crate::prompts::{console_action_prompt, planner_prompt};
use crate::session::{PageContext, PageContextProvider};
use crate::types::ChatMessage;

pub const PROTECTED_PAGE_REPLY: &str =
    "Security protocol violation. I cannot operate on this protected page.";

const PROTECTED_PREFIXES: &[&str] = &["chrome://", "https://chrome.google.com/webstore"];

/// What the decision service chose to do with a console request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Plan {
        plan: Plan,
    },
    AnalyzeAndReply {
        #[serde(default)]
        data: Value,
    },
    Execute {
        code: String,
    },
    RequestJsVars,
    Reply {
        #[serde(default)]
        text: String,
    },
}

/// What the engine hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    Reply {
        text: String,
    },
    ExecutionResult {
        result: Value,
        #[serde(rename = "renderHint", skip_serializing_if = "Option::is_none")]
        render_hint: Option<String>,
    },
    PlanResult {
        plan: Plan,
    },
    Execute {
        code: String,
    },
    Error {
        error: String,
    },
}

impl Response {
    pub fn error(err: &anyhow::Error) -> Self {
        Response::Error {
            error: format!("{:#}", err),
        }
    }
}

impl From<Decision> for Response {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Plan { plan } => Response::PlanResult { plan },
            Decision::AnalyzeAndReply { data } => {
                let render_hint = data.is_array().then(|| "table_and_csv".to_string());
                Response::ExecutionResult {
                    result: data,
                    render_hint,
                }
            }
            Decision::Execute { code } => Response::Execute { code },
            Decision::Reply { text } => Response::Reply { text },
            Decision::RequestJsVars => Response::Error {
                error: "the decision service asked for page variables again after escalation"
                    .to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Page snapshot only.
    Initial,
    /// Page snapshot plus captured runtime variables.
    Escalated,
}

pub fn is_protected_origin(url: &str) -> bool {
    PROTECTED_PREFIXES.iter().any(|p| url.starts_with(p))
}

pub struct ActionProtocol {
    decisions: Arc<dyn DecisionService>,
    page: Arc<dyn PageContextProvider>,
}

impl ActionProtocol {
    pub fn new(decisions: Arc<dyn DecisionService>, page: Arc<dyn PageContextProvider>) -> Self {
        Self { decisions, page }
    }

    /// Decides on the page snapshot alone, escalating once if the service asks for variables.
    ///
    /// The escalated answer is returned as-is, even another `REQUEST_JS_VARS`.
    pub async fn decide(&self, history: &[ChatMessage]) -> Result<Decision> {
        let url = self.page.current_url().await.context("reading page URL")?;
        if is_protected_origin(&url) {
            warn!(%url, "refusing to operate on protected page");
            return Ok(Decision::Reply {
                text: PROTECTED_PAGE_REPLY.to_string(),
            });
        }

        let page = self.page.capture().await.context("capturing page context")?;

        let decision = self.ask(history, &page, Phase::Initial).await?;
        if decision != Decision::RequestJsVars {
            return Ok(decision);
        }

        info!("decision service requested runtime variables, escalating");
        self.ask(history, &page, Phase::Escalated).await
    }

    /// [`decide`](Self::decide), with failures folded into [`Response::Error`].
    pub async fn respond(&self, history: &[ChatMessage]) -> Response {
        match self.decide(history).await {
            Ok(decision) => decision.into(),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "console request failed");
                Response::error(&e)
            }
        }
    }

    pub async fn generate_plan(&self, objective: &str) -> Result<Plan> {
        let page = self.page.capture().await.context("capturing page context")?;
        let answer = self
            .decisions
            .call_json(&planner_prompt(objective, &page.snapshot))
            .await?;
        let plan: Plan =
            serde_json::from_value(answer).context("decision service returned an invalid plan")?;
        info!(steps = plan.len(), "plan generated");
        Ok(plan)
    }

    pub async fn plan_response(&self, objective: &str) -> Response {
        match self.generate_plan(objective).await {
            Ok(plan) => Response::PlanResult { plan },
            Err(e) => Response::error(&e),
        }
    }

    /// Runs user-approved code in the page.
    pub async fn execute_code(&self, code: &str) -> Response {
        match self.page.execute_script(code).await {
            Ok(result) => Response::ExecutionResult {
                result,
                render_hint: None,
            },
            Err(e) => Response::error(&e),
        }
    }

    async fn ask(
        &self,
        history: &[ChatMessage],
        page: &PageContext,
        phase: Phase,
    ) -> Result<Decision> {
        let empty = Map::new();
        let variables = match phase {
            Phase::Initial => None,
            Phase::Escalated => Some(page.variables.as_ref().unwrap_or(&empty)),
        };
        let prompt = console_action_prompt(history, &page.snapshot, variables);

        let answer = self.decisions.call_json(&prompt).await?;
        serde_json::from_value(answer)
            .with_context(|| format!("unrecognised decision in {:?} phase", phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn protected_origins() {
        assert!(is_protected_origin("chrome://settings"));
        assert!(is_protected_origin(
            "https://chrome.google.com/webstore/detail/x"
        ));
        assert!(!is_protected_origin("https://example.com/chrome://"));
    }

    #[test]
    fn decodes_every_decision_kind() {
        let plan: Decision = serde_json::from_value(json!({
            "action": "PLAN",
            "plan": [{"command": "NOTIFY", "value": "hi", "description": "say hi"}]
        }))
        .unwrap();
        assert!(matches!(plan, Decision::Plan { ref plan } if plan.len() == 1));

        let vars: Decision = serde_json::from_value(json!({"action": "REQUEST_JS_VARS"})).unwrap();
        assert_eq!(vars, Decision::RequestJsVars);

        let exec: Decision =
            serde_json::from_value(json!({"action": "EXECUTE", "code": "1+1"})).unwrap();
        assert_eq!(exec, Decision::Execute { code: "1+1".into() });
    }

    #[test]
    fn tabular_analysis_gets_render_hint() {
        let response: Response = Decision::AnalyzeAndReply {
            data: json!([{"name": "a"}]),
        }
        .into();
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["action"], "EXECUTION_RESULT");
        assert_eq!(wire["renderHint"], "table_and_csv");

        let scalar: Response = Decision::AnalyzeAndReply { data: json!("42") }.into();
        let wire = serde_json::to_value(&scalar).unwrap();
        assert!(wire.get("renderHint").is_none());
    }

    #[test]
    fn repeated_variable_request_becomes_error() {
        let response: Response = Decision::RequestJsVars.into();
        assert!(matches!(response, Response::Error { .. }));
    }
}
