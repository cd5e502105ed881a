use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// The closed set of commands a plan step can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Navigate,
    Click,
    Fill,
    Submit,
    WaitForElement,
    ExtractData,
    CallLlm,
    Notify,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Navigate => "NAVIGATE",
            Command::Click => "CLICK",
            Command::Fill => "FILL",
            Command::Submit => "SUBMIT",
            Command::WaitForElement => "WAIT_FOR_ELEMENT",
            Command::ExtractData => "EXTRACT_DATA",
            Command::CallLlm => "CALL_LLM",
            Command::Notify => "NOTIFY",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of an approved plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "value_as_string"
    )]
    pub value: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Planners sometimes emit numeric values (`"value": 5000`); keep them as text.
fn value_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// An ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<'de> Deserialize<'de> for Plan {
    /// Accepts a bare array or an object wrapping it under `plan`.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Bare(Vec<Step>),
            Wrapped { plan: Vec<Step> },
        }

        Ok(match Shape::deserialize(deserializer)? {
            Shape::Bare(steps) | Shape::Wrapped { plan: steps } => Plan { steps },
        })
    }
}
