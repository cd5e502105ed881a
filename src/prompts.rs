use serde_json::{Map, Value};

use crate::types::ChatMessage;

const NO_DOM: &str = "No DOM available.";

pub fn console_action_prompt(
    history: &[ChatMessage],
    dom: &str,
    variables: Option<&Map<String, Value>>,
) -> String {
    let conversation = history
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");
    let dom = if dom.is_empty() { NO_DOM } else { dom };
    let variables = variables
        .map(|vars| {
            format!(
                "\n**AVAILABLE JS VARIABLES:**\n{}\n",
                Value::Object(vars.clone())
            )
        })
        .unwrap_or_default();

    format!(
        r#"You are a senior web engineer assistant operating on the user's current page. Act autonomously.
NEVER ask the user for information you can find yourself: the complete, cleaned HTML of the page is below.

Answer with ONE JSON object whose "action" is one of:
1. "PLAN": the request needs several steps or navigation. Put the steps in a "plan" array.
2. "ANALYZE_AND_REPLY": single-page data extraction. Put the extracted data in "data".
3. "EXECUTE": a simple single-page interaction. Put JavaScript in "code".
4. "REQUEST_JS_VARS": the DOM is not enough and you need the page's JavaScript variables.
5. "REPLY": the request is conversational or ambiguous. Put your answer in "text".

--- START CONTEXT ---
PAGE DOM:
```html
{dom}
```
{variables}
[Conversation History]
{conversation}
--- END CONTEXT ---

YOUR DECISION (JSON only):"#
    )
}

pub fn planner_prompt(objective: &str, dom: &str) -> String {
    let dom = if dom.is_empty() { NO_DOM } else { dom };
    format!(
        r#"You are a task planner for a browser agent. Convert the user objective into a JSON array of steps.
Each step is {{"command": ..., "target": ..., "value": ..., "description": ...}}.

COMMAND SET: [NAVIGATE, CLICK, FILL, SUBMIT, WAIT_FOR_ELEMENT, EXTRACT_DATA, CALL_LLM, NOTIFY]
- "target" is a URL for NAVIGATE and a CSS selector otherwise.
- EXTRACT_DATA stores the matched text under the variable named by "value".
- Later steps can use stored variables as {{{{name}}}}; CALL_LLM answers are stored as {{{{llm_response}}}}.
- Refer to credentials as "SECRET.KEY_NAME", never by value.

User objective: "{objective}"
Initial page DOM (cleaned):
```html
{dom}
```
Generate only the JSON array for the action plan."#
    )
}
