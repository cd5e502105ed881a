use anyhow::{Context, Result, anyhow, bail};
use headless_chrome::Tab;
use phantom_agent::{ActionKind, ActionResult};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Snapshots longer than this are cut before they reach a prompt.
pub const DOM_SNAPSHOT_MAX_CHARS: usize = 60_000;

/// Cleaned copy of the document: scripts, styles and stylesheet links removed.
/// NON-DESTRUCTIVE: works on a clone, the live page is untouched.
const CLEAN_DOM_JS: &str = r#"
(() => {
  const doc = document.documentElement.cloneNode(true);
  doc.querySelectorAll('script, style, link[rel="stylesheet"]').forEach(el => el.remove());
  return doc.outerHTML;
})()
"#;

/// Own properties of `window` holding primitives, as a JSON string.
const VARIABLES_JS: &str = r#"
(() => {
  const vars = {};
  try {
    for (const key in window) {
      if (!Object.prototype.hasOwnProperty.call(window, key)) continue;
      const value = window[key];
      if (value === null || ['string', 'number', 'boolean'].includes(typeof value)) {
        vars[key] = value;
      }
    }
  } catch (e) {}
  return JSON.stringify(vars);
})()
"#;

/// Capture the cleaned HTML of the current page.
pub fn capture_dom_snapshot(tab: &Arc<Tab>) -> Result<String> {
    Ok(truncate(&eval_string(tab, CLEAN_DOM_JS)?, DOM_SNAPSHOT_MAX_CHARS))
}

/// Capture primitive globals; `None` when the page refuses.
pub fn capture_variables(tab: &Arc<Tab>) -> Result<Option<Map<String, Value>>> {
    let raw = eval_string(tab, VARIABLES_JS)?;
    Ok(serde_json::from_str::<Map<String, Value>>(&raw).ok())
}

/// Expression running `kind` against the first (or every, for extraction) match.
pub fn action_script(kind: ActionKind, selector: &str, value: Option<&str>) -> String {
    let sel = js_string(selector);
    match kind {
        ActionKind::Click => format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return 'no_match'; el.click(); return 'applied'; }})()"
        ),
        ActionKind::Fill => {
            let val = js_string(value.unwrap_or_default());
            format!(
                "(() => {{ const el = document.querySelector({sel}); if (!el) return 'no_match'; \
                 el.value = {val}; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                 return 'applied'; }})()"
            )
        }
        ActionKind::Submit => format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return 'no_match'; \
             const form = el.tagName === 'FORM' ? el : (el.form || el); \
             if (typeof form.submit === 'function') form.submit(); else form.click(); \
             return 'applied'; }})()"
        ),
        ActionKind::Extract => format!(
            "JSON.stringify(Array.from(document.querySelectorAll({sel})).map(el => el.innerText))"
        ),
    }
}

pub fn parse_action_result(kind: ActionKind, raw: &str) -> Result<ActionResult> {
    if kind == ActionKind::Extract {
        let texts: Vec<String> =
            serde_json::from_str(raw).context("extraction did not return a list of strings")?;
        return Ok(ActionResult::Texts(texts));
    }
    match raw {
        "applied" => Ok(ActionResult::Applied),
        "no_match" => Ok(ActionResult::NoMatch),
        other => bail!("unexpected page action result: {:?}", other),
    }
}

pub fn presence_script(selector: &str) -> String {
    format!("!!document.querySelector({})", js_string(selector))
}

/// Wraps approved code so the result (or thrown message) comes back as JSON text.
pub fn user_code_script(code: &str) -> String {
    format!(
        "(() => {{ try {{ const result = (() => {{ {code} }})(); \
         return JSON.stringify({{ result: result === undefined ? null : result }}); }} \
         catch (e) {{ return JSON.stringify({{ error: String(e && e.message || e) }}); }} }})()"
    )
}

pub fn parse_user_code_result(raw: &str) -> Result<Value> {
    let mut outcome: Value =
        serde_json::from_str(raw).context("page returned a non-JSON execution result")?;
    if let Some(error) = outcome.get("error").and_then(Value::as_str) {
        return Err(anyhow!("{}", error));
    }
    Ok(outcome["result"].take())
}

pub fn eval_string(tab: &Arc<Tab>, expression: &str) -> Result<String> {
    let result = tab.evaluate(expression, false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default())
}

pub fn eval_bool(tab: &Arc<Tab>, expression: &str) -> Result<bool> {
    let result = tab.evaluate(expression, false)?;
    Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
}

fn js_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

fn truncate(raw: &str, max_chars: usize) -> String {
    match raw.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}\n... [truncated, {} total chars]",
            &raw[..cut],
            raw.chars().count()
        ),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_are_quoted_as_js_strings() {
        let script = action_script(ActionKind::Click, "a[title='x \"y\"']", None);
        assert!(script.contains(r#"document.querySelector("a[title='x \"y\"']")"#));
        assert_eq!(presence_script("#q"), "!!document.querySelector(\"#q\")");
    }

    #[test]
    fn parses_action_results() {
        assert_eq!(
            parse_action_result(ActionKind::Click, "no_match").unwrap(),
            ActionResult::NoMatch
        );
        assert_eq!(
            parse_action_result(ActionKind::Extract, r#"["a","b"]"#).unwrap(),
            ActionResult::Texts(vec!["a".into(), "b".into()])
        );
        assert!(parse_action_result(ActionKind::Fill, "").is_err());
    }

    #[test]
    fn user_code_errors_surface() {
        assert_eq!(
            parse_user_code_result(r#"{"result":[1,2]}"#).unwrap(),
            serde_json::json!([1, 2])
        );
        let err = parse_user_code_result(r#"{"error":"boom"}"#).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert!(truncate("héllo", 2).starts_with("hé\n... [truncated, 5 total chars]"));
    }

    #[test]
    fn snapshot_limit_keeps_prompts_bounded() {
        let page = "x".repeat(DOM_SNAPSHOT_MAX_CHARS + 10);
        let cut = truncate(&page, DOM_SNAPSHOT_MAX_CHARS);
        assert!(cut.starts_with(&"x".repeat(DOM_SNAPSHOT_MAX_CHARS)));
        assert!(cut.ends_with("[truncated, 60010 total chars]"));
        let fits = &page[..DOM_SNAPSHOT_MAX_CHARS];
        assert_eq!(truncate(fits, DOM_SNAPSHOT_MAX_CHARS), fits);
    }
}
