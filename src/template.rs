//! `{{var}}` placeholders and `SECRET.` references in step fields.

use tracing::debug;

use crate::error::StepError;
use crate::types::{ExecutionContext, SecretVault};

pub const SECRET_PREFIX: &str = "SECRET.";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

/// A string split once into literal text and variable references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                break;
            };
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            segments.push(Segment::Var(after_open[..close].trim().to_string()));
            rest = &after_open[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Self { segments }
    }

    /// Variable names referenced, in order of appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Var(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Referenced variables with no value in `context`.
    pub fn unresolved<'a>(&'a self, context: &ExecutionContext) -> Vec<&'a str> {
        self.variables()
            .filter(|name| context.get(name).is_none())
            .collect()
    }

    /// Unknown variables render as the empty string.
    pub fn render(&self, context: &ExecutionContext) -> String {
        let missing = self.unresolved(context);
        if !missing.is_empty() {
            debug!(?missing, "placeholders without a value render empty");
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(name) => {
                    if let Some(value) = context.get(name) {
                        out.push_str(&value.to_string());
                    }
                }
            }
        }
        out
    }
}

/// Shorthand for parse-then-render.
pub fn resolve(template: &str, context: &ExecutionContext) -> String {
    Template::parse(template).render(context)
}

/// A step's `value` field: either a vault reference or a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepValue {
    Secret(String),
    Template(Template),
}

impl StepValue {
    pub fn parse(source: &str) -> Self {
        match source.strip_prefix(SECRET_PREFIX) {
            Some(key) => StepValue::Secret(key.to_string()),
            None => StepValue::Template(Template::parse(source)),
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, StepValue::Secret(_))
    }

    /// Secrets are substituted verbatim, with no further template scanning.
    pub fn resolve(
        &self,
        context: &ExecutionContext,
        vault: &SecretVault,
    ) -> Result<String, StepError> {
        match self {
            StepValue::Secret(key) => vault
                .get(key)
                .map(str::to_string)
                .ok_or_else(|| StepError::SecretNotFound(key.clone())),
            StepValue::Template(template) => Ok(template.render(context)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContextValue, SecretEntry};

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.insert("city", ContextValue::Scalar("Lisbon".into()));
        ctx.insert(
            "prices",
            ContextValue::List(vec!["10".into(), "20".into()]),
        );
        ctx
    }

    fn vault() -> SecretVault {
        vec![SecretEntry {
            key: "API_KEY".into(),
            value: "s3cr3t {{city}}".into(),
        }]
        .into_iter()
        .collect()
    }

    #[test]
    fn plain_text_is_unchanged() {
        let ctx = context();
        for input in ["", "#search > input", "no { braces } here", "{{unterminated"] {
            let once = resolve(input, &ctx);
            assert_eq!(once, input);
            assert_eq!(resolve(&once, &ctx), once);
        }
    }

    #[test]
    fn substitutes_known_and_blanks_unknown() {
        let ctx = context();
        assert_eq!(
            resolve("https://x.test/?q={{city}}&p={{ prices }}", &ctx),
            "https://x.test/?q=Lisbon&p=10,20"
        );
        assert_eq!(resolve("[{{missing}}]", &ctx), "[]");
    }

    #[test]
    fn lists_variables_in_order() {
        let template = Template::parse("{{a}}-{{ b }}-c");
        assert_eq!(template.variables().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn reports_unresolved_variables() {
        let ctx = context();
        let template = Template::parse("{{city}} {{missing}} {{ prices }} {{other}}");
        assert_eq!(template.unresolved(&ctx), vec!["missing", "other"]);
        assert_eq!(template.render(&ctx), "Lisbon  10,20 ");
    }

    #[test]
    fn secret_lookup_is_exact() {
        let ctx = context();
        let vault = vault();

        let value = StepValue::parse("SECRET.API_KEY");
        assert!(value.is_secret());
        assert_eq!(value.resolve(&ctx, &vault).unwrap(), "s3cr3t {{city}}");

        let err = StepValue::parse("SECRET.api_key")
            .resolve(&ctx, &vault)
            .unwrap_err();
        assert!(matches!(err, StepError::SecretNotFound(ref k) if k == "api_key"));
    }

    #[test]
    fn non_secret_values_are_templates() {
        let ctx = context();
        let value = StepValue::parse("hello {{city}}");
        assert!(!value.is_secret());
        assert_eq!(value.resolve(&ctx, &vault()).unwrap(), "hello Lisbon");
    }
}
