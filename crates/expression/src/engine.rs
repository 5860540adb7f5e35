//! The engine facade: the three-rule template evaluation contract.

use serde_json::Value;
use tracing::trace;

use crate::context::EvaluationContext;
use crate::error::ExpressionResult;
use crate::eval;
use crate::template::{Template, TemplatePart};
use crate::value_utils::stringify;

/// Entry point for template evaluation.
///
/// Stateless and cheap to share; evaluation is pure and safe to call from
/// any number of tasks concurrently.
///
/// Evaluation rules for a parameter string:
///
/// 1. No `{{` anywhere — the string is returned verbatim.
/// 2. A single `{{ … }}` spanning the whole string (modulo whitespace) —
///    the expression's native value is returned (boolean, number, array, …).
/// 3. Anything else — every `{{ … }}` is replaced by the string form of its
///    value; `null` renders as the empty string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEngine;

impl ExpressionEngine {
    /// Create an engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Syntax-check a parameter string without evaluating it.
    ///
    /// The workflow compiler runs this over every node parameter so template
    /// errors surface before execution starts.
    pub fn check(&self, template: &str) -> ExpressionResult<()> {
        if !template.contains("{{") {
            return Ok(());
        }
        Template::parse(template).map(|_| ())
    }

    /// Evaluate a parameter string against a context.
    ///
    /// Only template syntax can fail here; on pre-validated workflows this
    /// never returns an error at runtime.
    pub fn evaluate(&self, template: &str, ctx: &EvaluationContext) -> ExpressionResult<Value> {
        if !template.contains("{{") {
            return Ok(Value::String(template.to_string()));
        }

        let parsed = Template::parse(template)?;
        Ok(self.render(&parsed, ctx))
    }

    /// Evaluate an already-parsed template.
    #[must_use]
    pub fn render(&self, template: &Template, ctx: &EvaluationContext) -> Value {
        if let Some(expr) = template.as_single_expression() {
            let value = eval::eval(expr, ctx);
            trace!(template = template.source(), "evaluated single-expression template");
            return value;
        }

        let mut result = String::with_capacity(template.source().len());
        for part in template.parts() {
            match part {
                TemplatePart::Static { content, .. } => result.push_str(content),
                TemplatePart::Expression { expr, .. } => {
                    let value = eval::eval(expr, ctx);
                    result.push_str(&stringify(&value));
                }
            }
        }
        Value::String(result)
    }

    /// Evaluate a parameter string and coerce the result to a boolean.
    ///
    /// Condition blocks use this: the truthiness of the evaluated value
    /// decides the branch.
    pub fn evaluate_truthy(
        &self,
        template: &str,
        ctx: &EvaluationContext,
    ) -> ExpressionResult<bool> {
        let value = self.evaluate(template, ctx)?;
        Ok(crate::value_utils::is_truthy(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};

    fn ctx() -> EvaluationContext {
        let mut vars = Map::new();
        vars.insert("host".into(), json!("10.0.0.1"));
        vars.insert("count".into(), json!(3));
        vars.insert("tags".into(), json!(["edge", "lab"]));
        EvaluationContext::builder().vars(vars).build()
    }

    #[test]
    fn plain_string_passes_verbatim() {
        let engine = ExpressionEngine::new();
        let out = engine.evaluate("just text, no templates", &ctx()).unwrap();
        assert_eq!(out, json!("just text, no templates"));
    }

    #[test]
    fn string_with_closing_braces_only_passes_verbatim() {
        let engine = ExpressionEngine::new();
        let out = engine.evaluate("weird }} but fine", &ctx()).unwrap();
        assert_eq!(out, json!("weird }} but fine"));
    }

    #[test]
    fn single_expression_returns_native_value() {
        let engine = ExpressionEngine::new();
        assert_eq!(engine.evaluate("{{ $vars.count }}", &ctx()).unwrap(), json!(3));
        assert_eq!(
            engine.evaluate("  {{ $vars.tags }}  ", &ctx()).unwrap(),
            json!(["edge", "lab"])
        );
        assert_eq!(
            engine.evaluate("{{ $vars.count > 1 }}", &ctx()).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn interpolation_stringifies() {
        let engine = ExpressionEngine::new();
        let out = engine
            .evaluate("host={{ $vars.host }} n={{ $vars.count }}", &ctx())
            .unwrap();
        assert_eq!(out, json!("host=10.0.0.1 n=3"));
    }

    #[test]
    fn null_interpolates_as_empty_string() {
        let engine = ExpressionEngine::new();
        let out = engine.evaluate("[{{ $vars.missing }}]", &ctx()).unwrap();
        assert_eq!(out, json!("[]"));
    }

    #[test]
    fn single_expression_missing_path_is_native_null() {
        let engine = ExpressionEngine::new();
        let out = engine.evaluate("{{ $vars.missing }}", &ctx()).unwrap();
        assert_eq!(out, json!(null));
    }

    #[test]
    fn check_accepts_valid_and_rejects_invalid() {
        let engine = ExpressionEngine::new();
        assert!(engine.check("no templates").is_ok());
        assert!(engine.check("{{ $vars.x | trim }}").is_ok());
        assert!(engine.check("{{ $vars.x").is_err());
        assert!(engine.check("{{ bad syntax here( }}").is_err());
    }

    #[test]
    fn evaluate_truthy() {
        let engine = ExpressionEngine::new();
        assert!(engine.evaluate_truthy("{{ $vars.count > 1 }}", &ctx()).unwrap());
        assert!(!engine.evaluate_truthy("{{ $vars.count > 9 }}", &ctx()).unwrap());
        // Plain strings are truthy when non-empty.
        assert!(engine.evaluate_truthy("yes", &ctx()).unwrap());
    }
}
