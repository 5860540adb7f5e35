//! AST evaluation.
//!
//! Evaluation is total: the failure modes required by the language contract
//! (missing segment → `null`, filter mismatch → pass-through, incomparable
//! operands → `false`) are encoded here, so the scheduler can resolve
//! parameters without a runtime error path. The parser has already rejected
//! anything outside the restricted grammar.

use serde_json::Value;

use crate::ast::{BinaryOp, Expr, Root, Segment};
use crate::context::EvaluationContext;
use crate::filters;
use crate::value_utils::{is_truthy, number_as_f64};

/// Evaluate an expression against a context. Never fails.
#[must_use]
pub fn eval(expr: &Expr, ctx: &EvaluationContext) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),

        Expr::Path { root, segments } => eval_path(root, segments, ctx),

        Expr::Pipe {
            input,
            filter,
            args,
        } => {
            let value = eval(input, ctx);
            filters::apply(filter, value, args)
        }

        Expr::Not(inner) => Value::Bool(!is_truthy(&eval(inner, ctx))),

        Expr::Binary { op, left, right } => eval_binary(*op, left, right, ctx),
    }
}

fn eval_binary(op: BinaryOp, left: &Expr, right: &Expr, ctx: &EvaluationContext) -> Value {
    // Short-circuit the logical operators on truthiness.
    match op {
        BinaryOp::And => {
            let lhs = eval(left, ctx);
            if !is_truthy(&lhs) {
                return Value::Bool(false);
            }
            return Value::Bool(is_truthy(&eval(right, ctx)));
        }
        BinaryOp::Or => {
            let lhs = eval(left, ctx);
            if is_truthy(&lhs) {
                return Value::Bool(true);
            }
            return Value::Bool(is_truthy(&eval(right, ctx)));
        }
        _ => {}
    }

    let lhs = eval(left, ctx);
    let rhs = eval(right, ctx);
    let result = match op {
        BinaryOp::Eq => values_equal(&lhs, &rhs),
        BinaryOp::Ne => !values_equal(&lhs, &rhs),
        BinaryOp::Lt => compare(&lhs, &rhs, |o| o == std::cmp::Ordering::Less),
        BinaryOp::Gt => compare(&lhs, &rhs, |o| o == std::cmp::Ordering::Greater),
        BinaryOp::Le => compare(&lhs, &rhs, |o| o != std::cmp::Ordering::Greater),
        BinaryOp::Ge => compare(&lhs, &rhs, |o| o != std::cmp::Ordering::Less),
        BinaryOp::And | BinaryOp::Or => unreachable!(), // handled above
    };
    Value::Bool(result)
}

/// Structural equality with numeric coercion (`1 == 1.0` is true).
fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Value::Number(l), Value::Number(r)) = (left, right) {
        match (number_as_f64(l), number_as_f64(r)) {
            (Some(lf), Some(rf)) => return lf == rf,
            _ => return l == r,
        }
    }
    left == right
}

/// Ordered comparison. Numbers compare numerically, strings
/// lexicographically; any other pairing is `false`.
fn compare(left: &Value, right: &Value, check: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            match (number_as_f64(l), number_as_f64(r)) {
                (Some(lf), Some(rf)) => lf.partial_cmp(&rf).is_some_and(check),
                _ => false,
            }
        }
        (Value::String(l), Value::String(r)) => check(l.cmp(r)),
        _ => false,
    }
}

fn eval_path(root: &Root, segments: &[Segment], ctx: &EvaluationContext) -> Value {
    match root {
        Root::Vars => walk_map(ctx.vars(), segments),
        Root::Env => walk_map(ctx.env(), segments),
        Root::Creds => walk_map(ctx.creds(), segments),
        Root::Input => {
            let input = ctx.vars().get("input").cloned().unwrap_or(Value::Null);
            walk(&input, segments)
        }
        Root::Loop => {
            let frame = ctx.loop_frame().cloned().unwrap_or(Value::Null);
            walk(&frame, segments)
        }
        Root::Prev => eval_prev(segments, ctx),
        Root::Ident(name) => {
            let base = ctx
                .vars()
                .get(name)
                .or_else(|| ctx.env().get(name))
                .cloned()
                .unwrap_or(Value::Null);
            walk(&base, segments)
        }
    }
}

/// Resolve a `$prev` path.
///
/// The first segment disambiguates: a completed node id selects that node's
/// output, an integer selects by completion-order offset, and anything else
/// is a field access on the most recent output.
fn eval_prev(segments: &[Segment], ctx: &EvaluationContext) -> Value {
    let Some(first) = segments.first() else {
        return ctx.prev_latest().cloned().unwrap_or(Value::Null);
    };

    match first {
        Segment::Index(offset) => {
            let base = ctx.prev_by_offset(*offset).cloned().unwrap_or(Value::Null);
            walk(&base, &segments[1..])
        }
        Segment::Key(key) => {
            if let Some(output) = ctx.prev_by_node(key) {
                return walk(&output.clone(), &segments[1..]);
            }
            let base = ctx.prev_latest().cloned().unwrap_or(Value::Null);
            walk(&base, segments)
        }
    }
}

/// Walk segments starting from a scope map without cloning the whole map.
fn walk_map(map: &serde_json::Map<String, Value>, segments: &[Segment]) -> Value {
    match segments.split_first() {
        None => Value::Object(map.clone()),
        Some((Segment::Key(key), rest)) => {
            map.get(key).map_or(Value::Null, |v| walk(v, rest))
        }
        Some((Segment::Index(idx), rest)) => map
            .get(&idx.to_string())
            .map_or(Value::Null, |v| walk(v, rest)),
    }
}

/// Walk segments down a value. A missing segment yields `null`.
fn walk(value: &Value, segments: &[Segment]) -> Value {
    let mut current = value;
    for segment in segments {
        current = match (current, segment) {
            (Value::Object(map), Segment::Key(key)) => {
                map.get(key).unwrap_or(&Value::Null)
            }
            (Value::Array(arr), Segment::Index(idx)) => {
                arr.get(*idx as usize).unwrap_or(&Value::Null)
            }
            // Numeric key on an object (`.0` on {"0": …}) still resolves.
            (Value::Object(map), Segment::Index(idx)) => {
                map.get(&idx.to_string()).unwrap_or(&Value::Null)
            }
            _ => return Value::Null,
        };
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;
    use crate::template::Position;
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};

    fn ctx() -> EvaluationContext {
        let mut vars = Map::new();
        vars.insert("count".into(), json!(5));
        vars.insert("name".into(), json!("router-a"));
        vars.insert("hosts".into(), json!(["10.0.0.1", "10.0.0.2"]));
        vars.insert("input".into(), json!({"target": "lab"}));

        let mut env = Map::new();
        env.insert("site".into(), json!("fra1"));

        EvaluationContext::builder()
            .vars(vars)
            .env(env)
            .completed("scan", json!({"open_ports": [22, 80]}))
            .completed("ping", json!({"reachable": true, "latency": 12}))
            .build()
    }

    fn run(src: &str, ctx: &EvaluationContext) -> Value {
        let expr = parse_expression(src, Position::start()).unwrap();
        eval(&expr, ctx)
    }

    #[test]
    fn literals_evaluate_to_themselves() {
        let c = ctx();
        assert_eq!(run("42", &c), json!(42));
        assert_eq!(run("'hi'", &c), json!("hi"));
        assert_eq!(run("null", &c), json!(null));
    }

    #[test]
    fn vars_and_env_paths() {
        let c = ctx();
        assert_eq!(run("$vars.count", &c), json!(5));
        assert_eq!(run("$vars.hosts.1", &c), json!("10.0.0.2"));
        assert_eq!(run("$env.site", &c), json!("fra1"));
        assert_eq!(run("$input.target", &c), json!("lab"));
    }

    #[test]
    fn bare_identifier_checks_vars_then_env() {
        let c = ctx();
        assert_eq!(run("count", &c), json!(5));
        assert_eq!(run("site", &c), json!("fra1"));
        assert_eq!(run("missing", &c), json!(null));
    }

    #[test]
    fn missing_segments_yield_null() {
        let c = ctx();
        assert_eq!(run("$vars.nope", &c), json!(null));
        assert_eq!(run("$vars.hosts.9", &c), json!(null));
        assert_eq!(run("$vars.count.deep.er", &c), json!(null));
        assert_eq!(run("$loop.index", &c), json!(null));
    }

    #[test]
    fn prev_bare_is_latest_completion() {
        let c = ctx();
        assert_eq!(run("$prev", &c), json!({"reachable": true, "latency": 12}));
        assert_eq!(run("$prev.latency", &c), json!(12));
    }

    #[test]
    fn prev_by_node_id() {
        let c = ctx();
        assert_eq!(run("$prev.scan.open_ports.0", &c), json!(22));
    }

    #[test]
    fn prev_by_offset() {
        let c = ctx();
        assert_eq!(run("$prev.1.latency", &c), json!(12));
        assert_eq!(run("$prev.2.open_ports", &c), json!([22, 80]));
        assert_eq!(run("$prev.9", &c), json!(null));
    }

    #[test]
    fn prev_field_falls_back_to_latest_output() {
        let c = ctx();
        // "reachable" is not a node id, so it reads the latest output.
        assert_eq!(run("$prev.reachable", &c), json!(true));
    }

    #[test]
    fn comparisons() {
        let c = ctx();
        assert_eq!(run("$vars.count > 3", &c), json!(true));
        assert_eq!(run("$vars.count > 10", &c), json!(false));
        assert_eq!(run("$vars.count == 5", &c), json!(true));
        assert_eq!(run("$vars.count != 5", &c), json!(false));
        assert_eq!(run("$vars.name == 'router-a'", &c), json!(true));
        assert_eq!(run("'abc' < 'abd'", &c), json!(true));
    }

    #[test]
    fn numeric_coercion_in_equality() {
        let c = ctx();
        assert_eq!(run("5 == 5.0", &c), json!(true));
        assert_eq!(run("5 >= 5.0", &c), json!(true));
    }

    #[test]
    fn incomparable_operands_are_false() {
        let c = ctx();
        assert_eq!(run("$vars.name > 3", &c), json!(false));
        assert_eq!(run("$vars.hosts < 'a'", &c), json!(false));
        // Missing path compares false, never errors.
        assert_eq!(run("$vars.nope > 10", &c), json!(false));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let c = ctx();
        assert_eq!(run("$vars.count > 3 && $vars.name == 'router-a'", &c), json!(true));
        assert_eq!(run("$vars.count > 10 || $vars.count == 5", &c), json!(true));
        assert_eq!(run("!($vars.count > 10)", &c), json!(true));
        // Null is falsy.
        assert_eq!(run("$vars.nope && true", &c), json!(false));
    }

    #[test]
    fn pipeline_applies_filters() {
        let c = ctx();
        assert_eq!(run("$vars.name | upper", &c), json!("ROUTER-A"));
        assert_eq!(run("$vars.hosts | length", &c), json!(2));
        assert_eq!(run("$vars.hosts | first", &c), json!("10.0.0.1"));
        assert_eq!(run("$vars.nope | default('fallback')", &c), json!("fallback"));
        assert_eq!(run("$vars.hosts | join(', ')", &c), json!("10.0.0.1, 10.0.0.2"));
    }

    #[test]
    fn pipeline_feeds_comparison() {
        let c = ctx();
        assert_eq!(run("$vars.hosts | length > 1", &c), json!(true));
        assert_eq!(run("$vars.hosts | length > 5", &c), json!(false));
    }

    #[test]
    fn unknown_filter_passes_value_through() {
        let c = ctx();
        assert_eq!(run("$vars.name | shimmer", &c), json!("router-a"));
    }

    #[test]
    fn evaluation_does_not_mutate_context() {
        let c = ctx();
        let before = format!("{c:?}");
        let _ = run("$vars.hosts | join(',') == 'x' && $prev.scan.open_ports | length > 0", &c);
        assert_eq!(format!("{c:?}"), before);
    }
}
