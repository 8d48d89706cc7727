//! Interpreter for spawn conditions.
//!
//! A [`SpawnCondition`] is a small tagged tree of comparisons over dotted
//! field paths. It is evaluated against a JSON scope built from the parent
//! task, its result and the run context:
//!
//! | root        | contents                                  |
//! |-------------|-------------------------------------------|
//! | `task`      | the parent `Task`                         |
//! | `result`    | the parent's `AgentResult`                |
//! | `inputs`    | the parent's input bindings (`{}` if none) |
//! | `previous`  | `previous_results` keyed by step name     |
//! | `variables` | run-level variables                       |
//!
//! Nothing here executes code: the only operations are path lookup and
//! value comparison.

use std::cmp::Ordering;

use maestro_types::agent::AgentResult;
use maestro_types::task::Task;
use maestro_types::workflow::{CompareOp, SpawnCondition};
use serde_json::{Value, json};

use super::context::RunContext;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("cannot apply '{op:?}' to field '{field}' ({found}) and {expected}")]
    TypeMismatch {
        field: String,
        op: CompareOp,
        found: Value,
        expected: Value,
    },

    #[error("invalid scope: {0}")]
    InvalidScope(String),
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Build the evaluation scope for a spawn condition.
pub fn evaluation_scope(
    task: &Task,
    result: &AgentResult,
    context: &RunContext,
) -> Result<Value, ConditionError> {
    let to_value = |v: serde_json::Result<Value>| {
        v.map_err(|e| ConditionError::InvalidScope(e.to_string()))
    };
    Ok(json!({
        "task": to_value(serde_json::to_value(task))?,
        "result": to_value(serde_json::to_value(result))?,
        "inputs": to_value(serde_json::to_value(task.inputs.clone().unwrap_or_default()))?,
        "previous": to_value(serde_json::to_value(&context.previous_results))?,
        "variables": to_value(serde_json::to_value(&context.variables))?,
    }))
}

/// Resolve a dotted path (`result.success`, `previous.plan.summary`,
/// `inputs.files.0`). Numeric segments index into arrays.
pub fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(scope, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a condition against a scope.
///
/// Missing fields resolve to `null`. Ordering comparisons need two numbers
/// or two strings; anything else is a [`ConditionError::TypeMismatch`].
pub fn evaluate(condition: &SpawnCondition, scope: &Value) -> Result<bool, ConditionError> {
    if !scope.is_object() {
        return Err(ConditionError::InvalidScope(
            "scope must be a JSON object".to_string(),
        ));
    }
    eval(condition, scope)
}

fn eval(condition: &SpawnCondition, scope: &Value) -> Result<bool, ConditionError> {
    match condition {
        SpawnCondition::Compare { field, op, value } => {
            let found = lookup(scope, field).unwrap_or(&Value::Null);
            compare(field, *op, found, value)
        }
        SpawnCondition::Exists { field } => {
            Ok(lookup(scope, field).is_some_and(|v| !v.is_null()))
        }
        SpawnCondition::All { conditions } => {
            for c in conditions {
                if !eval(c, scope)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        SpawnCondition::Any { conditions } => {
            for c in conditions {
                if eval(c, scope)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        SpawnCondition::Not { condition } => Ok(!eval(condition, scope)?),
    }
}

fn compare(field: &str, op: CompareOp, found: &Value, expected: &Value) -> Result<bool, ConditionError> {
    let mismatch = || ConditionError::TypeMismatch {
        field: field.to_string(),
        op,
        found: found.clone(),
        expected: expected.clone(),
    };

    match op {
        CompareOp::Eq => Ok(values_equal(found, expected)),
        CompareOp::Ne => Ok(!values_equal(found, expected)),
        CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
            let ordering = ordering(found, expected).ok_or_else(mismatch)?;
            Ok(match op {
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        CompareOp::Contains => match (found, expected) {
            (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
            (Value::Array(items), needle) => Ok(items.iter().any(|i| values_equal(i, needle))),
            (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
            (Value::Null, _) => Ok(false),
            _ => Err(mismatch()),
        },
    }
}

/// JSON equality, except that numbers compare by value (`1 == 1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::task::AgentRole;

    fn cmp(field: &str, op: CompareOp, value: Value) -> SpawnCondition {
        SpawnCondition::Compare {
            field: field.to_string(),
            op,
            value,
        }
    }

    fn scope() -> Value {
        let mut inputs = std::collections::HashMap::new();
        inputs.insert("region".to_string(), json!("eu-west"));
        inputs.insert("files".to_string(), json!(["a.rs", "b.rs"]));
        let task = Task::new(AgentRole::named("dev"), "build", "wf", "build", Some(inputs));
        let result = AgentResult::succeeded("built 3 crates");

        let mut ctx = RunContext::new().with_variable("threshold", json!(2));
        ctx.record("plan", AgentResult::succeeded("planned"));

        evaluation_scope(&task, &result, &ctx).unwrap()
    }

    #[test]
    fn test_lookup_paths() {
        let s = scope();
        assert_eq!(lookup(&s, "result.success"), Some(&json!(true)));
        assert_eq!(lookup(&s, "task.step_name"), Some(&json!("build")));
        assert_eq!(lookup(&s, "inputs.files.1"), Some(&json!("b.rs")));
        assert_eq!(lookup(&s, "previous.plan.summary"), Some(&json!("planned")));
        assert_eq!(lookup(&s, "inputs.files.9"), None);
        assert_eq!(lookup(&s, "result.success.deeper"), None);
    }

    #[test]
    fn test_compare_ops() {
        let s = scope();
        assert!(evaluate(&cmp("result.success", CompareOp::Eq, json!(true)), &s).unwrap());
        assert!(evaluate(&cmp("task.status", CompareOp::Ne, json!("failed")), &s).unwrap());
        assert!(evaluate(&cmp("variables.threshold", CompareOp::Ge, json!(2.0)), &s).unwrap());
        assert!(evaluate(&cmp("variables.threshold", CompareOp::Lt, json!(3)), &s).unwrap());
        assert!(!evaluate(&cmp("variables.threshold", CompareOp::Gt, json!(2)), &s).unwrap());
        assert!(evaluate(&cmp("inputs.region", CompareOp::Contains, json!("eu")), &s).unwrap());
        assert!(evaluate(&cmp("inputs.files", CompareOp::Contains, json!("a.rs")), &s).unwrap());
        assert!(evaluate(&cmp("inputs.region", CompareOp::Le, json!("us")), &s).unwrap());
    }

    #[test]
    fn test_missing_field_is_null() {
        let s = scope();
        assert!(evaluate(&cmp("inputs.nope", CompareOp::Eq, Value::Null), &s).unwrap());
        assert!(!evaluate(&cmp("inputs.nope", CompareOp::Contains, json!("x")), &s).unwrap());
        assert!(!evaluate(&SpawnCondition::Exists { field: "inputs.nope".into() }, &s).unwrap());
        assert!(evaluate(&SpawnCondition::Exists { field: "inputs.region".into() }, &s).unwrap());
    }

    #[test]
    fn test_ordering_type_mismatch_is_error() {
        let s = scope();
        let err = evaluate(&cmp("inputs.region", CompareOp::Gt, json!(5)), &s).unwrap_err();
        assert!(matches!(err, ConditionError::TypeMismatch { .. }));
    }

    #[test]
    fn test_combinators() {
        let s = scope();
        let yes = cmp("result.success", CompareOp::Eq, json!(true));
        let no = cmp("result.success", CompareOp::Eq, json!(false));

        assert!(evaluate(&SpawnCondition::All { conditions: vec![] }, &s).unwrap());
        assert!(!evaluate(&SpawnCondition::Any { conditions: vec![] }, &s).unwrap());
        assert!(
            evaluate(
                &SpawnCondition::All {
                    conditions: vec![yes.clone(), SpawnCondition::Not { condition: Box::new(no.clone()) }]
                },
                &s
            )
            .unwrap()
        );
        assert!(evaluate(&SpawnCondition::Any { conditions: vec![no.clone(), yes] }, &s).unwrap());
        assert!(!evaluate(&SpawnCondition::Any { conditions: vec![no] }, &s).unwrap());
    }

    #[test]
    fn test_short_circuit_skips_bad_branch() {
        let s = scope();
        let bad = cmp("inputs.region", CompareOp::Gt, json!(1));
        let no = cmp("result.success", CompareOp::Eq, json!(false));
        let cond = SpawnCondition::All { conditions: vec![no, bad] };
        assert!(!evaluate(&cond, &s).unwrap());
    }

    #[test]
    fn test_non_object_scope_rejected() {
        let err = evaluate(&SpawnCondition::All { conditions: vec![] }, &json!(1)).unwrap_err();
        assert!(matches!(err, ConditionError::InvalidScope(_)));
    }
}
