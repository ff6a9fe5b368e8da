//! Comparison engine: structural equality of CLI and RPC responses, and
//! assertions about how a CLI invocation fails.
//!
//! Every check is single-shot. Inputs are only ever borrowed.

use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::HarnessError;
use crate::invoker::ProcessInvoker;
use crate::types::{ComparisonExpectation, Invocation, InvocationResult};

/// Largest integer an f64 holds exactly.
const F64_EXACT_INT_LIMIT: f64 = 9_007_199_254_740_992.0;

/// One point where two values disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Difference {
    /// JSON-path-like location, `$` being the root.
    pub path: String,
    pub expected: String,
    pub actual: String,
}

pub fn render_differences(differences: &[Difference]) -> String {
    differences
        .iter()
        .map(|d| format!("  {}: expected {}, got {}", d.path, d.expected, d.actual))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Canonical decimal text for a JSON number, so `50`, `50.0` and
/// `50.00000000` all compare equal.
pub fn canonical_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < F64_EXACT_INT_LIMIT => format!("{}", f as i64),
        Some(f) => format!("{f}"),
        None => n.to_string(),
    }
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None => "<absent>".to_owned(),
        Some(Value::Number(n)) => canonical_number(n),
        Some(other) => other.to_string(),
    }
}

/// Every point where `actual` differs from `expected`.
pub fn diff(expected: &Value, actual: &Value) -> Vec<Difference> {
    let mut out = Vec::new();
    diff_at("$", expected, actual, &mut out);
    out
}

fn diff_at(path: &str, expected: &Value, actual: &Value, out: &mut Vec<Difference>) {
    match (expected, actual) {
        (Value::Object(e), Value::Object(a)) => {
            let keys: BTreeSet<&String> = e.keys().chain(a.keys()).collect();
            for key in keys {
                let child = format!("{path}.{key}");
                match (e.get(key), a.get(key)) {
                    (Some(ev), Some(av)) => diff_at(&child, ev, av, out),
                    (ev, av) => out.push(Difference {
                        path: child,
                        expected: describe(ev),
                        actual: describe(av),
                    }),
                }
            }
        }
        (Value::Array(e), Value::Array(a)) => {
            if e.len() != a.len() {
                out.push(Difference {
                    path: format!("{path}.length"),
                    expected: e.len().to_string(),
                    actual: a.len().to_string(),
                });
            }
            for (i, (ev, av)) in e.iter().zip(a).enumerate() {
                diff_at(&format!("{path}[{i}]"), ev, av, out);
            }
        }
        (Value::Number(e), Value::Number(a)) => {
            if canonical_number(e) != canonical_number(a) {
                out.push(Difference {
                    path: path.to_owned(),
                    expected: canonical_number(e),
                    actual: canonical_number(a),
                });
            }
        }
        (e, a) => {
            if e != a {
                out.push(Difference {
                    path: path.to_owned(),
                    expected: describe(Some(e)),
                    actual: describe(Some(a)),
                });
            }
        }
    }
}

/// Deep structural equality with numbers normalised.
pub fn assert_equal(context: &str, expected: &Value, actual: &Value) -> Result<(), HarnessError> {
    let differences = diff(expected, actual);
    if differences.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::Mismatch {
            context: context.to_owned(),
            differences,
        })
    }
}

/// A field of an aggregated response and where its ground truth lives.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub field: &'static str,
    /// Name of the RPC whose response holds the ground truth.
    pub source: &'static str,
    /// JSON pointer into that response.
    pub pointer: &'static str,
}

/// Compare selected fields of `aggregated` against their sources. A field
/// missing on either side is a difference.
pub fn assert_fields_match(
    context: &str,
    aggregated: &Value,
    mappings: &[FieldMapping],
    sources: &BTreeMap<&str, Value>,
) -> Result<(), HarnessError> {
    let mut expected = Map::new();
    let mut actual = Map::new();
    for m in mappings {
        if let Some(v) = sources.get(m.source).and_then(|s| s.pointer(m.pointer)) {
            expected.insert(m.field.to_owned(), v.clone());
        }
        if let Some(v) = aggregated.get(m.field) {
            actual.insert(m.field.to_owned(), v.clone());
        }
    }
    assert_equal(context, &Value::Object(expected), &Value::Object(actual))
}

fn outcome_error(
    invocation: &Invocation,
    result: &InvocationResult,
    expected: String,
    actual: String,
) -> HarnessError {
    HarnessError::UnexpectedOutcome {
        invocation: invocation.to_string(),
        expected,
        actual,
        stdout: result.stdout.clone(),
        stderr: result.stderr.clone(),
    }
}

impl ComparisonExpectation {
    /// Check a completed invocation (for `Failure`) or the two values (for
    /// `Equivalence`).
    pub fn verify(
        &self,
        invocation: &Invocation,
        result: &InvocationResult,
    ) -> Result<(), HarnessError> {
        match self {
            Self::Failure {
                exit_code,
                substring,
            } => {
                if result.exit_code != *exit_code {
                    return Err(outcome_error(
                        invocation,
                        result,
                        format!("exit code {exit_code}"),
                        format!("exit code {}", result.exit_code),
                    ));
                }
                if !result.combined_output().contains(substring.as_str()) {
                    return Err(outcome_error(
                        invocation,
                        result,
                        format!("output containing {substring:?}"),
                        "output without it".into(),
                    ));
                }
                Ok(())
            }
            Self::Equivalence { expected, actual } => {
                assert_equal(&invocation.to_string(), expected, actual)
            }
        }
    }
}

/// Run `invocation` and require exit code `expected_code` with
/// `expected_substring` somewhere in stderr or stdout.
pub async fn assert_process_fails(
    invoker: &ProcessInvoker,
    expected_code: i32,
    expected_substring: &str,
    invocation: &Invocation,
) -> Result<InvocationResult, HarnessError> {
    let result = invoker.invoke(invocation).await?;
    ComparisonExpectation::Failure {
        exit_code: expected_code,
        substring: expected_substring.to_owned(),
    }
    .verify(invocation, &result)?;
    Ok(result)
}

/// Run `invocation` and require exit code 0.
pub async fn expect_success(
    invoker: &ProcessInvoker,
    invocation: &Invocation,
) -> Result<InvocationResult, HarnessError> {
    let result = invoker.invoke(invocation).await?;
    if !result.success() {
        return Err(outcome_error(
            invocation,
            &result,
            "exit code 0".into(),
            format!("exit code {}", result.exit_code),
        ));
    }
    Ok(result)
}
