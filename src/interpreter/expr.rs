//! Expressions evaluated against execution-context bindings.
//!
//! Expressions are externally tagged:
//!
//! ```json
//! {"and": [{"exists": "params.selector"},
//!          {"gt": [{"length": {"query": ".overlay"}}, {"literal": 0}]}]}
//! ```

use std::cmp::Ordering;

use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::ExecutionContext;
use crate::error::{Result, RuntimeError};
use crate::host::PageHost;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_$\-]+(?:\.[A-Za-z0-9_$\-]+)*)\s*\}\}").unwrap()
});

/// A value-producing expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    /// Dotted path into the bindings; unbound paths are `null`.
    Var(String),
    Literal(Value),
    /// String with `{{path}}` placeholders.
    Template(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    /// Substring, array membership, or object key.
    Contains(Box<Expr>, Box<Expr>),
    Length(Box<Expr>),
    /// Whether a path is bound to a non-null value.
    Exists(String),
    /// Elements matching a selector on the page.
    Query(String),
}

impl Expr {
    /// Evaluate against `ctx`, querying `host` for `query` expressions.
    ///
    /// `max_items` caps the number of elements a query may return.
    pub fn evaluate<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        host: &'a dyn PageHost,
        max_items: usize,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            let value = match self {
                Self::Var(path) => ctx.lookup(path).cloned().unwrap_or(Value::Null),
                Self::Literal(v) => v.clone(),
                Self::Template(t) => Value::String(render_template(t, ctx)),
                Self::Not(e) => Value::Bool(!truthy(&e.evaluate(ctx, host, max_items).await?)),
                Self::And(items) => {
                    for e in items {
                        if !truthy(&e.evaluate(ctx, host, max_items).await?) {
                            return Ok(Value::Bool(false));
                        }
                    }
                    Value::Bool(true)
                }
                Self::Or(items) => {
                    for e in items {
                        if truthy(&e.evaluate(ctx, host, max_items).await?) {
                            return Ok(Value::Bool(true));
                        }
                    }
                    Value::Bool(false)
                }
                Self::Eq(a, b) => {
                    let (a, b) = pair(a, b, ctx, host, max_items).await?;
                    Value::Bool(loose_eq(&a, &b))
                }
                Self::Ne(a, b) => {
                    let (a, b) = pair(a, b, ctx, host, max_items).await?;
                    Value::Bool(!loose_eq(&a, &b))
                }
                Self::Gt(a, b) => {
                    let (a, b) = pair(a, b, ctx, host, max_items).await?;
                    Value::Bool(compare(&a, &b)? == Ordering::Greater)
                }
                Self::Lt(a, b) => {
                    let (a, b) = pair(a, b, ctx, host, max_items).await?;
                    Value::Bool(compare(&a, &b)? == Ordering::Less)
                }
                Self::Contains(a, b) => {
                    let (haystack, needle) = pair(a, b, ctx, host, max_items).await?;
                    Value::Bool(contains(&haystack, &needle))
                }
                Self::Length(e) => {
                    let len = match e.evaluate(ctx, host, max_items).await? {
                        Value::Array(a) => a.len(),
                        Value::Object(o) => o.len(),
                        Value::String(s) => s.chars().count(),
                        Value::Null => 0,
                        other => {
                            return Err(RuntimeError::action(
                                "length",
                                format!("value has no length: {other}"),
                            ))
                        }
                    };
                    Value::from(len)
                }
                Self::Exists(path) => {
                    Value::Bool(ctx.lookup(path).map_or(false, |v| !v.is_null()))
                }
                Self::Query(selector) => {
                    let selector = render_template(selector, ctx);
                    let elements = host.query(&selector).await?;
                    if elements.len() > max_items {
                        return Err(RuntimeError::action(
                            "query",
                            format!(
                                "'{}' matched {} elements (limit {})",
                                selector,
                                elements.len(),
                                max_items
                            ),
                        ));
                    }
                    Value::Array(elements)
                }
            };
            Ok(value)
        }
        .boxed()
    }
}

async fn pair(
    a: &Expr,
    b: &Expr,
    ctx: &ExecutionContext,
    host: &dyn PageHost,
    max_items: usize,
) -> Result<(Value, Value)> {
    let left = a.evaluate(ctx, host, max_items).await?;
    let right = b.evaluate(ctx, host, max_items).await?;
    Ok((left, right))
}

/// JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality that treats `1` and `1.0` as equal.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y)
                .ok_or_else(|| RuntimeError::action("compare", "cannot order NaN"))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(RuntimeError::action(
            "compare",
            format!("cannot order {a} and {b}"),
        )),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().map_or(false, |n| s.contains(n)),
        Value::Array(items) => items.iter().any(|i| loose_eq(i, needle)),
        Value::Object(map) => needle.as_str().map_or(false, |k| map.contains_key(k)),
        _ => false,
    }
}

/// Replace `{{path}}` placeholders with bound values.
///
/// Strings are inserted raw, other values as JSON; unbound paths render
/// as the empty string.
pub fn render_template(template: &str, ctx: &ExecutionContext) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match ctx.lookup(&caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

/// Render templates inside a JSON value.
///
/// A string that is exactly one placeholder is replaced by the bound value
/// itself, keeping its type.
pub fn render_value(value: &Value, ctx: &ExecutionContext) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = PLACEHOLDER.captures(s) {
                if caps.get(0).map_or(false, |m| m.as_str().len() == s.len()) {
                    return ctx.lookup(&caps[1]).cloned().unwrap_or(Value::Null);
                }
            }
            Value::String(render_template(s, ctx))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}
