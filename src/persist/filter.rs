//! Filter predicates over dotted document paths.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;

use super::Document;

/// Condition applied to one document path. A missing field compares as `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value.
    Eq(Value),
    /// Field differs from the value (missing fields differ from non-null values).
    Ne(Value),
    /// Field equals one of the values.
    In(Vec<Value>),
    /// Field lies inside the inclusive bounds.
    Range {
        /// Inclusive lower bound.
        gte: Option<Value>,
        /// Inclusive upper bound.
        lte: Option<Value>,
    },
}

impl Condition {
    /// Inclusive range `[center - radius, center + radius]`.
    pub fn around(center: i64, radius: i64) -> Self {
        Condition::Range {
            gte: Some(Value::from(center - radius)),
            lte: Some(Value::from(center + radius)),
        }
    }

    /// Evaluates the condition against a field value.
    pub fn matches(&self, field: Option<&Value>) -> bool {
        let field = field.unwrap_or(&Value::Null);
        match self {
            Condition::Eq(v) => values_equal(field, v),
            Condition::Ne(v) => !values_equal(field, v),
            Condition::In(vs) => vs.iter().any(|v| values_equal(field, v)),
            Condition::Range { gte, lte } => {
                if field.is_null() {
                    return false;
                }
                let lower_ok = gte
                    .as_ref()
                    .is_none_or(|b| matches!(compare_values(field, b), Some(Ordering::Greater | Ordering::Equal)));
                let upper_ok = lte
                    .as_ref()
                    .is_none_or(|b| matches!(compare_values(field, b), Some(Ordering::Less | Ordering::Equal)));
                lower_ok && upper_ok
            }
        }
    }
}

/// Conjunction of per-path conditions; one condition per path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: BTreeMap<String, Condition>,
}

impl Filter {
    /// Filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the condition for `path`, replacing any previous one.
    pub fn set(&mut self, path: impl Into<String>, cond: Condition) -> &mut Self {
        self.clauses.insert(path.into(), cond);
        self
    }

    /// Builder form of [`Filter::set`].
    pub fn with(mut self, path: impl Into<String>, cond: Condition) -> Self {
        self.set(path, cond);
        self
    }

    /// Removes the condition for `path`.
    pub fn remove(&mut self, path: &str) -> Option<Condition> {
        self.clauses.remove(path)
    }

    /// Removes every condition whose path is `prefix` or lies under it.
    pub fn remove_prefix(&mut self, prefix: &str) {
        let nested = format!("{prefix}.");
        self.clauses
            .retain(|path, _| path != prefix && !path.starts_with(&nested));
    }

    /// Condition for `path`, if any.
    pub fn get(&self, path: &str) -> Option<&Condition> {
        self.clauses.get(path)
    }

    /// All `(path, condition)` pairs in path order.
    pub fn clauses(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.clauses.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True when no condition is set.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// True when `doc` satisfies every condition.
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(path, cond)| cond.matches(lookup(doc, path)))
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Single-field sort. Ties fall back to insertion order in the same direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// Dotted field path.
    pub field: String,
    /// Direction.
    pub order: SortOrder,
}

impl Sort {
    /// Ascending sort on `field`.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }

    /// Descending sort on `field`.
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }
}

/// Resolves a dotted path such as `location.x`.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut cur = doc.get(parts.next()?)?;
    for part in parts {
        cur = cur.as_object()?.get(part)?;
    }
    Some(cur)
}

/// Equality with numbers compared by value, so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Orders two scalars of the same kind; mixed kinds are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn compare_numbers(x: &serde_json::Number, y: &serde_json::Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return Some(a.cmp(&b));
    }
    x.as_f64()?.partial_cmp(&y.as_f64()?)
}
