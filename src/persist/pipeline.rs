//! In-process aggregation pipeline.
//!
//! Stores that cannot push a pipeline down run it here: a leading `$match`
//! is split off and handed to `find`, then the remaining `$match`,
//! `$project` and `$group` stages run over the returned documents in order.

use hashbrown::HashMap;
use serde_json::Value;

use super::{
    Document,
    filter::{Filter, lookup},
};

/// Aggregation stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keep documents matching the filter.
    Match(Filter),
    /// Keep only the listed top-level fields.
    Project(Vec<String>),
    /// Group by a field and accumulate.
    Group(Group),
}

/// `$group` stage: key and accumulators.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Dotted path whose value becomes the group `_id`.
    pub key: String,
    /// Output field name and accumulator.
    pub accumulators: Vec<(String, Accumulator)>,
}

/// `$group` accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// `$sum` of an integer expression.
    Sum(Expr),
}

/// Integer-valued expression evaluated per document.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value.
    Const(i64),
    /// `$cond`: `then` when the predicate holds, else `otherwise`.
    Cond {
        /// Tested predicate.
        predicate: Predicate,
        /// Value when true.
        then: i64,
        /// Value when false.
        otherwise: i64,
    },
}

/// Boolean predicate used by [`Expr::Cond`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `$eq: [$path, null]`; a missing field counts as null.
    IsNull(String),
}

impl Predicate {
    fn eval(&self, doc: &Document) -> bool {
        match self {
            Predicate::IsNull(path) => lookup(doc, path).is_none_or(Value::is_null),
        }
    }
}

impl Expr {
    fn eval(&self, doc: &Document) -> i64 {
        match self {
            Expr::Const(v) => *v,
            Expr::Cond {
                predicate,
                then,
                otherwise,
            } => {
                if predicate.eval(doc) {
                    *then
                } else {
                    *otherwise
                }
            }
        }
    }
}

/// Splits off a leading `$match` so stores can push it down.
pub fn split_leading_match(stages: &[Stage]) -> (Filter, &[Stage]) {
    match stages.split_first() {
        Some((Stage::Match(filter), rest)) => (filter.clone(), rest),
        _ => (Filter::new(), stages),
    }
}

/// Runs `stages` over `docs` in order.
pub fn run(mut docs: Vec<Document>, stages: &[Stage]) -> Vec<Document> {
    for stage in stages {
        docs = match stage {
            Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
            Stage::Project(fields) => docs.into_iter().map(|d| project(d, fields)).collect(),
            Stage::Group(group) => run_group(&docs, group),
        };
    }
    docs
}

fn project(mut doc: Document, fields: &[String]) -> Document {
    let mut out = Document::new();
    for field in fields {
        if let Some(v) = doc.remove(field) {
            out.insert(field.clone(), v);
        }
    }
    out
}

fn run_group(docs: &[Document], group: &Group) -> Vec<Document> {
    // Groups keep first-seen order.
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut keys: Vec<Value> = Vec::new();
    let mut sums: Vec<Vec<i64>> = Vec::new();

    for doc in docs {
        let key = lookup(doc, &group.key).cloned().unwrap_or(Value::Null);
        let slot = *index.entry(key.to_string()).or_insert_with(|| {
            keys.push(key.clone());
            sums.push(vec![0; group.accumulators.len()]);
            keys.len() - 1
        });
        for (acc_idx, (_, acc)) in group.accumulators.iter().enumerate() {
            let Accumulator::Sum(expr) = acc;
            sums[slot][acc_idx] += expr.eval(doc);
        }
    }

    keys.into_iter()
        .zip(sums)
        .map(|(key, totals)| {
            let mut out = Document::new();
            out.insert("_id".to_string(), key);
            for ((name, _), total) in group.accumulators.iter().zip(totals) {
                out.insert(name.clone(), Value::from(total));
            }
            out
        })
        .collect()
}
