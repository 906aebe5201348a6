//! Grouped placed/destroyed counts over block-change records.

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use crate::{
    action::{ACTOR_FIELD, BLOCK_CHANGE_TAG, BLOCK_FROM_FIELD, BLOCK_TO_FIELD, TYPE_FIELD},
    persist::{
        Document, DocumentStore, StoreResult,
        filter::{Condition, Filter},
        pipeline::{Accumulator, Expr, Group, Predicate, Stage},
    },
    query::AggregationMode,
    types::ActorId,
    world::Directory,
};

/// One output row: a player name or material with its counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRow {
    /// Player display name or material name.
    pub label: String,
    /// Records that put a block down.
    pub placed: u64,
    /// Records that removed a block.
    pub destroyed: u64,
}

/// Runs `sum` queries against a store.
pub struct AggregationEngine<'a> {
    store: &'a dyn DocumentStore,
    collection: &'a str,
    directory: &'a dyn Directory,
}

impl<'a> AggregationEngine<'a> {
    /// Engine over `collection`, labelling players through `directory`.
    pub fn new(store: &'a dyn DocumentStore, collection: &'a str, directory: &'a dyn Directory) -> Self {
        Self {
            store,
            collection,
            directory,
        }
    }

    /// Counts block changes matching `filter`, grouped by `mode`.
    pub fn run(&self, mode: AggregationMode, filter: &Filter) -> StoreResult<Vec<AggregateRow>> {
        let base = filter
            .clone()
            .with(TYPE_FIELD, Condition::Eq(Value::from(BLOCK_CHANGE_TAG)));
        match mode {
            AggregationMode::Players => self.by_player(base),
            AggregationMode::Blocks => self.by_block(base),
        }
    }

    fn by_player(&self, filter: Filter) -> StoreResult<Vec<AggregateRow>> {
        let stages = vec![
            Stage::Match(filter),
            Stage::Project(vec![
                ACTOR_FIELD.to_string(),
                BLOCK_FROM_FIELD.to_string(),
                BLOCK_TO_FIELD.to_string(),
            ]),
            Stage::Group(Group {
                key: ACTOR_FIELD.to_string(),
                accumulators: vec![
                    ("placed".to_string(), Accumulator::Sum(non_null(BLOCK_TO_FIELD))),
                    ("destroyed".to_string(), Accumulator::Sum(non_null(BLOCK_FROM_FIELD))),
                ],
            }),
        ];

        let rows = self.store.aggregate(self.collection, &stages)?;
        Ok(rows
            .iter()
            .map(|row| AggregateRow {
                label: self.player_label(row.get("_id")),
                placed: count(row, "placed"),
                destroyed: count(row, "destroyed"),
            })
            .collect())
    }

    fn by_block(&self, filter: Filter) -> StoreResult<Vec<AggregateRow>> {
        let mut totals: BTreeMap<String, (u64, u64)> = BTreeMap::new();

        for (field, placed) in [(BLOCK_FROM_FIELD, false), (BLOCK_TO_FIELD, true)] {
            let stages = vec![
                Stage::Match(filter.clone().with(field, Condition::Ne(Value::Null))),
                Stage::Project(vec![BLOCK_FROM_FIELD.to_string(), BLOCK_TO_FIELD.to_string()]),
                Stage::Group(Group {
                    key: field.to_string(),
                    accumulators: vec![("value".to_string(), Accumulator::Sum(Expr::Const(1)))],
                }),
            ];
            for row in self.store.aggregate(self.collection, &stages)? {
                let Some(material) = row.get("_id").and_then(Value::as_str) else {
                    continue;
                };
                let entry = totals.entry(material.to_string()).or_default();
                if placed {
                    entry.0 = count(&row, "value");
                } else {
                    entry.1 = count(&row, "value");
                }
            }
        }

        Ok(totals
            .into_iter()
            .map(|(label, (placed, destroyed))| AggregateRow {
                label,
                placed,
                destroyed,
            })
            .collect())
    }

    fn player_label(&self, id: Option<&Value>) -> String {
        let Some(raw) = id.and_then(Value::as_str) else {
            return "unknown".to_string();
        };
        Uuid::parse_str(raw)
            .ok()
            .and_then(|uuid| self.directory.player_name(ActorId(uuid)))
            .unwrap_or_else(|| raw.to_string())
    }
}

fn non_null(field: &str) -> Expr {
    Expr::Cond {
        predicate: Predicate::IsNull(field.to_string()),
        then: 0,
        otherwise: 1,
    }
}

fn count(row: &Document, field: &str) -> u64 {
    row.get(field).and_then(Value::as_u64).unwrap_or(0)
}
