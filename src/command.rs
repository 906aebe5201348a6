//! Operator command: parse, then view, sum, roll back, or redo.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    action::{ActionKind, ActionRecord, RecordState, STATE_FIELD},
    aggregate::{AggregateRow, AggregationEngine},
    persist::{SharedStore, StoreError, filter::Condition},
    query::{AggregationMode, Issuer, LastQueryCache, QueryBuilder, QueryError, QueryParams},
    rollback::{ReplayReport, RollbackEngine},
    types::{ActorId, now_ms},
    world::{Directory, World},
};

/// Why a command produced no result.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The tokens did not form a valid query.
    #[error(transparent)]
    Query(#[from] QueryError),
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result body of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// Matching live records, newest first.
    Actions(Vec<ActionRecord>),
    /// `sum` rows.
    Aggregation {
        /// Grouping used.
        mode: AggregationMode,
        /// Rows in label order.
        rows: Vec<AggregateRow>,
    },
    /// Rollback or redo summary.
    Replay(ReplayReport),
}

/// Command result with its wall-clock duration.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Result body.
    pub report: Report,
    /// Player names used when rendering.
    pub names: Vec<(ActorId, String)>,
    /// Time spent querying and replaying.
    pub elapsed: Duration,
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.report {
            Report::Actions(records) => {
                writeln!(f, "{} matching actions", records.len())?;
                for record in records {
                    let who = self
                        .names
                        .iter()
                        .find(|(id, _)| *id == record.actor)
                        .map(|(_, name)| name.clone())
                        .unwrap_or_else(|| record.actor.to_string());
                    writeln!(f, "  [{}] {} {} at {}", record.timestamp_ms, who, describe(&record.kind), record.pos)?;
                }
            }
            Report::Aggregation { mode, rows } => {
                let heading = match mode {
                    AggregationMode::Players => "Player",
                    AggregationMode::Blocks => "Block",
                };
                writeln!(f, "{heading}: placed / destroyed")?;
                for row in rows {
                    writeln!(f, "  {}: +{} -{}", row.label, row.placed, row.destroyed)?;
                }
            }
            Report::Replay(report) => {
                writeln!(
                    f,
                    "{}: {} applied, {} skipped on conflict, {} blocks changed",
                    report.direction, report.applied, report.conflicts, report.locations_written
                )?;
            }
        }
        write!(f, "Time taken: {} seconds", self.elapsed.as_secs_f64())
    }
}

fn describe(kind: &ActionKind) -> String {
    match kind {
        ActionKind::BlockChange(change) => match (&change.block_from, &change.block_to) {
            (None, Some(to)) => format!("placed {to}"),
            (Some(from), None) => format!("broke {from}"),
            (Some(from), Some(to)) => format!("replaced {from} with {to}"),
            (None, None) => "touched air".to_string(),
        },
        ActionKind::InventoryChange(change) if change.amount >= 0 => {
            format!("put {} {} into {}", change.amount, change.item, change.block)
        }
        ActionKind::InventoryChange(change) => {
            format!("took {} {} from {}", -change.amount, change.item, change.block)
        }
    }
}

/// Command handler holding the per-operator last-query cache.
pub struct LogCommand {
    store: SharedStore,
    collection: String,
    directory: Arc<dyn Directory + Send + Sync>,
    cache: LastQueryCache,
}

impl LogCommand {
    /// Handler over `collection` in `store`.
    pub fn new(store: SharedStore, collection: impl Into<String>, directory: Arc<dyn Directory + Send + Sync>) -> Self {
        Self {
            store,
            collection: collection.into(),
            directory,
            cache: LastQueryCache::new(),
        }
    }

    /// Cached query for an operator.
    pub fn last_query(&self, actor: ActorId) -> Option<&QueryParams> {
        self.cache.get(actor)
    }

    /// Parses `tokens` and runs the query. Rollback and redo write to
    /// `world` before returning. Query errors abort before the store or
    /// world is touched.
    pub async fn execute<S: AsRef<str>>(
        &mut self,
        issuer: &Issuer,
        tokens: &[S],
        world: &mut dyn World,
    ) -> Result<CommandOutput, CommandError> {
        let params = QueryBuilder::new(self.directory.as_ref(), now_ms()).parse(
            issuer,
            tokens,
            self.cache.get(issuer.actor),
        )?;
        self.cache.put(issuer.actor, params.clone());

        let started = Instant::now();
        let mut store = self.store.lock().await;

        let report = if let Some(mode) = params.aggregation {
            let rows = AggregationEngine::new(&**store, &self.collection, self.directory.as_ref())
                .run(mode, &params.filter)?;
            Report::Aggregation { mode, rows }
        } else {
            match params.perform.direction() {
                Some(direction) => {
                    let report = RollbackEngine::new(&mut **store, &self.collection).run(direction, &params.filter, world)?;
                    Report::Replay(report)
                }
                None => {
                    let filter = params
                        .filter
                        .clone()
                        .with(STATE_FIELD, Condition::Eq(Value::from(RecordState::Live.as_u8())));
                    let mut records = Vec::new();
                    for doc in store.find(&self.collection, &filter, Some(&params.sort))? {
                        match ActionRecord::from_document(&doc) {
                            Ok(record) => records.push(record),
                            Err(err) => warn!(error = %err, "skipping undecodable document"),
                        }
                    }
                    Report::Actions(records)
                }
            }
        };
        drop(store);

        let elapsed = started.elapsed();
        info!(
            actor = %issuer.actor,
            mode = ?params.perform,
            elapsed_ms = elapsed.as_millis() as u64,
            "log command finished"
        );

        let names = match &report {
            Report::Actions(records) => {
                let mut names: Vec<_> = records
                    .iter()
                    .filter_map(|r| self.directory.player_name(r.actor).map(|n| (r.actor, n)))
                    .collect();
                names.sort();
                names.dedup();
                names
            }
            _ => Vec::new(),
        };

        Ok(CommandOutput { report, names, elapsed })
    }
}
