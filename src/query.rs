//! Operator filter language: `key value` tokens into [`QueryParams`].

use std::collections::BTreeSet;

use hashbrown::HashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{
    action::{ACTOR_FIELD, DATE_FIELD, Direction, LOCATION_FIELD},
    persist::filter::{Condition, Filter, Sort},
    types::{ActorId, BlockPos, TimestampMs},
    world::Directory,
};

/// Why a command's tokens could not become a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Aggregation combined with rollback or redo.
    #[error("sum can only be used in view mode, not with rollback or redo")]
    InvalidQuery,
    /// `last` with nothing cached for this operator.
    #[error("no previous query to repeat")]
    NoLastQuery,
    /// A key was given without its value.
    #[error("missing value for `{0}`")]
    MissingValue(String),
    /// A player name did not resolve.
    #[error("unknown player `{0}`")]
    UnknownPlayer(String),
    /// A world name did not resolve.
    #[error("unknown world `{0}`")]
    UnknownWorld(String),
    /// A number did not parse.
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    /// `loc` did not have two or three coordinates.
    #[error("invalid location `{0}`; expected x,z or x,y,z")]
    InvalidLocation(String),
    /// A duration did not parse.
    #[error("invalid duration `{0}`; expected e.g. 30s, 15m, 2h, 7d")]
    InvalidDuration(String),
    /// `sum` named neither players nor blocks.
    #[error("unknown sum mode `{0}`; expected players or blocks")]
    UnknownSumMode(String),
}

/// Grouping used by `sum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    /// Counts per actor.
    Players,
    /// Counts per material.
    Blocks,
}

/// What the command does with the matching records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformMode {
    /// List them.
    Get,
    /// Undo them.
    Rollback,
    /// Re-apply them.
    Redo,
}

impl PerformMode {
    /// Replay direction, if this mode mutates the world.
    pub fn direction(self) -> Option<Direction> {
        match self {
            PerformMode::Get => None,
            PerformMode::Rollback => Some(Direction::Rollback),
            PerformMode::Redo => Some(Direction::Redo),
        }
    }
}

/// Parsed operator query, cached per operator for `last`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParams {
    /// Record filter.
    pub filter: Filter,
    /// Result order for views.
    pub sort: Sort,
    /// Grouping, when summing.
    pub aggregation: Option<AggregationMode>,
    /// View, rollback, or redo.
    pub perform: PerformMode,
    /// True once `world` was given.
    pub world_set: bool,
    /// Centre for `area` and the world for `world`.
    pub reference: BlockPos,
    /// Radius around `reference`, in blocks.
    pub area: Option<u32>,
}

impl QueryParams {
    /// Unfiltered view query centred on `reference`, newest first.
    pub fn new(reference: BlockPos) -> Self {
        Self {
            filter: Filter::new(),
            sort: Sort::descending(DATE_FIELD),
            aggregation: None,
            perform: PerformMode::Get,
            world_set: false,
            reference,
            area: None,
        }
    }
}

/// Operator issuing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuer {
    /// Operator's own id, used for `me`.
    pub actor: ActorId,
    /// Operator's position, the default reference point.
    pub pos: BlockPos,
}

/// Last successful query per operator.
#[derive(Debug, Default)]
pub struct LastQueryCache {
    entries: HashMap<ActorId, QueryParams>,
}

impl LastQueryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached query for `actor`.
    pub fn get(&self, actor: ActorId) -> Option<&QueryParams> {
        self.entries.get(&actor)
    }

    /// Replaces `actor`'s cached query.
    pub fn put(&mut self, actor: ActorId, params: QueryParams) {
        self.entries.insert(actor, params);
    }
}

/// Token parser bound to a directory and a clock reading.
pub struct QueryBuilder<'a> {
    directory: &'a dyn Directory,
    now_ms: TimestampMs,
}

impl<'a> QueryBuilder<'a> {
    /// Builder resolving names through `directory`; `since`/`before` are
    /// measured back from `now_ms`.
    pub fn new(directory: &'a dyn Directory, now_ms: TimestampMs) -> Self {
        Self { directory, now_ms }
    }

    /// Parses `tokens`. When they contain `last`, parsing starts from
    /// `previous` with its sum and perform mode cleared.
    pub fn parse<S: AsRef<str>>(
        &self,
        issuer: &Issuer,
        tokens: &[S],
        previous: Option<&QueryParams>,
    ) -> Result<QueryParams, QueryError> {
        let repeat = tokens.iter().any(|t| t.as_ref().eq_ignore_ascii_case("last"));
        let mut params = if repeat {
            let mut params = previous.cloned().ok_or(QueryError::NoLastQuery)?;
            params.aggregation = None;
            params.perform = PerformMode::Get;
            params
        } else {
            QueryParams::new(issuer.pos.clone())
        };

        let mut i = 0;
        while i < tokens.len() {
            let key = tokens[i].as_ref().to_ascii_lowercase();

            match key.as_str() {
                "last" => {
                    i += 1;
                    continue;
                }
                "rollback" => {
                    params.perform = PerformMode::Rollback;
                    i += 1;
                    continue;
                }
                "redo" => {
                    params.perform = PerformMode::Redo;
                    i += 1;
                    continue;
                }
                "me" | "self" | "myself" => {
                    self.apply_players(&mut params, issuer, "me")?;
                    i += 1;
                    continue;
                }
                _ => {}
            }

            let value = tokens
                .get(i + 1)
                .map(|v| v.as_ref())
                .ok_or_else(|| QueryError::MissingValue(key.clone()))?;

            match key.as_str() {
                "player" | "players" => self.apply_players(&mut params, issuer, value)?,
                "world" => {
                    if !self.directory.has_world(value) {
                        return Err(QueryError::UnknownWorld(value.to_string()));
                    }
                    params.reference.world = value.to_string();
                    params.world_set = true;
                }
                "loc" | "location" => apply_location(&mut params, value)?,
                "area" => {
                    let radius = value
                        .parse::<u32>()
                        .map_err(|_| QueryError::InvalidNumber(value.to_string()))?;
                    params.area = Some(radius);
                }
                "since" => {
                    let from = self.now_ms.saturating_sub(parse_duration_ms(value)?);
                    set_date_bound(&mut params.filter, Some(from), None);
                }
                "before" => {
                    let until = self.now_ms.saturating_sub(parse_duration_ms(value)?);
                    set_date_bound(&mut params.filter, None, Some(until));
                }
                "sum" => {
                    params.aggregation = Some(match value.to_ascii_lowercase().as_str() {
                        "player" | "players" => AggregationMode::Players,
                        "block" | "blocks" => AggregationMode::Blocks,
                        other => return Err(QueryError::UnknownSumMode(other.to_string())),
                    });
                }
                other => debug!(key = other, "ignoring unknown query key"),
            }
            i += 2;
        }

        if params.aggregation.is_some() && params.perform != PerformMode::Get {
            return Err(QueryError::InvalidQuery);
        }

        apply_location_filter(&mut params);
        Ok(params)
    }

    fn apply_players(&self, params: &mut QueryParams, issuer: &Issuer, list: &str) -> Result<(), QueryError> {
        let mut ids = BTreeSet::new();
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let id = match name.to_ascii_lowercase().as_str() {
                "me" | "self" | "myself" => issuer.actor,
                _ => self
                    .directory
                    .resolve_player(name)
                    .ok_or_else(|| QueryError::UnknownPlayer(name.to_string()))?,
            };
            ids.insert(id);
        }

        let mut values: Vec<Value> = ids.into_iter().map(|id| Value::String(id.to_string())).collect();
        match values.len() {
            0 => {}
            1 => {
                params.filter.set(ACTOR_FIELD, Condition::Eq(values.remove(0)));
            }
            _ => {
                params.filter.set(ACTOR_FIELD, Condition::In(values));
            }
        }
        Ok(())
    }
}

fn parse_coord(raw: &str) -> Result<i32, QueryError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| QueryError::InvalidNumber(raw.to_string()))
}

fn apply_location(params: &mut QueryParams, value: &str) -> Result<(), QueryError> {
    let parts: Vec<&str> = value
        .split([',', ';'])
        .filter(|p| !p.is_empty())
        .collect();
    match parts.as_slice() {
        [x, z] => {
            params.reference.x = parse_coord(x)?;
            params.reference.z = parse_coord(z)?;
        }
        [x, y, z] => {
            params.reference.x = parse_coord(x)?;
            params.reference.y = parse_coord(y)?;
            params.reference.z = parse_coord(z)?;
        }
        _ => return Err(QueryError::InvalidLocation(value.to_string())),
    }
    Ok(())
}

fn apply_location_filter(params: &mut QueryParams) {
    let world_path = format!("{LOCATION_FIELD}.world");
    let world = Condition::Eq(Value::String(params.reference.world.clone()));

    if let Some(radius) = params.area {
        let r = i64::from(radius);
        let pos = &params.reference;
        params.filter.remove_prefix(LOCATION_FIELD);
        params.filter.set(world_path, world);
        params
            .filter
            .set(format!("{LOCATION_FIELD}.x"), Condition::around(i64::from(pos.x), r));
        params
            .filter
            .set(format!("{LOCATION_FIELD}.y"), Condition::around(i64::from(pos.y), r));
        params
            .filter
            .set(format!("{LOCATION_FIELD}.z"), Condition::around(i64::from(pos.z), r));
    } else if params.world_set {
        params.filter.remove_prefix(LOCATION_FIELD);
        params.filter.set(world_path, world);
    }
}

fn set_date_bound(filter: &mut Filter, from: Option<TimestampMs>, until: Option<TimestampMs>) {
    let (mut gte, mut lte) = match filter.remove(DATE_FIELD) {
        Some(Condition::Range { gte, lte }) => (gte, lte),
        _ => (None, None),
    };
    if let Some(from) = from {
        gte = Some(Value::from(from));
    }
    if let Some(until) = until {
        lte = Some(Value::from(until));
    }
    filter.set(DATE_FIELD, Condition::Range { gte, lte });
}

/// Parses `30s`, `15m`, `2h`, `7d`, or `1w` into milliseconds. A bare
/// number is taken as seconds.
pub fn parse_duration_ms(raw: &str) -> Result<u64, QueryError> {
    let raw = raw.trim();
    let invalid = || QueryError::InvalidDuration(raw.to_string());
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let unit_ms: u64 = match unit.to_ascii_lowercase().as_str() {
        "" | "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return Err(invalid()),
    };
    amount.checked_mul(unit_ms).ok_or_else(invalid)
}
