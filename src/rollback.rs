//! Conflict-aware rollback and redo.
//!
//! Records are replayed against a per-position running material that is
//! read from the world once, the first time the position is seen. A record
//! is only reversed when the running material equals what the record says
//! should be there; otherwise something else changed the block since and
//! the record is skipped. The world is written once per position at the end.

use std::cmp::Ordering;

use hashbrown::HashMap;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    action::{ActionKind, ActionRecord, DATE_FIELD, Direction, STATE_FIELD},
    persist::{
        DocumentStore, StoreResult,
        filter::{Condition, Filter, Sort},
    },
    types::{BlockPos, Material},
    world::World,
};

/// Outcome of planning a replay without touching store or world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayPlan {
    /// Replay direction.
    pub direction: Direction,
    /// Records whose state was flipped, in processing order.
    pub flipped: Vec<ActionRecord>,
    /// Records skipped because the block had changed since.
    pub conflicts: usize,
    /// Records skipped because they could not transition (wrong state or unpersisted).
    pub ineligible: usize,
    /// Inventory records seen and left alone.
    pub inventory: Vec<ActionRecord>,
    /// Net material per touched position.
    pub final_materials: HashMap<BlockPos, Material>,
}

/// Counts reported after a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// Replay direction.
    pub direction: Direction,
    /// Records reversed and persisted.
    pub applied: usize,
    /// Records skipped on conflict.
    pub conflicts: usize,
    /// Records skipped as ineligible.
    pub ineligible: usize,
    /// Stored documents that failed to decode.
    pub undecodable: usize,
    /// Inventory records matched but not replayed.
    pub inventory_actions: usize,
    /// Positions written to the world.
    pub locations_written: usize,
}

fn replay_order(direction: Direction, a: &ActionRecord, b: &ActionRecord) -> Ordering {
    let ord = a.timestamp_ms.cmp(&b.timestamp_ms).then(a.id.cmp(&b.id));
    if direction.newest_first() { ord.reverse() } else { ord }
}

/// Decides which records to flip and the net material per position.
///
/// Records are ordered newest first for rollback and oldest first for redo;
/// the world is only read.
pub fn plan_replay(direction: Direction, mut records: Vec<ActionRecord>, world: &dyn World) -> ReplayPlan {
    records.sort_by(|a, b| replay_order(direction, a, b));

    let mut plan = ReplayPlan {
        direction,
        flipped: Vec::new(),
        conflicts: 0,
        ineligible: 0,
        inventory: Vec::new(),
        final_materials: HashMap::new(),
    };

    for mut record in records {
        let (expected, replacement) = match &record.kind {
            ActionKind::BlockChange(change) => (direction.expected(change), direction.replacement(change)),
            ActionKind::InventoryChange(_) => {
                plan.inventory.push(record);
                continue;
            }
        };

        let tracked = plan
            .final_materials
            .entry(record.pos.clone())
            .or_insert_with(|| world.material_at(&record.pos));

        if *tracked != expected {
            plan.conflicts += 1;
            continue;
        }

        match record.transition(direction) {
            Ok(()) => {
                *tracked = replacement;
                plan.flipped.push(record);
            }
            Err(err) => {
                warn!(id = ?record.id, error = %err, "skipping record that cannot transition");
                plan.ineligible += 1;
            }
        }
    }

    plan
}

/// Runs rollback and redo against a store and a world.
pub struct RollbackEngine<'a> {
    store: &'a mut dyn DocumentStore,
    collection: &'a str,
}

impl<'a> RollbackEngine<'a> {
    /// Engine over `collection`.
    pub fn new(store: &'a mut dyn DocumentStore, collection: &'a str) -> Self {
        Self { store, collection }
    }

    /// Loads records matching `filter` that are eligible for `direction`,
    /// replays them, persists flipped states, then writes the net material
    /// of every touched position once.
    ///
    /// A store failure while persisting stops the run. The world then
    /// reflects exactly the records whose new state was stored.
    pub fn run(&mut self, direction: Direction, filter: &Filter, world: &mut dyn World) -> StoreResult<ReplayReport> {
        let filter = filter.clone().with(
            STATE_FIELD,
            Condition::Eq(Value::from(direction.source_state().as_u8())),
        );
        let sort = if direction.newest_first() {
            Sort::descending(DATE_FIELD)
        } else {
            Sort::ascending(DATE_FIELD)
        };

        let mut undecodable = 0usize;
        let mut records = Vec::new();
        for doc in self.store.find(self.collection, &filter, Some(&sort))? {
            match ActionRecord::from_document(&doc) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(error = %err, id = ?doc.get("_id"), "skipping undecodable document");
                    undecodable += 1;
                }
            }
        }

        let plan = plan_replay(direction, records, world);

        for (done, record) in plan.flipped.iter().enumerate() {
            if let Err(err) = self.persist(record) {
                // Keep the world in step with the states already stored.
                let partial = net_materials(direction, &plan.flipped[..done]);
                for (pos, material) in &partial {
                    world.set_material(pos, material.clone());
                }
                warn!(
                    %direction,
                    persisted = done,
                    locations = partial.len(),
                    error = %err,
                    "replay interrupted; applied only the persisted records"
                );
                return Err(err);
            }
        }

        for (pos, material) in &plan.final_materials {
            world.set_material(pos, material.clone());
        }

        let report = ReplayReport {
            direction,
            applied: plan.flipped.len(),
            conflicts: plan.conflicts,
            ineligible: plan.ineligible,
            undecodable,
            inventory_actions: plan.inventory.len(),
            locations_written: plan.final_materials.len(),
        };
        info!(
            %direction,
            applied = report.applied,
            conflicts = report.conflicts,
            locations = report.locations_written,
            "replay finished"
        );
        Ok(report)
    }

    fn persist(&mut self, record: &ActionRecord) -> StoreResult<()> {
        let Some(id) = record.id else {
            return Ok(());
        };
        let doc = record.to_document()?;
        self.store.update_by_id(self.collection, id, &doc)
    }
}

/// Material left at each position once `flipped` (in processing order)
/// has been applied. Flips at one position form a chain, so the last one
/// wins.
fn net_materials(direction: Direction, flipped: &[ActionRecord]) -> HashMap<BlockPos, Material> {
    let mut out = HashMap::new();
    for record in flipped {
        if let ActionKind::BlockChange(change) = &record.kind {
            out.insert(record.pos.clone(), direction.replacement(change));
        }
    }
    out
}
