//! Container contents captured on open and diffed on close.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::{
    action::ActionRecord,
    types::{ActorId, BlockPos, ItemStack, Material},
};

/// Block type of crafting tables, whose contents are never tracked.
pub const WORKBENCH: &str = "WORKBENCH";
/// Block type reported for double chests.
pub const CHEST: &str = "CHEST";

/// What owns an opened inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HolderKind {
    /// A single container block of the given type.
    Block(Material),
    /// Two chests joined into one inventory.
    DoubleChest,
    /// Anything not backed by a block (players, minecarts, ...).
    Other,
}

impl HolderKind {
    /// True for chest-like containers whose contents are logged.
    pub fn is_tracked(&self) -> bool {
        match self {
            HolderKind::Block(block) => block.as_str() != WORKBENCH,
            HolderKind::DoubleChest => true,
            HolderKind::Other => false,
        }
    }

    /// Block type written into inventory records.
    pub fn container_block(&self) -> Option<Material> {
        match self {
            HolderKind::Block(block) => Some(block.clone()),
            HolderKind::DoubleChest => Some(Material::new(CHEST)),
            HolderKind::Other => None,
        }
    }
}

/// Item totals by type; empty slots contribute nothing.
pub type Snapshot = BTreeMap<Material, i64>;

/// Collapses slot contents into per-item totals.
pub fn compress(contents: &[Option<ItemStack>]) -> Snapshot {
    let mut out = Snapshot::new();
    for stack in contents.iter().flatten() {
        if stack.amount == 0 {
            continue;
        }
        *out.entry(stack.item.clone()).or_default() += i64::from(stack.amount);
    }
    out
}

/// Signed per-item change from `before` to `after`; zero deltas omitted.
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<(Material, i64)> {
    let mut deltas: BTreeMap<&Material, i64> = BTreeMap::new();
    for (item, n) in after {
        *deltas.entry(item).or_default() += n;
    }
    for (item, n) in before {
        *deltas.entry(item).or_default() -= n;
    }
    deltas
        .into_iter()
        .filter(|(_, delta)| *delta != 0)
        .map(|(item, delta)| (item.clone(), delta))
        .collect()
}

/// One open container session per actor.
#[derive(Debug, Default)]
pub struct InventorySnapshotTracker {
    sessions: HashMap<ActorId, Snapshot>,
}

impl InventorySnapshotTracker {
    /// Tracker with no open sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the contents seen when `actor` opens a container. Replaces
    /// any session the actor left open. Returns false for untracked holders.
    pub fn on_open(&mut self, actor: ActorId, holder: &HolderKind, contents: &[Option<ItemStack>]) -> bool {
        if !holder.is_tracked() {
            return false;
        }
        self.sessions.insert(actor, compress(contents));
        true
    }

    /// Ends `actor`'s session and returns one inventory record per item
    /// type whose count changed. Empty when no session was open.
    pub fn on_close(
        &mut self,
        actor: ActorId,
        holder: &HolderKind,
        contents: &[Option<ItemStack>],
        pos: &BlockPos,
    ) -> Vec<ActionRecord> {
        let Some(block) = holder.container_block().filter(|_| holder.is_tracked()) else {
            return Vec::new();
        };
        let Some(before) = self.sessions.remove(&actor) else {
            return Vec::new();
        };

        let after = compress(contents);
        diff(&before, &after)
            .into_iter()
            .map(|(item, delta)| ActionRecord::inventory_change(actor, pos.clone(), block.clone(), item, delta))
            .collect()
    }

    /// True when `actor` has an open session.
    pub fn has_session(&self, actor: ActorId) -> bool {
        self.sessions.contains_key(&actor)
    }

    /// Number of open sessions.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }
}
