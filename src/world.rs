//! World and player-directory boundaries, plus simple in-memory versions.

use hashbrown::{HashMap, HashSet};

use crate::types::{ActorId, BlockPos, Material};

/// Live, mutable block state.
pub trait World {
    /// Material currently at `pos`; air when nothing is there.
    fn material_at(&self, pos: &BlockPos) -> Material;
    /// Overwrites the material at `pos`.
    fn set_material(&mut self, pos: &BlockPos, material: Material);
}

/// Player and world name lookups used by query parsing and reports.
pub trait Directory {
    /// Stable id for a player name.
    fn resolve_player(&self, name: &str) -> Option<ActorId>;
    /// Display name for a player id.
    fn player_name(&self, id: ActorId) -> Option<String>;
    /// True when a world of this name exists.
    fn has_world(&self, _name: &str) -> bool {
        true
    }
}

/// Sparse block grid; unset positions read as air.
#[derive(Debug, Default, Clone)]
pub struct GridWorld {
    blocks: HashMap<BlockPos, Material>,
    writes: usize,
}

impl GridWorld {
    /// Empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set_material` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl World for GridWorld {
    fn material_at(&self, pos: &BlockPos) -> Material {
        self.blocks.get(pos).cloned().unwrap_or_else(Material::air)
    }

    fn set_material(&mut self, pos: &BlockPos, material: Material) {
        self.writes += 1;
        if material.is_air() {
            self.blocks.remove(pos);
        } else {
            self.blocks.insert(pos.clone(), material);
        }
    }
}

/// Fixed name tables.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    by_name: HashMap<String, ActorId>,
    names: HashMap<ActorId, String>,
    worlds: HashSet<String>,
}

impl StaticDirectory {
    /// Empty directory; with no worlds registered every world name is accepted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a player. Name lookups are case-insensitive.
    pub fn with_player(mut self, name: &str, id: ActorId) -> Self {
        self.by_name.insert(name.to_ascii_lowercase(), id);
        self.names.insert(id, name.to_string());
        self
    }

    /// Registers a world name.
    pub fn with_world(mut self, name: &str) -> Self {
        self.worlds.insert(name.to_string());
        self
    }
}

impl Directory for StaticDirectory {
    fn resolve_player(&self, name: &str) -> Option<ActorId> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    fn player_name(&self, id: ActorId) -> Option<String> {
        self.names.get(&id).cloned()
    }

    fn has_world(&self, name: &str) -> bool {
        self.worlds.is_empty() || self.worlds.contains(name)
    }
}
