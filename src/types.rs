//! Shared primitive IDs, positions, and materials.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-assigned record identity.
pub type RecordId = i64;
/// Timestamp in milliseconds since the Unix epoch.
pub type TimestampMs = u64;

/// Stable identity of the actor (player) that produced an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub Uuid);

impl ActorId {
    /// Generates a fresh random actor id.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Block material name, e.g. `STONE` or `CHEST`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Material(pub String);

impl Material {
    /// Name of the empty material.
    pub const AIR: &'static str = "AIR";

    /// Constructs a material from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The empty material.
    pub fn air() -> Self {
        Self(Self::AIR.to_string())
    }

    /// True for the empty material.
    pub fn is_air(&self) -> bool {
        self.0 == Self::AIR
    }

    /// Material name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Maps air to `None`, anything else to `Some`.
    pub fn into_endpoint(self) -> Option<Material> {
        if self.is_air() { None } else { Some(self) }
    }

    /// Inverse of [`Material::into_endpoint`].
    pub fn from_endpoint(endpoint: Option<&Material>) -> Material {
        endpoint.cloned().unwrap_or_else(Material::air)
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Material {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Integer block position inside a named world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    /// World name.
    pub world: String,
    /// Block x.
    pub x: i32,
    /// Block y.
    pub y: i32,
    /// Block z.
    pub z: i32,
}

impl BlockPos {
    /// Constructs a position.
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{},{},{}", self.world, self.x, self.y, self.z)
    }
}

/// One inventory slot's contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item type.
    pub item: Material,
    /// Stack size.
    pub amount: u32,
}

impl ItemStack {
    /// Constructs a stack.
    pub fn new(item: impl Into<Material>, amount: u32) -> Self {
        Self {
            item: item.into(),
            amount,
        }
    }
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
