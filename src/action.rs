//! Logged world-mutation records and their document codec.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    persist::Document,
    types::{ActorId, BlockPos, Material, RecordId, TimestampMs, now_ms},
};

/// Discriminator field written into every document.
pub const TYPE_FIELD: &str = "type";
/// Store identity field.
pub const ID_FIELD: &str = "_id";
/// Actor field.
pub const ACTOR_FIELD: &str = "user_uuid";
/// Timestamp field.
pub const DATE_FIELD: &str = "date";
/// Rollback state field.
pub const STATE_FIELD: &str = "state";
/// Position field; its members are `world`, `x`, `y`, `z`.
pub const LOCATION_FIELD: &str = "location";
/// Block-change "before" field.
pub const BLOCK_FROM_FIELD: &str = "blockFrom";
/// Block-change "after" field.
pub const BLOCK_TO_FIELD: &str = "blockTo";

/// Discriminator for [`ActionKind::BlockChange`].
pub const BLOCK_CHANGE_TAG: &str = "player_block_change";
/// Discriminator for [`ActionKind::InventoryChange`].
pub const INVENTORY_CHANGE_TAG: &str = "player_inventory_change";

/// Failure to rebuild a record from a stored document.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The discriminator names no known record kind.
    #[error("unknown action type `{0}`")]
    UnknownType(String),
    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// A field holds the wrong JSON type.
    #[error("field `{0}` has the wrong type")]
    Mistyped(&'static str),
    /// The body did not match the record layout.
    #[error("malformed action document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Illegal change of [`RecordState`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The record has never been persisted.
    #[error("record has no store identity")]
    Unpersisted,
    /// The transition does not start from the required state.
    #[error("cannot {direction} a record in state {state:?}")]
    IllegalTransition {
        /// State the record was in.
        state: RecordState,
        /// Requested direction.
        direction: Direction,
    },
}

/// Whether a record's effect is currently live in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RecordState {
    /// Stored as `0`.
    Live,
    /// Stored as `1`.
    RolledBack,
}

impl RecordState {
    /// Pure transition function. Rollback moves `Live -> RolledBack`,
    /// redo moves `RolledBack -> Live`; anything else is rejected.
    pub fn apply(self, direction: Direction) -> Result<RecordState, StateError> {
        match (self, direction) {
            (RecordState::Live, Direction::Rollback) => Ok(RecordState::RolledBack),
            (RecordState::RolledBack, Direction::Redo) => Ok(RecordState::Live),
            (state, direction) => Err(StateError::IllegalTransition { state, direction }),
        }
    }

    /// Integer stored in documents.
    pub fn as_u8(self) -> u8 {
        match self {
            RecordState::Live => 0,
            RecordState::RolledBack => 1,
        }
    }
}

impl From<RecordState> for u8 {
    fn from(value: RecordState) -> Self {
        value.as_u8()
    }
}

impl TryFrom<u8> for RecordState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RecordState::Live),
            1 => Ok(RecordState::RolledBack),
            other => Err(format!("invalid record state {other}")),
        }
    }
}

/// Replay direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Undo live actions, newest first.
    Rollback,
    /// Re-apply rolled-back actions, oldest first.
    Redo,
}

impl Direction {
    /// State a record must be in to be replayed in this direction.
    pub fn source_state(self) -> RecordState {
        match self {
            Direction::Rollback => RecordState::Live,
            Direction::Redo => RecordState::RolledBack,
        }
    }

    /// True when records are processed newest first.
    pub fn newest_first(self) -> bool {
        matches!(self, Direction::Rollback)
    }

    /// Material the world must hold for `change` to be replayed.
    pub fn expected(self, change: &BlockChange) -> Material {
        match self {
            Direction::Rollback => Material::from_endpoint(change.block_to.as_ref()),
            Direction::Redo => Material::from_endpoint(change.block_from.as_ref()),
        }
    }

    /// Material left behind once `change` is replayed.
    pub fn replacement(self, change: &BlockChange) -> Material {
        match self {
            Direction::Rollback => Material::from_endpoint(change.block_from.as_ref()),
            Direction::Redo => Material::from_endpoint(change.block_to.as_ref()),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rollback => f.write_str("rollback"),
            Direction::Redo => f.write_str("redo"),
        }
    }
}

/// Block replaced at a position. `None` stands for air.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockChange {
    /// Material before the change; `None` means the block was placed.
    #[serde(rename = "blockFrom")]
    pub block_from: Option<Material>,
    /// Material after the change; `None` means the block was destroyed.
    #[serde(rename = "blockTo")]
    pub block_to: Option<Material>,
}

impl BlockChange {
    /// True when something was put down.
    pub fn is_placement(&self) -> bool {
        self.block_to.is_some()
    }

    /// True when something was removed.
    pub fn is_destruction(&self) -> bool {
        self.block_from.is_some()
    }
}

/// Signed item-count change inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryChange {
    /// Container block type.
    pub block: Material,
    /// Item type that changed.
    pub item: Material,
    /// Items added (positive) or removed (negative).
    pub amount: i64,
}

/// Variant payload of an [`ActionRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Block placed, broken, or swapped.
    BlockChange(BlockChange),
    /// Container contents changed.
    InventoryChange(InventoryChange),
}

impl ActionKind {
    /// Stored discriminator for this variant.
    pub fn type_tag(&self) -> &'static str {
        match self {
            ActionKind::BlockChange(_) => BLOCK_CHANGE_TAG,
            ActionKind::InventoryChange(_) => INVENTORY_CHANGE_TAG,
        }
    }
}

/// One logged world mutation.
///
/// Everything except `state` is fixed once built; `id` is filled in when
/// the record is read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    /// Store identity; `None` until persisted.
    pub id: Option<RecordId>,
    /// Actor that caused the change.
    pub actor: ActorId,
    /// Affected block or container position.
    pub pos: BlockPos,
    /// Creation time.
    pub timestamp_ms: TimestampMs,
    /// Whether the effect is currently live.
    pub state: RecordState,
    /// Variant payload.
    pub kind: ActionKind,
}

#[derive(Serialize, Deserialize)]
struct Header {
    user_uuid: ActorId,
    date: TimestampMs,
    state: RecordState,
    location: BlockPos,
}

#[derive(Serialize, Deserialize)]
struct Wire<B> {
    #[serde(flatten)]
    header: Header,
    #[serde(flatten)]
    body: B,
}

impl ActionRecord {
    /// Builds a live block-change record stamped with the current time.
    /// Air endpoints are stored as absent.
    pub fn block_change(actor: ActorId, pos: BlockPos, before: Material, after: Material) -> Self {
        Self::new(
            actor,
            pos,
            ActionKind::BlockChange(BlockChange {
                block_from: before.into_endpoint(),
                block_to: after.into_endpoint(),
            }),
        )
    }

    /// Builds a live inventory-change record stamped with the current time.
    pub fn inventory_change(
        actor: ActorId,
        pos: BlockPos,
        block: Material,
        item: Material,
        amount: i64,
    ) -> Self {
        Self::new(
            actor,
            pos,
            ActionKind::InventoryChange(InventoryChange {
                block,
                item,
                amount,
            }),
        )
    }

    fn new(actor: ActorId, pos: BlockPos, kind: ActionKind) -> Self {
        Self {
            id: None,
            actor,
            pos,
            timestamp_ms: now_ms(),
            state: RecordState::Live,
            kind,
        }
    }

    /// Replaces the creation timestamp.
    pub fn with_timestamp(mut self, timestamp_ms: TimestampMs) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Block-change payload, if this is one.
    pub fn as_block_change(&self) -> Option<&BlockChange> {
        match &self.kind {
            ActionKind::BlockChange(change) => Some(change),
            ActionKind::InventoryChange(_) => None,
        }
    }

    /// Inventory-change payload, if this is one.
    pub fn as_inventory_change(&self) -> Option<&InventoryChange> {
        match &self.kind {
            ActionKind::InventoryChange(change) => Some(change),
            ActionKind::BlockChange(_) => None,
        }
    }

    /// Moves `state` one step in `direction`.
    pub fn transition(&mut self, direction: Direction) -> Result<(), StateError> {
        if self.id.is_none() {
            return Err(StateError::Unpersisted);
        }
        self.state = self.state.apply(direction)?;
        Ok(())
    }

    /// Serializes every persistent field. The store identity is not included.
    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        let header = Header {
            user_uuid: self.actor,
            date: self.timestamp_ms,
            state: self.state,
            location: self.pos.clone(),
        };
        let value = match &self.kind {
            ActionKind::BlockChange(body) => serde_json::to_value(Wire { header, body })?,
            ActionKind::InventoryChange(body) => serde_json::to_value(Wire { header, body })?,
        };
        let Value::Object(mut doc) = value else {
            return Err(serde::ser::Error::custom("action did not serialize to an object"));
        };
        doc.insert(
            TYPE_FIELD.to_string(),
            Value::String(self.kind.type_tag().to_string()),
        );
        Ok(doc)
    }

    /// Rebuilds a record, choosing the variant from the `type` field.
    pub fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        let tag = doc
            .get(TYPE_FIELD)
            .ok_or(DecodeError::MissingField(TYPE_FIELD))?
            .as_str()
            .ok_or(DecodeError::Mistyped(TYPE_FIELD))?;

        let id = match doc.get(ID_FIELD) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_i64().ok_or(DecodeError::Mistyped(ID_FIELD))?),
        };

        let value = Value::Object(doc.clone());
        let (header, kind) = match tag {
            BLOCK_CHANGE_TAG => {
                let wire: Wire<BlockChange> = serde_json::from_value(value)?;
                (wire.header, ActionKind::BlockChange(wire.body))
            }
            INVENTORY_CHANGE_TAG => {
                let wire: Wire<InventoryChange> = serde_json::from_value(value)?;
                (wire.header, ActionKind::InventoryChange(wire.body))
            }
            other => return Err(DecodeError::UnknownType(other.to_string())),
        };

        Ok(Self {
            id,
            actor: header.user_uuid,
            pos: header.location,
            timestamp_ms: header.date,
            state: header.state,
            kind,
        })
    }
}
