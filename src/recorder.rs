//! Entry point for producer events: normalizes them into records and
//! hands them to the [`BatchWriter`].

use std::sync::Arc;

use crate::{
    action::ActionRecord,
    runtime::writer::BatchWriter,
    tracker::{HolderKind, InventorySnapshotTracker},
    types::{ActorId, BlockPos, ItemStack, Material},
};

/// Producer-side event, already stripped of host-specific payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldEvent {
    /// `placed` was put where `replaced` used to be.
    BlockPlaced {
        /// Acting player.
        actor: ActorId,
        /// Block position.
        pos: BlockPos,
        /// Material that was there before.
        replaced: Material,
        /// Material put down.
        placed: Material,
    },
    /// A block was broken, leaving air.
    BlockBroken {
        /// Acting player.
        actor: ActorId,
        /// Block position.
        pos: BlockPos,
        /// Material that was broken.
        broken: Material,
    },
    /// A fluid block was scooped into a bucket.
    BucketFilled {
        /// Acting player.
        actor: ActorId,
        /// Clicked fluid position.
        pos: BlockPos,
        /// Fluid material.
        fluid: Material,
    },
    /// A bucket was emptied into the world.
    BucketEmptied {
        /// Acting player.
        actor: ActorId,
        /// Position the contents landed on.
        pos: BlockPos,
        /// Bucket item type, e.g. `WATER_BUCKET`.
        bucket: Material,
    },
    /// A container inventory was opened.
    ContainerOpened {
        /// Acting player.
        actor: ActorId,
        /// Inventory owner.
        holder: HolderKind,
        /// Slot contents at open time.
        contents: Vec<Option<ItemStack>>,
    },
    /// A container inventory was closed.
    ContainerClosed {
        /// Acting player.
        actor: ActorId,
        /// Inventory owner.
        holder: HolderKind,
        /// Slot contents at close time.
        contents: Vec<Option<ItemStack>>,
        /// Container position.
        pos: BlockPos,
    },
}

/// Material a bucket places when emptied.
pub fn bucket_contents(bucket: &Material) -> Material {
    match bucket.as_str() {
        "WATER_BUCKET" => Material::new("WATER"),
        "LAVA_BUCKET" => Material::new("LAVA"),
        _ => bucket.clone(),
    }
}

/// Turns producer events into records.
///
/// Container sessions are kept per actor; handlers are expected to run on
/// one dispatcher thread, so mutation goes through `&mut self`.
pub struct Recorder {
    writer: Arc<BatchWriter>,
    tracker: InventorySnapshotTracker,
}

impl Recorder {
    /// Recorder feeding `writer`.
    pub fn new(writer: Arc<BatchWriter>) -> Self {
        Self {
            writer,
            tracker: InventorySnapshotTracker::new(),
        }
    }

    /// Underlying writer.
    pub fn writer(&self) -> &Arc<BatchWriter> {
        &self.writer
    }

    /// Container session state.
    pub fn tracker(&self) -> &InventorySnapshotTracker {
        &self.tracker
    }

    /// Logs a normalized block change.
    pub fn block_changed(&self, actor: ActorId, pos: BlockPos, before: Material, after: Material) {
        self.writer
            .submit(ActionRecord::block_change(actor, pos, before, after));
    }

    /// Logs a normalized inventory change.
    pub fn inventory_changed(&self, actor: ActorId, pos: BlockPos, block: Material, item: Material, amount: i64) {
        self.writer
            .submit(ActionRecord::inventory_change(actor, pos, block, item, amount));
    }

    /// Dispatches one producer event.
    pub fn handle(&mut self, event: WorldEvent) {
        match event {
            WorldEvent::BlockPlaced {
                actor,
                pos,
                replaced,
                placed,
            } => self.block_changed(actor, pos, replaced, placed),
            WorldEvent::BlockBroken { actor, pos, broken } => {
                self.block_changed(actor, pos, broken, Material::air())
            }
            WorldEvent::BucketFilled { actor, pos, fluid } => {
                self.block_changed(actor, pos, fluid, Material::air())
            }
            WorldEvent::BucketEmptied { actor, pos, bucket } => {
                self.block_changed(actor, pos, Material::air(), bucket_contents(&bucket))
            }
            WorldEvent::ContainerOpened {
                actor,
                holder,
                contents,
            } => {
                self.tracker.on_open(actor, &holder, &contents);
            }
            WorldEvent::ContainerClosed {
                actor,
                holder,
                contents,
                pos,
            } => {
                for record in self.tracker.on_close(actor, &holder, &contents, &pos) {
                    self.writer.submit(record);
                }
            }
        }
    }
}
