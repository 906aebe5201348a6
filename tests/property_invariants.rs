use proptest::prelude::*;
use serde_json::json;

use worldlog::{
    action::{ActionRecord, Direction, RecordState},
    persist::{
        Document, DocumentStore,
        filter::{Condition, Filter},
        memory::MemoryStore,
    },
    rollback::RollbackEngine,
    tracker::{Snapshot, compress, diff},
    types::{ActorId, BlockPos, ItemStack, Material},
    world::{GridWorld, World},
};

const COLLECTION: &str = "actions";
const MATERIALS: [&str; 4] = ["AIR", "STONE", "DIRT", "GLASS"];

#[derive(Debug, Clone)]
enum Step {
    /// Logged change of block `slot` to material `material`.
    Logged { slot: u8, material: u8 },
    /// Unlogged change, e.g. natural decay.
    External { slot: u8, material: u8 },
}

fn step_strategy(with_external: bool) -> BoxedStrategy<Step> {
    let logged = (0u8..4, 0u8..4).prop_map(|(slot, material)| Step::Logged { slot, material });
    if with_external {
        prop_oneof![
            4 => logged,
            1 => (0u8..4, 0u8..4).prop_map(|(slot, material)| Step::External { slot, material }),
        ]
        .boxed()
    } else {
        logged.boxed()
    }
}

fn slot_pos(slot: u8) -> BlockPos {
    BlockPos::new("world", i32::from(slot), 64, 0)
}

fn material(idx: u8) -> Material {
    Material::new(MATERIALS[usize::from(idx)])
}

/// Plays `steps` against an empty world, logging the `Logged` ones.
fn play(steps: &[Step]) -> (MemoryStore, GridWorld) {
    let actor = ActorId::new_random();
    let mut world = GridWorld::new();
    let mut docs: Vec<Document> = Vec::new();

    for (i, step) in steps.iter().enumerate() {
        match step {
            Step::Logged { slot, material: m } => {
                let pos = slot_pos(*slot);
                let before = world.material_at(&pos);
                let after = material(*m);
                if before == after {
                    continue;
                }
                let record = ActionRecord::block_change(actor, pos.clone(), before, after.clone())
                    .with_timestamp(i as u64 + 1);
                docs.push(record.to_document().expect("encode"));
                world.set_material(&pos, after);
            }
            Step::External { slot, material: m } => world.set_material(&slot_pos(*slot), material(*m)),
        }
    }

    let mut store = MemoryStore::new();
    if !docs.is_empty() {
        store.insert_batch(COLLECTION, &docs).expect("insert");
    }
    (store, world)
}

fn snapshot(world: &GridWorld) -> Vec<Material> {
    (0u8..4).map(|slot| world.material_at(&slot_pos(slot))).collect()
}

/// Any persistable record, block or inventory change, in either state.
fn record_strategy() -> impl Strategy<Value = ActionRecord> {
    let pos = (prop::sample::select(vec!["world", "world_nether"]), any::<i32>(), -64i32..320, any::<i32>())
        .prop_map(|(world, x, y, z)| BlockPos::new(world, x, y, z));
    let block = (0u8..4, 0u8..4).prop_map(|(from, to)| (material(from), material(to)));
    let inventory = (1u8..4, 1u8..4, -10_000i64..10_000).prop_map(|(b, i, n)| (material(b), material(i), n));
    let kind = prop_oneof![
        block.prop_map(Ok::<_, (Material, Material, i64)>),
        inventory.prop_map(Err::<(Material, Material), _>),
    ];

    (any::<u128>(), pos, any::<u64>(), any::<bool>(), kind).prop_map(|(actor, pos, ts, rolled_back, kind)| {
        let actor = ActorId(uuid::Uuid::from_u128(actor));
        let mut record = match kind {
            Ok((from, to)) => ActionRecord::block_change(actor, pos, from, to),
            Err((block, item, amount)) => ActionRecord::inventory_change(actor, pos, block, item, amount),
        }
        .with_timestamp(ts);
        if rolled_back {
            record.state = RecordState::RolledBack;
        }
        record
    })
}

fn replay(store: &mut MemoryStore, world: &mut GridWorld, direction: Direction) -> usize {
    RollbackEngine::new(store, COLLECTION)
        .run(direction, &Filter::new(), world)
        .expect("replay")
        .applied
}

proptest! {
    #[test]
    fn rollback_of_a_clean_history_restores_the_empty_world(
        steps in prop::collection::vec(step_strategy(false), 0..40)
    ) {
        let (mut store, mut world) = play(&steps);
        replay(&mut store, &mut world, Direction::Rollback);
        prop_assert!(snapshot(&world).iter().all(Material::is_air));
    }

    #[test]
    fn redo_after_rollback_restores_the_final_world(
        steps in prop::collection::vec(step_strategy(false), 0..40)
    ) {
        let (mut store, mut world) = play(&steps);
        let before = snapshot(&world);
        let undone = replay(&mut store, &mut world, Direction::Rollback);
        let redone = replay(&mut store, &mut world, Direction::Redo);
        prop_assert_eq!(undone, redone);
        prop_assert_eq!(snapshot(&world), before);
    }

    #[test]
    fn second_rollback_changes_nothing(
        steps in prop::collection::vec(step_strategy(false), 0..40)
    ) {
        let (mut store, mut world) = play(&steps);
        replay(&mut store, &mut world, Direction::Rollback);
        let once = snapshot(&world);
        let writes = world.write_count();

        let applied = replay(&mut store, &mut world, Direction::Rollback);
        prop_assert_eq!(applied, 0);
        prop_assert_eq!(world.write_count(), writes);
        prop_assert_eq!(snapshot(&world), once);
    }

    #[test]
    fn skipped_records_stay_live(
        steps in prop::collection::vec(step_strategy(true), 0..40)
    ) {
        let (mut store, mut world) = play(&steps);
        let total = store.len(COLLECTION);
        let report = RollbackEngine::new(&mut store, COLLECTION)
            .run(Direction::Rollback, &Filter::new(), &mut world)
            .expect("replay");
        prop_assert_eq!(report.applied + report.conflicts, total);

        let live = Filter::new().with("state", Condition::Eq(json!(0)));
        let still_live = store.find(COLLECTION, &live, None).expect("find").len();
        prop_assert_eq!(still_live, report.conflicts);
    }

    #[test]
    fn document_round_trip_preserves_the_whole_record(record in record_strategy()) {
        let doc = record.to_document().expect("encode");
        let decoded = ActionRecord::from_document(&doc).expect("decode");
        prop_assert_eq!(decoded.id, None);
        prop_assert_eq!(decoded, record);
    }

    #[test]
    fn diff_applied_to_before_yields_after(
        before in prop::collection::vec(prop::option::of((0u8..4, 1u32..64)), 0..27),
        after in prop::collection::vec(prop::option::of((0u8..4, 1u32..64)), 0..27),
    ) {
        let to_slots = |slots: &[Option<(u8, u32)>]| -> Vec<Option<ItemStack>> {
            slots
                .iter()
                .map(|s| s.map(|(item, n)| ItemStack::new(material(item), n)))
                .collect()
        };
        let before = compress(&to_slots(&before));
        let after = compress(&to_slots(&after));

        let mut rebuilt: Snapshot = before.clone();
        for (item, delta) in diff(&before, &after) {
            prop_assert_ne!(delta, 0);
            *rebuilt.entry(item).or_default() += delta;
        }
        rebuilt.retain(|_, n| *n != 0);
        prop_assert_eq!(rebuilt, after);
    }
}
