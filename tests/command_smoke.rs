use std::sync::Arc;

use worldlog::{
    action::ActionRecord,
    command::{CommandError, LogCommand, Report},
    config::Config,
    persist::{Document, SharedStore},
    query::{AggregationMode, Issuer, QueryError},
    types::{ActorId, BlockPos, Material},
    world::{GridWorld, StaticDirectory, World},
};

struct Fixture {
    alice: ActorId,
    bob: ActorId,
    store: SharedStore,
    command: LogCommand,
    world: GridWorld,
}

fn at(x: i32) -> BlockPos {
    BlockPos::new("world", x, 64, 0)
}

async fn fixture() -> Fixture {
    let config = Config::default();
    let store = config.open_store().expect("store");
    let alice = ActorId::new_random();
    let bob = ActorId::new_random();

    let records = [
        ActionRecord::block_change(alice, at(0), Material::air(), Material::new("STONE")).with_timestamp(1),
        ActionRecord::block_change(alice, at(1), Material::air(), Material::new("STONE")).with_timestamp(2),
        ActionRecord::block_change(bob, at(2), Material::new("DIRT"), Material::air()).with_timestamp(3),
        ActionRecord::block_change(bob, at(500), Material::air(), Material::new("TNT")).with_timestamp(4),
    ];
    let docs: Vec<Document> = records.iter().map(|r| r.to_document().expect("encode")).collect();
    store.lock().await.insert_batch(&config.collection, &docs).expect("insert");

    let mut world = GridWorld::new();
    world.set_material(&at(0), Material::new("STONE"));
    world.set_material(&at(1), Material::new("STONE"));
    world.set_material(&at(500), Material::new("TNT"));

    let directory = Arc::new(
        StaticDirectory::new()
            .with_player("alice", alice)
            .with_player("bob", bob),
    );
    let command = LogCommand::new(store.clone(), config.collection.clone(), directory);
    Fixture {
        alice,
        bob,
        store,
        command,
        world,
    }
}

fn issuer(actor: ActorId) -> Issuer {
    Issuer { actor, pos: at(0) }
}

#[tokio::test]
async fn view_lists_live_records_newest_first() {
    let mut f = fixture().await;
    let out = f
        .command
        .execute(&issuer(f.alice), &["area", "10"], &mut f.world)
        .await
        .expect("view");

    let Report::Actions(records) = &out.report else {
        panic!("expected a listing");
    };
    let stamps: Vec<u64> = records.iter().map(|r| r.timestamp_ms).collect();
    assert_eq!(stamps, vec![3, 2, 1]);
    let text = out.to_string();
    assert!(text.contains("bob broke DIRT"));
    assert!(text.contains("Time taken:"));
}

#[tokio::test]
async fn sum_then_last_rollback_then_redo() {
    let mut f = fixture().await;
    let me = issuer(f.alice);

    let out = f
        .command
        .execute(&me, &["player", "alice", "sum", "players"], &mut f.world)
        .await
        .expect("sum");
    let Report::Aggregation { mode, rows } = &out.report else {
        panic!("expected aggregation");
    };
    assert_eq!(*mode, AggregationMode::Players);
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].label.as_str(), rows[0].placed, rows[0].destroyed), ("alice", 2, 0));

    let out = f
        .command
        .execute(&me, &["last", "rollback"], &mut f.world)
        .await
        .expect("rollback");
    let Report::Replay(report) = &out.report else {
        panic!("expected replay");
    };
    assert_eq!(report.applied, 2);
    assert!(f.world.material_at(&at(0)).is_air());
    assert!(f.world.material_at(&at(1)).is_air());
    assert_eq!(f.world.material_at(&at(500)), Material::new("TNT"));

    // Rolled-back records drop out of views.
    let out = f
        .command
        .execute(&me, &["player", "alice"], &mut f.world)
        .await
        .expect("view");
    assert!(matches!(&out.report, Report::Actions(r) if r.is_empty()));

    let out = f
        .command
        .execute(&me, &["redo", "player", "alice"], &mut f.world)
        .await
        .expect("redo");
    assert!(matches!(&out.report, Report::Replay(r) if r.applied == 2));
    assert_eq!(f.world.material_at(&at(1)), Material::new("STONE"));
}

#[tokio::test]
async fn invalid_queries_touch_nothing() {
    let mut f = fixture().await;
    let writes = f.world.write_count();

    let err = f
        .command
        .execute(&issuer(f.bob), &["sum", "blocks", "rollback"], &mut f.world)
        .await
        .expect_err("rejected");
    assert!(matches!(err, CommandError::Query(QueryError::InvalidQuery)));
    assert_eq!(f.world.write_count(), writes);
    assert!(f.command.last_query(f.bob).is_none());

    let err = f
        .command
        .execute(&issuer(f.bob), &["last"], &mut f.world)
        .await
        .expect_err("nothing cached");
    assert!(matches!(err, CommandError::Query(QueryError::NoLastQuery)));

    let live = f
        .store
        .lock()
        .await
        .find("actions", &worldlog::persist::filter::Filter::new(), None)
        .expect("find");
    assert!(live.iter().all(|d| d["state"] == 0));
}

#[tokio::test]
async fn cached_query_is_per_operator() {
    let mut f = fixture().await;
    f.command
        .execute(&issuer(f.alice), &["player", "bob"], &mut f.world)
        .await
        .expect("view");
    assert!(f.command.last_query(f.alice).is_some());
    assert!(f.command.last_query(f.bob).is_none());
}

#[test]
fn config_defaults_and_overrides() {
    let config = Config::from_json_str("{}").expect("parse");
    assert_eq!(config, Config::default());
    assert_eq!(config.collection, "actions");
    assert_eq!(config.writer.batch_max_records, 100);

    let config = Config::from_json_str(r#"{"collection": "log", "writer": {"failure_backoff_ms": 50}}"#).expect("parse");
    assert_eq!(config.collection, "log");
    assert_eq!(config.writer.failure_backoff_ms, 50);
    assert_eq!(config.writer.coalesce_window_ms, 100);

    assert!(Config::from_json_str("{\"collection\": 3}").is_err());
}

#[test]
fn config_loads_from_file_and_opens_sqlite() {
    let tmp = tempfile::TempDir::new().expect("tmp");
    let db = tmp.path().join("log.db");
    let path = tmp.path().join("worldlog.json");
    std::fs::write(&path, format!("{{\"database_path\": {:?}}}", db.display().to_string())).expect("write");

    let config = Config::load(&path).expect("load");
    assert_eq!(config.database_path.as_deref(), Some(db.as_path()));
    config.open_store().expect("open");
    assert!(db.exists());
}
