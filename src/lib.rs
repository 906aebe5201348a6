//! Per-player world mutation log with batched persistence, filtered
//! queries, aggregation, and conflict-aware rollback/redo.
//!
//! # Examples
//!
//! Recording a change and rolling it back against an in-memory world:
//! ```
//! use worldlog::{
//!     action::{ActionRecord, Direction},
//!     persist::{DocumentStore, filter::Filter, memory::MemoryStore},
//!     rollback::RollbackEngine,
//!     types::{ActorId, BlockPos, Material},
//!     world::{GridWorld, World},
//! };
//!
//! let mut store = MemoryStore::new();
//! let mut world = GridWorld::new();
//! let pos = BlockPos::new("world", 1, 64, 1);
//!
//! let record = ActionRecord::block_change(ActorId::new_random(), pos.clone(), Material::air(), Material::new("STONE"));
//! world.set_material(&pos, Material::new("STONE"));
//! store
//!     .insert_batch("actions", &[record.to_document().expect("encode")])
//!     .expect("insert");
//!
//! let report = RollbackEngine::new(&mut store, "actions")
//!     .run(Direction::Rollback, &Filter::new(), &mut world)
//!     .expect("rollback");
//! assert_eq!(report.applied, 1);
//! assert!(world.material_at(&pos).is_air());
//! ```
//!
//! Runtime usage with the batch writer and the operator command:
//! ```no_run
//! use std::sync::Arc;
//!
//! use worldlog::{
//!     command::LogCommand,
//!     config::Config,
//!     query::Issuer,
//!     recorder::Recorder,
//!     runtime::writer::BatchWriter,
//!     types::{ActorId, BlockPos, Material},
//!     world::{GridWorld, StaticDirectory},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = Config::load("worldlog.json").expect("config");
//! let store = config.open_store().expect("open store");
//! let writer = Arc::new(BatchWriter::new(store.clone(), config.collection.clone(), config.writer.clone()));
//! writer.enable();
//!
//! let alice = ActorId::new_random();
//! let recorder = Recorder::new(Arc::clone(&writer));
//! recorder.block_changed(alice, BlockPos::new("world", 0, 64, 0), Material::air(), Material::new("DIRT"));
//!
//! let directory = Arc::new(StaticDirectory::new().with_player("alice", alice));
//! let mut command = LogCommand::new(store, config.collection.clone(), directory);
//! let issuer = Issuer { actor: alice, pos: BlockPos::new("world", 0, 64, 0) };
//! let mut world = GridWorld::new();
//! let output = command.execute(&issuer, &["area", "10", "rollback"], &mut world).await.expect("rollback");
//! println!("{output}");
//! writer.disable().await.expect("disable");
//! # }
//! ```
#![deny(missing_docs)]

/// Action record model, document codec, and state transitions.
pub mod action;
/// Placed/destroyed aggregation.
pub mod aggregate;
/// Operator command execution.
pub mod command;
/// JSON configuration.
pub mod config;
/// Document-store abstraction and implementations.
pub mod persist;
/// Query token parsing.
pub mod query;
/// Producer event normalization.
pub mod recorder;
/// Rollback and redo.
pub mod rollback;
/// Background batch writer and events.
pub mod runtime;
/// Container open/close diffing.
pub mod tracker;
/// Shared primitive types.
pub mod types;
/// World and directory boundaries.
pub mod world;
