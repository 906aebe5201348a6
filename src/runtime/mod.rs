//! Background batch writer and its event stream.

/// Event stream types emitted by the drain loop.
pub mod events;
/// Pending queue, drain loop, and lifecycle handle.
pub mod writer;
