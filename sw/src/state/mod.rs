//! Checkpoint persistence with actor pattern
//!
//! StateManager owns the checkpoint store and processes messages via
//! channels; the engine sees it through the [`CheckpointStore`] trait.

mod manager;
mod messages;

pub use manager::{CheckpointStore, StateManager};
pub use messages::{StateCommand, StateError, StateResponse};
