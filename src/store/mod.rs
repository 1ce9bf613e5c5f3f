//! Durable pipeline state.

mod papers;
mod schema;

pub use papers::{PaperStore, PaperUpdate, ScoreFloor, SelectionStrategy};
pub use schema::{stage_columns, writable_columns};
