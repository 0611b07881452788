pub mod api;
pub mod core;
pub mod graph;
pub mod ingest;
pub mod search;
pub mod store;

// --- Primary core exports ---
pub use crate::core::types;
pub use crate::core::types::*;
pub use crate::core::AppState;

// --- Frequently used module paths ---
pub use crate::ingest::{chunker, coordinator, entity_resolution, pii, watcher};
pub use crate::search::fusion;
