//! crates/progress_sync_core/src/store/mod.rs
//!
//! Reference adapters for the core's ports: an in-process Progress Store with
//! the same write reconciliation a real backend applies, the change fan-out it
//! and the Postgres adapter share, and two `LocalStore` implementations.

pub mod hub;
pub mod local;
pub mod memory;

pub use hub::ChangeHub;
pub use local::{JsonFileLocalStore, MemoryLocalStore};
pub use memory::InMemoryProgressStore;
