//! Persisted chat-network session blobs.
//!
//! The gateway never looks inside a session blob. The transport writes it
//! after pairing and reads it back on the next start; everything else only
//! asks whether one exists.

pub mod memory;
pub mod sled_store;
pub mod store;

pub use {
    memory::MemorySessionStore,
    sled_store::SledSessionStore,
    store::{SessionInfo, SessionStore, StoreError},
};
