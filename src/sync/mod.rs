//! Background sync of writes made while offline.
//!
//! The page enqueues; the worker drains one class per sync trigger and
//! removes an entry only once the origin acknowledged it.

mod processor;
mod queue;

pub use processor::{SyncProcessor, SyncReport};
pub use queue::{
  MemoryMutationQueue, MutationKind, MutationQueue, PendingMutation, SqliteMutationQueue,
};
