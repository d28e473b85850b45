//! Fairness task queues.
//!
//! Work is pushed per owner (an org) onto named queues. Consumers pop from the
//! owner with the fewest active tasks, high priority before default, and
//! paused owners are skipped until resumed. Backends: process memory and Redis.

pub mod error;
pub mod memory;
pub mod queue;
pub mod queues;
pub mod redis_queue;
pub mod tasks;

pub use {
    error::{Error, Result},
    memory::MemoryFairQueue,
    queue::{FairQueue, OwnerId, Priority, Task, TaskPayload},
    queues::{QueueKind, Queues},
    redis_queue::RedisFairQueue,
};
