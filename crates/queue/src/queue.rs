//! The fairness queue contract and the task envelope.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::Result;

/// Owner of queued work (an org). Fairness and pausing are per owner.
pub type OwnerId = i64;

/// Which lane of an owner a task is pushed onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Default,
    High,
}

/// A typed unit of work, serialized into a [`Task`] envelope.
pub trait TaskPayload: Serialize + Send + Sync {
    fn task_type(&self) -> &'static str;
}

/// Envelope stored on a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub task_type: String,
    pub owner_id: OwnerId,
    pub task: serde_json::Value,
    pub queued_on: DateTime<Utc>,
}

impl Task {
    pub fn new<P: TaskPayload + ?Sized>(owner_id: OwnerId, payload: &P) -> Result<Self> {
        Ok(Self {
            task_type: payload.task_type().to_string(),
            owner_id,
            task: serde_json::to_value(payload)?,
            queued_on: Utc::now(),
        })
    }
}

/// A queue that hands out work fairly across owners.
#[async_trait]
pub trait FairQueue: Send + Sync {
    /// Queue name, used for keys, logs and metric labels.
    fn name(&self) -> &str;

    async fn push(&self, task: &Task, priority: Priority) -> Result<()>;

    /// Pop the next task from the unpaused owner with the fewest active
    /// tasks. Marks that owner as having one more active task until [`done`]
    /// is called.
    ///
    /// [`done`]: FairQueue::done
    async fn pop(&self) -> Result<Option<Task>>;

    /// Mark one active task of `owner` as finished.
    async fn done(&self, owner: OwnerId) -> Result<()>;

    /// Stop handing out tasks for `owner`. Idempotent.
    async fn pause(&self, owner: OwnerId) -> Result<()>;

    /// Undo [`pause`](FairQueue::pause). Idempotent.
    async fn resume(&self, owner: OwnerId) -> Result<()>;

    async fn paused(&self) -> Result<Vec<OwnerId>>;

    /// Owners that currently hold queued tasks, paused or not.
    async fn owners(&self) -> Result<Vec<OwnerId>>;

    /// Total number of queued tasks across all owners.
    async fn size(&self) -> Result<usize>;
}
