//! The named queues a process dispatches onto.

use std::{fmt, sync::Arc};

use {
    redis::aio::ConnectionManager,
    taskhub_metrics::{counter, labels, queue as queue_metrics},
    tracing::debug,
};

use crate::{
    MemoryFairQueue, RedisFairQueue, Result,
    queue::{FairQueue, OwnerId, Priority, Task, TaskPayload},
};

/// Which named queue a task goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Default queue for bulk work.
    Batch,
    /// Fair queue whose owners can be paused by throttling.
    Throttled,
    /// Realtime queue for per-contact event handling.
    Handler,
}

impl QueueKind {
    pub const ALL: [Self; 3] = [Self::Batch, Self::Throttled, Self::Handler];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Throttled => "throttled",
            Self::Handler => "handler",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handles to every named queue. Cheap to clone.
#[derive(Clone)]
pub struct Queues {
    pub batch: Arc<dyn FairQueue>,
    pub throttled: Arc<dyn FairQueue>,
    pub handler: Arc<dyn FairQueue>,
}

impl Queues {
    /// Process-local queues.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            batch: Arc::new(MemoryFairQueue::new(QueueKind::Batch.as_str())),
            throttled: Arc::new(MemoryFairQueue::new(QueueKind::Throttled.as_str())),
            handler: Arc::new(MemoryFairQueue::new(QueueKind::Handler.as_str())),
        }
    }

    /// Queues shared through Redis.
    #[must_use]
    pub fn redis(conn: ConnectionManager) -> Self {
        Self {
            batch: Arc::new(RedisFairQueue::new(QueueKind::Batch.as_str(), conn.clone())),
            throttled: Arc::new(RedisFairQueue::new(
                QueueKind::Throttled.as_str(),
                conn.clone(),
            )),
            handler: Arc::new(RedisFairQueue::new(QueueKind::Handler.as_str(), conn)),
        }
    }

    #[must_use]
    pub fn get(&self, kind: QueueKind) -> &Arc<dyn FairQueue> {
        match kind {
            QueueKind::Batch => &self.batch,
            QueueKind::Throttled => &self.throttled,
            QueueKind::Handler => &self.handler,
        }
    }

    /// Wrap `payload` in a task envelope for `owner` and push it.
    pub async fn push<P: TaskPayload>(
        &self,
        kind: QueueKind,
        owner: OwnerId,
        payload: &P,
        priority: Priority,
    ) -> Result<()> {
        let task = Task::new(owner, payload)?;
        self.get(kind).push(&task, priority).await?;

        counter!(
            queue_metrics::TASKS_QUEUED_TOTAL,
            labels::QUEUE => kind.as_str(),
            labels::TASK_TYPE => payload.task_type()
        )
        .increment(1);
        debug!(queue = %kind, owner, task_type = payload.task_type(), ?priority, "queued task");
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde::Serialize};

    #[derive(Serialize)]
    struct Ping {
        n: u32,
    }

    impl TaskPayload for Ping {
        fn task_type(&self) -> &'static str {
            "ping"
        }
    }

    #[tokio::test]
    async fn push_routes_to_the_named_queue() {
        let queues = Queues::memory();
        queues
            .push(QueueKind::Handler, 42, &Ping { n: 1 }, Priority::High)
            .await
            .unwrap();

        assert_eq!(queues.batch.size().await.unwrap(), 0);
        assert_eq!(queues.throttled.size().await.unwrap(), 0);

        let task = queues.handler.pop().await.unwrap().unwrap();
        assert_eq!(task.task_type, "ping");
        assert_eq!(task.owner_id, 42);
        assert_eq!(task.task, serde_json::json!({ "n": 1 }));
    }

    #[test]
    fn queue_names() {
        let queues = Queues::memory();
        for kind in QueueKind::ALL {
            assert_eq!(queues.get(kind).name(), kind.to_string());
        }
    }
}
