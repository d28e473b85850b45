//! Process-local fair queue, used in single-node mode and in tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use {async_trait::async_trait, tokio::sync::Mutex};

use crate::{
    Result,
    queue::{FairQueue, OwnerId, Priority, Task},
};

#[derive(Default)]
struct OwnerLanes {
    high: VecDeque<Task>,
    default: VecDeque<Task>,
    active: usize,
}

impl OwnerLanes {
    fn queued(&self) -> usize {
        self.high.len() + self.default.len()
    }

    fn is_idle(&self) -> bool {
        self.queued() == 0 && self.active == 0
    }
}

#[derive(Default)]
struct State {
    owners: BTreeMap<OwnerId, OwnerLanes>,
    paused: BTreeSet<OwnerId>,
}

pub struct MemoryFairQueue {
    name: String,
    state: Mutex<State>,
}

impl MemoryFairQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Number of tasks popped for `owner` and not yet marked done.
    pub async fn active(&self, owner: OwnerId) -> usize {
        self.state
            .lock()
            .await
            .owners
            .get(&owner)
            .map_or(0, |lanes| lanes.active)
    }
}

#[async_trait]
impl FairQueue for MemoryFairQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, task: &Task, priority: Priority) -> Result<()> {
        let mut state = self.state.lock().await;
        let lanes = state.owners.entry(task.owner_id).or_default();
        match priority {
            Priority::High => lanes.high.push_back(task.clone()),
            Priority::Default => lanes.default.push_back(task.clone()),
        }
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;
        let State { owners, paused } = &mut *state;

        // BTreeMap iteration keeps ties ordered by owner id.
        let next = owners
            .iter()
            .filter(|(owner, lanes)| lanes.queued() > 0 && !paused.contains(*owner))
            .min_by_key(|(_, lanes)| lanes.active)
            .map(|(owner, _)| *owner);

        let Some(owner) = next else {
            return Ok(None);
        };
        let Some(lanes) = owners.get_mut(&owner) else {
            return Ok(None);
        };
        let task = lanes.high.pop_front().or_else(|| lanes.default.pop_front());
        if task.is_some() {
            lanes.active += 1;
        }
        Ok(task)
    }

    async fn done(&self, owner: OwnerId) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(lanes) = state.owners.get_mut(&owner) {
            lanes.active = lanes.active.saturating_sub(1);
            if lanes.is_idle() {
                state.owners.remove(&owner);
            }
        }
        Ok(())
    }

    async fn pause(&self, owner: OwnerId) -> Result<()> {
        self.state.lock().await.paused.insert(owner);
        Ok(())
    }

    async fn resume(&self, owner: OwnerId) -> Result<()> {
        self.state.lock().await.paused.remove(&owner);
        Ok(())
    }

    async fn paused(&self) -> Result<Vec<OwnerId>> {
        Ok(self.state.lock().await.paused.iter().copied().collect())
    }

    async fn owners(&self) -> Result<Vec<OwnerId>> {
        Ok(self
            .state
            .lock()
            .await
            .owners
            .iter()
            .filter(|(_, lanes)| lanes.queued() > 0)
            .map(|(owner, _)| *owner)
            .collect())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self
            .state
            .lock()
            .await
            .owners
            .values()
            .map(OwnerLanes::queued)
            .sum())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn task(owner: OwnerId, n: i64) -> Task {
        Task {
            task_type: "test".into(),
            owner_id: owner,
            task: json!({ "n": n }),
            queued_on: chrono::Utc::now(),
        }
    }

    fn n(task: &Task) -> i64 {
        task.task["n"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn high_priority_lane_first() {
        let q = MemoryFairQueue::new("batch");
        q.push(&task(1, 1), Priority::Default).await.unwrap();
        q.push(&task(1, 2), Priority::High).await.unwrap();

        assert_eq!(n(&q.pop().await.unwrap().unwrap()), 2);
        assert_eq!(n(&q.pop().await.unwrap().unwrap()), 1);
        assert!(q.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn owners_with_fewer_active_tasks_go_first() {
        let q = MemoryFairQueue::new("throttled");
        for i in 0..3 {
            q.push(&task(1, i), Priority::Default).await.unwrap();
        }
        q.push(&task(2, 10), Priority::Default).await.unwrap();

        assert_eq!(q.pop().await.unwrap().unwrap().owner_id, 1);
        // owner 1 now has one active task, so owner 2 is next
        assert_eq!(q.pop().await.unwrap().unwrap().owner_id, 2);
        assert_eq!(q.active(1).await, 1);

        q.done(1).await.unwrap();
        assert_eq!(q.active(1).await, 0);
        assert_eq!(q.size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn paused_owners_are_skipped_but_still_listed() {
        let q = MemoryFairQueue::new("throttled");
        q.push(&task(1, 1), Priority::Default).await.unwrap();
        q.push(&task(2, 2), Priority::Default).await.unwrap();

        q.pause(1).await.unwrap();
        q.pause(1).await.unwrap();
        assert_eq!(q.paused().await.unwrap(), vec![1]);
        assert_eq!(q.owners().await.unwrap(), vec![1, 2]);

        assert_eq!(q.pop().await.unwrap().unwrap().owner_id, 2);
        assert!(q.pop().await.unwrap().is_none());

        q.resume(1).await.unwrap();
        assert!(q.paused().await.unwrap().is_empty());
        assert_eq!(q.pop().await.unwrap().unwrap().owner_id, 1);
    }

    #[tokio::test]
    async fn drained_owner_drops_out_of_owners() {
        let q = MemoryFairQueue::new("handler");
        q.push(&task(7, 1), Priority::High).await.unwrap();
        q.pop().await.unwrap();
        assert!(q.owners().await.unwrap().is_empty());
        q.done(7).await.unwrap();
        assert_eq!(q.active(7).await, 0);
    }
}
