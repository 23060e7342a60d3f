//! In-memory implementation of RunStore

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::store::*;
use crate::channel::OutputChannel;
use crate::run::{RecordedEvent, RunEvent, RunId, RunState};

/// Everything kept for one run
struct StoredRun {
    state: RunState,
    events: Vec<RecordedEvent>,
    channels: HashMap<String, Arc<OutputChannel>>,
}

/// In-memory implementation of RunStore
///
/// Suitable for tests and single-process deployments. Nothing survives a
/// restart, so `WorkflowEngine::recover` has nothing to pick up with it.
///
/// # Example
///
/// ```
/// use waypoint::InMemoryRunStore;
///
/// let store = InMemoryRunStore::new();
/// assert_eq!(store.run_count(), 0);
/// ```
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<RunId, StoredRun>>,
}

impl InMemoryRunStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Get the number of runs
    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.runs.write().clear();
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, state: RunState) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        if runs.contains_key(&state.id) {
            return Err(StoreError::RunExists(state.id));
        }
        runs.insert(
            state.id,
            StoredRun {
                state,
                events: vec![],
                channels: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<RunState, StoreError> {
        let runs = self.runs.read();
        runs.get(&run_id)
            .map(|r| r.state.clone())
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn update_run(&self, state: &RunState) -> Result<u64, StoreError> {
        let mut runs = self.runs.write();
        let stored = runs
            .get_mut(&state.id)
            .ok_or(StoreError::RunNotFound(state.id))?;

        if stored.state.is_terminal() {
            return Err(StoreError::RunTerminal(state.id));
        }
        if stored.state.version != state.version {
            return Err(StoreError::ConcurrencyConflict {
                expected: state.version,
                actual: stored.state.version,
            });
        }

        let version = state.version + 1;
        stored.state = state.clone();
        stored.state.version = version;
        Ok(version)
    }

    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<RunState>, StoreError> {
        let runs = self.runs.read();
        let mut matching: Vec<RunState> = runs
            .values()
            .filter(|r| filter.matches(&r.state))
            .map(|r| r.state.clone())
            .collect();
        matching.sort_by_key(|s| (s.created_at, s.id));
        Ok(matching)
    }

    async fn remove_run(&self, run_id: RunId) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let stored = runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        if !stored.state.is_terminal() {
            return Err(StoreError::RunActive(run_id));
        }

        if let Some(removed) = runs.remove(&run_id) {
            // Readers still holding a channel must see it end
            removed.channels.values().for_each(|c| c.close());
        }
        Ok(())
    }

    async fn purge_terminal(
        &self,
        finished_before: DateTime<Utc>,
    ) -> Result<Vec<RunId>, StoreError> {
        let mut runs = self.runs.write();
        let expired: Vec<RunId> = runs
            .values()
            .filter(|r| {
                r.state
                    .finished_at
                    .is_some_and(|at| r.state.is_terminal() && at < finished_before)
            })
            .map(|r| r.state.id)
            .collect();

        for run_id in &expired {
            if let Some(removed) = runs.remove(run_id) {
                removed.channels.values().for_each(|c| c.close());
            }
        }
        Ok(expired)
    }

    async fn append_event(&self, run_id: RunId, event: RunEvent) -> Result<u64, StoreError> {
        let mut runs = self.runs.write();
        let stored = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;

        let sequence = stored.events.len() as u64;
        stored.events.push(RecordedEvent {
            sequence,
            recorded_at: Utc::now(),
            event,
        });
        Ok(sequence)
    }

    async fn load_events(&self, run_id: RunId) -> Result<Vec<RecordedEvent>, StoreError> {
        let runs = self.runs.read();
        runs.get(&run_id)
            .map(|r| r.events.clone())
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn channel(&self, run_id: RunId, name: &str) -> Result<Arc<OutputChannel>, StoreError> {
        if let Some(existing) = self
            .runs
            .read()
            .get(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?
            .channels
            .get(name)
        {
            return Ok(Arc::clone(existing));
        }

        let mut runs = self.runs.write();
        let stored = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        let terminal = stored.state.is_terminal();
        let channel = stored
            .channels
            .entry(name.to_string())
            .or_insert_with(|| {
                let channel = OutputChannel::new(run_id, name);
                if terminal {
                    channel.close();
                }
                Arc::new(channel)
            });
        Ok(Arc::clone(channel))
    }

    async fn channel_names(&self, run_id: RunId) -> Result<Vec<String>, StoreError> {
        let runs = self.runs.read();
        let stored = runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        let mut names: Vec<String> = stored.channels.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn close_channels(&self, run_id: RunId) -> Result<(), StoreError> {
        let runs = self.runs.read();
        let stored = runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        stored.channels.values().for_each(|c| c.close());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunStatus;
    use serde_json::json;

    async fn store_with_run() -> (InMemoryRunStore, RunState) {
        let store = InMemoryRunStore::new();
        let state = RunState::new("test_workflow", json!({"key": "value"}));
        store.create_run(state.clone()).await.unwrap();
        (store, state)
    }

    #[tokio::test]
    async fn test_create_and_get_run() {
        let (store, state) = store_with_run().await;

        let loaded = store.get_run(state.id).await.unwrap();
        assert_eq!(loaded.status, RunStatus::Pending);
        assert_eq!(loaded.input, json!({"key": "value"}));
        assert_eq!(store.run_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let store = InMemoryRunStore::new();
        let result = store.get_run(RunId::new()).await;
        assert!(matches!(result, Err(StoreError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let (store, mut state) = store_with_run().await;

        state.transition(RunStatus::Running).unwrap();
        let version = store.update_run(&state).await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(store.get_run(state.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_concurrency_conflict() {
        let (store, state) = store_with_run().await;

        let mut first = state.clone();
        first.transition(RunStatus::Running).unwrap();
        store.update_run(&first).await.unwrap();

        // Second writer still holds version 0
        let mut stale = state;
        stale.transition(RunStatus::Cancelled).unwrap();
        let result = store.update_run(&stale).await;

        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_terminal_run_is_read_only() {
        let (store, mut state) = store_with_run().await;

        state.transition(RunStatus::Cancelled).unwrap();
        state.version = store.update_run(&state).await.unwrap();

        state.result = Some(json!("late"));
        let result = store.update_run(&state).await;
        assert!(matches!(result, Err(StoreError::RunTerminal(_))));
    }

    #[tokio::test]
    async fn test_append_and_load_events() {
        let (store, state) = store_with_run().await;

        let seq = store
            .append_event(
                state.id,
                RunEvent::RunCreated {
                    workflow: "test_workflow".into(),
                    input: json!({}),
                },
            )
            .await
            .unwrap();
        assert_eq!(seq, 0);

        let seq = store
            .append_event(
                state.id,
                RunEvent::StatusChanged {
                    from: RunStatus::Pending,
                    to: RunStatus::Running,
                },
            )
            .await
            .unwrap();
        assert_eq!(seq, 1);

        let events = store.load_events(state.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event.event_type(), "status_changed");
    }

    #[tokio::test]
    async fn test_channel_is_created_once() {
        let (store, state) = store_with_run().await;

        let a = store.channel(state.id, "default").await.unwrap();
        a.append("x").unwrap();
        let b = store.channel(state.id, "default").await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.channel_names(state.id).await.unwrap(), vec!["default"]);
    }

    #[tokio::test]
    async fn test_channel_of_terminal_run_starts_closed() {
        let (store, mut state) = store_with_run().await;
        state.transition(RunStatus::Cancelled).unwrap();
        store.update_run(&state).await.unwrap();

        let channel = store.channel(state.id, "never_written").await.unwrap();
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_remove_requires_terminal_run() {
        let (store, mut state) = store_with_run().await;

        let result = store.remove_run(state.id).await;
        assert!(matches!(result, Err(StoreError::RunActive(_))));

        let channel = store.channel(state.id, "default").await.unwrap();
        state.transition(RunStatus::Cancelled).unwrap();
        store.update_run(&state).await.unwrap();

        store.remove_run(state.id).await.unwrap();
        assert!(channel.is_closed());
        assert!(matches!(
            store.get_run(state.id).await,
            Err(StoreError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_terminal_respects_cutoff() {
        let store = InMemoryRunStore::new();

        let mut done = RunState::new("w", json!(null));
        done.transition(RunStatus::Cancelled).unwrap();
        let active = RunState::new("w", json!(null));
        store.create_run(done.clone()).await.unwrap();
        store.create_run(active.clone()).await.unwrap();

        let before_finish = done.finished_at.unwrap() - chrono::Duration::seconds(1);
        assert!(store.purge_terminal(before_finish).await.unwrap().is_empty());

        let purged = store
            .purge_terminal(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, vec![done.id]);
        assert!(store.get_run(active.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_runs_filters() {
        let store = InMemoryRunStore::new();

        let mut finished = RunState::new("a", json!(null));
        finished.transition(RunStatus::Cancelled).unwrap();
        store.create_run(finished).await.unwrap();
        store.create_run(RunState::new("a", json!(null))).await.unwrap();
        store.create_run(RunState::new("b", json!(null))).await.unwrap();

        assert_eq!(store.list_runs(RunFilter::default()).await.unwrap().len(), 3);
        assert_eq!(store.list_runs(RunFilter::active()).await.unwrap().len(), 2);

        let a_active = store
            .list_runs(RunFilter::active().with_workflow("a"))
            .await
            .unwrap();
        assert_eq!(a_active.len(), 1);
        assert_eq!(a_active[0].status, RunStatus::Pending);
    }
}
