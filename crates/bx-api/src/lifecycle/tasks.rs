//! Ownership of every background lifecycle task.
//!
//! Tasks are grouped by the resource they act on. Retiring a resource marks
//! it tombstoned and aborts its lifecycle tasks, so a task that outlives its
//! database row cannot write it back.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use bx_infra::ProviderName;
use tokio::task::AbortHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Server(Uuid),
    Redirector(Uuid),
    /// Provider-wide deletion of every tagged instance.
    Sweep(ProviderName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Drives a resource forward; aborted when the resource is retired.
    Lifecycle,
    /// Tears a resource down; runs to completion after retirement.
    Teardown,
}

/// Outcome of [`TaskRegistry::spawn_exclusive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spawn {
    Started,
    /// Another lifecycle task for the key is still running.
    Busy,
    /// The key is tombstoned.
    Refused,
}

struct Tracked {
    id: u64,
    kind: TaskKind,
    handle: AbortHandle,
}

#[derive(Default)]
struct State {
    next_id: u64,
    tasks: HashMap<ResourceKey, Vec<Tracked>>,
    tombstones: HashSet<ResourceKey>,
}

impl State {
    fn running(&self, key: ResourceKey, kind: TaskKind) -> usize {
        self.tasks
            .get(&key)
            .map_or(0, |tasks| tasks.iter().filter(|t| t.kind == kind && !t.handle.is_finished()).count())
    }
}

#[derive(Clone)]
pub struct TaskRegistry {
    guard_tombstones: bool,
    state: Arc<Mutex<State>>,
}

impl TaskRegistry {
    /// With `guard_tombstones` off, retiring only forgets tracked tasks:
    /// nothing is aborted and nothing is ever reported tombstoned.
    pub fn new(guard_tombstones: bool) -> Self {
        Self {
            guard_tombstones,
            state: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `fut` under `key`. Lifecycle tasks for a tombstoned key are
    /// refused and `false` is returned.
    pub fn spawn<F>(&self, key: ResourceKey, kind: TaskKind, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.start(key, kind, false, fut) == Spawn::Started
    }

    /// Spawn a lifecycle task unless one is already running under `key`.
    /// The check and the spawn happen under one lock.
    pub fn spawn_exclusive<F>(&self, key: ResourceKey, fut: F) -> Spawn
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.start(key, TaskKind::Lifecycle, true, fut)
    }

    fn start<F>(&self, key: ResourceKey, kind: TaskKind, exclusive: bool, fut: F) -> Spawn
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.lock();
        if kind == TaskKind::Lifecycle && self.guard_tombstones && state.tombstones.contains(&key) {
            tracing::debug!(?key, "refusing lifecycle task for tombstoned resource");
            return Spawn::Refused;
        }
        if exclusive && state.running(key, kind) > 0 {
            tracing::debug!(?key, "lifecycle task already running");
            return Spawn::Busy;
        }

        let id = state.next_id;
        state.next_id += 1;

        // The lock is held until the handle is recorded, so `finish` can
        // never run before the entry exists.
        let registry = self.clone();
        let handle = tokio::spawn(async move {
            fut.await;
            registry.finish(key, id);
        })
        .abort_handle();

        state.tasks.entry(key).or_default().push(Tracked { id, kind, handle });
        Spawn::Started
    }

    fn finish(&self, key: ResourceKey, id: u64) {
        let mut state = self.lock();
        if let Some(tasks) = state.tasks.get_mut(&key) {
            tasks.retain(|t| t.id != id);
            if tasks.is_empty() {
                state.tasks.remove(&key);
            }
        }
    }

    /// Tombstone `key` and abort its lifecycle tasks. Returns how many were
    /// aborted.
    pub fn retire(&self, key: ResourceKey) -> usize {
        if !self.guard_tombstones {
            return 0;
        }

        let mut state = self.lock();
        state.tombstones.insert(key);

        let Some(tasks) = state.tasks.get_mut(&key) else {
            return 0;
        };
        let mut aborted = 0;
        tasks.retain(|t| {
            if t.kind == TaskKind::Lifecycle {
                t.handle.abort();
                aborted += 1;
                false
            } else {
                true
            }
        });
        if tasks.is_empty() {
            state.tasks.remove(&key);
        }
        aborted
    }

    /// Lift a tombstone after a teardown failed and the resource is still
    /// live.
    pub fn revive(&self, key: ResourceKey) {
        self.lock().tombstones.remove(&key);
    }

    pub fn is_tombstoned(&self, key: ResourceKey) -> bool {
        self.guard_tombstones && self.lock().tombstones.contains(&key)
    }

    /// Number of tracked, unfinished tasks of `kind` under `key`.
    #[cfg(test)]
    pub fn active(&self, key: ResourceKey, kind: TaskKind) -> usize {
        self.lock().running(key, kind)
    }

    /// Abort every task. Used on process exit.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        let count: usize = state.tasks.values().map(Vec::len).sum();
        for task in state.tasks.drain().flat_map(|(_, tasks)| tasks) {
            task.handle.abort();
        }
        tracing::info!(count, "aborted background tasks");
    }
}
