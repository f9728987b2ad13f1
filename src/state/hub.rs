use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::types::LoadingState;

pub type Listener = Arc<dyn Fn(&LoadingState) + Send + Sync>;

// ---------------------------------------------------------------------------
// StateHub
// ---------------------------------------------------------------------------

/// Owns the loading state and the ordered set of listeners observing it.
///
/// Listeners run synchronously on the thread that changed the state, in
/// registration order, with a snapshot taken under the lock. They are called
/// after the lock is released, so a listener may read the state or
/// (un)subscribe without deadlocking. A slow listener delays the caller.
#[derive(Default)]
pub struct StateHub {
    state: Mutex<LoadingState>,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_id: AtomicU64,
}

impl StateHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> LoadingState {
        self.state().clone()
    }

    /// Register a listener. It stays registered until the returned handle is
    /// dropped or [`Subscription::unsubscribe`]d.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&LoadingState) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners().insert(id, Arc::new(listener));
        Subscription { id, hub: Arc::downgrade(self) }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    pub fn clear_listeners(&self) {
        self.listeners().clear();
    }

    /// Mutate the state and notify every listener with the result.
    pub fn update(&self, mutate: impl FnOnce(&mut LoadingState)) {
        let snapshot = {
            let mut state = self.state();
            mutate(&mut *state);
            state.clone()
        };
        self.notify(&snapshot);
    }

    /// Atomically move from idle to loading. Returns false, without touching
    /// the state, when already initialized or already loading.
    pub fn try_begin_loading(&self) -> bool {
        let snapshot = {
            let mut state = self.state();
            if state.is_initialized || state.is_loading {
                return false;
            }
            state.is_loading = true;
            state.has_error = false;
            state.error = None;
            state.progress = Some(0);
            state.clone()
        };
        self.notify(&snapshot);
        true
    }

    fn notify(&self, snapshot: &LoadingState) {
        let listeners: Vec<Listener> = self.listeners().values().cloned().collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners().remove(&id);
    }

    fn state(&self) -> MutexGuard<'_, LoadingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, BTreeMap<u64, Listener>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle returned by [`StateHub::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    hub: Weak<StateHub>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the listener registered for the lifetime of the hub.
    pub fn detach(mut self) {
        self.hub = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
