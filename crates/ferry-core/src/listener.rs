// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Listener registry with disposable subscription handles.
//!
//! Callbacks run synchronously on the emitting task, in registration order.
//! The registry lock is released before callbacks run, so a callback may
//! subscribe or dispose other handles without deadlocking.

use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// A set of callbacks interested in values of type `T`.
pub struct Listeners<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Registers `callback`. It stays registered until the returned handle is
    /// disposed or dropped, or until [`clear`](Self::clear) is called.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = reg.next_id;
            reg.next_id += 1;
            reg.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        SubscriptionHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut reg = inner.lock().unwrap_or_else(PoisonError::into_inner);
                reg.entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Delivers `value` to every registered callback.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = {
            let reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            reg.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every callback. Outstanding handles become no-ops.
    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clear();
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposable relation between a listener registry and one callback.
///
/// Dropping the handle unsubscribes. Disposing never affects the lifecycle of
/// the component that owns the registry.
#[must_use = "dropping a SubscriptionHandle unsubscribes immediately"]
pub struct SubscriptionHandle {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SubscriptionHandle {
    pub fn new<F>(detach: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Removes the callback from its registry.
    pub fn dispose(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.detach.is_some())
            .finish()
    }
}
