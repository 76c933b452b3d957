//! Correlation of replies with the requests that caused them.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Live request ids and the channel each one completes through.
///
/// An entry is removed the moment it resolves, so each id completes at most
/// once.
#[derive(Debug)]
pub struct PendingTable<T> {
    entries: Mutex<HashMap<i64, Sender<T>>>,
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> PendingTable<T> {
    // every operation is a single insert or remove
    fn entries(&self) -> MutexGuard<'_, HashMap<i64, Sender<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, id: i64) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        self.entries().insert(id, tx);
        rx
    }

    /// Completes `id` with `value`. Returns false for unknown or already
    /// resolved ids.
    pub fn resolve(&self, id: i64, value: T) -> bool {
        let Some(tx) = self.entries().remove(&id) else {
            return false;
        };
        // the caller may have dropped its completion handle
        let _ = tx.send(value);
        true
    }

    /// Completes every outstanding id with a value from `make`.
    pub fn fail_all(&self, make: impl Fn() -> T) -> usize {
        let drained: Vec<_> = self.entries().drain().collect();
        for (_, tx) in &drained {
            let _ = tx.send(make());
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
