//! Scoped read/write sections over the shared graph.
//!
//! All access to the [`GraphStore`] goes through a closure run inside a
//! section. The guard lives only for the duration of the closure, so every
//! exit path (early return, `?`, panic) releases the lock.

use std::fmt;
use std::sync::RwLock;

use crate::storage::traits::{GraphStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// A graph store behind a whole-store shared/exclusive lock.
pub struct SharedGraph {
    store: RwLock<Box<dyn GraphStore>>,
}

impl SharedGraph {
    /// Wraps a concrete store.
    pub fn new(store: impl GraphStore + 'static) -> Self {
        Self::from_boxed(Box::new(store))
    }

    /// Wraps an already boxed store.
    #[must_use]
    pub fn from_boxed(store: Box<dyn GraphStore>) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }

    /// Runs `f` under a shared section. Read sections run concurrently.
    pub fn with_read_section<T>(&self, f: impl FnOnce(&dyn GraphStore) -> T) -> Result<T, StorageError> {
        let guard = self.store.read().map_err(|_| lock_err("graph.read"))?;
        Ok(f(guard.as_ref()))
    }

    /// Runs `f` under the exclusive section.
    pub fn with_write_section<T>(&self, f: impl FnOnce(&mut dyn GraphStore) -> T) -> Result<T, StorageError> {
        let mut guard = self.store.write().map_err(|_| lock_err("graph.write"))?;
        Ok(f(guard.as_mut()))
    }
}

impl fmt::Debug for SharedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.with_read_section(|g| g.len()).ok();
        f.debug_struct("SharedGraph").field("len", &len).finish()
    }
}
