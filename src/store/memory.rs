//! In-memory store for tests and dry runs.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{Located, Store};
use crate::error::{Error, Result};
use crate::model::{Fingerprint, State, WorkId, WorkItem};

#[derive(Default)]
struct Inner {
    items: HashMap<WorkId, WorkItem>,
    fingerprints: HashMap<Fingerprint, WorkId>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, `insert` and `put` fail. Used to exercise aborted commits.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Other("store unavailable".into()));
        }
        Ok(())
    }
}

fn poisoned() -> Error {
    Error::Other("store lock poisoned".into())
}

impl Store for MemoryStore {
    fn insert(&self, item: &WorkItem) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        if let Some(fp) = &item.fingerprint {
            if let Some(existing) = inner.fingerprints.get(fp) {
                return Err(Error::DuplicateItem(*existing));
            }
            inner.fingerprints.insert(fp.clone(), item.id);
        }
        inner.items.insert(item.id, item.clone());
        Ok(())
    }

    fn get(&self, id: WorkId) -> Result<WorkItem> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        inner.items.get(&id).cloned().ok_or(Error::NotFound(id))
    }

    fn put(&self, item: &WorkItem, _previous: State) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        match inner.items.get_mut(&item.id) {
            Some(slot) => {
                *slot = item.clone();
                Ok(())
            }
            None => Err(Error::NotFound(item.id)),
        }
    }

    fn list(&self, state: Option<State>) -> Result<Vec<WorkItem>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .items
            .values()
            .filter(|i| state.is_none_or(|s| i.state == s))
            .cloned()
            .collect())
    }

    fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<WorkId>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.fingerprints.get(fingerprint).copied())
    }

    fn scan(&self) -> Result<Vec<Located>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .items
            .values()
            .map(|item| Located {
                item: item.clone(),
                location: item.state,
            })
            .collect())
    }

    fn find(&self, id: WorkId) -> Result<Option<Located>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.items.get(&id).map(|item| Located {
            item: item.clone(),
            location: item.state,
        }))
    }
}
