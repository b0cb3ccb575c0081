//! WorkItem Store: durable record of items and their current state.
//!
//! The store is a persistence adapter only. It never decides whether a state
//! change is legal; every mutation arrives through the engine, which has
//! already validated it and written the audit entry.

pub mod document;
pub mod memory;
pub mod vault;

pub use memory::MemoryStore;
pub use vault::{Bucket, VaultStore};

use crate::error::Result;
use crate::model::{Fingerprint, State, WorkId, WorkItem};

/// An item as physically found, with the state its location encodes.
#[derive(Debug, Clone)]
pub struct Located {
    pub item: WorkItem,
    pub location: State,
}

impl Located {
    /// Header and physical location disagree.
    pub fn is_mismatched(&self) -> bool {
        self.item.state != self.location
    }
}

pub trait Store: Send + Sync {
    /// Persist a new item. Fails with `DuplicateItem` if its fingerprint is
    /// already known.
    fn insert(&self, item: &WorkItem) -> Result<()>;

    /// Current committed record. Fails with `NotFound`.
    fn get(&self, id: WorkId) -> Result<WorkItem>;

    /// Overwrite an item. `previous` is the state the item was persisted
    /// under, so the adapter can relocate it when the state changes.
    fn put(&self, item: &WorkItem, previous: State) -> Result<()>;

    /// All items, optionally restricted to one state.
    fn list(&self, state: Option<State>) -> Result<Vec<WorkItem>>;

    fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<WorkId>>;

    /// Survey every persisted item and where it physically lives.
    fn scan(&self) -> Result<Vec<Located>>;

    /// Where one item physically lives now, read fresh.
    fn find(&self, id: WorkId) -> Result<Option<Located>>;
}
