//! Vault store: one Markdown document per item, its folder encoding its state.
//!
//! Layout under the vault root:
//!
//! ```text
//! Intake/  Needs_Action/  Pending_Approval/  Approved/  Rejected/
//! Done/    Error_Queue/   Plans/
//! ```
//!
//! Active plans (plan items needing action) live in `Plans/`. Each document
//! is `<bucket>/<uuid>.md`. The folder is the physical truth. A state change
//! rewrites the header in place and then moves the document, so the header
//! only runs ahead of the folder after a crash between the two steps or an
//! external move. Recovery reconciles them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, warn};
use uuid::Uuid;

use super::{Located, Store, document};
use crate::error::{Error, Result};
use crate::model::{Fingerprint, ItemType, State, WorkId, WorkItem};

// ---------------------------------------------------------------------------
// Buckets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Intake,
    NeedsAction,
    PendingApproval,
    Approved,
    Rejected,
    Done,
    ErrorQueue,
    Plans,
}

impl Bucket {
    pub const ALL: [Bucket; 8] = [
        Bucket::Intake,
        Bucket::NeedsAction,
        Bucket::PendingApproval,
        Bucket::Approved,
        Bucket::Rejected,
        Bucket::Done,
        Bucket::ErrorQueue,
        Bucket::Plans,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            Bucket::Intake => "Intake",
            Bucket::NeedsAction => "Needs_Action",
            Bucket::PendingApproval => "Pending_Approval",
            Bucket::Approved => "Approved",
            Bucket::Rejected => "Rejected",
            Bucket::Done => "Done",
            Bucket::ErrorQueue => "Error_Queue",
            Bucket::Plans => "Plans",
        }
    }

    /// The state membership in this bucket encodes.
    pub fn state(self) -> State {
        match self {
            Bucket::Intake => State::Intake,
            Bucket::NeedsAction | Bucket::Plans => State::NeedsAction,
            Bucket::PendingApproval => State::PendingApproval,
            Bucket::Approved => State::Approved,
            Bucket::Rejected => State::Rejected,
            Bucket::Done => State::Done,
            Bucket::ErrorQueue => State::ErrorQueue,
        }
    }

    /// Where an item of `item_type` in `state` is filed.
    pub fn for_item(state: State, item_type: ItemType) -> Self {
        match (state, item_type) {
            (State::NeedsAction, ItemType::Plan) => Bucket::Plans,
            (State::Intake, _) => Bucket::Intake,
            (State::NeedsAction, _) => Bucket::NeedsAction,
            (State::PendingApproval, _) => Bucket::PendingApproval,
            (State::Approved, _) => Bucket::Approved,
            (State::Rejected, _) => Bucket::Rejected,
            (State::Done, _) => Bucket::Done,
            (State::ErrorQueue, _) => Bucket::ErrorQueue,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Index {
    locations: HashMap<WorkId, Bucket>,
    fingerprints: HashMap<Fingerprint, WorkId>,
}

pub struct VaultStore {
    root: PathBuf,
    index: RwLock<Index>,
}

impl VaultStore {
    /// Open a vault, creating missing bucket folders and rebuilding the index.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for bucket in Bucket::ALL {
            fs::create_dir_all(root.join(bucket.dir_name()))?;
        }
        let store = Self {
            root,
            index: RwLock::new(Index::default()),
        };
        store.reindex()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document for `id` in `bucket`.
    pub fn document_path(&self, bucket: Bucket, id: WorkId) -> PathBuf {
        self.root
            .join(bucket.dir_name())
            .join(format!("{}.md", id.0))
    }

    /// Rebuild the index from what is on disk.
    pub fn reindex(&self) -> Result<usize> {
        let mut fresh = Index::default();
        for located in self.survey()? {
            let (item, bucket) = located;
            if let Some(fp) = &item.fingerprint {
                fresh.fingerprints.entry(fp.clone()).or_insert(item.id);
            }
            fresh.locations.insert(item.id, bucket);
        }
        let count = fresh.locations.len();
        *self.index.write().map_err(|_| poisoned())? = fresh;
        debug!(root = %self.root.display(), items = count, "vault indexed");
        Ok(count)
    }

    /// Read every well-formed document in every bucket.
    fn survey(&self) -> Result<Vec<(WorkItem, Bucket)>> {
        let mut found = Vec::new();
        for bucket in Bucket::ALL {
            let dir = self.root.join(bucket.dir_name());
            let entries = match fs::read_dir(&dir) {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let path = entry?.path();
                if !is_document(&path) {
                    continue;
                }
                match read_document(&path) {
                    Ok(item) => found.push((item, bucket)),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable document")
                    }
                }
            }
        }
        Ok(found)
    }

    /// Find the bucket currently holding `id`, trusting the index first.
    fn locate(&self, id: WorkId) -> Result<Option<Bucket>> {
        let indexed = self
            .index
            .read()
            .map_err(|_| poisoned())?
            .locations
            .get(&id)
            .copied();
        if let Some(bucket) = indexed
            && self.document_path(bucket, id).exists()
        {
            return Ok(Some(bucket));
        }

        // Moved behind our back: probe every bucket.
        let probed = Bucket::ALL
            .into_iter()
            .find(|&b| self.document_path(b, id).exists());
        let mut index = self.index.write().map_err(|_| poisoned())?;
        match probed {
            Some(bucket) => {
                index.locations.insert(id, bucket);
            }
            None => {
                index.locations.remove(&id);
            }
        }
        Ok(probed)
    }
}

impl Store for VaultStore {
    fn insert(&self, item: &WorkItem) -> Result<()> {
        let mut index = self.index.write().map_err(|_| poisoned())?;
        if let Some(fp) = &item.fingerprint
            && let Some(existing) = index.fingerprints.get(fp)
        {
            return Err(Error::DuplicateItem(*existing));
        }

        let bucket = Bucket::for_item(item.state, item.item_type);
        write_atomic(&self.document_path(bucket, item.id), &document::render(item)?)?;

        index.locations.insert(item.id, bucket);
        if let Some(fp) = &item.fingerprint {
            index.fingerprints.insert(fp.clone(), item.id);
        }
        Ok(())
    }

    fn get(&self, id: WorkId) -> Result<WorkItem> {
        let bucket = self.locate(id)?.ok_or(Error::NotFound(id))?;
        read_document(&self.document_path(bucket, id))
    }

    fn put(&self, item: &WorkItem, previous: State) -> Result<()> {
        let target = Bucket::for_item(item.state, item.item_type);
        let hinted = Bucket::for_item(previous, item.item_type);
        let current = if self.document_path(hinted, item.id).exists() {
            hinted
        } else {
            self.locate(item.id)?.ok_or(Error::NotFound(item.id))?
        };
        let current_path = self.document_path(current, item.id);
        let rendered = document::render(item)?;
        if current == target {
            return write_atomic(&current_path, &rendered);
        }

        // Rewrite the header where the document sits, then move it. The move
        // is the commit point; if it fails the old header goes back.
        let original = fs::read_to_string(&current_path)?;
        write_atomic(&current_path, &rendered)?;
        if let Err(e) = fs::rename(&current_path, self.document_path(target, item.id)) {
            if let Err(restore) = write_atomic(&current_path, &original) {
                warn!(id = %item.id, error = %restore, "failed to restore header after a failed move");
            }
            return Err(e.into());
        }
        self.index
            .write()
            .map_err(|_| poisoned())?
            .locations
            .insert(item.id, target);
        Ok(())
    }

    fn list(&self, state: Option<State>) -> Result<Vec<WorkItem>> {
        let located: Vec<(WorkId, Bucket)> = self
            .index
            .read()
            .map_err(|_| poisoned())?
            .locations
            .iter()
            .filter(|(_, b)| state.is_none_or(|s| b.state() == s))
            .map(|(id, b)| (*id, *b))
            .collect();

        let mut items = Vec::with_capacity(located.len());
        for (id, bucket) in located {
            let path = self.document_path(bucket, id);
            match read_document(&path) {
                Ok(item) => items.push(item),
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Moved since indexing; pick it up from wherever it went.
                    if let Some(b) = self.locate(id)?
                        && state.is_none_or(|s| b.state() == s)
                    {
                        items.push(read_document(&self.document_path(b, id))?);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(items)
    }

    fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<WorkId>> {
        Ok(self
            .index
            .read()
            .map_err(|_| poisoned())?
            .fingerprints
            .get(fingerprint)
            .copied())
    }

    fn scan(&self) -> Result<Vec<Located>> {
        let found = self.survey()?;
        let mut index = self.index.write().map_err(|_| poisoned())?;
        index.locations.clear();
        let mut out = Vec::with_capacity(found.len());
        for (item, bucket) in found {
            index.locations.insert(item.id, bucket);
            if let Some(fp) = &item.fingerprint {
                index.fingerprints.entry(fp.clone()).or_insert(item.id);
            }
            out.push(Located {
                item,
                location: bucket.state(),
            });
        }
        Ok(out)
    }

    fn find(&self, id: WorkId) -> Result<Option<Located>> {
        let Some(bucket) = self.locate(id)? else {
            return Ok(None);
        };
        Ok(Some(Located {
            item: read_document(&self.document_path(bucket, id))?,
            location: bucket.state(),
        }))
    }
}

fn poisoned() -> Error {
    Error::Other("vault index lock poisoned".into())
}

fn is_document(path: &Path) -> bool {
    let named_by_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| Uuid::parse_str(s).is_ok());
    named_by_id && path.extension().and_then(|e| e.to_str()) == Some("md")
}

fn read_document(path: &Path) -> Result<WorkItem> {
    let text = fs::read_to_string(path)?;
    document::parse(&text).map_err(|e| match e {
        Error::Validation(msg) => Error::Validation(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Write through a sibling temp file and rename over the target.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Other(format!("bad document path: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, contents)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_file_separately_only_while_active() {
        assert_eq!(
            Bucket::for_item(State::NeedsAction, ItemType::Plan),
            Bucket::Plans
        );
        assert_eq!(Bucket::for_item(State::Done, ItemType::Plan), Bucket::Done);
        assert_eq!(
            Bucket::for_item(State::NeedsAction, ItemType::Email),
            Bucket::NeedsAction
        );
        assert_eq!(Bucket::Plans.state(), State::NeedsAction);
    }

    #[test]
    fn every_state_has_a_bucket_that_maps_back() {
        for state in State::ALL {
            assert_eq!(Bucket::for_item(state, ItemType::Task).state(), state);
        }
    }

    #[test]
    fn open_creates_bucket_folders() {
        let dir = tempfile::tempdir().unwrap();
        VaultStore::open(dir.path()).unwrap();
        for bucket in Bucket::ALL {
            assert!(dir.path().join(bucket.dir_name()).is_dir());
        }
    }
}
