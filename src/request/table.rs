//! Registry of live infer requests of one network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::ForgeResult;

use super::infer_request::RequestShared;
use super::types::RequestId;

/// Maps request ids to non-owning references.
///
/// Entries disappear when their request is dropped.
#[derive(Debug, Default)]
pub struct RequestTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<RequestId, Weak<RequestShared>>>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn allocate_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn insert(&self, id: RequestId, request: Weak<RequestShared>) -> ForgeResult<()> {
        self.entries.lock()?.insert(id, request);
        Ok(())
    }

    pub(crate) fn remove(&self, id: RequestId) -> ForgeResult<()> {
        self.entries.lock()?.remove(&id);
        Ok(())
    }

    pub(crate) fn resolve(&self, id: RequestId) -> ForgeResult<Option<Arc<RequestShared>>> {
        Ok(self.entries.lock()?.get(&id).and_then(Weak::upgrade))
    }

    /// Live requests; entries whose request is gone are pruned.
    pub fn len(&self) -> ForgeResult<usize> {
        let mut entries = self.entries.lock()?;
        entries.retain(|_, weak| weak.strong_count() > 0);
        Ok(entries.len())
    }

    pub fn is_empty(&self) -> ForgeResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn ids(&self) -> ForgeResult<Vec<RequestId>> {
        let entries = self.entries.lock()?;
        let mut ids: Vec<RequestId> = entries
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
