use std::collections::HashMap;

use crate::backend::BufferHandle;
use crate::buffer::BufferId;

/// Counters exposed through [`crate::Context::stats`].
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct BufferStats {
    /// Buffers created over the context's lifetime.
    pub created: u64,
    /// Buffers released, explicitly or at teardown.
    pub freed: u64,
    /// Orphan operations performed.
    pub orphaned: u64,
    /// Buffers currently allocated.
    pub live: usize,
    /// Sum of the logical sizes of live buffers.
    pub live_bytes: u64,
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct Entry {
    pub handle: BufferHandle,
    pub size: u64,
}

/// Live buffers of one context, keyed by their stable logical id.
///
/// A buffer is Allocated exactly while it has an entry here.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    next_id: u64,
    entries: HashMap<BufferId, Entry>,
    created: u64,
    freed: u64,
    orphaned: u64,
}

impl Registry {
    pub fn insert(&mut self, handle: BufferHandle, size: u64) -> BufferId {
        self.next_id += 1;
        let id = BufferId::new(self.next_id);
        self.entries.insert(id, Entry { handle, size });
        self.created += 1;
        id
    }

    pub fn get(&self, id: BufferId) -> Option<Entry> {
        self.entries.get(&id).copied()
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Points `id` at a new allocation after an orphan.
    pub fn replace(&mut self, id: BufferId, handle: BufferHandle, size: u64) {
        if let Some(entry) = self.entries.get_mut(&id) {
            *entry = Entry { handle, size };
            self.orphaned += 1;
        }
    }

    pub fn remove(&mut self, id: BufferId) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        self.freed += 1;
        Some(entry)
    }

    /// Removes every entry, returning the handles to free.
    pub fn drain(&mut self) -> Vec<BufferHandle> {
        let handles: Vec<_> = self.entries.drain().map(|(_, e)| e.handle).collect();
        self.freed += handles.len() as u64;
        handles
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            created: self.created,
            freed: self.freed,
            orphaned: self.orphaned,
            live: self.entries.len(),
            live_bytes: self.entries.values().map(|e| e.size).sum(),
        }
    }
}
