//! Binds an index to wherever its keys actually live.
//!
//! The classic and linear indexes (`classic.rs`, `linear.rs`) never touch
//! key bytes directly; they go through a `KeyAdapter` so the same probing
//! and rehashing code works whether keys are fixed-width records in a
//! [`crate::slab::SlabStore`] or variable-length blobs in a
//! [`crate::blob::BlobStore`]. Grounded on the `compare`/`insert` function
//! pointer pair threaded through `fixed_index.c` and `linear_index.c`.

use std::cmp::Ordering;

use crate::{blob::BlobStore, handle::Handle, slab::SlabStore, Result};

/// Compares and materializes keys for an index. `handle` values are
/// whatever the backing store hands back from `insert`.
pub trait KeyAdapter {
    /// Three-way compare `key` against the key already stored at `handle`.
    fn compare(&self, key: &[u8], handle: Handle) -> Result<Ordering>;

    /// Store `key`, returning a handle an index can keep alongside a hash.
    fn insert(&mut self, key: &[u8]) -> Result<Handle>;

    /// Release the key previously stored at `handle`.
    fn remove(&mut self, handle: Handle) -> Result<()>;

    /// Materialize the key stored at `handle`.
    fn fetch(&self, handle: Handle) -> Result<Vec<u8>>;
}

/// Adapts a [`SlabStore`] of fixed-width records to [`KeyAdapter`]. Used by
/// the classic fixed-key index (`RAFI`).
pub struct FixedKeyAdapter<'a> {
    store: &'a mut SlabStore,
}

impl<'a> FixedKeyAdapter<'a> {
    pub fn new(store: &'a mut SlabStore) -> FixedKeyAdapter<'a> {
        FixedKeyAdapter { store }
    }
}

impl<'a> KeyAdapter for FixedKeyAdapter<'a> {
    fn compare(&self, key: &[u8], handle: Handle) -> Result<Ordering> {
        // `get` only needs growth bookkeeping on write paths; a read-only
        // borrow of the already-allocated slot is always in range here.
        let node_size = self.store.node_size();
        let slot = self.store.peek(handle, node_size)?;
        Ok(key.cmp(slot))
    }

    fn insert(&mut self, key: &[u8]) -> Result<Handle> {
        let h = self.store.alloc()?;
        self.store.get_mut(h)?.copy_from_slice(key);
        Ok(h)
    }

    fn remove(&mut self, handle: Handle) -> Result<()> {
        self.store.free(handle)
    }

    fn fetch(&self, handle: Handle) -> Result<Vec<u8>> {
        let node_size = self.store.node_size();
        Ok(self.store.peek(handle, node_size)?.to_vec())
    }
}

/// Adapts a [`BlobStore`] of variable-length values to [`KeyAdapter`]. Used
/// by the classic string index (`RASI`) and the linear index's long-key
/// path.
pub struct BlobKeyAdapter<'a> {
    store: &'a mut BlobStore,
}

impl<'a> BlobKeyAdapter<'a> {
    pub fn new(store: &'a mut BlobStore) -> BlobKeyAdapter<'a> {
        BlobKeyAdapter { store }
    }
}

impl<'a> KeyAdapter for BlobKeyAdapter<'a> {
    fn compare(&self, key: &[u8], handle: Handle) -> Result<Ordering> {
        self.store.compare(key, handle)
    }

    fn insert(&mut self, key: &[u8]) -> Result<Handle> {
        let h = self.store.alloc()?;
        self.store.set(h, key)?;
        Ok(h)
    }

    fn remove(&mut self, handle: Handle) -> Result<()> {
        self.store.free(handle)
    }

    fn fetch(&self, handle: Handle) -> Result<Vec<u8>> {
        self.store.get_vec(handle)
    }
}

#[cfg(test)]
mod adapter_test {
    use super::*;

    fn fixed_prefix(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("fixed")
    }

    fn blob_prefix(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("blob")
    }

    #[test]
    fn test_fixed_adapter_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SlabStore::create(fixed_prefix(&dir), 8, 0).unwrap();
        let mut adapter = FixedKeyAdapter::new(&mut store);
        let h = adapter.insert(b"abcdefgh").unwrap();
        assert_eq!(adapter.compare(b"abcdefgh", h).unwrap(), Ordering::Equal);
        assert_eq!(adapter.fetch(h).unwrap(), b"abcdefgh");
        adapter.remove(h).unwrap();
    }

    #[test]
    fn test_blob_adapter_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BlobStore::create(blob_prefix(&dir), 16, 0).unwrap();
        let mut adapter = BlobKeyAdapter::new(&mut store);
        let h = adapter.insert(b"a rather long variable key").unwrap();
        assert_eq!(adapter.compare(b"a rather long variable key", h).unwrap(), Ordering::Equal);
        assert_eq!(adapter.compare(b"aardvark", h).unwrap(), Ordering::Less);
        assert_eq!(adapter.fetch(h).unwrap(), b"a rather long variable key");
    }
}
