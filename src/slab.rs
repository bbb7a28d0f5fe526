//! Fixed-size slab allocator: `<prefix>.entries`.
//!
//! A flat array of fixed-width records with an embedded free-list (unused
//! slots store the next free index in their first 4 bytes). This is the
//! degenerate, single-file case of the [`crate::blob`] store: entries never
//! span multiple nodes. Grounded on `examples/original_source/fixed_store.c`.

use std::path::{Path, PathBuf};

use crate::{
    err_at,
    handle::{Handle, INVALID},
    mmio::{get_u32, put_u32, round_up, MappedFile},
    Error, Result,
};

const SIGNATURE: u32 = u32::from_le_bytes(*b"RAFS");
const VERSION_1_0: u32 = 0xFF00_0000 | (1 << 16) | (0 << 8);

const HEADER_SIZE: usize = 24;
const OFF_SIGNATURE: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_NODE_SIZE: usize = 8;
const OFF_CHUNK_SIZE: usize = 12;
const OFF_NUM_ENTRIES: usize = 16;
const OFF_FREE_ENTRY: usize = 20;

const DEFAULT_CHUNK_BYTES: usize = 512;

/// Configuration for [`SlabStore::create`].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Growth granularity, in bytes; rounded up to a whole number of nodes.
    pub chunk_bytes: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

/// A fixed-width record store backed by `<prefix>.entries`.
pub struct SlabStore {
    entries_path: PathBuf,
    file: MappedFile,
    node_size: usize,
}

impl SlabStore {
    /// Create a new slab store. `record_size` is rounded up to a multiple
    /// of 8 (minimum 8, enough to embed the 4-byte free-list link).
    pub fn create<P: AsRef<Path>>(prefix: P, record_size: usize, chunk_bytes: usize) -> Result<SlabStore> {
        let node_size = round_up(record_size.max(4), 8);
        let chunk_bytes = if chunk_bytes == 0 { DEFAULT_CHUNK_BYTES } else { chunk_bytes };
        let chunk_nodes = round_up(chunk_bytes, node_size) / node_size;
        let num_entries = chunk_nodes.max(1);

        let entries_path = entries_file(prefix.as_ref());
        let mut file = MappedFile::create(&entries_path, HEADER_SIZE + num_entries * node_size)?;

        let buf = file.as_mut_slice();
        put_u32(buf, OFF_SIGNATURE, SIGNATURE);
        put_u32(buf, OFF_VERSION, VERSION_1_0);
        put_u32(buf, OFF_NODE_SIZE, node_size as u32);
        put_u32(buf, OFF_CHUNK_SIZE, chunk_nodes as u32);
        put_u32(buf, OFF_NUM_ENTRIES, num_entries as u32);
        put_u32(buf, OFF_FREE_ENTRY, 0);
        put_u32(buf, HEADER_SIZE, INVALID); // slot 0 is the initial bump tail

        Ok(SlabStore {
            entries_path,
            file,
            node_size,
        })
    }

    /// Open an existing slab store, repairing a crash-interrupted growth if
    /// the file was extended past the recorded `num_entries`.
    pub fn open<P: AsRef<Path>>(prefix: P) -> Result<SlabStore> {
        let entries_path = entries_file(prefix.as_ref());
        let mut file = MappedFile::open(&entries_path)?;

        let signature = get_u32(file.as_slice(), OFF_SIGNATURE);
        if signature != SIGNATURE {
            return err_at!(HeaderMismatch, msg: "{:?}: signature {:#x}", entries_path, signature);
        }
        let node_size = get_u32(file.as_slice(), OFF_NODE_SIZE) as usize;
        let mut num_entries = get_u32(file.as_slice(), OFF_NUM_ENTRIES) as usize;

        let implied = (file.len().saturating_sub(HEADER_SIZE)) / node_size;
        if implied > num_entries {
            let mut tail = None;
            for idx in (0..implied).rev() {
                let off = HEADER_SIZE + idx * node_size;
                let link = get_u32(file.as_slice(), off);
                if link == INVALID {
                    tail = Some(idx);
                    break;
                } else if link != 0 {
                    return err_at!(
                        HeaderCorrupted,
                        msg: "{:?}: dangling link {:#x} at slot {}", entries_path, link, idx
                    );
                }
            }
            if let Some(idx) = tail {
                num_entries = idx + 1;
                put_u32(file.as_mut_slice(), OFF_NUM_ENTRIES, num_entries as u32);
                put_u32(file.as_mut_slice(), OFF_FREE_ENTRY, idx as u32);
                log::warn!(
                    "radb::slab: recovered {:?}, num_entries repaired to {}",
                    entries_path,
                    num_entries
                );
            }
        }

        Ok(SlabStore {
            entries_path,
            file,
            node_size,
        })
    }

    pub fn num_entries(&self) -> usize {
        get_u32(self.file.as_slice(), OFF_NUM_ENTRIES) as usize
    }

    pub fn node_size(&self) -> usize {
        self.node_size
    }

    fn free_entry(&self) -> u32 {
        get_u32(self.file.as_slice(), OFF_FREE_ENTRY)
    }

    fn set_free_entry(&mut self, val: u32) {
        put_u32(self.file.as_mut_slice(), OFF_FREE_ENTRY, val);
    }

    fn slot_off(&self, index: Handle) -> usize {
        HEADER_SIZE + index as usize * self.node_size
    }

    fn link_at(&self, index: Handle) -> u32 {
        get_u32(self.file.as_slice(), self.slot_off(index))
    }

    fn set_link_at(&mut self, index: Handle, val: u32) {
        let off = self.slot_off(index);
        put_u32(self.file.as_mut_slice(), off, val);
    }

    /// Grow the file so that `index` is addressable.
    fn ensure_capacity(&mut self, index: Handle) -> Result<()> {
        let num_entries = self.num_entries();
        if (index as usize) < num_entries {
            return Ok(());
        }
        let chunk_nodes = get_u32(self.file.as_slice(), OFF_CHUNK_SIZE) as usize;
        let excess = index as usize + 1 - num_entries;
        let grow_nodes = round_up(excess, chunk_nodes);
        let new_num_entries = num_entries + grow_nodes;
        self.file
            .grow_to(HEADER_SIZE + new_num_entries * self.node_size)?;
        put_u32(self.file.as_mut_slice(), OFF_NUM_ENTRIES, new_num_entries as u32);
        Ok(())
    }

    /// Borrow the record at `index` without growing the file; errors if
    /// `index` was never allocated.
    pub fn peek(&self, index: Handle, len: usize) -> Result<&[u8]> {
        if (index as usize) >= self.num_entries() {
            return err_at!(InvalidHandle, msg: "{:?}: handle {} out of range", self.entries_path, index);
        }
        let off = self.slot_off(index);
        Ok(&self.file.as_slice()[off..off + len])
    }

    /// Borrow the record at `index`, growing the file if necessary.
    pub fn get(&mut self, index: Handle) -> Result<&[u8]> {
        self.ensure_capacity(index)?;
        let off = self.slot_off(index);
        let node_size = self.node_size;
        Ok(&self.file.as_slice()[off..off + node_size])
    }

    /// Borrow the record at `index` mutably, growing the file if necessary.
    pub fn get_mut(&mut self, index: Handle) -> Result<&mut [u8]> {
        self.ensure_capacity(index)?;
        let off = self.slot_off(index);
        let node_size = self.node_size;
        Ok(&mut self.file.as_mut_slice()[off..off + node_size])
    }

    /// Allocate a slot, returning its handle. Content is uninitialized for a
    /// reused bump-tail slot and whatever was previously freed for a
    /// recycled one; callers write their record immediately after.
    pub fn alloc(&mut self) -> Result<Handle> {
        let free_entry = self.free_entry();
        self.ensure_capacity(free_entry)?;
        let linked = self.link_at(free_entry);
        let next = if linked == INVALID {
            let candidate = free_entry + 1;
            self.ensure_capacity(candidate)?;
            self.set_link_at(candidate, INVALID);
            candidate
        } else {
            linked
        };
        self.set_free_entry(next);
        Ok(free_entry)
    }

    /// Release `index` back onto the free-list (LIFO).
    pub fn free(&mut self, index: Handle) -> Result<()> {
        let head = self.free_entry();
        self.set_link_at(index, head);
        self.set_free_entry(index);
        Ok(())
    }

    /// Rotate a run of `count` records starting at `src` so that it begins
    /// at `dst` instead, shifting anything in between. Not exercised by any
    /// caller in the original sources (see spec.md's Open Questions); kept
    /// for embedders that need it.
    pub fn shift(&mut self, src: Handle, count: usize, dst: Handle) -> Result<()> {
        if src == dst || count == 0 {
            return Ok(());
        }
        let node_size = self.node_size;
        let max_idx = src.max(dst) as usize + count;
        self.ensure_capacity(max_idx as u32)?;
        let mut buf = vec![0u8; count * node_size];
        let src_off = self.slot_off(src);
        buf.copy_from_slice(&self.file.as_slice()[src_off..src_off + buf.len()]);
        let dst_off = self.slot_off(dst);
        self.file.as_mut_slice()[dst_off..dst_off + buf.len()].copy_from_slice(&buf);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }
}

fn entries_file(prefix: &Path) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(".entries");
    PathBuf::from(s)
}

#[cfg(test)]
#[path = "slab_test.rs"]
mod slab_test;
