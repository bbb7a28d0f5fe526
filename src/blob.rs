//! Variable-length blob store: `<prefix>.entries` + `<prefix>.data`.
//!
//! Entries are `(link, length)` pairs pointing into a singly-linked chain
//! of fixed `node_size` nodes in the data file. Every node, including the
//! logically last one, carries its link in the final 4 bytes, so a chain's
//! node count is always `ceil(length / (node_size - 4))`; this is what lets
//! the bulk `set`/`get` path and the streaming `Writer`/`Reader` path walk
//! the same chain and agree on its shape. Grounded on
//! `examples/original_source/string_store.c`.

use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
};

use crate::{
    err_at,
    handle::{Handle, INVALID},
    mmio::{get_u32, put_u32, round_up, MappedFile},
    Error, Result,
};

const SIGNATURE: u32 = u32::from_le_bytes(*b"RASS");
const VERSION_1_0: u32 = 0xFF00_0000 | (1 << 16) | (0 << 8);

const HEADER_SIZE: usize = 40;
const OFF_SIGNATURE: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_NODE_SIZE: usize = 8;
const OFF_CHUNK_SIZE: usize = 12; // growth granularity for the data file, in nodes
const OFF_NUM_ENTRIES: usize = 16;
const OFF_NUM_NODES: usize = 20;
const OFF_NUM_FREE_NODES: usize = 24;
const OFF_FREE_NODE: usize = 28;
const OFF_FREE_ENTRY: usize = 32;
const OFF_EXTRA: usize = 36;

const ENTRY_SIZE: usize = 8; // (link: u32, length: u32)
const ENTRIES_GROWTH: usize = 64; // entries per growth chunk

const DEFAULT_CHUNK_BYTES: usize = 512;

/// A variable-length blob store backed by `<prefix>.entries`/`.data`.
pub struct BlobStore {
    entries_path: PathBuf,
    data_path: PathBuf,
    entries: MappedFile,
    data: MappedFile,
    node_size: usize,
}

impl BlobStore {
    /// Create a new store. `node_size_hint` is rounded up to the nearest
    /// power of two (minimum 8), matching the original sources.
    pub fn create<P: AsRef<Path>>(
        prefix: P,
        node_size_hint: usize,
        chunk_bytes: usize,
    ) -> Result<BlobStore> {
        let mut node_size = 8usize;
        while node_size < node_size_hint {
            node_size *= 2;
        }
        let chunk_bytes = if chunk_bytes == 0 { DEFAULT_CHUNK_BYTES } else { chunk_bytes };
        let chunk_nodes = round_up(chunk_bytes, node_size) / node_size;
        let chunk_nodes = chunk_nodes.max(1);

        let entries_path = entries_file(prefix.as_ref());
        let data_path = data_file(prefix.as_ref());

        let num_entries = ENTRIES_GROWTH;
        let mut entries =
            MappedFile::create(&entries_path, HEADER_SIZE + num_entries * ENTRY_SIZE)?;
        {
            let buf = entries.as_mut_slice();
            put_u32(buf, OFF_SIGNATURE, SIGNATURE);
            put_u32(buf, OFF_VERSION, VERSION_1_0);
            put_u32(buf, OFF_NODE_SIZE, node_size as u32);
            put_u32(buf, OFF_CHUNK_SIZE, chunk_nodes as u32);
            put_u32(buf, OFF_NUM_ENTRIES, num_entries as u32);
            put_u32(buf, OFF_NUM_NODES, chunk_nodes as u32);
            put_u32(buf, OFF_NUM_FREE_NODES, chunk_nodes as u32);
            put_u32(buf, OFF_FREE_NODE, 0);
            put_u32(buf, OFF_FREE_ENTRY, 0);
            put_u32(buf, OFF_EXTRA, 0);
            for i in 0..num_entries {
                let off = HEADER_SIZE + i * ENTRY_SIZE;
                put_u32(buf, off, INVALID);
                put_u32(buf, off + 4, 0);
            }
        }

        let mut data = MappedFile::create(&data_path, chunk_nodes * node_size)?;
        link_free_chain(&mut data, node_size, 0, chunk_nodes as u32);

        Ok(BlobStore {
            entries_path,
            data_path,
            entries,
            data,
            node_size,
        })
    }

    pub fn open<P: AsRef<Path>>(prefix: P) -> Result<BlobStore> {
        let entries_path = entries_file(prefix.as_ref());
        let data_path = data_file(prefix.as_ref());
        let entries = MappedFile::open(&entries_path)?;

        let signature = get_u32(entries.as_slice(), OFF_SIGNATURE);
        if signature != SIGNATURE {
            return err_at!(HeaderMismatch, msg: "{:?}: signature {:#x}", entries_path, signature);
        }
        let data = MappedFile::open(&data_path)?;

        Ok(BlobStore {
            entries_path,
            data_path,
            entries,
            data,
            node_size: get_u32(entries.as_slice(), OFF_NODE_SIZE) as usize,
        })
    }

    pub fn sync(&self) -> Result<()> {
        self.entries.sync()?;
        self.data.sync()
    }

    pub fn node_size(&self) -> usize {
        self.node_size
    }

    pub fn num_entries(&self) -> usize {
        get_u32(self.entries.as_slice(), OFF_NUM_ENTRIES) as usize
    }

    pub fn num_nodes(&self) -> usize {
        get_u32(self.entries.as_slice(), OFF_NUM_NODES) as usize
    }

    pub fn num_free_nodes(&self) -> usize {
        get_u32(self.entries.as_slice(), OFF_NUM_FREE_NODES) as usize
    }

    pub fn extra(&self) -> u32 {
        get_u32(self.entries.as_slice(), OFF_EXTRA)
    }

    pub fn set_extra(&mut self, value: u32) {
        put_u32(self.entries.as_mut_slice(), OFF_EXTRA, value);
    }

    // -- header/entry field accessors -----------------------------------

    fn chunk_nodes(&self) -> usize {
        get_u32(self.entries.as_slice(), OFF_CHUNK_SIZE) as usize
    }

    fn free_node(&self) -> u32 {
        get_u32(self.entries.as_slice(), OFF_FREE_NODE)
    }

    fn set_free_node(&mut self, v: u32) {
        put_u32(self.entries.as_mut_slice(), OFF_FREE_NODE, v);
    }

    fn set_num_nodes(&mut self, v: u32) {
        put_u32(self.entries.as_mut_slice(), OFF_NUM_NODES, v);
    }

    fn set_num_free_nodes(&mut self, v: usize) {
        put_u32(self.entries.as_mut_slice(), OFF_NUM_FREE_NODES, v as u32);
    }

    fn free_entry(&self) -> u32 {
        get_u32(self.entries.as_slice(), OFF_FREE_ENTRY)
    }

    fn set_free_entry(&mut self, v: u32) {
        put_u32(self.entries.as_mut_slice(), OFF_FREE_ENTRY, v);
    }

    fn entry_off(&self, h: Handle) -> usize {
        HEADER_SIZE + h as usize * ENTRY_SIZE
    }

    fn entry_link(&self, h: Handle) -> u32 {
        get_u32(self.entries.as_slice(), self.entry_off(h))
    }

    fn entry_length(&self, h: Handle) -> usize {
        get_u32(self.entries.as_slice(), self.entry_off(h) + 4) as usize
    }

    fn set_entry(&mut self, h: Handle, link: u32, length: usize) {
        let off = self.entry_off(h);
        let buf = self.entries.as_mut_slice();
        put_u32(buf, off, link);
        put_u32(buf, off + 4, length as u32);
    }

    fn set_entry_length(&mut self, h: Handle, length: usize) {
        let off = self.entry_off(h) + 4;
        put_u32(self.entries.as_mut_slice(), off, length as u32);
    }

    fn ensure_entries_capacity(&mut self, h: Handle) -> Result<()> {
        let num_entries = self.num_entries();
        if (h as usize) < num_entries {
            return Ok(());
        }
        let excess = h as usize + 1 - num_entries;
        let grow = round_up(excess, ENTRIES_GROWTH);
        let new_num_entries = num_entries + grow;
        self.entries
            .grow_to(HEADER_SIZE + new_num_entries * ENTRY_SIZE)?;
        {
            let buf = self.entries.as_mut_slice();
            for i in num_entries..new_num_entries {
                let off = HEADER_SIZE + i * ENTRY_SIZE;
                put_u32(buf, off, INVALID);
                put_u32(buf, off + 4, 0);
            }
        }
        put_u32(self.entries.as_mut_slice(), OFF_NUM_ENTRIES, new_num_entries as u32);
        Ok(())
    }

    // -- node-level helpers ----------------------------------------------

    fn node_off(&self, idx: u32) -> usize {
        idx as usize * self.node_size
    }

    fn node_link(&self, idx: u32) -> Result<u32> {
        self.check_node(idx)?;
        let off = self.node_off(idx) + self.node_size - 4;
        Ok(get_u32(self.data.as_slice(), off))
    }

    fn set_node_link(&mut self, idx: u32, val: u32) {
        let off = self.node_off(idx) + self.node_size - 4;
        put_u32(self.data.as_mut_slice(), off, val);
    }

    fn check_node(&self, idx: u32) -> Result<()> {
        if (idx as usize) < self.num_nodes() {
            Ok(())
        } else {
            err_at!(HeaderCorrupted, msg: "{:?}: node {} out of range ({})", self.data_path, idx, self.num_nodes())
        }
    }

    /// Grow the data file by whole chunks so at least `need` free nodes
    /// exist, threading the new run onto the free list.
    fn grow_data_for(&mut self, need: usize) -> Result<()> {
        let chunk_nodes = self.chunk_nodes();
        let grow = round_up(need, chunk_nodes);
        let old_num_nodes = self.num_nodes() as u32;
        let new_num_nodes = old_num_nodes + grow as u32;
        self.data.grow_to(new_num_nodes as usize * self.node_size)?;
        self.set_num_nodes(new_num_nodes);
        let old_free_head = self.free_node();
        link_free_chain(&mut self.data, self.node_size, old_num_nodes, new_num_nodes);
        if old_free_head != INVALID {
            let mut tail = old_num_nodes;
            while self.node_link(tail)? != INVALID {
                tail = self.node_link(tail)?;
            }
            self.set_node_link(tail, old_free_head);
        }
        self.set_free_node(old_num_nodes);
        self.set_num_free_nodes(self.num_free_nodes() + grow);
        Ok(())
    }

    /// Pop one node off the free list, growing the data file first if empty.
    fn node_alloc(&mut self) -> Result<u32> {
        if self.num_free_nodes() == 0 {
            self.grow_data_for(1)?;
        }
        let idx = self.free_node();
        let next = self.node_link(idx)?;
        self.set_free_node(next);
        self.set_num_free_nodes(self.num_free_nodes() - 1);
        Ok(idx)
    }

    /// Release the node chain starting at `start` (assumed to hold exactly
    /// `count` live nodes) back onto the free list, head-first (LIFO).
    fn free_node_chain(&mut self, start: u32, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let mut tail = start;
        for _ in 1..count {
            tail = self.node_link(tail)?;
        }
        let old_head = self.free_node();
        self.set_node_link(tail, old_head);
        self.set_free_node(start);
        self.set_num_free_nodes(self.num_free_nodes() + count);
        Ok(())
    }

    fn payload_per_node(&self) -> usize {
        self.node_size - 4
    }

    /// Number of nodes a blob of `length` bytes occupies: every node,
    /// including the last, holds at most `node_size - 4` payload bytes.
    fn blocks_for(&self, length: usize) -> usize {
        if length == 0 {
            0
        } else {
            round_up(length, self.payload_per_node()) / self.payload_per_node()
        }
    }

    // -- chain I/O -----------------------------------------------------

    /// Write `bytes` across the chain rooted at `head`, which must already
    /// have exactly `blocks_for(bytes.len())` nodes linked.
    fn write_chain(&mut self, head: u32, bytes: &[u8]) -> Result<()> {
        let p = self.payload_per_node();
        let mut node = head;
        let mut remain = bytes.len();
        let mut written = 0;
        while remain > p {
            self.check_node(node)?;
            let off = self.node_off(node);
            self.data.as_mut_slice()[off..off + p].copy_from_slice(&bytes[written..written + p]);
            written += p;
            remain -= p;
            node = self.node_link(node)?;
        }
        self.check_node(node)?;
        let off = self.node_off(node);
        self.data.as_mut_slice()[off..off + remain].copy_from_slice(&bytes[written..written + remain]);
        Ok(())
    }

    fn node_slice(&self, idx: u32, len: usize) -> Vec<u8> {
        let off = self.node_off(idx);
        self.data.as_slice()[off..off + len].to_vec()
    }

    // -- public API --------------------------------------------------------

    pub fn alloc(&mut self) -> Result<Handle> {
        let free_entry = self.free_entry();
        self.ensure_entries_capacity(free_entry)?;
        let linked = self.entry_link(free_entry);
        let next = if linked == INVALID {
            let candidate = free_entry + 1;
            self.ensure_entries_capacity(candidate)?;
            candidate
        } else {
            linked
        };
        self.set_free_entry(next);
        self.set_entry(free_entry, INVALID, 0);
        Ok(free_entry)
    }

    pub fn free(&mut self, h: Handle) -> Result<()> {
        let blocks = self.blocks_for(self.entry_length(h));
        if blocks > 0 {
            self.free_node_chain(self.entry_link(h), blocks)?;
        }
        let head = self.free_entry();
        self.set_entry(h, head, 0);
        self.set_free_entry(h);
        Ok(())
    }

    pub fn size(&self, h: Handle) -> usize {
        if (h as usize) >= self.num_entries() {
            0
        } else {
            self.entry_length(h)
        }
    }

    /// Copy up to `buf.len()` bytes of entry `h` into `buf`, returning the
    /// number of bytes copied.
    pub fn get(&self, h: Handle, buf: &mut [u8]) -> Result<usize> {
        let p = self.payload_per_node();
        let length = self.size(h);
        let copied = length.min(buf.len());
        let mut node = self.entry_link(h);
        let mut remain = copied;
        let mut written = 0;
        while remain > 0 {
            self.check_node(node)?;
            let take = p.min(remain);
            let off = self.node_off(node);
            buf[written..written + take].copy_from_slice(&self.data.as_slice()[off..off + take]);
            written += take;
            remain -= take;
            if remain > 0 {
                node = self.node_link(node)?;
            }
        }
        Ok(copied)
    }

    pub fn get_vec(&self, h: Handle) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.size(h)];
        self.get(h, &mut buf)?;
        Ok(buf)
    }

    /// Canonical-sign comparison of `other` against the blob at `h`.
    pub fn compare(&self, other: &[u8], h: Handle) -> Result<Ordering> {
        if (h as usize) >= self.num_entries() {
            return Ok(Ordering::Less);
        }
        let p = self.payload_per_node();
        let mut remain = self.entry_length(h);
        let mut node = self.entry_link(h);
        let mut other = other;
        loop {
            if remain == 0 {
                return Ok(other.cmp(&[]));
            }
            self.check_node(node)?;
            if remain <= p {
                let node_chunk = self.node_slice(node, remain);
                return Ok(other.cmp(&node_chunk[..]));
            }
            if other.len() < p {
                let node_chunk = self.node_slice(node, p);
                let bound = other.len().min(node_chunk.len());
                return Ok(other.cmp(&node_chunk[..bound]).then(Ordering::Less));
            }
            let node_chunk = self.node_slice(node, p);
            let cmp = other[..p].cmp(&node_chunk[..]);
            if cmp != Ordering::Equal {
                return Ok(cmp);
            }
            other = &other[p..];
            remain -= p;
            node = self.node_link(node)?;
        }
    }

    /// Compare the blobs at `h1` and `h2` without materializing either.
    pub fn compare2(&self, h1: Handle, h2: Handle) -> Result<Ordering> {
        if (h1 as usize) >= self.num_entries() {
            return Ok(Ordering::Less);
        }
        if (h2 as usize) >= self.num_entries() {
            return Ok(Ordering::Greater);
        }
        let p = self.payload_per_node();
        let mut len1 = self.entry_length(h1);
        let mut len2 = self.entry_length(h2);
        let mut n1 = self.entry_link(h1);
        let mut n2 = self.entry_link(h2);
        loop {
            if len1 == 0 || len2 == 0 {
                let a = if len1 == 0 {
                    Vec::new()
                } else {
                    self.check_node(n1)?;
                    self.node_slice(n1, len1.min(p))
                };
                let b = if len2 == 0 {
                    Vec::new()
                } else {
                    self.check_node(n2)?;
                    self.node_slice(n2, len2.min(p))
                };
                return Ok(a.cmp(&b));
            }
            self.check_node(n1)?;
            self.check_node(n2)?;
            if len1 <= p || len2 <= p {
                let a = self.node_slice(n1, len1.min(p));
                let b = self.node_slice(n2, len2.min(p));
                return Ok(a.cmp(&b));
            }
            let a = self.node_slice(n1, p);
            let b = self.node_slice(n2, p);
            let cmp = a.cmp(&b);
            if cmp != Ordering::Equal {
                return Ok(cmp);
            }
            len1 -= p;
            len2 -= p;
            n1 = self.node_link(n1)?;
            n2 = self.node_link(n2)?;
        }
    }

    /// Overwrite entry `h` with `bytes` in a single call (see spec.md §4.2's
    /// shrink/extend/same-block-count algorithm).
    pub fn set(&mut self, h: Handle, bytes: &[u8]) -> Result<()> {
        self.ensure_entries_capacity(h)?;
        let old_blocks = self.blocks_for(self.entry_length(h));
        let new_blocks = self.blocks_for(bytes.len());

        match old_blocks.cmp(&new_blocks) {
            Ordering::Greater => self.set_shrink(h, bytes, old_blocks, new_blocks)?,
            Ordering::Less => self.set_extend(h, bytes, old_blocks, new_blocks)?,
            Ordering::Equal => {
                if new_blocks > 0 {
                    self.write_chain(self.entry_link(h), bytes)?;
                }
            }
        }
        self.set_entry_length(h, bytes.len());
        Ok(())
    }

    fn set_shrink(&mut self, h: Handle, bytes: &[u8], old_blocks: usize, new_blocks: usize) -> Result<()> {
        let head = self.entry_link(h);
        let free_start = if new_blocks == 0 {
            head
        } else {
            self.write_chain(head, bytes)?;
            let mut node = head;
            for _ in 0..new_blocks - 1 {
                node = self.node_link(node)?;
            }
            self.node_link(node)?
        };
        self.free_node_chain(free_start, old_blocks - new_blocks)
    }

    fn set_extend(&mut self, h: Handle, bytes: &[u8], old_blocks: usize, new_blocks: usize) -> Result<()> {
        let needed = new_blocks - old_blocks;
        if needed > self.num_free_nodes() {
            self.grow_data_for(needed - self.num_free_nodes())?;
        }

        let head = if old_blocks == 0 {
            let first = self.node_alloc()?;
            self.set_entry(h, first, 0);
            first
        } else {
            self.entry_link(h)
        };

        let mut node = head;
        for _ in 0..old_blocks.saturating_sub(1) {
            node = self.node_link(node)?;
        }
        let to_allocate = if old_blocks == 0 { needed - 1 } else { needed };
        for _ in 0..to_allocate {
            let next = self.node_alloc()?;
            self.set_node_link(node, next);
            node = next;
        }

        self.write_chain(head, bytes)
    }

    // -- streaming ----------------------------------------------------------

    /// Begin writing entry `h` from scratch, releasing any existing chain.
    pub fn writer_open(&mut self, h: Handle) -> Result<Writer<'_>> {
        self.ensure_entries_capacity(h)?;
        let old_blocks = self.blocks_for(self.entry_length(h));
        if old_blocks > 0 {
            let start = self.entry_link(h);
            self.free_node_chain(start, old_blocks)?;
        }
        self.set_entry(h, INVALID, 0);
        Ok(Writer {
            store: self,
            index: h,
            node: None,
            filled: 0,
        })
    }

    /// Resume writing at the end of entry `h`'s existing chain.
    pub fn writer_append(&mut self, h: Handle) -> Result<Writer<'_>> {
        self.ensure_entries_capacity(h)?;
        let length = self.entry_length(h);
        if length == 0 {
            return self.writer_open(h);
        }
        let p = self.payload_per_node();
        let mut node = self.entry_link(h);
        let mut remaining = length;
        while remaining > p {
            remaining -= p;
            node = self.node_link(node)?;
        }
        Ok(Writer {
            store: self,
            index: h,
            node: Some(node),
            filled: remaining,
        })
    }

    pub fn reader_open(&self, h: Handle) -> Reader<'_> {
        let length = self.size(h);
        let node = if length == 0 { None } else { Some(self.entry_link(h)) };
        Reader {
            store: self,
            node,
            offset: 0,
            remain: length,
        }
    }
}

/// Thread nodes `[first, last)` into a free chain, terminated by `INVALID`.
fn link_free_chain(data: &mut MappedFile, node_size: usize, first: u32, last: u32) {
    for idx in first..last {
        let next = if idx + 1 < last { idx + 1 } else { INVALID };
        let off = idx as usize * node_size + node_size - 4;
        put_u32(data.as_mut_slice(), off, next);
    }
}

fn entries_file(prefix: &Path) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(".entries");
    PathBuf::from(s)
}

fn data_file(prefix: &Path) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(".data");
    PathBuf::from(s)
}

/// A forward-only reader over one blob entry's chain.
pub struct Reader<'a> {
    store: &'a BlobStore,
    node: Option<u32>,
    offset: usize, // bytes already consumed from the current node's payload
    remain: usize, // total bytes left across the whole entry
}

impl<'a> Reader<'a> {
    /// Read up to `buf.len()` bytes, returning the number actually copied
    /// (0 once the entry is exhausted).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let p = self.store.payload_per_node();
        let mut copied = 0;
        let mut want = buf.len();
        while self.remain > 0 && want > 0 {
            let node = self.node.expect("remain > 0 implies a current node");
            self.store.check_node(node)?;
            let avail = p - self.offset;
            let take = avail.min(self.remain).min(want);
            let off = self.store.node_off(node) + self.offset;
            buf[copied..copied + take].copy_from_slice(&self.store.data.as_slice()[off..off + take]);
            copied += take;
            want -= take;
            self.remain -= take;
            self.offset += take;
            if self.remain == 0 {
                self.node = None;
            } else if self.offset == p {
                self.node = Some(self.store.node_link(node)?);
                self.offset = 0;
            }
        }
        Ok(copied)
    }
}

/// A forward-only, append-oriented writer over one blob entry's chain.
pub struct Writer<'a> {
    store: &'a mut BlobStore,
    index: Handle,
    node: Option<u32>,
    filled: usize, // bytes already used in `node`'s payload region
}

impl<'a> Writer<'a> {
    /// Append `bytes` to the entry, growing its chain as needed.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let p = self.store.payload_per_node();
        let old_length = self.store.entry_length(self.index);
        self.store.set_entry_length(self.index, old_length + bytes.len());

        if self.node.is_none() {
            let idx = self.store.node_alloc()?;
            self.store.set_entry(self.index, idx, old_length + bytes.len());
            self.node = Some(idx);
            self.filled = 0;
        }

        let mut remain = bytes.len();
        let mut written = 0;
        loop {
            let node = self.node.expect("writer always has a current node here");
            let space = p - self.filled;
            let take = space.min(remain);
            let off = self.store.node_off(node) + self.filled;
            self.store.data.as_mut_slice()[off..off + take]
                .copy_from_slice(&bytes[written..written + take]);
            self.filled += take;
            written += take;
            remain -= take;
            if remain == 0 {
                break;
            }
            let next = self.store.node_alloc()?;
            self.store.set_node_link(node, next);
            self.node = Some(next);
            self.filled = 0;
        }
        Ok(bytes.len())
    }
}

#[cfg(test)]
#[path = "blob_test.rs"]
mod blob_test;
