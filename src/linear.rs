//! Linear hashing index: `<prefix>.index`.
//!
//! Unlike [`crate::classic::ClassicIndex`], the bucket count `n` need not be
//! a power of two: a key's bucket is `hash & (scale - 1)` where `scale` is
//! the next power of two `>= n`, substituting `b - scale/2` when that falls
//! past `n`. Growth happens one bucket at a time — every insert appends one
//! bucket and splits its canonical peer into itself and the new bucket —
//! instead of the classic index's all-at-once rehash. Each cell
//! also carries a 16-byte inline key prefix so most comparisons never touch
//! the backing store at all. Grounded on
//! `examples/original_source/linear_index.c`.

use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
};

use crate::{
    adapter::KeyAdapter,
    err_at,
    handle::{djb2, Handle, INVALID},
    mmio::{get_u32, put_u32, round_up, MappedFile},
    Error, Result,
};

const SIGNATURE: u32 = u32::from_le_bytes(*b"RALI");
const VERSION_1_0: u32 = 0xFF00_0000 | (1 << 16) | (0 << 8);

const HEADER_SIZE: usize = 32;
const OFF_SIGNATURE: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_NUM_BUCKETS: usize = 8;
const OFF_BUCKETS_CAPACITY: usize = 12;
const OFF_COUNT: usize = 16;
const OFF_NUM_CELLS: usize = 20;
const OFF_FREE_CELL: usize = 24;
const OFF_EXTRA: usize = 28;

// (hash: u32, handle: u32, next: u32, inline key: [u8; 16], inline length: u8, padding)
const CELL_SIZE: usize = 32;
const CELL_OFF_HASH: usize = 0;
const CELL_OFF_HANDLE: usize = 4;
const CELL_OFF_NEXT: usize = 8;
const CELL_OFF_INLINE: usize = 12;
const CELL_OFF_INLINE_LEN: usize = 28;
const INLINE_CAPACITY: usize = 16;
/// Discriminator value meaning "the stored key is longer than the inline
/// field; what's here is only a comparison prefix".
const INLINE_LONG: u8 = 16;

const BUCKETS_GROWTH: usize = 64;
const CELLS_GROWTH: usize = 64;

/// A linear-hashing index over keys stored through a [`KeyAdapter`].
pub struct LinearIndex {
    header: MappedFile,
    buckets: MappedFile,
    cells: MappedFile,
}

fn next_pow2(n: usize) -> usize {
    let mut p = 1usize;
    while p < n {
        p *= 2;
    }
    p.max(1)
}

fn bucket_for(hash: u32, n: usize) -> usize {
    let scale = next_pow2(n);
    let mask = scale - 1;
    let mut b = (hash as usize) & mask;
    if b >= n {
        b -= scale / 2;
    }
    b
}

/// Encode `key` into a cell's inline field: the whole key if it fits in
/// [`INLINE_CAPACITY`] - 1 bytes, else its first [`INLINE_CAPACITY`] bytes as
/// a comparison prefix.
fn inline_encode(key: &[u8]) -> ([u8; INLINE_CAPACITY], u8) {
    let mut buf = [0u8; INLINE_CAPACITY];
    if key.len() < INLINE_CAPACITY {
        buf[..key.len()].copy_from_slice(key);
        (buf, key.len() as u8)
    } else {
        buf.copy_from_slice(&key[..INLINE_CAPACITY]);
        (buf, INLINE_LONG)
    }
}

/// Compare `key` against a cell's inline field. `None` means the inline
/// field only proves a shared prefix; the adapter must be consulted.
fn inline_compare(key: &[u8], inline: &[u8; INLINE_CAPACITY], inline_len: u8) -> Option<Ordering> {
    if inline_len < INLINE_LONG {
        let stored = &inline[..inline_len as usize];
        return Some(key.cmp(stored));
    }
    let take = key.len().min(INLINE_CAPACITY);
    match key[..take].cmp(&inline[..take]) {
        Ordering::Equal if key.len() < INLINE_CAPACITY => Some(Ordering::Less),
        Ordering::Equal => None,
        other => Some(other),
    }
}

impl LinearIndex {
    pub fn create<P: AsRef<Path>>(prefix: P, initial_buckets: usize) -> Result<LinearIndex> {
        let n = initial_buckets.max(1);
        let buckets_capacity = round_up(n, BUCKETS_GROWTH);
        let path = prefix.as_ref().to_path_buf();

        let mut header = MappedFile::create(&header_file(&path), HEADER_SIZE)?;
        {
            let buf = header.as_mut_slice();
            put_u32(buf, OFF_SIGNATURE, SIGNATURE);
            put_u32(buf, OFF_VERSION, VERSION_1_0);
            put_u32(buf, OFF_NUM_BUCKETS, n as u32);
            put_u32(buf, OFF_BUCKETS_CAPACITY, buckets_capacity as u32);
            put_u32(buf, OFF_COUNT, 0);
            put_u32(buf, OFF_NUM_CELLS, 0);
            put_u32(buf, OFF_FREE_CELL, INVALID);
            put_u32(buf, OFF_EXTRA, 0);
        }

        let mut buckets = MappedFile::create(&buckets_file(&path), buckets_capacity * 4)?;
        for i in 0..buckets_capacity {
            put_u32(buckets.as_mut_slice(), i * 4, INVALID);
        }

        let cells = MappedFile::create(&cells_file(&path), 0)?;

        Ok(LinearIndex { header, buckets, cells })
    }

    pub fn open<P: AsRef<Path>>(prefix: P) -> Result<LinearIndex> {
        let path = prefix.as_ref().to_path_buf();
        let header = MappedFile::open(&header_file(&path))?;
        let signature = get_u32(header.as_slice(), OFF_SIGNATURE);
        if signature != SIGNATURE {
            return err_at!(HeaderMismatch, msg: "{:?}: signature {:#x}", path, signature);
        }
        let buckets = MappedFile::open(&buckets_file(&path))?;
        let cells = MappedFile::open(&cells_file(&path))?;
        Ok(LinearIndex { header, buckets, cells })
    }

    pub fn sync(&self) -> Result<()> {
        self.header.sync()?;
        self.buckets.sync()?;
        self.cells.sync()
    }

    pub fn len(&self) -> usize {
        get_u32(self.header.as_slice(), OFF_COUNT) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_buckets(&self) -> usize {
        get_u32(self.header.as_slice(), OFF_NUM_BUCKETS) as usize
    }

    /// A 32-bit word the adapter may use to persist a constant parameter
    /// (e.g. fixed-key width), round-tripped across close/reopen.
    pub fn extra(&self) -> u32 {
        get_u32(self.header.as_slice(), OFF_EXTRA)
    }

    pub fn set_extra(&mut self, val: u32) {
        put_u32(self.header.as_mut_slice(), OFF_EXTRA, val);
    }

    fn buckets_capacity(&self) -> usize {
        get_u32(self.header.as_slice(), OFF_BUCKETS_CAPACITY) as usize
    }

    fn num_cells(&self) -> usize {
        get_u32(self.header.as_slice(), OFF_NUM_CELLS) as usize
    }

    fn free_cell(&self) -> u32 {
        get_u32(self.header.as_slice(), OFF_FREE_CELL)
    }

    fn set_num_buckets(&mut self, v: usize) {
        put_u32(self.header.as_mut_slice(), OFF_NUM_BUCKETS, v as u32);
    }

    fn set_count(&mut self, v: usize) {
        put_u32(self.header.as_mut_slice(), OFF_COUNT, v as u32);
    }

    fn set_num_cells(&mut self, v: usize) {
        put_u32(self.header.as_mut_slice(), OFF_NUM_CELLS, v as u32);
    }

    fn set_free_cell(&mut self, v: u32) {
        put_u32(self.header.as_mut_slice(), OFF_FREE_CELL, v);
    }

    fn head(&self, bucket: usize) -> u32 {
        get_u32(self.buckets.as_slice(), bucket * 4)
    }

    fn set_head(&mut self, bucket: usize, v: u32) {
        put_u32(self.buckets.as_mut_slice(), bucket * 4, v);
    }

    fn ensure_buckets_capacity(&mut self, n: usize) -> Result<()> {
        let capacity = self.buckets_capacity();
        if n <= capacity {
            return Ok(());
        }
        let new_capacity = round_up(n, BUCKETS_GROWTH);
        self.buckets.grow_to(new_capacity * 4)?;
        for i in capacity..new_capacity {
            put_u32(self.buckets.as_mut_slice(), i * 4, INVALID);
        }
        put_u32(self.header.as_mut_slice(), OFF_BUCKETS_CAPACITY, new_capacity as u32);
        Ok(())
    }

    fn cell_hash(&self, idx: u32) -> u32 {
        get_u32(self.cells.as_slice(), idx as usize * CELL_SIZE + CELL_OFF_HASH)
    }

    fn cell_handle(&self, idx: u32) -> Handle {
        get_u32(self.cells.as_slice(), idx as usize * CELL_SIZE + CELL_OFF_HANDLE)
    }

    fn cell_next(&self, idx: u32) -> u32 {
        get_u32(self.cells.as_slice(), idx as usize * CELL_SIZE + CELL_OFF_NEXT)
    }

    fn cell_inline(&self, idx: u32) -> ([u8; INLINE_CAPACITY], u8) {
        let off = idx as usize * CELL_SIZE;
        let buf = self.cells.as_slice();
        let mut inline = [0u8; INLINE_CAPACITY];
        inline.copy_from_slice(&buf[off + CELL_OFF_INLINE..off + CELL_OFF_INLINE + INLINE_CAPACITY]);
        (inline, buf[off + CELL_OFF_INLINE_LEN])
    }

    fn set_cell(&mut self, idx: u32, hash: u32, handle: Handle, next: u32, inline: [u8; INLINE_CAPACITY], inline_len: u8) {
        let off = idx as usize * CELL_SIZE;
        let buf = self.cells.as_mut_slice();
        put_u32(buf, off + CELL_OFF_HASH, hash);
        put_u32(buf, off + CELL_OFF_HANDLE, handle);
        put_u32(buf, off + CELL_OFF_NEXT, next);
        buf[off + CELL_OFF_INLINE..off + CELL_OFF_INLINE + INLINE_CAPACITY].copy_from_slice(&inline);
        buf[off + CELL_OFF_INLINE_LEN] = inline_len;
    }

    fn set_cell_next(&mut self, idx: u32, next: u32) {
        put_u32(self.cells.as_mut_slice(), idx as usize * CELL_SIZE + CELL_OFF_NEXT, next);
    }

    fn alloc_cell(&mut self) -> Result<u32> {
        let free = self.free_cell();
        if free != INVALID {
            let next = self.cell_next(free);
            self.set_free_cell(next);
            return Ok(free);
        }
        let idx = self.num_cells() as u32;
        let new_num_cells = idx as usize + 1;
        let grown = round_up(new_num_cells, CELLS_GROWTH);
        if grown * CELL_SIZE > self.cells.len() {
            self.cells.grow_to(grown * CELL_SIZE)?;
        }
        self.set_num_cells(new_num_cells);
        Ok(idx)
    }

    fn free_cell_idx(&mut self, idx: u32) {
        let head = self.free_cell();
        self.set_cell_next(idx, head);
        self.set_free_cell(idx);
    }

    /// Resolve whether `key` matches the cell at `idx`, consulting the
    /// adapter only when the inline prefix can't decide it.
    fn cell_matches<A: KeyAdapter>(&self, idx: u32, key: &[u8], adapter: &A) -> Result<bool> {
        let (inline, inline_len) = self.cell_inline(idx);
        match inline_compare(key, &inline, inline_len) {
            Some(ord) => Ok(ord == Ordering::Equal),
            None => Ok(adapter.compare(key, self.cell_handle(idx))? == Ordering::Equal),
        }
    }

    /// Look up `key`, returning its handle if present.
    pub fn find<A: KeyAdapter>(&self, key: &[u8], adapter: &A) -> Result<Option<Handle>> {
        let hash = djb2(key);
        let bucket = bucket_for(hash, self.num_buckets());
        let mut cursor = self.head(bucket);
        while cursor != INVALID {
            if self.cell_hash(cursor) == hash && self.cell_matches(cursor, key, adapter)? {
                return Ok(Some(self.cell_handle(cursor)));
            }
            cursor = self.cell_next(cursor);
        }
        Ok(None)
    }

    /// Insert `key` if absent, returning its (possibly pre-existing) handle,
    /// then perform this index's one-split-per-insert growth step.
    pub fn insert<A: KeyAdapter>(&mut self, key: &[u8], adapter: &mut A) -> Result<Handle> {
        if let Some(existing) = self.find(key, &*adapter)? {
            return Ok(existing);
        }
        let hash = djb2(key);
        let handle = adapter.insert(key)?;
        let (inline, inline_len) = inline_encode(key);
        let bucket = bucket_for(hash, self.num_buckets());
        let cell = self.alloc_cell()?;
        let head = self.head(bucket);
        self.set_cell(cell, hash, handle, head, inline, inline_len);
        self.set_head(bucket, cell);
        self.set_count(self.len() + 1);
        self.split_one_bucket()?;
        Ok(handle)
    }

    /// Append one bucket `n` and split into it the one bucket whose entries
    /// `bucket_for` can now route to `n`: the canonical peer
    /// `n - scale / 2`, where `scale` is the next power of two `>= n + 1`.
    /// `bucket_for` depends only on the current bucket count, so this is the
    /// unique bucket that can contain entries destined for `n` — not
    /// whichever bucket a round-robin pointer happens to be sitting on.
    fn split_one_bucket(&mut self) -> Result<()> {
        let n = self.num_buckets();
        let new_n = n + 1;
        let scale = next_pow2(new_n);
        let peer = n - scale / 2;
        self.ensure_buckets_capacity(new_n)?;
        self.set_head(n, INVALID);
        self.set_num_buckets(new_n);

        let mut kept = INVALID;
        let mut moved = INVALID;
        let mut cursor = self.head(peer);
        while cursor != INVALID {
            let next = self.cell_next(cursor);
            if bucket_for(self.cell_hash(cursor), new_n) == peer {
                self.set_cell_next(cursor, kept);
                kept = cursor;
            } else {
                self.set_cell_next(cursor, moved);
                moved = cursor;
            }
            cursor = next;
        }
        self.set_head(peer, kept);
        self.set_head(n, moved);
        Ok(())
    }

    /// Remove `key`, returning `true` if it was present.
    pub fn remove<A: KeyAdapter>(&mut self, key: &[u8], adapter: &mut A) -> Result<bool> {
        let hash = djb2(key);
        let bucket = bucket_for(hash, self.num_buckets());
        let mut cursor = self.head(bucket);
        let mut prev = INVALID;
        while cursor != INVALID {
            let next = self.cell_next(cursor);
            if self.cell_hash(cursor) == hash && self.cell_matches(cursor, key, &*adapter)? {
                if prev == INVALID {
                    self.set_head(bucket, next);
                } else {
                    self.set_cell_next(prev, next);
                }
                adapter.remove(self.cell_handle(cursor))?;
                self.free_cell_idx(cursor);
                self.set_count(self.len() - 1);
                return Ok(true);
            }
            prev = cursor;
            cursor = next;
        }
        Ok(false)
    }

    /// Visit every live `(hash, handle)` pair in bucket order.
    pub fn foreach(&self, mut f: impl FnMut(u32, Handle)) {
        for bucket in 0..self.num_buckets() {
            let mut cursor = self.head(bucket);
            while cursor != INVALID {
                f(self.cell_hash(cursor), self.cell_handle(cursor));
                cursor = self.cell_next(cursor);
            }
        }
    }
}

fn header_file(prefix: &Path) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(".header");
    PathBuf::from(s)
}

fn buckets_file(prefix: &Path) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(".buckets");
    PathBuf::from(s)
}

fn cells_file(prefix: &Path) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(".cells");
    PathBuf::from(s)
}

#[cfg(test)]
#[path = "linear_test.rs"]
mod linear_test;
