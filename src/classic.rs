//! Classic open-addressed hash index: `<prefix>.index`.
//!
//! A power-of-two cell table probed with a fixed odd stride per key,
//! Robin-Hood displacement keeping each probe chain sorted by descending
//! hash (so lookups can stop the moment they see a smaller hash than the
//! one they're after), and in-place rehash/compaction at 7/8 load via a
//! `.temp` file and atomic rename. Grounded on
//! `examples/original_source/fixed_index.c`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    adapter::KeyAdapter,
    err_at,
    handle::{djb2, Handle, DELETED, INVALID},
    mmio::{get_u32, put_u32, MappedFile},
    Error, Result,
};

const SIGNATURE_FIXED: u32 = u32::from_le_bytes(*b"RAFI");
const SIGNATURE_STRING: u32 = u32::from_le_bytes(*b"RASI");
const VERSION_1_0: u32 = 0xFF00_0000 | (1 << 16) | (0 << 8);

const HEADER_SIZE: usize = 24;
const OFF_SIGNATURE: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_CAPACITY: usize = 8;
const OFF_COUNT: usize = 12;
const OFF_TOMBSTONES: usize = 16;
const OFF_KEY_SIZE: usize = 20;

const CELL_SIZE: usize = 8; // (hash: u32, handle: u32)

const MIN_CAPACITY: usize = 8;
const LOAD_NUMERATOR: usize = 7;
const LOAD_DENOMINATOR: usize = 8;

/// A classic hash index over keys stored through a [`KeyAdapter`].
///
/// Whether this is the fixed-key (`RAFI`) or variable-key (`RASI`) variant
/// is recorded in the header and is purely informational: the probing
/// algorithm is identical either way, the only difference is which adapter
/// the caller pairs it with.
pub struct ClassicIndex {
    path: PathBuf,
    file: MappedFile,
}

impl ClassicIndex {
    /// Create a new index. `key_size` is `Some(n)` for the fixed-key
    /// variant (`n` matching the paired [`crate::slab::SlabStore`]'s record
    /// size) or `None` for the variable-key, blob-backed variant.
    pub fn create<P: AsRef<Path>>(prefix: P, capacity_hint: usize, key_size: Option<u32>) -> Result<ClassicIndex> {
        let mut capacity = MIN_CAPACITY;
        while capacity < capacity_hint.max(1) {
            capacity *= 2;
        }
        let path = index_file(prefix.as_ref());
        let mut file = MappedFile::create(&path, HEADER_SIZE + capacity * CELL_SIZE)?;
        let buf = file.as_mut_slice();
        put_u32(buf, OFF_SIGNATURE, key_size.map_or(SIGNATURE_STRING, |_| SIGNATURE_FIXED));
        put_u32(buf, OFF_VERSION, VERSION_1_0);
        put_u32(buf, OFF_CAPACITY, capacity as u32);
        put_u32(buf, OFF_COUNT, 0);
        put_u32(buf, OFF_TOMBSTONES, 0);
        put_u32(buf, OFF_KEY_SIZE, key_size.unwrap_or(0));
        for i in 0..capacity {
            put_u32(buf, HEADER_SIZE + i * CELL_SIZE + 4, INVALID);
        }
        Ok(ClassicIndex { path, file })
    }

    pub fn open<P: AsRef<Path>>(prefix: P) -> Result<ClassicIndex> {
        let path = index_file(prefix.as_ref());
        let file = MappedFile::open(&path)?;
        let signature = get_u32(file.as_slice(), OFF_SIGNATURE);
        if signature != SIGNATURE_FIXED && signature != SIGNATURE_STRING {
            return err_at!(HeaderMismatch, msg: "{:?}: signature {:#x}", path, signature);
        }
        Ok(ClassicIndex { path, file })
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    pub fn len(&self) -> usize {
        get_u32(self.file.as_slice(), OFF_COUNT) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        get_u32(self.file.as_slice(), OFF_CAPACITY) as usize
    }

    /// Number of tombstoned (removed but not yet reclaimed) cells.
    pub fn num_deleted(&self) -> usize {
        self.tombstones()
    }

    fn tombstones(&self) -> usize {
        get_u32(self.file.as_slice(), OFF_TOMBSTONES) as usize
    }

    fn set_count(&mut self, v: usize) {
        put_u32(self.file.as_mut_slice(), OFF_COUNT, v as u32);
    }

    fn set_tombstones(&mut self, v: usize) {
        put_u32(self.file.as_mut_slice(), OFF_TOMBSTONES, v as u32);
    }

    fn cell_off(&self, slot: usize) -> usize {
        HEADER_SIZE + slot * CELL_SIZE
    }

    fn cell(&self, slot: usize) -> (u32, Handle) {
        let off = self.cell_off(slot);
        (get_u32(self.file.as_slice(), off), get_u32(self.file.as_slice(), off + 4))
    }

    fn set_cell(&mut self, slot: usize, hash: u32, handle: Handle) {
        let off = self.cell_off(slot);
        let buf = self.file.as_mut_slice();
        put_u32(buf, off, hash);
        put_u32(buf, off + 4, handle);
    }

    fn probe_start(&self, hash: u32) -> (usize, usize) {
        let mask = self.capacity() - 1;
        let start = (hash as usize) & mask;
        let stride = (((hash >> 8) | 1) as usize) & mask;
        (start, stride)
    }

    /// Look up `key`, returning its handle if present.
    pub fn find<A: KeyAdapter>(&self, key: &[u8], adapter: &A) -> Result<Option<Handle>> {
        let hash = djb2(key);
        let capacity = self.capacity();
        let mask = capacity - 1;
        let (start, stride) = self.probe_start(hash);
        for i in 0..capacity {
            let slot = (start + i * stride) & mask;
            let (cell_hash, cell_handle) = self.cell(slot);
            if cell_handle == INVALID {
                return Ok(None);
            }
            if cell_handle != DELETED {
                if cell_hash == hash && adapter.compare(key, cell_handle)? == std::cmp::Ordering::Equal {
                    return Ok(Some(cell_handle));
                }
                if cell_hash < hash {
                    // Robin-Hood invariant: chain is sorted by descending
                    // hash, so `key` cannot appear further along.
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    /// Insert `key` if absent, returning its (possibly pre-existing) handle.
    pub fn insert<A: KeyAdapter>(&mut self, key: &[u8], adapter: &mut A) -> Result<Handle> {
        if let Some(existing) = self.find(key, &*adapter)? {
            return Ok(existing);
        }
        let hash = djb2(key);
        let handle = adapter.insert(key)?;
        self.place(hash, handle)?;
        self.set_count(self.len() + 1);
        self.maybe_rehash()?;
        Ok(handle)
    }

    /// Robin-Hood-insert `(hash, handle)`, displacing lower-hash occupants
    /// along the probe chain as needed. Tombstones sort as hash `0` (the
    /// value `remove` already writes into a deleted cell), so a tombstone
    /// only yields its slot once a carried pair's hash is actually higher —
    /// never unconditionally on first sight — keeping the chain's hash
    /// order non-increasing for every live cell that follows it.
    fn place(&mut self, mut hash: u32, mut handle: Handle) -> Result<()> {
        let capacity = self.capacity();
        let mask = capacity - 1;
        let (start, stride) = self.probe_start(hash);
        for i in 0..capacity {
            let slot = (start + i * stride) & mask;
            let (cell_hash, cell_handle) = self.cell(slot);
            if cell_handle == INVALID {
                if handle == DELETED {
                    // carrying a displaced tombstone with nothing left to
                    // place: it is reclaimed here rather than rewritten.
                    self.set_tombstones(self.tombstones() - 1);
                } else {
                    self.set_cell(slot, hash, handle);
                }
                return Ok(());
            }
            if hash > cell_hash {
                self.set_cell(slot, hash, handle);
                hash = cell_hash;
                handle = cell_handle;
            }
        }
        err_at!(Fatal, msg: "{:?}: probe exhausted capacity {} without an empty slot", self.path, capacity)
    }

    /// Remove `key`, returning `true` if it was present.
    pub fn remove<A: KeyAdapter>(&mut self, key: &[u8], adapter: &mut A) -> Result<bool> {
        let hash = djb2(key);
        let capacity = self.capacity();
        let mask = capacity - 1;
        let (start, stride) = self.probe_start(hash);
        for i in 0..capacity {
            let slot = (start + i * stride) & mask;
            let (cell_hash, cell_handle) = self.cell(slot);
            if cell_handle == INVALID {
                return Ok(false);
            }
            if cell_handle != DELETED {
                if cell_hash == hash && adapter.compare(key, cell_handle)? == std::cmp::Ordering::Equal {
                    adapter.remove(cell_handle)?;
                    self.set_cell(slot, 0, DELETED);
                    self.set_count(self.len() - 1);
                    self.set_tombstones(self.tombstones() + 1);
                    return Ok(true);
                }
                if cell_hash < hash {
                    return Ok(false);
                }
            }
        }
        Ok(false)
    }

    /// Visit every live `(hash, handle)` pair in bucket order.
    pub fn foreach(&self, mut f: impl FnMut(u32, Handle)) {
        for slot in 0..self.capacity() {
            let (hash, handle) = self.cell(slot);
            if handle != INVALID && handle != DELETED {
                f(hash, handle);
            }
        }
    }

    fn maybe_rehash(&mut self) -> Result<()> {
        let capacity = self.capacity();
        let occupied = self.len() + self.tombstones();
        if occupied * LOAD_DENOMINATOR < capacity * LOAD_NUMERATOR {
            return Ok(());
        }
        let new_capacity = if self.len() * LOAD_DENOMINATOR <= capacity * LOAD_NUMERATOR {
            capacity // tombstones alone free enough room: compact in place
        } else {
            capacity * 2
        };
        self.rehash_into(new_capacity)
    }

    fn rehash_into(&mut self, new_capacity: usize) -> Result<()> {
        let temp_path = temp_file(&self.path);
        let signature = get_u32(self.file.as_slice(), OFF_SIGNATURE);
        let key_size = get_u32(self.file.as_slice(), OFF_KEY_SIZE);

        let mut temp = MappedFile::create(&temp_path, HEADER_SIZE + new_capacity * CELL_SIZE)?;
        {
            let buf = temp.as_mut_slice();
            put_u32(buf, OFF_SIGNATURE, signature);
            put_u32(buf, OFF_VERSION, VERSION_1_0);
            put_u32(buf, OFF_CAPACITY, new_capacity as u32);
            put_u32(buf, OFF_COUNT, 0);
            put_u32(buf, OFF_TOMBSTONES, 0);
            put_u32(buf, OFF_KEY_SIZE, key_size);
            for i in 0..new_capacity {
                put_u32(buf, HEADER_SIZE + i * CELL_SIZE + 4, INVALID);
            }
        }

        let mask = new_capacity - 1;
        let mut live = Vec::with_capacity(self.len());
        self.foreach(|hash, handle| live.push((hash, handle)));
        for (hash, handle) in live {
            let start = (hash as usize) & mask;
            let stride = (((hash >> 8) | 1) as usize) & mask;
            place_into(&mut temp, new_capacity, start, stride, hash, handle)?;
        }
        put_u32(temp.as_mut_slice(), OFF_COUNT, self.len() as u32);
        temp.sync()?;
        drop(temp);

        err_at!(IOError, fs::rename(&temp_path, &self.path), "rename {:?} -> {:?}", temp_path, self.path)?;
        self.file = MappedFile::open(&self.path)?;
        Ok(())
    }
}

/// Robin-Hood-place `(hash, handle)` into a freshly built table (no
/// tombstones, no pre-existing entries to displace onto the free list).
fn place_into(file: &mut MappedFile, capacity: usize, start: usize, stride: usize, mut hash: u32, mut handle: Handle) -> Result<()> {
    let mask = capacity - 1;
    for i in 0..capacity {
        let slot = (start + i * stride) & mask;
        let off = HEADER_SIZE + slot * CELL_SIZE;
        let cell_handle = get_u32(file.as_slice(), off + 4);
        if cell_handle == INVALID {
            put_u32(file.as_mut_slice(), off, hash);
            put_u32(file.as_mut_slice(), off + 4, handle);
            return Ok(());
        }
        let cell_hash = get_u32(file.as_slice(), off);
        if hash > cell_hash {
            put_u32(file.as_mut_slice(), off, hash);
            put_u32(file.as_mut_slice(), off + 4, handle);
            hash = cell_hash;
            handle = cell_handle;
        }
    }
    err_at!(Fatal, msg: "rehash target exhausted capacity {} without an empty slot", capacity)
}

fn index_file(prefix: &Path) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(".index");
    PathBuf::from(s)
}

fn temp_file(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".temp");
    PathBuf::from(s)
}

#[cfg(test)]
#[path = "classic_test.rs"]
mod classic_test;
