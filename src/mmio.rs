//! A growable, memory-mapped file.
//!
//! Every store and index file in `radb` is one of these: a file opened for
//! read-write, mapped whole into the process, grown by truncating and
//! remapping when an operation needs space past the current end. This is
//! the Rust analogue of the original C sources' `mmap`/`mremap`/`ftruncate`
//! dance (see `fixed_store.c`), using `memmap2` in place of raw `libc`
//! calls the way `ChainSafe-forest` does for its own mapped files.

use memmap2::MmapMut;

use std::{fs, path::Path};

use crate::{err_at, Error, Result};

pub struct MappedFile {
    file: fs::File,
    mmap: MmapMut,
}

impl MappedFile {
    /// Create a new file at `path`, truncated/extended to `len` bytes, and
    /// map it.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> Result<MappedFile> {
        let path = path.as_ref();
        let file = err_at!(
            IOError,
            fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path),
            "create {:?}",
            path
        )?;
        err_at!(IOError, file.set_len(len as u64), "truncate {:?}", path)?;
        let mmap = err_at!(IOError, unsafe { MmapMut::map_mut(&file) }, "mmap {:?}", path)?;
        Ok(MappedFile { file, mmap })
    }

    /// Open an existing file at `path` and map its entire current length.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<MappedFile> {
        let path = path.as_ref();
        if !path.exists() {
            return err_at!(FileNotFound, msg: "{:?}", path);
        }
        let file = err_at!(
            IOError,
            fs::OpenOptions::new().read(true).write(true).open(path),
            "open {:?}",
            path
        )?;
        let mmap = err_at!(IOError, unsafe { MmapMut::map_mut(&file) }, "mmap {:?}", path)?;
        Ok(MappedFile { file, mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    /// Grow the file to exactly `new_len` bytes and remap it. `new_len` must
    /// be `>=` the current length; shrinking is never needed by any store.
    pub fn grow_to(&mut self, new_len: usize) -> Result<()> {
        if new_len <= self.mmap.len() {
            return Ok(());
        }
        err_at!(IOError, self.file.set_len(new_len as u64))?;
        self.mmap = err_at!(IOError, unsafe { MmapMut::map_mut(&self.file) })?;
        Ok(())
    }

    /// Flush dirty pages to disk. `radb` otherwise relies on lazy page
    /// flushing per spec.md's Non-goals; this is exposed for a host that
    /// wants to request a sync at close.
    pub fn sync(&self) -> Result<()> {
        err_at!(IOError, self.mmap.flush())
    }
}

/// Read a host-endian `u32` at byte offset `at`.
pub fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes(buf[at..at + 4].try_into().unwrap())
}

/// Write a host-endian `u32` at byte offset `at`.
pub fn put_u32(buf: &mut [u8], at: usize, val: u32) {
    buf[at..at + 4].copy_from_slice(&val.to_ne_bytes());
}

/// `ceil(numerator / denominator) * denominator`, the growth-rounding
/// formula used by every `alloc`/`get`/`set` path that extends a file.
pub fn round_up(numerator: usize, denominator: usize) -> usize {
    ((numerator + denominator - 1) / denominator) * denominator
}

#[cfg(test)]
mod mmio_test {
    use super::*;

    #[test]
    fn test_get_put_u32_roundtrip() {
        let mut buf = [0u8; 8];
        put_u32(&mut buf, 4, 0xdead_beef);
        assert_eq!(get_u32(&buf, 4), 0xdead_beef);
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 512), 0);
        assert_eq!(round_up(1, 512), 512);
        assert_eq!(round_up(512, 512), 512);
        assert_eq!(round_up(513, 512), 1024);
    }

    #[test]
    fn test_mapped_file_create_grow_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        {
            let mut mf = MappedFile::create(&path, 16).unwrap();
            assert_eq!(mf.len(), 16);
            put_u32(mf.as_mut_slice(), 0, 42);
            mf.grow_to(32).unwrap();
            assert_eq!(mf.len(), 32);
            assert_eq!(get_u32(mf.as_slice(), 0), 42);
            mf.sync().unwrap();
        }
        let mf = MappedFile::open(&path).unwrap();
        assert_eq!(mf.len(), 32);
        assert_eq!(get_u32(mf.as_slice(), 0), 42);
    }

    #[test]
    fn test_open_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");
        match MappedFile::open(&path) {
            Err(Error::FileNotFound(_)) => (),
            other => panic!("expected FileNotFound, got {:?}", other.map(|_| ())),
        }
    }
}
