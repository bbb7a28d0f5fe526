//! `radb` is an embedded, content-addressed key/value store built directly
//! on memory-mapped files: no transaction log, no write-ahead buffer, no
//! background compaction thread. Callers are expected to serialize their
//! own access; `radb` does not take locks on your behalf.
//!
//! A store is a pair of allocators — [`slab::SlabStore`] for fixed-width
//! records, [`blob::BlobStore`] for variable-length values chained across
//! fixed-size nodes — joined to a hash index through the [`adapter::KeyAdapter`]
//! seam. Two index families are provided: [`classic::ClassicIndex`], a
//! power-of-two open-addressed table with Robin-Hood displacement and an
//! all-at-once rehash at 7/8 load, and [`linear::LinearIndex`], which grows
//! one bucket at a time instead of doubling the whole table.
//!
//! None of this flushes pages to disk on its own; call `sync()` on whichever
//! stores and indexes you've touched when you want durability.

mod adapter;
mod blob;
mod classic;
mod error;
mod handle;
mod linear;
mod mmio;
mod slab;

pub use crate::adapter::{BlobKeyAdapter, FixedKeyAdapter, KeyAdapter};
pub use crate::blob::BlobStore;
pub use crate::classic::ClassicIndex;
pub use crate::error::{Error, Result};
pub use crate::handle::{djb2, Handle, DELETED, INVALID};
pub use crate::linear::LinearIndex;
pub use crate::slab::SlabStore;
