//! # burrow-storage
//!
//! Disk-backed storage engine for Burrow: a page-granular disk manager, a
//! pin-counted buffer pool with LRU replacement, and a concurrent extendible
//! hash index built on top of both.
//!
//! The layering is strict: the hash index only ever holds page ids and goes
//! through the buffer pool for every page touch; the buffer pool owns the
//! frames and talks to the disk manager; the replacer only sees frame ids.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Page-granular file I/O
pub mod disk;

/// Buffer pool manager and LRU replacement
pub mod buffer;

/// On-disk page layouts for the hash index
pub mod page;

/// The extendible hash index
pub mod hash;
