//! On-disk page layouts for the extendible hash index.
//!
//! Pages are reached through the buffer pool as raw byte slices; the types
//! in this module are zero-copy views that interpret those bytes. Each
//! layout comes in a read-only and a mutable flavor so shared-latch readers
//! never need exclusive access.
//!
//! - [`DirectoryView`] / [`DirectoryViewMut`]: the hash directory (global
//!   depth, per-entry local depths, bucket page ids)
//! - [`BucketView`] / [`BucketViewMut`]: a bit-packed bucket of key/value
//!   mappings
//!
//! All integer fields are little-endian; bitmap bits are MSB-first within
//! each byte, so the on-disk image is deterministic.

mod bucket;
mod directory;

pub use bucket::{bucket_capacity, BucketView, BucketViewMut};
pub use directory::{DirectoryView, DirectoryViewMut};
