//! System-wide constants for Burrow.

// =============================================================================
// Page Geometry
// =============================================================================

/// Size of a disk page in bytes (4 KB).
///
/// Every on-disk structure is built out of pages of this size, addressed by
/// `page_id * PAGE_SIZE` within the database file.
pub const PAGE_SIZE: usize = 4 * 1024;

// =============================================================================
// Extendible Hashing Limits
// =============================================================================

/// Maximum global depth of a hash table directory.
///
/// The directory can hold at most `1 << MAX_GLOBAL_DEPTH` entries; a bucket
/// split that would push a local depth past this limit fails the insert
/// instead of growing further.
pub const MAX_GLOBAL_DEPTH: u32 = 9;

/// Physical capacity of the directory entry arrays (512 entries).
///
/// The arrays are always laid out at full capacity on disk; only the first
/// `1 << global_depth` entries are live.
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_GLOBAL_DEPTH;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_constants() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert_eq!(DIRECTORY_ARRAY_SIZE, 512);
    }

    #[test]
    fn test_directory_fits_in_page() {
        // page_id (4) + lsn (4) + global_depth (4) + local_depths (512)
        // + bucket_page_ids (4 * 512) must fit in one page.
        assert!(12 + DIRECTORY_ARRAY_SIZE + 4 * DIRECTORY_ARRAY_SIZE <= PAGE_SIZE);
    }
}
