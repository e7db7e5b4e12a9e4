//! Synchronous page-granular file I/O.
//!
//! The disk manager owns the single database file and reads/writes whole
//! pages at `page_id * PAGE_SIZE`. It performs no caching and no allocation
//! bookkeeping of its own; the buffer pool sits on top of it and decides
//! which pages live in memory.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use burrow_common::constants::PAGE_SIZE;
use burrow_common::types::PageId;

/// Page-granular access to the database file.
///
/// All operations are synchronous and thread-safe; concurrent callers
/// serialize on an internal mutex around the file handle.
pub struct DiskManager {
    /// The underlying file, wrapped in a mutex for thread-safe access.
    file: Mutex<File>,
    /// The file path.
    path: PathBuf,
    /// Number of page writes issued, for observability.
    write_count: AtomicU64,
}

impl DiskManager {
    /// Opens (creating if necessary) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Ok(Self {
            file: Mutex::new(file),
            path,
            write_count: AtomicU64::new(0),
        })
    }

    /// Returns the path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the page at `page_id` into `buf`.
    ///
    /// `buf` must be exactly one page long. Reading a page that was never
    /// written (the offset lies past the end of the file) yields zeroes:
    /// the tail of a short read is zero-filled rather than reported as an
    /// error, since freshly allocated pages have no on-disk image yet.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let offset = u64::from(page_id.as_u32()) * PAGE_SIZE as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    /// Writes `data` as the page at `page_id`.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> io::Result<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let offset = u64::from(page_id.as_u32()) * PAGE_SIZE as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Releases the on-disk page for reuse.
    ///
    /// Freed page ids are not recycled yet; the call records intent so a
    /// future free-list can pick them up without an interface change.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Flushes the file to stable storage.
    pub fn sync(&self) -> io::Result<()> {
        self.file.lock().sync_all()
    }

    /// Returns the number of page writes issued so far.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager")
            .field("path", &self.path)
            .field("write_count", &self.write_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&[1, 2, 3, 4]);
        disk.write_page(PageId::new(3), &page).unwrap();

        let mut out = vec![0xAAu8; PAGE_SIZE];
        disk.read_page(PageId::new(3), &mut out).unwrap();
        assert_eq!(out, page);
        assert_eq!(disk.write_count(), 1);

        disk.sync().unwrap();
        assert!(disk.path().ends_with("test.db"));
    }

    #[test]
    fn test_read_unwritten_page_is_zeroed() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();

        let mut out = vec![0xAAu8; PAGE_SIZE];
        disk.read_page(PageId::new(17), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pages_do_not_overlap() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();

        let a = vec![0x11u8; PAGE_SIZE];
        let b = vec![0x22u8; PAGE_SIZE];
        disk.write_page(PageId::new(0), &a).unwrap();
        disk.write_page(PageId::new(1), &b).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        disk.read_page(PageId::new(0), &mut out).unwrap();
        assert_eq!(out, a);
        disk.read_page(PageId::new(1), &mut out).unwrap();
        assert_eq!(out, b);
    }
}
