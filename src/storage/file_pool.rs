//! # Region File Pool
//!
//! Caps the number of region files a layer keeps open. Every open file is
//! tracked in an LRU cache whose entries are either an idle file or a claim
//! by one thread: a reader holding the file, or a writer rewriting it.
//!
//! Claiming a region that another thread holds waits for its release.
//! Claiming a region that is not open while the pool is full waits until a
//! guard is dropped, then evicts the least recently used idle file. Guards
//! give their file back when dropped, on every exit path, and wake up
//! waiting threads.
//!
//! A writer reservation keeps the region claimed for the whole rewrite, so
//! no reader can open a half-written file. Dropping the reservation forgets
//! the old handle; the next reader reopens the file and parses its new
//! offset table.

use std::mem;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

use log::debug;
use lru::LruCache;

use super::region_file::{ChunkBlob, RegionFile};
use super::RegionKey;
use crate::coders::Method;
use crate::error::{Result, StorageError};

enum Slot {
    Idle(RegionFile),
    Reading(ThreadId),
    Writing(ThreadId),
}

enum Claimed {
    Open(RegionFile),
    Reserved,
    Missing,
}

struct PoolState {
    files: LruCache<RegionKey, Slot>,
}

/// Bounded set of open region files for one layer.
pub struct RegionFilePool {
    folder: PathBuf,
    capacity: usize,
    state: Mutex<PoolState>,
    released: Condvar,
}

impl RegionFilePool {
    /// Creates a pool over the region files of `folder`.
    ///
    /// # Arguments
    /// * `folder` - directory holding the layer's `<x>_<z>.bin` files
    /// * `capacity` - open files kept at once; zero is raised to one
    pub fn new(folder: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            folder: folder.into(),
            capacity: capacity.max(1),
            state: Mutex::new(PoolState {
                files: LruCache::unbounded(),
            }),
            released: Condvar::new(),
        }
    }

    /// Folder holding the layer's region files.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Maximum number of files open at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Path of the region file of `key`.
    pub fn file_path(&self, key: RegionKey) -> PathBuf {
        self.folder.join(key.file_name())
    }

    /// Number of files currently open or claimed.
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }

    /// Hands out exclusive access to the region file of `key`, waiting while
    /// another thread holds it.
    ///
    /// Returns `Ok(None)` when the region has no file on disk.
    ///
    /// # Errors
    /// [`StorageError::FileInUse`] when the calling thread already holds the
    /// region; holders must never request the same region twice.
    pub fn acquire(&self, key: RegionKey) -> Result<Option<RegionFileGuard<'_>>> {
        let path = self.file_path(key);
        let file = match self.claim(key, true)? {
            Claimed::Missing => return Ok(None),
            Claimed::Open(file) => file,
            Claimed::Reserved => self.open_claimed(key, &path)?,
        };
        Ok(Some(RegionFileGuard {
            pool: self,
            key,
            file: Some(file),
        }))
    }

    /// Claims the region of `key` for a rewrite, waiting for its holders.
    ///
    /// The reservation gives access to the current file, if there is one,
    /// for merging chunks that are not staged in memory.
    pub fn reserve(&self, key: RegionKey) -> Result<RegionWriteGuard<'_>> {
        let path = self.file_path(key);
        let file = match self.claim(key, false)? {
            Claimed::Open(file) => Some(file),
            Claimed::Reserved if path.exists() => Some(self.open_claimed(key, &path)?),
            Claimed::Reserved | Claimed::Missing => None,
        };
        Ok(RegionWriteGuard {
            pool: self,
            key,
            path,
            file,
        })
    }

    /// Waits until `key` can be claimed by the calling thread and claims it.
    ///
    /// A reader (`reading`) skips regions with no file and never takes a
    /// pool entry for them.
    fn claim(&self, key: RegionKey, reading: bool) -> Result<Claimed> {
        let me = thread::current().id();
        let claim = || {
            if reading {
                Slot::Reading(me)
            } else {
                Slot::Writing(me)
            }
        };
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(slot) = state.files.get_mut(&key) {
                let holder = match slot {
                    Slot::Idle(_) => None,
                    Slot::Reading(holder) | Slot::Writing(holder) => Some(*holder),
                };
                match holder {
                    None => {
                        if let Slot::Idle(file) = mem::replace(slot, claim()) {
                            return Ok(Claimed::Open(file));
                        }
                    }
                    Some(holder) if holder == me => {
                        return Err(StorageError::FileInUse(self.file_path(key)));
                    }
                    Some(_) => {}
                }
                state = self.released.wait(state).unwrap();
                continue;
            }
            if reading && !self.file_path(key).exists() {
                return Ok(Claimed::Missing);
            }
            if state.files.len() < self.capacity || Self::evict_idle(&mut state) {
                state.files.put(key, claim());
                return Ok(Claimed::Reserved);
            }
            state = self.released.wait(state).unwrap();
        }
    }

    fn evict_idle(state: &mut PoolState) -> bool {
        let victim = state
            .files
            .iter()
            .rev()
            .find(|(_, slot)| matches!(slot, Slot::Idle(_)))
            .map(|(&victim, _)| victim);
        match victim {
            Some(victim) => {
                state.files.pop(&victim);
                debug!("Closed region file {} to free a handle", victim);
                true
            }
            None => false,
        }
    }

    /// Opens the file of a claimed region outside the pool lock.
    fn open_claimed(&self, key: RegionKey, path: &Path) -> Result<RegionFile> {
        RegionFile::open(path).inspect_err(|_| self.forget(key))
    }

    fn release(&self, key: RegionKey, file: RegionFile) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.files.peek_mut(&key) {
            *slot = Slot::Idle(file);
        }
        drop(state);
        self.released.notify_all();
    }

    fn forget(&self, key: RegionKey) {
        self.state.lock().unwrap().files.pop(&key);
        self.released.notify_all();
    }
}

/// Exclusive read access to one open region file.
pub struct RegionFileGuard<'a> {
    pool: &'a RegionFilePool,
    key: RegionKey,
    file: Option<RegionFile>,
}

impl RegionFileGuard<'_> {
    /// Region the file belongs to.
    pub fn key(&self) -> RegionKey {
        self.key
    }
}

impl Deref for RegionFileGuard<'_> {
    type Target = RegionFile;

    fn deref(&self) -> &RegionFile {
        self.file.as_ref().expect("file is held until the guard drops")
    }
}

impl DerefMut for RegionFileGuard<'_> {
    fn deref_mut(&mut self) -> &mut RegionFile {
        self.file.as_mut().expect("file is held until the guard drops")
    }
}

impl Drop for RegionFileGuard<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            self.pool.release(self.key, file);
        }
    }
}

/// A region claimed for a rewrite. Readers of the region wait until it is
/// dropped.
pub struct RegionWriteGuard<'a> {
    pool: &'a RegionFilePool,
    key: RegionKey,
    path: PathBuf,
    file: Option<RegionFile>,
}

impl RegionWriteGuard<'_> {
    /// Region being rewritten.
    pub fn key(&self) -> RegionKey {
        self.key
    }

    /// The file as it is before the rewrite, `None` for a new region.
    pub fn current(&mut self) -> Option<&mut RegionFile> {
        self.file.as_mut()
    }

    /// Replaces the region file with `slots`, closing the old handle first.
    pub fn write(&mut self, compression: Method, slots: &[Option<ChunkBlob>]) -> Result<()> {
        self.file = None;
        RegionFile::write(&self.path, compression, slots)
    }
}

impl Drop for RegionWriteGuard<'_> {
    fn drop(&mut self) {
        self.file = None;
        self.pool.forget(self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::coders::Method;
    use crate::storage::region_file::ChunkBlob;
    use crate::storage::REGION_CHUNKS_COUNT;

    fn write_regions(folder: &Path, count: i32) {
        let mut slots = vec![None; REGION_CHUNKS_COUNT];
        slots[0] = Some(ChunkBlob::new(vec![1], 1));
        for x in 0..count {
            let path = folder.join(RegionKey::new(x, 0).file_name());
            RegionFile::write(&path, Method::None, &slots).unwrap();
        }
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let pool = RegionFilePool::new(dir.path(), 2);
        assert!(pool.acquire(RegionKey::new(5, 5)).unwrap().is_none());
        assert_eq!(pool.open_count(), 0);
    }

    #[test]
    fn held_file_cannot_be_acquired_twice() {
        let dir = tempfile::tempdir().unwrap();
        write_regions(dir.path(), 1);
        let pool = RegionFilePool::new(dir.path(), 2);
        let key = RegionKey::new(0, 0);

        let guard = pool.acquire(key).unwrap().unwrap();
        assert!(matches!(pool.acquire(key), Err(StorageError::FileInUse(_))));
        drop(guard);

        let mut guard = pool.acquire(key).unwrap().unwrap();
        assert_eq!(guard.read(0).unwrap().unwrap().data, vec![1]);
    }

    #[test]
    fn idle_files_are_evicted_least_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        write_regions(dir.path(), 3);
        let pool = RegionFilePool::new(dir.path(), 2);

        drop(pool.acquire(RegionKey::new(0, 0)).unwrap());
        drop(pool.acquire(RegionKey::new(1, 0)).unwrap());
        drop(pool.acquire(RegionKey::new(0, 0)).unwrap());
        drop(pool.acquire(RegionKey::new(2, 0)).unwrap());

        assert_eq!(pool.open_count(), 2);
        let state = pool.state.lock().unwrap();
        assert!(state.files.contains(&RegionKey::new(0, 0)));
        assert!(!state.files.contains(&RegionKey::new(1, 0)));
    }

    #[test]
    fn waiters_are_woken_when_handles_are_released() {
        let dir = tempfile::tempdir().unwrap();
        write_regions(dir.path(), 6);
        let pool = Arc::new(RegionFilePool::new(dir.path(), 2));
        let held = Arc::new(AtomicUsize::new(0));
        let max_held = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..6)
            .map(|x| {
                let pool = pool.clone();
                let held = held.clone();
                let max_held = max_held.clone();
                thread::spawn(move || {
                    let guard = pool.acquire(RegionKey::new(x, 0)).unwrap().unwrap();
                    let now = held.fetch_add(1, Ordering::SeqCst) + 1;
                    max_held.fetch_max(now, Ordering::SeqCst);
                    assert!(pool.open_count() <= pool.capacity());
                    thread::sleep(Duration::from_millis(10));
                    held.fetch_sub(1, Ordering::SeqCst);
                    drop(guard);
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(max_held.load(Ordering::SeqCst) <= 2);
        assert!(pool.open_count() <= 2);
    }

    #[test]
    fn other_threads_wait_for_the_holder() {
        let dir = tempfile::tempdir().unwrap();
        write_regions(dir.path(), 1);
        let pool = Arc::new(RegionFilePool::new(dir.path(), 2));
        let key = RegionKey::new(0, 0);
        let guard = pool.acquire(key).unwrap().unwrap();

        let reader = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire(key).unwrap().unwrap().read(0).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!reader.is_finished());
        drop(guard);
        assert_eq!(reader.join().unwrap().unwrap().data, vec![1]);
    }

    #[test]
    fn readers_wait_for_a_rewrite_and_see_the_new_file() {
        let dir = tempfile::tempdir().unwrap();
        write_regions(dir.path(), 1);
        let pool = Arc::new(RegionFilePool::new(dir.path(), 2));
        let key = RegionKey::new(0, 0);
        // an idle handle parsed from the old offsets
        drop(pool.acquire(key).unwrap());

        let mut writer = pool.reserve(key).unwrap();
        assert_eq!(writer.current().unwrap().read(0).unwrap().unwrap().data, vec![1]);
        assert!(matches!(pool.acquire(key), Err(StorageError::FileInUse(_))));

        let reader = {
            let pool = pool.clone();
            thread::spawn(move || {
                let mut file = pool.acquire(key).unwrap().unwrap();
                (file.read(0).unwrap(), file.read(5).unwrap())
            })
        };
        let mut slots = vec![None; REGION_CHUNKS_COUNT];
        slots[5] = Some(ChunkBlob::new(vec![7, 7], 2));
        writer.write(Method::None, &slots).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!reader.is_finished());
        drop(writer);

        let (first, fifth) = reader.join().unwrap();
        assert_eq!(first, None);
        assert_eq!(fifth.unwrap().data, vec![7, 7]);
    }

    #[test]
    fn reserving_a_new_region_takes_a_pool_entry() {
        let dir = tempfile::tempdir().unwrap();
        let pool = RegionFilePool::new(dir.path(), 1);
        let key = RegionKey::new(3, 3);
        {
            let mut writer = pool.reserve(key).unwrap();
            assert!(writer.current().is_none());
            assert_eq!(pool.open_count(), 1);
            writer
                .write(Method::None, &vec![None; REGION_CHUNKS_COUNT])
                .unwrap();
        }
        assert_eq!(pool.open_count(), 0);
        assert!(pool.acquire(key).unwrap().is_some());
    }
}
