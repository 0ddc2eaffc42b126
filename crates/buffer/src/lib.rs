//! Buffer pool manager: a fixed number of frames, clock-sweep (second
//! chance) eviction, and a `(file, page_no)` hash directory.
//!
//! # Example
//!
//! ```no_run
//! use buffer::BufMgr;
//! use storage::DiskPagedFile;
//! use std::path::Path;
//!
//! let mut buf_mgr = BufMgr::new(64);
//! let mut file = DiskPagedFile::create(Path::new("/tmp/relation.dat")).unwrap();
//!
//! let (page_id, frame_no) = buf_mgr.alloc_page(&mut file).unwrap();
//! buf_mgr.pool_mut()[frame_no].data[0] = 42;
//! buf_mgr.un_pin_page(&mut file, page_id, true).unwrap();
//! ```


use common::{DbError, DbResult, FileId, PageId};
use hashbrown::HashMap;
use storage::{Page, PagedFile};
use tracing::{debug, trace};

/// Per-frame bookkeeping, one entry per slot in the buffer pool.
#[derive(Debug, Clone)]
struct FrameDescriptor {
    file: Option<FileId>,
    page_no: PageId,
    pin_cnt: u32,
    dirty: bool,
    valid: bool,
    refbit: bool,
}

impl FrameDescriptor {
    fn empty() -> Self {
        Self {
            file: None,
            page_no: PageId::INVALID,
            pin_cnt: 0,
            dirty: false,
            valid: false,
            refbit: false,
        }
    }

    fn clear(&mut self) {
        *self = Self::empty();
    }
}

/// Hash directory mapping `(file, page_no) -> frame_no`. Pre-reserved to
/// roughly `1.2x` the frame count to keep collisions rare without
/// over-allocating.
#[derive(Debug, Default)]
struct BufHashTable {
    map: HashMap<(FileId, PageId), usize>,
}

impl BufHashTable {
    fn with_capacity(num_bufs: usize) -> Self {
        let hint = ((num_bufs as f64 * 1.2) as usize) + 1;
        Self {
            map: HashMap::with_capacity(hint),
        }
    }

    fn lookup(&self, file: FileId, page_no: PageId) -> Option<usize> {
        self.map.get(&(file, page_no)).copied()
    }

    fn insert(&mut self, file: FileId, page_no: PageId, frame_no: usize) {
        self.map.insert((file, page_no), frame_no);
    }

    fn remove(&mut self, file: FileId, page_no: PageId) -> DbResult<()> {
        self.map
            .remove(&(file, page_no))
            .map(|_| ())
            .ok_or(DbError::HashNotFound {
                file,
                page: page_no,
            })
    }
}

/// The buffer pool: a fixed-size cache of disk pages, pinned and
/// evicted by reference count and clock-sweep second chance.
#[derive(Debug)]
pub struct BufMgr {
    frames: Vec<FrameDescriptor>,
    pool: Vec<Page>,
    directory: BufHashTable,
    clock_hand: usize,
    num_bufs: usize,
}

impl BufMgr {
    /// Create a buffer pool with `num_bufs` frames.
    pub fn new(num_bufs: usize) -> Self {
        assert!(num_bufs > 0, "num_bufs must be > 0");
        Self {
            frames: (0..num_bufs).map(|_| FrameDescriptor::empty()).collect(),
            pool: (0..num_bufs).map(|_| Page::new(PageId::INVALID)).collect(),
            directory: BufHashTable::with_capacity(num_bufs),
            clock_hand: num_bufs - 1,
            num_bufs,
        }
    }

    pub fn num_bufs(&self) -> usize {
        self.num_bufs
    }

    fn advance_clock(&mut self) {
        self.clock_hand = (self.clock_hand + 1) % self.num_bufs;
    }

    /// Run the clock sweep to find a frame to reuse, evicting and
    /// flushing whatever it currently holds. Direct port of the
    /// original's `allocBuf`.
    fn alloc_buf(&mut self, file: &mut dyn PagedFile) -> DbResult<usize> {
        let mut pinned_seen = 0usize;
        let frame_no = loop {
            self.advance_clock();
            if pinned_seen == self.num_bufs {
                return Err(DbError::BufferExceeded);
            }

            let frame = &mut self.frames[self.clock_hand];
            if frame.pin_cnt == 0 && !frame.refbit {
                break self.clock_hand;
            } else if frame.pin_cnt == 1 {
                // Only a frame seen pinned exactly once counts toward the
                // full-sweep exhaustion check, so a frame pinned multiple
                // times doesn't get double-counted on repeated sweeps.
                pinned_seen += 1;
            }
            frame.refbit = false;
        };

        let frame = self.frames[frame_no].clone();
        if frame.valid {
            let owner = frame.file.expect("valid frame names its file");
            trace!(frame_no, page_no = ?frame.page_no, dirty = frame.dirty, "evicting frame");
            self.directory.remove(owner, frame.page_no)?;
            if frame.dirty && owner == file.file_id() {
                file.write_page(&self.pool[frame_no])?;
            } else if frame.dirty {
                debug!(
                    frame_no,
                    "evicting a dirty frame belonging to a different file; caller must \
                     flush_file that file before dropping this buffer pool"
                );
            }
            self.frames[frame_no].clear();
        }

        Ok(frame_no)
    }

    /// Fetch `page_no` from `file`, pinning it. Loads it from disk on a
    /// cache miss. Returns the frame index the page now lives in.
    pub fn read_page(&mut self, file: &mut dyn PagedFile, page_no: PageId) -> DbResult<usize> {
        let owner = file.file_id();
        if let Some(frame_no) = self.directory.lookup(owner, page_no) {
            self.frames[frame_no].pin_cnt += 1;
            self.frames[frame_no].refbit = true;
            return Ok(frame_no);
        }

        let frame_no = self.alloc_buf(file)?;
        let page = file.read_page(page_no)?;
        self.pool[frame_no] = page;
        self.directory.insert(owner, page_no, frame_no);

        let frame = &mut self.frames[frame_no];
        frame.file = Some(owner);
        frame.page_no = page_no;
        frame.pin_cnt = 1;
        frame.dirty = false;
        frame.valid = true;
        frame.refbit = true;

        Ok(frame_no)
    }

    /// Allocate a new page in `file` and pin it. Returns its page number
    /// and the frame it lives in.
    pub fn alloc_page(&mut self, file: &mut dyn PagedFile) -> DbResult<(PageId, usize)> {
        let owner = file.file_id();
        let page = file.allocate_page()?;
        let page_no = page.id;

        let frame_no = self.alloc_buf(file)?;
        self.pool[frame_no] = page;
        self.directory.insert(owner, page_no, frame_no);

        let frame = &mut self.frames[frame_no];
        frame.file = Some(owner);
        frame.page_no = page_no;
        frame.pin_cnt = 1;
        frame.dirty = true;
        frame.valid = true;
        frame.refbit = true;

        debug!(?page_no, frame_no, "allocated page");
        Ok((page_no, frame_no))
    }

    /// Decrement a page's pin count, optionally marking it dirty.
    /// Errors if the page isn't resident or its pin count is already 0.
    pub fn un_pin_page(
        &mut self,
        file: &mut dyn PagedFile,
        page_no: PageId,
        dirty: bool,
    ) -> DbResult<()> {
        let owner = file.file_id();
        let frame_no = self
            .directory
            .lookup(owner, page_no)
            .ok_or(DbError::HashNotFound {
                file: owner,
                page: page_no,
            })?;

        let frame = &mut self.frames[frame_no];
        if frame.pin_cnt == 0 {
            return Err(DbError::PageNotPinned {
                file: owner,
                page: page_no,
                frame: frame_no,
            });
        }

        frame.pin_cnt -= 1;
        if dirty {
            frame.dirty = true;
        }
        Ok(())
    }

    /// Borrow the page currently resident in `frame_no`.
    pub fn frame(&self, frame_no: usize) -> &Page {
        &self.pool[frame_no]
    }

    /// Mutably borrow the page currently resident in `frame_no`.
    pub fn frame_mut(&mut self, frame_no: usize) -> &mut Page {
        &mut self.pool[frame_no]
    }

    pub fn pool_mut(&mut self) -> &mut [Page] {
        &mut self.pool
    }

    /// Write back every dirty page belonging to `file` and clear their
    /// frames. Errors if any page belonging to `file` is still pinned.
    pub fn flush_file(&mut self, file: &mut dyn PagedFile) -> DbResult<()> {
        let owner = file.file_id();
        let frame_nos: Vec<usize> = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.valid && f.file == Some(owner))
            .map(|(i, _)| i)
            .collect();

        for frame_no in frame_nos {
            let frame = self.frames[frame_no].clone();
            if frame.pin_cnt > 0 {
                return Err(DbError::PagePinned {
                    file: owner,
                    page: frame.page_no,
                    frame: frame_no,
                });
            }
            if frame.dirty {
                file.write_page(&self.pool[frame_no])?;
            }
            self.directory.remove(owner, frame.page_no)?;
            self.frames[frame_no].clear();
        }

        Ok(())
    }

    /// Deregister `page_no` from the directory (if resident) and ask
    /// `file` to free it. The original left `disposePage` as a no-op
    /// stub; this gives it the real free-and-deregister behavior the
    /// component description calls for.
    pub fn dispose_page(&mut self, file: &mut dyn PagedFile, page_no: PageId) -> DbResult<()> {
        let owner = file.file_id();
        if let Some(frame_no) = self.directory.lookup(owner, page_no) {
            if self.frames[frame_no].pin_cnt > 0 {
                return Err(DbError::PagePinned {
                    file: owner,
                    page: page_no,
                    frame: frame_no,
                });
            }
            self.directory.remove(owner, page_no)?;
            self.frames[frame_no].clear();
        }
        file.dispose_page(page_no)
    }

    /// Print frame occupancy, for interactive debugging. Mirrors the
    /// original's `printSelf`.
    pub fn print_self(&self) {
        for (frame_no, frame) in self.frames.iter().enumerate() {
            if frame.valid {
                debug!(
                    frame_no,
                    page_no = ?frame.page_no,
                    pin_cnt = frame.pin_cnt,
                    dirty = frame.dirty,
                    refbit = frame.refbit,
                    "occupied"
                );
            }
        }
    }
}
