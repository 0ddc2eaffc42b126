//! Fixed-size page storage and the paged-file abstraction the buffer
//! manager pins pages against.
//!
//! `Page` is the unit every layer above here trades in: always exactly
//! `PAGE_SIZE` bytes, addressed by a `PageId`. `PagedFile` is the
//! collaborator the buffer manager takes as a parameter to every call
//! (`read_page`, `write_page`, `allocate_page`); `DiskPagedFile` is the
//! one real implementation, backing both index files and base-relation
//! files.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_into_slice, encode_to_vec};
use common::{DbError, DbResult, FileId, PageId, RecordId, Row};

pub const PAGE_SIZE: usize = 4096;
// Sized to the bincode-legacy encoded width of `PageHeader`/`Slot`
// (fixed-width integers, no padding), not `size_of`'s native struct
// layout: `PageHeader`'s `u32` field pads its native size to 8 bytes,
// which would silently desync the header/slot region boundaries.
const HEADER_BYTES: usize = 4 /* num_slots: u32 */ + 2 /* free_offset: u16 */;
const SLOT_BYTES: usize = 2 /* offset: u16 */ + 2 /* len: u16 */;

pub(crate) fn bincode_config() -> impl Config {
    config::legacy()
}

fn next_file_id() -> FileId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    FileId(COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// A single fixed-size page of storage.
///
/// `data` is always exactly `PAGE_SIZE` bytes; growing or shrinking it is
/// a bug in the caller, not a representable state.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub data: Vec<u8>,
}

impl Page {
    pub fn new(id: PageId) -> Self {
        let mut page = Self {
            id,
            data: vec![0u8; PAGE_SIZE],
        };
        page.write_header(&PageHeader::default())
            .expect("initialize page header");
        page
    }

    pub fn header(&self) -> DbResult<PageHeader> {
        let (header, read) = decode_from_slice(&self.data[..HEADER_BYTES], bincode_config())
            .map_err(|e| DbError::Storage(format!("read page header failed: {e}")))?;
        debug_assert_eq!(read, HEADER_BYTES);
        Ok(header)
    }

    pub fn write_header(&mut self, header: &PageHeader) -> DbResult<()> {
        let written = encode_into_slice(header, &mut self.data[..HEADER_BYTES], bincode_config())
            .map_err(|e| DbError::Storage(format!("write page header failed: {e}")))?;
        debug_assert_eq!(written, HEADER_BYTES);
        Ok(())
    }

    fn slot_offset(slot_idx: u32) -> usize {
        HEADER_BYTES + slot_idx as usize * SLOT_BYTES
    }

    fn read_slot(&self, slot_idx: u32) -> DbResult<Slot> {
        let start = Self::slot_offset(slot_idx);
        let end = start + SLOT_BYTES;
        if end > PAGE_SIZE {
            return Err(DbError::Storage(format!("slot {slot_idx} out of bounds")));
        }
        let (slot, read) = decode_from_slice(&self.data[start..end], bincode_config())
            .map_err(|e| DbError::Storage(format!("read slot failed: {e}")))?;
        debug_assert_eq!(read, SLOT_BYTES);
        Ok(slot)
    }

    fn write_slot(&mut self, slot_idx: u32, slot: &Slot) -> DbResult<()> {
        let start = Self::slot_offset(slot_idx);
        let end = start + SLOT_BYTES;
        if end > PAGE_SIZE {
            return Err(DbError::Storage(format!("slot {slot_idx} out of bounds")));
        }
        let written = encode_into_slice(slot, &mut self.data[start..end], bincode_config())
            .map_err(|e| DbError::Storage(format!("write slot failed: {e}")))?;
        debug_assert_eq!(written, SLOT_BYTES);
        Ok(())
    }

    fn free_space(&self) -> DbResult<usize> {
        let header = self.header()?;
        let slots_start = HEADER_BYTES + header.num_slots as usize * SLOT_BYTES;
        let free_offset = usize::from(header.free_offset);
        Ok(free_offset.saturating_sub(slots_start))
    }

    fn can_fit(&self, payload_len: usize) -> DbResult<bool> {
        let needed = payload_len + SLOT_BYTES;
        Ok(self.free_space()? >= needed)
    }

    fn append_tuple(&mut self, bytes: &[u8]) -> DbResult<u32> {
        if bytes.len() > u16::MAX as usize {
            return Err(DbError::Storage("row exceeds maximum tuple size".into()));
        }
        let mut header = self.header()?;
        if header.num_slots == u32::MAX {
            return Err(DbError::Storage("slot index overflow".into()));
        }
        if !self.can_fit(bytes.len())? {
            return Err(DbError::Storage("page full".into()));
        }
        let slot_idx = header.num_slots;
        let len = bytes.len() as u16;
        let new_free_offset = header.free_offset - len;
        self.data[new_free_offset as usize..header.free_offset as usize].copy_from_slice(bytes);

        let slot = Slot {
            offset: new_free_offset,
            len,
        };
        self.write_slot(slot_idx, &slot)?;

        header.num_slots += 1;
        header.free_offset = new_free_offset;
        self.write_header(&header)?;
        Ok(slot_idx)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PageHeader {
    pub num_slots: u32,
    pub free_offset: u16,
}

impl Default for PageHeader {
    fn default() -> Self {
        Self {
            num_slots: 0,
            free_offset: PAGE_SIZE as u16,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Slot {
    pub offset: u16,
    pub len: u16,
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The paged-file collaborator the buffer manager pins pages against.
///
/// Every buffer-manager call that touches disk takes `&mut dyn
/// PagedFile`, so it works against index files and relation files alike.
pub trait PagedFile {
    fn file_id(&self) -> FileId;

    /// Allocate a new page, reusing a disposed page number if one is
    /// available, and return it zero-initialized.
    fn allocate_page(&mut self) -> DbResult<Page>;

    /// Read the page at `page_id`. Errors if `page_id` was never
    /// allocated or was disposed.
    fn read_page(&mut self, page_id: PageId) -> DbResult<Page>;

    /// Persist `page` at its own id.
    fn write_page(&mut self, page: &Page) -> DbResult<()>;

    /// Free `page_id` for reuse by a future `allocate_page`.
    fn dispose_page(&mut self, page_id: PageId) -> DbResult<()>;

    /// Page numbers currently allocated and not disposed, in ascending
    /// order. Used by `BufMgr::flush_file` to decide what to write back.
    fn allocated_page_nos(&self) -> Vec<PageId>;
}

/// A `PagedFile` backed by a single on-disk file.
#[derive(Debug)]
pub struct DiskPagedFile {
    file_id: FileId,
    file: File,
    num_pages: u64,
    free_list: Vec<PageId>,
}

impl DiskPagedFile {
    pub fn create(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file_id: next_file_id(),
            file,
            num_pages: 0,
            free_list: Vec::new(),
        })
    }

    pub fn open(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let num_pages = file.metadata()?.len() / PAGE_SIZE as u64;
        Ok(Self {
            file_id: next_file_id(),
            file,
            num_pages,
            free_list: Vec::new(),
        })
    }

    fn io_read(&mut self, page_id: PageId) -> DbResult<Page> {
        let mut page = Page::new(page_id);
        self.file.seek(SeekFrom::Start(page_id.0 * PAGE_SIZE as u64))?;
        self.file.read_exact(&mut page.data)?;
        Ok(page)
    }

    fn io_write(&mut self, page: &Page) -> DbResult<()> {
        self.file.seek(SeekFrom::Start(page.id.0 * PAGE_SIZE as u64))?;
        self.file.write_all(&page.data)?;
        self.file.flush()?;
        Ok(())
    }
}

impl PagedFile for DiskPagedFile {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn allocate_page(&mut self) -> DbResult<Page> {
        if let Some(reused) = self.free_list.pop() {
            let page = Page::new(reused);
            self.io_write(&page)?;
            return Ok(page);
        }

        let id = PageId(self.num_pages);
        self.num_pages += 1;
        let page = Page::new(id);
        self.io_write(&page)?;
        Ok(page)
    }

    fn read_page(&mut self, page_id: PageId) -> DbResult<Page> {
        if page_id.0 >= self.num_pages {
            return Err(DbError::Storage(format!(
                "page {} not allocated",
                page_id.0
            )));
        }
        self.io_read(page_id)
    }

    fn write_page(&mut self, page: &Page) -> DbResult<()> {
        self.io_write(page)
    }

    fn dispose_page(&mut self, page_id: PageId) -> DbResult<()> {
        if self.free_list.contains(&page_id) {
            return Err(DbError::Storage(format!(
                "page {} already disposed",
                page_id.0
            )));
        }
        self.free_list.push(page_id);
        Ok(())
    }

    fn allocated_page_nos(&self) -> Vec<PageId> {
        (0..self.num_pages)
            .map(PageId)
            .filter(|p| !self.free_list.contains(p))
            .collect()
    }
}

/// Base-relation record access: slotted heap pages over a `HeapFile`.
/// This is the bulk-load source for index construction, not a part of
/// the B+Tree/buffer-pool core itself.
pub trait HeapTable {
    fn insert(&mut self, row: &Row) -> DbResult<RecordId>;
    fn get(&mut self, rid: RecordId) -> DbResult<Row>;
    fn update(&mut self, rid: RecordId, row: &Row) -> DbResult<()>;
    fn delete(&mut self, rid: RecordId) -> DbResult<()>;
}

#[derive(Debug)]
pub struct HeapFile {
    file: File,
    pub table_id: u64,
}

impl HeapFile {
    pub fn open(path: &Path, table_id: u64) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file, table_id })
    }

    fn file_len(&self) -> DbResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn num_pages(&self) -> DbResult<u64> {
        Ok(self.file_len()? / PAGE_SIZE as u64)
    }

    fn last_page_id(&self) -> DbResult<Option<u64>> {
        let pages = self.num_pages()?;
        if pages == 0 {
            Ok(None)
        } else {
            Ok(Some(pages - 1))
        }
    }

    fn allocate_page(&self) -> DbResult<Page> {
        let id = self.num_pages()?;
        Ok(Page::new(PageId(id)))
    }

    fn read_page(&mut self, page_id: u64) -> DbResult<Page> {
        let mut page = Page::new(PageId(page_id));
        if page_id >= self.num_pages()? {
            return Ok(page);
        }

        self.file
            .seek(SeekFrom::Start(page_id * PAGE_SIZE as u64))?;
        self.file.read_exact(&mut page.data)?;
        Ok(page)
    }

    fn write_page(&mut self, page: &Page) -> DbResult<()> {
        self.file
            .seek(SeekFrom::Start(page.id.0 * PAGE_SIZE as u64))?;
        self.file.write_all(&page.data)?;
        self.file.flush()?;
        Ok(())
    }

    fn ensure_page_exists(&self, page_id: u64) -> DbResult<()> {
        if page_id >= self.num_pages()? {
            return Err(DbError::Storage(format!("page {page_id} not allocated")));
        }
        Ok(())
    }

    /// Scan every live tuple in the file along with its `RecordId`, in
    /// storage order. Used to bulk-populate an index from an existing
    /// relation.
    pub fn scan(&mut self) -> DbResult<Vec<(RecordId, Row)>> {
        let mut out = Vec::new();
        let num_pages = self.num_pages()?;
        for page_no in 0..num_pages {
            let page = self.read_page(page_no)?;
            let header = page.header()?;
            for slot_idx in 0..header.num_slots {
                let slot = page.read_slot(slot_idx)?;
                if slot.is_empty() {
                    continue;
                }
                let start = slot.offset as usize;
                let end = start + slot.len as usize;
                let (row, _) = decode_from_slice(&page.data[start..end], bincode_config())
                    .map_err(|e| DbError::Storage(format!("deserialize row failed: {e}")))?;
                out.push((
                    RecordId {
                        page_id: PageId(page_no),
                        slot: slot_idx,
                    },
                    row,
                ));
            }
        }
        Ok(out)
    }
}

impl HeapTable for HeapFile {
    fn insert(&mut self, row: &Row) -> DbResult<RecordId> {
        let bytes = encode_to_vec(row, bincode_config())
            .map_err(|e| DbError::Storage(format!("serialize row failed: {e}")))?;

        let mut page = match self.last_page_id()? {
            Some(id) => self.read_page(id)?,
            None => self.allocate_page()?,
        };

        if !page.can_fit(bytes.len())? {
            page = self.allocate_page()?;
        }

        let slot = page.append_tuple(&bytes)?;
        self.write_page(&page)?;

        Ok(RecordId {
            page_id: page.id,
            slot,
        })
    }

    fn get(&mut self, rid: RecordId) -> DbResult<Row> {
        self.ensure_page_exists(rid.page_id.0)?;
        let page = self.read_page(rid.page_id.0)?;
        let header = page.header()?;
        if rid.slot >= header.num_slots {
            return Err(DbError::Storage(format!("invalid slot {}", rid.slot)));
        }
        let slot = page.read_slot(rid.slot)?;
        if slot.is_empty() {
            return Err(DbError::Storage("slot empty".into()));
        }
        let start = slot.offset as usize;
        let end = start + slot.len as usize;
        let (row, _) = decode_from_slice(&page.data[start..end], bincode_config())
            .map_err(|e| DbError::Storage(format!("deserialize row failed: {e}")))?;
        Ok(row)
    }

    fn update(&mut self, rid: RecordId, row: &Row) -> DbResult<()> {
        self.delete(rid)?;
        self.insert(row)?;
        Ok(())
    }

    fn delete(&mut self, rid: RecordId) -> DbResult<()> {
        self.ensure_page_exists(rid.page_id.0)?;
        let mut page = self.read_page(rid.page_id.0)?;
        let header = page.header()?;
        if rid.slot >= header.num_slots {
            return Err(DbError::Storage(format!("invalid slot {}", rid.slot)));
        }
        let mut slot = page.read_slot(rid.slot)?;
        if slot.is_empty() {
            return Err(DbError::Storage("slot already empty".into()));
        }
        slot.len = 0;
        page.write_slot(rid.slot, &slot)?;
        self.write_page(&page)?;
        Ok(())
    }
}
