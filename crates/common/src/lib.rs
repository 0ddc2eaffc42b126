#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf};
use thiserror::Error;
use types::Value;

/// Logical identifier for a page within a single file.
///
/// `PageId::INVALID` is the sentinel used throughout the buffer manager and
/// B+Tree engine to mean "no page": an empty child slot, a leaf with no
/// right sibling, an index that has not yet allocated a root.
/// Examples:
/// - `let freelist_page = PageId(0);`
/// - `let index_page = PageId(42);`
/// - `let none = PageId::INVALID;`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl PageId {
    /// Sentinel meaning "no page". Never returned by a real allocation.
    pub const INVALID: PageId = PageId(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Slot sentinel analogous to [`PageId::INVALID`], for unoccupied record
/// slots within a page.
pub const INVALID_SLOT: u32 = u32::MAX;

/// Opaque identity the buffer manager assigns to each open file it
/// manages. Two `FileId`s are equal iff they name the same underlying
/// paged file; the hash directory keys on `(FileId, PageId)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub u64);

/// Fully-qualified identifier for a record within a base relation.
/// Examples:
/// - `let rid = RecordId { page_id: PageId(42), slot: 3 };`
/// - `let rid = RecordId { page_id: PageId(1), slot: 255 };`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u32,
}

/// Positional row representation backed by `types::Value`, used by the
/// base-relation heap file that feeds bulk index construction.
/// Examples:
/// - `let row = Row::new(vec![Value::Int(1)]);`
/// - `let row = Row::new(vec![Value::Text("alice".into()), Value::Bool(true)]);`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
    #[serde(skip)]
    #[serde(default)]
    rid: Option<RecordId>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values, rid: None }
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self::new(values)
    }

    pub fn with_rid(mut self, rid: RecordId) -> Self {
        self.rid = Some(rid);
        self
    }

    pub fn set_rid(&mut self, rid: Option<RecordId>) {
        self.rid = rid;
    }

    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Canonical error type shared across the buffer manager, B+Tree engine,
/// and the storage layer beneath them.
///
/// Every buffer-manager and B+Tree failure kind gets its own variant
/// rather than being folded into `Storage(String)`: callers match on the
/// kind directly (a scan that was never started is a different situation
/// from a page still pinned at flush time), so a stringly-typed catch-all
/// would throw away information callers need.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("storage: {0}")]
    Storage(String),

    // --- buffer manager failures ---
    #[error("buffer exceeded: no unpinned frame found after a full clock sweep")]
    BufferExceeded,
    #[error("page not pinned: file={file:?} page={page:?} frame={frame}")]
    PageNotPinned {
        file: FileId,
        page: PageId,
        frame: usize,
    },
    #[error("page pinned: file={file:?} page={page:?} frame={frame}")]
    PagePinned {
        file: FileId,
        page: PageId,
        frame: usize,
    },
    #[error("bad buffer: frame {frame} is marked valid but names no page")]
    BadBuffer { frame: usize },
    #[error("hash not found: file={file:?} page={page:?}")]
    HashNotFound { file: FileId, page: PageId },

    // --- B+Tree scan/index failures ---
    #[error("bad opcodes: scan operators must be (GT|GTE, LT|LTE)")]
    BadOpcodes,
    #[error("bad scan range: lowVal > highVal")]
    BadScanRange,
    #[error("no such key found satisfying the scan range")]
    NoSuchKeyFound,
    #[error("scan not initialized: call start_scan before scan_next/end_scan")]
    ScanNotInitialized,
    #[error("index scan completed")]
    IndexScanCompleted,
    #[error("bad index info: existing metadata disagrees with the requested index")]
    BadIndexInfo,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the buffer pool and the files it manages.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_index"))
///     .page_size(4096)
///     .buffer_pool_pages(64)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory where the relation file and its index files live.
    #[builder(default = PathBuf::from("./db_data"))]
    pub data_dir: PathBuf,
    /// Fixed-size page allocation in bytes.
    #[builder(default = 4096)]
    pub page_size: usize,
    /// Number of frames the buffer pool keeps resident (`numBufs`).
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db_data"),
            page_size: 4096,
            buffer_pool_pages: 256,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, DbError, DbResult, FileId, PageId, RecordId, Row, INVALID_SLOT};
    pub use types::{SqlType, Value};
}
