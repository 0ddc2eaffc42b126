//! The index metadata page: occupies page 0 of every index file and
//! records what attribute the index was built over, so a later `open`
//! can refuse to reattach to the wrong index.

use bincode::serde::{decode_from_slice, encode_into_slice};
use common::{DbError, DbResult, PageId};
use serde::{Deserialize, Serialize};
use storage::Page;

pub const RELATION_NAME_LEN: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Double,
    String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct IndexMetaInfo {
    relation_name: [u8; RELATION_NAME_LEN],
    pub attr_byte_offset: u32,
    pub attr_type: DataType,
    pub root_page_no: PageId,
    /// Whether the page at `root_page_no` is itself a leaf. A freshly
    /// created index is a single empty leaf; it stays that way until the
    /// first root split. Kept explicit here since descent starts fresh
    /// from `open`/`create` rather than from a tree already resident in
    /// memory.
    pub root_is_leaf: bool,
}

impl IndexMetaInfo {
    pub fn new(relation_name: &str, attr_byte_offset: u32, attr_type: DataType) -> Self {
        let mut name = [0u8; RELATION_NAME_LEN];
        let bytes = relation_name.as_bytes();
        let n = bytes.len().min(RELATION_NAME_LEN);
        name[..n].copy_from_slice(&bytes[..n]);
        Self {
            relation_name: name,
            attr_byte_offset,
            attr_type,
            root_page_no: PageId::INVALID,
            root_is_leaf: true,
        }
    }

    pub fn relation_name(&self) -> std::borrow::Cow<'_, str> {
        let end = self
            .relation_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(RELATION_NAME_LEN);
        String::from_utf8_lossy(&self.relation_name[..end])
    }

    /// Matches against the parameters a caller asks to open/create an
    /// index with; mismatch means the file belongs to a different index.
    pub fn matches(&self, relation_name: &str, attr_byte_offset: u32, attr_type: DataType) -> bool {
        self.relation_name() == relation_name
            && self.attr_byte_offset == attr_byte_offset
            && self.attr_type == attr_type
    }

    pub fn to_page(&self) -> DbResult<Page> {
        let mut page = Page::new(PageId(0));
        encode_into_slice(self, &mut page.data, bincode::config::legacy())
            .map_err(|e| DbError::Storage(format!("encode index meta failed: {e}")))?;
        Ok(page)
    }

    pub fn from_page(page: &Page) -> DbResult<Self> {
        let (meta, _) = decode_from_slice(&page.data, bincode::config::legacy())
            .map_err(|e| DbError::Storage(format!("decode index meta failed: {e}")))?;
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_name_round_trips() {
        let meta = IndexMetaInfo::new("employee", 12, DataType::Int);
        assert_eq!(meta.relation_name(), "employee");
        assert!(meta.matches("employee", 12, DataType::Int));
        assert!(!meta.matches("employee", 13, DataType::Int));
        assert!(!meta.matches("employee", 12, DataType::Double));
    }

    #[test]
    fn meta_page_round_trips() {
        let mut meta = IndexMetaInfo::new("orders", 4, DataType::String);
        meta.root_page_no = PageId(3);
        let page = meta.to_page().unwrap();
        let decoded = IndexMetaInfo::from_page(&page).unwrap();
        assert_eq!(decoded.root_page_no, PageId(3));
        assert_eq!(decoded.relation_name(), "orders");
    }
}
