//! Fixed-layout leaf and non-leaf node pages.
//!
//! Capacities are derived as `(PAGE_SIZE - header_bytes) / entry_bytes`,
//! computed once per key domain so each node fills exactly one page.

use bincode::serde::{decode_from_slice, encode_into_slice};
use common::{DbError, DbResult, PageId, RecordId};
use serde::{Deserialize, Serialize};
use storage::{Page, PAGE_SIZE};

use crate::key::{DoubleKey, IndexKey, StringKey};

/// Encoded size of a `RecordId` under `bincode::config::legacy()`:
/// `PageId(u64)` (8 bytes) + `slot: u32` (4 bytes).
const RID_BYTES: usize = 12;
/// Encoded size of a `PageId` under the same config.
const CHILD_PTR_BYTES: usize = 8;

const LEAF_HEADER_BYTES: usize = 2 /* num_keys */ + CHILD_PTR_BYTES /* right_sib */;
const NONLEAF_HEADER_BYTES: usize = 1 /* level */ + 2 /* num_keys */;

const fn leaf_capacity(key_bytes: usize) -> usize {
    (PAGE_SIZE - LEAF_HEADER_BYTES) / (key_bytes + RID_BYTES)
}

const fn nonleaf_key_capacity(key_bytes: usize) -> usize {
    // NKEYS keys + (NKEYS + 1) children must fit.
    (PAGE_SIZE - NONLEAF_HEADER_BYTES - CHILD_PTR_BYTES) / (key_bytes + CHILD_PTR_BYTES)
}

pub const INT_LEAF_CAP: usize = leaf_capacity(<i32 as IndexKey>::ATTR_BYTES);
pub const DOUBLE_LEAF_CAP: usize = leaf_capacity(<DoubleKey as IndexKey>::ATTR_BYTES);
pub const STRING_LEAF_CAP: usize = leaf_capacity(<StringKey as IndexKey>::ATTR_BYTES);

pub const INT_NONLEAF_NKEYS: usize = nonleaf_key_capacity(<i32 as IndexKey>::ATTR_BYTES);
pub const INT_NONLEAF_NCHILDREN: usize = INT_NONLEAF_NKEYS + 1;
pub const DOUBLE_NONLEAF_NKEYS: usize = nonleaf_key_capacity(<DoubleKey as IndexKey>::ATTR_BYTES);
pub const DOUBLE_NONLEAF_NCHILDREN: usize = DOUBLE_NONLEAF_NKEYS + 1;
pub const STRING_NONLEAF_NKEYS: usize = nonleaf_key_capacity(<StringKey as IndexKey>::ATTR_BYTES);
pub const STRING_NONLEAF_NCHILDREN: usize = STRING_NONLEAF_NKEYS + 1;

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::legacy()
}

/// A leaf page: `num_keys` live `(key, rid)` pairs in sorted order,
/// followed by a pointer to the next leaf for range scans.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeafNode<K: IndexKey, const CAP: usize> {
    pub num_keys: u16,
    pub keys: [K; CAP],
    pub rids: [RecordId; CAP],
    pub right_sib: PageId,
}

impl<K: IndexKey, const CAP: usize> LeafNode<K, CAP> {
    pub fn empty() -> Self {
        Self {
            num_keys: 0,
            keys: [K::default(); CAP],
            rids: [RecordId::default(); CAP],
            right_sib: PageId::INVALID,
        }
    }

    pub fn capacity(&self) -> usize {
        CAP
    }

    pub fn is_full(&self) -> bool {
        self.num_keys as usize == CAP
    }

    pub fn live_keys(&self) -> &[K] {
        &self.keys[..self.num_keys as usize]
    }

    pub fn live_rids(&self) -> &[RecordId] {
        &self.rids[..self.num_keys as usize]
    }

    /// Index of the first key `>= key`, i.e. the insertion point that
    /// keeps `keys` sorted.
    pub fn lower_bound(&self, key: &K) -> usize {
        self.live_keys().partition_point(|k| k < key)
    }

    pub fn insert_at(&mut self, idx: usize, key: K, rid: RecordId) {
        let n = self.num_keys as usize;
        debug_assert!(n < CAP);
        self.keys.copy_within(idx..n, idx + 1);
        self.rids.copy_within(idx..n, idx + 1);
        self.keys[idx] = key;
        self.rids[idx] = rid;
        self.num_keys += 1;
    }

    pub fn remove_at(&mut self, idx: usize) {
        let n = self.num_keys as usize;
        self.keys.copy_within(idx + 1..n, idx);
        self.rids.copy_within(idx + 1..n, idx);
        self.num_keys -= 1;
    }

    pub fn to_page(&self, page_id: PageId) -> DbResult<Page> {
        let mut page = Page::new(page_id);
        let written = encode_into_slice(self, &mut page.data, bincode_config())
            .map_err(|e| DbError::Storage(format!("encode leaf node failed: {e}")))?;
        debug_assert!(written <= PAGE_SIZE);
        Ok(page)
    }

    pub fn from_page(page: &Page) -> DbResult<Self> {
        let (node, _) = decode_from_slice(&page.data, bincode_config())
            .map_err(|e| DbError::Storage(format!("decode leaf node failed: {e}")))?;
        Ok(node)
    }
}

/// A non-leaf page: `num_keys` separator keys and `num_keys + 1` child
/// pointers. `level == 1` means the children are leaves (matches the
/// original's convention for `NonLeafNodeInt::level` etc.).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NonLeafNode<K: IndexKey, const NKEYS: usize, const NCHILDREN: usize> {
    pub level: u8,
    pub num_keys: u16,
    pub keys: [K; NKEYS],
    pub children: [PageId; NCHILDREN],
}

impl<K: IndexKey, const NKEYS: usize, const NCHILDREN: usize> NonLeafNode<K, NKEYS, NCHILDREN> {
    pub fn empty(level: u8) -> Self {
        Self {
            level,
            num_keys: 0,
            keys: [K::default(); NKEYS],
            children: [PageId::INVALID; NCHILDREN],
        }
    }

    pub fn is_full(&self) -> bool {
        self.num_keys as usize == NKEYS
    }

    pub fn live_keys(&self) -> &[K] {
        &self.keys[..self.num_keys as usize]
    }

    pub fn live_children(&self) -> &[PageId] {
        &self.children[..self.num_keys as usize + 1]
    }

    /// Which child to descend into for `key`: the first separator
    /// strictly greater than `key` picks its left child; falling off the
    /// end picks the last child.
    pub fn child_for(&self, key: &K) -> usize {
        self.live_keys().partition_point(|k| k <= key)
    }

    pub fn insert_at(&mut self, key_idx: usize, key: K, right_child: PageId) {
        let n = self.num_keys as usize;
        debug_assert!(n < NKEYS);
        self.keys.copy_within(key_idx..n, key_idx + 1);
        self.children.copy_within(key_idx + 1..n + 1, key_idx + 2);
        self.keys[key_idx] = key;
        self.children[key_idx + 1] = right_child;
        self.num_keys += 1;
    }

    pub fn remove_at(&mut self, key_idx: usize, child_idx: usize) {
        let n = self.num_keys as usize;
        self.keys.copy_within(key_idx + 1..n, key_idx);
        self.children.copy_within(child_idx + 1..n + 1, child_idx);
        self.num_keys -= 1;
    }

    pub fn to_page(&self, page_id: PageId) -> DbResult<Page> {
        let mut page = Page::new(page_id);
        let written = encode_into_slice(self, &mut page.data, bincode_config())
            .map_err(|e| DbError::Storage(format!("encode non-leaf node failed: {e}")))?;
        debug_assert!(written <= PAGE_SIZE);
        Ok(page)
    }

    pub fn from_page(page: &Page) -> DbResult<Self> {
        let (node, _) = decode_from_slice(&page.data, bincode_config())
            .map_err(|e| DbError::Storage(format!("decode non-leaf node failed: {e}")))?;
        Ok(node)
    }
}

pub type IntLeaf = LeafNode<i32, INT_LEAF_CAP>;
pub type DoubleLeaf = LeafNode<DoubleKey, DOUBLE_LEAF_CAP>;
pub type StringLeaf = LeafNode<StringKey, STRING_LEAF_CAP>;

pub type IntNonLeaf = NonLeafNode<i32, INT_NONLEAF_NKEYS, INT_NONLEAF_NCHILDREN>;
pub type DoubleNonLeaf = NonLeafNode<DoubleKey, DOUBLE_NONLEAF_NKEYS, DOUBLE_NONLEAF_NCHILDREN>;
pub type StringNonLeaf = NonLeafNode<StringKey, STRING_NONLEAF_NKEYS, STRING_NONLEAF_NCHILDREN>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::RecordId;

    #[test]
    fn capacities_are_sane_and_fit_the_page() {
        assert!(INT_LEAF_CAP > 100);
        assert!(INT_NONLEAF_NKEYS > 100);
        assert!(STRING_LEAF_CAP > 50);
    }

    #[test]
    fn leaf_insert_keeps_sorted_order() {
        let mut leaf = IntLeaf::empty();
        for k in [5, 1, 3, 2, 4] {
            let idx = leaf.lower_bound(&k);
            leaf.insert_at(idx, k, RecordId::default());
        }
        assert_eq!(leaf.live_keys(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn leaf_round_trips_through_a_page() {
        let mut leaf = IntLeaf::empty();
        leaf.insert_at(0, 42, RecordId { page_id: PageId(3), slot: 1 });
        let page = leaf.to_page(PageId(7)).unwrap();
        let decoded = IntLeaf::from_page(&page).unwrap();
        assert_eq!(decoded.live_keys(), &[42]);
        assert_eq!(decoded.live_rids()[0].slot, 1);
    }

    #[test]
    fn nonleaf_child_for_matches_descent_rule() {
        let mut node = IntNonLeaf::empty(1);
        node.insert_at(0, 10, PageId(2));
        node.insert_at(1, 20, PageId(3));
        // children: [c0, c1(key<10->... wait see below], keys: [10, 20]
        assert_eq!(node.child_for(&5), 0);
        assert_eq!(node.child_for(&10), 1);
        assert_eq!(node.child_for(&15), 1);
        assert_eq!(node.child_for(&25), 2);
    }
}
