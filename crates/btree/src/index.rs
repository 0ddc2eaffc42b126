//! The paginated B+Tree itself: descent, insertion with splits, the scan
//! engine, and deletion with borrow/merge rebalancing.

use std::path::Path;

use common::{DbError, DbResult, PageId, RecordId};
use storage::DiskPagedFile;
use tracing::{debug, trace};

use crate::key::{DoubleKey, IndexKey, StringKey};
use crate::meta::{DataType, IndexMetaInfo};
use crate::node::{
    LeafNode, NonLeafNode, DOUBLE_LEAF_CAP, DOUBLE_NONLEAF_NCHILDREN, DOUBLE_NONLEAF_NKEYS,
    INT_LEAF_CAP, INT_NONLEAF_NCHILDREN, INT_NONLEAF_NKEYS, STRING_LEAF_CAP,
    STRING_NONLEAF_NCHILDREN, STRING_NONLEAF_NKEYS,
};

use buffer::BufMgr;

/// A scan comparison operator. `Gt`/`Gte` are legal for the low bound,
/// `Lt`/`Lte` for the high bound; `start_scan` rejects any other
/// pairing with `BadOpcodes`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Where an in-progress scan currently sits: the next leaf slot to
/// return, and whether the scan has already run past its bound.
#[derive(Clone, Copy, Debug)]
struct ScanState<K: IndexKey> {
    high: K,
    high_op: Operator,
    next_page: PageId,
    next_slot: usize,
    completed: bool,
}

/// A traversal path entry: which child slot was followed, and the page
/// that slot lives on. Popped in LIFO order to propagate a split or an
/// underflow back up toward the root.
type TraversalPath = Vec<(usize, PageId)>;

/// A disk-backed B+Tree index over a single fixed-width key domain `K`.
///
/// `LEAF_CAP`, `NKEYS`, and `NCHILDREN` are the per-domain capacities
/// computed in `node.rs`; use the `IntIndex`/`DoubleIndex`/`StringIndex`
/// aliases rather than naming this type directly.
pub struct BTreeIndex<K: IndexKey, const LEAF_CAP: usize, const NKEYS: usize, const NCHILDREN: usize>
{
    meta: IndexMetaInfo,
    file: DiskPagedFile,
    buf_mgr: BufMgr,
    scan: Option<ScanState<K>>,
}

impl<K: IndexKey, const LEAF_CAP: usize, const NKEYS: usize, const NCHILDREN: usize>
    BTreeIndex<K, LEAF_CAP, NKEYS, NCHILDREN>
{
    pub fn create(
        path: &Path,
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: DataType,
        buffer_pool_pages: usize,
    ) -> DbResult<Self> {
        let mut file = DiskPagedFile::create(path)?;
        let mut buf_mgr = BufMgr::new(buffer_pool_pages);

        let (meta_page_no, meta_frame) = buf_mgr.alloc_page(&mut file)?;
        debug_assert_eq!(meta_page_no, PageId(0), "index metadata must be page 0");
        let mut meta = IndexMetaInfo::new(relation_name, attr_byte_offset, attr_type);
        *buf_mgr.frame_mut(meta_frame) = meta.to_page()?;
        buf_mgr.un_pin_page(&mut file, meta_page_no, true)?;

        let (root_page_no, root_frame) = buf_mgr.alloc_page(&mut file)?;
        let root_leaf = LeafNode::<K, LEAF_CAP>::empty();
        *buf_mgr.frame_mut(root_frame) = root_leaf.to_page(root_page_no)?;
        buf_mgr.un_pin_page(&mut file, root_page_no, true)?;

        meta.root_page_no = root_page_no;
        meta.root_is_leaf = true;

        let mut index = Self {
            meta,
            file,
            buf_mgr,
            scan: None,
        };
        index.write_meta()?;
        debug!(path = %path.display(), "created index");
        Ok(index)
    }

    pub fn open(
        path: &Path,
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: DataType,
        buffer_pool_pages: usize,
    ) -> DbResult<Self> {
        let mut file = DiskPagedFile::open(path)?;
        let mut buf_mgr = BufMgr::new(buffer_pool_pages);

        let frame_no = buf_mgr.read_page(&mut file, PageId(0))?;
        let meta = IndexMetaInfo::from_page(buf_mgr.frame(frame_no))?;
        buf_mgr.un_pin_page(&mut file, PageId(0), false)?;

        if !meta.matches(relation_name, attr_byte_offset, attr_type) {
            return Err(DbError::BadIndexInfo);
        }

        Ok(Self {
            meta,
            file,
            buf_mgr,
            scan: None,
        })
    }

    pub fn flush(&mut self) -> DbResult<()> {
        self.buf_mgr.flush_file(&mut self.file)
    }

    // ---- page I/O helpers ----

    fn write_meta(&mut self) -> DbResult<()> {
        let frame_no = self.buf_mgr.read_page(&mut self.file, PageId(0))?;
        *self.buf_mgr.frame_mut(frame_no) = self.meta.to_page()?;
        self.buf_mgr.un_pin_page(&mut self.file, PageId(0), true)
    }

    fn read_leaf(&mut self, page_no: PageId) -> DbResult<(usize, LeafNode<K, LEAF_CAP>)> {
        let frame_no = self.buf_mgr.read_page(&mut self.file, page_no)?;
        let leaf = LeafNode::from_page(self.buf_mgr.frame(frame_no))?;
        Ok((frame_no, leaf))
    }

    fn write_leaf(
        &mut self,
        page_no: PageId,
        frame_no: usize,
        leaf: LeafNode<K, LEAF_CAP>,
        dirty: bool,
    ) -> DbResult<()> {
        if dirty {
            *self.buf_mgr.frame_mut(frame_no) = leaf.to_page(page_no)?;
        }
        self.buf_mgr.un_pin_page(&mut self.file, page_no, dirty)
    }

    fn unpin_leaf(&mut self, page_no: PageId) -> DbResult<()> {
        self.buf_mgr.un_pin_page(&mut self.file, page_no, false)
    }

    fn read_nonleaf(
        &mut self,
        page_no: PageId,
    ) -> DbResult<(usize, NonLeafNode<K, NKEYS, NCHILDREN>)> {
        let frame_no = self.buf_mgr.read_page(&mut self.file, page_no)?;
        let node = NonLeafNode::from_page(self.buf_mgr.frame(frame_no))?;
        Ok((frame_no, node))
    }

    fn write_nonleaf(
        &mut self,
        page_no: PageId,
        frame_no: usize,
        node: NonLeafNode<K, NKEYS, NCHILDREN>,
        dirty: bool,
    ) -> DbResult<()> {
        if dirty {
            *self.buf_mgr.frame_mut(frame_no) = node.to_page(page_no)?;
        }
        self.buf_mgr.un_pin_page(&mut self.file, page_no, dirty)
    }

    fn unpin_nonleaf(&mut self, page_no: PageId) -> DbResult<()> {
        self.buf_mgr.un_pin_page(&mut self.file, page_no, false)
    }

    // ---- descent ----

    fn locate_leaf(&mut self, key: &K) -> DbResult<PageId> {
        if self.meta.root_is_leaf {
            return Ok(self.meta.root_page_no);
        }
        let mut current = self.meta.root_page_no;
        loop {
            let (_, node) = self.read_nonleaf(current)?;
            let child_idx = node.child_for(key);
            let child_page = node.children[child_idx];
            let child_is_leaf = node.level == 1;
            self.unpin_nonleaf(current)?;
            current = child_page;
            if child_is_leaf {
                return Ok(current);
            }
        }
    }

    /// Descend to the leaf that should hold `key`, recording the child
    /// slot followed at each non-leaf level so a split or underflow can
    /// be propagated back up without re-descending.
    fn descend_with_path(&mut self, key: &K) -> DbResult<(PageId, TraversalPath)> {
        let mut path = TraversalPath::new();
        let mut current = self.meta.root_page_no;
        loop {
            let (_, node) = self.read_nonleaf(current)?;
            let child_idx = node.child_for(key);
            let child_page = node.children[child_idx];
            let child_is_leaf = node.level == 1;
            self.unpin_nonleaf(current)?;
            path.push((child_idx, current));
            current = child_page;
            if child_is_leaf {
                return Ok((current, path));
            }
        }
    }

    // ---- search ----

    pub fn search(&mut self, key: K) -> DbResult<Vec<RecordId>> {
        let leaf_page = self.locate_leaf(&key)?;
        let (_, leaf) = self.read_leaf(leaf_page)?;
        let out = leaf
            .live_keys()
            .iter()
            .zip(leaf.live_rids())
            .filter(|(k, _)| **k == key)
            .map(|(_, r)| *r)
            .collect();
        self.unpin_leaf(leaf_page)?;
        Ok(out)
    }

    // ---- insertion ----

    /// Insert `(key, rid)` into a full leaf, in place if there's room,
    /// or split it and return the smallest key of the new right sibling
    /// (copied up, not removed from the leaf it still lives in).
    fn leaf_insert_with_split(
        leaf: &mut LeafNode<K, LEAF_CAP>,
        idx: usize,
        key: K,
        rid: RecordId,
    ) -> Option<(K, LeafNode<K, LEAF_CAP>)> {
        if !leaf.is_full() {
            leaf.insert_at(idx, key, rid);
            return None;
        }

        let mut keys: Vec<K> = leaf.live_keys().to_vec();
        let mut rids: Vec<RecordId> = leaf.live_rids().to_vec();
        keys.insert(idx, key);
        rids.insert(idx, rid);

        let mid = keys.len() / 2;
        let mut left = LeafNode::<K, LEAF_CAP>::empty();
        for (i, (k, r)) in keys[..mid].iter().zip(&rids[..mid]).enumerate() {
            left.keys[i] = *k;
            left.rids[i] = *r;
        }
        left.num_keys = mid as u16;

        let mut right = LeafNode::<K, LEAF_CAP>::empty();
        for (i, (k, r)) in keys[mid..].iter().zip(&rids[mid..]).enumerate() {
            right.keys[i] = *k;
            right.rids[i] = *r;
        }
        right.num_keys = (keys.len() - mid) as u16;

        let split_key = right.keys[0];
        *leaf = left;
        Some((split_key, right))
    }

    /// Insert `(key, right_child)` at `key_idx` into a full non-leaf
    /// node, in place if there's room, or split it and push the median
    /// key up (it lives in neither child afterward).
    fn nonleaf_insert_with_split(
        node: &mut NonLeafNode<K, NKEYS, NCHILDREN>,
        key_idx: usize,
        key: K,
        right_child: PageId,
    ) -> Option<(K, NonLeafNode<K, NKEYS, NCHILDREN>)> {
        if !node.is_full() {
            node.insert_at(key_idx, key, right_child);
            return None;
        }

        let level = node.level;
        let mut keys: Vec<K> = node.live_keys().to_vec();
        let mut children: Vec<PageId> = node.live_children().to_vec();
        keys.insert(key_idx, key);
        children.insert(key_idx + 1, right_child);

        let mid = keys.len() / 2;
        let median = keys[mid];

        let mut left = NonLeafNode::<K, NKEYS, NCHILDREN>::empty(level);
        for (i, k) in keys[..mid].iter().enumerate() {
            left.keys[i] = *k;
        }
        for (i, c) in children[..=mid].iter().enumerate() {
            left.children[i] = *c;
        }
        left.num_keys = mid as u16;

        let right_keys = &keys[mid + 1..];
        let right_children = &children[mid + 1..];
        let mut right = NonLeafNode::<K, NKEYS, NCHILDREN>::empty(level);
        for (i, k) in right_keys.iter().enumerate() {
            right.keys[i] = *k;
        }
        for (i, c) in right_children.iter().enumerate() {
            right.children[i] = *c;
        }
        right.num_keys = right_keys.len() as u16;

        *node = left;
        Some((median, right))
    }

    pub fn insert_entry(&mut self, key: K, rid: RecordId) -> DbResult<()> {
        if self.meta.root_is_leaf {
            let (frame_no, mut leaf) = self.read_leaf(self.meta.root_page_no)?;
            let idx = leaf.lower_bound(&key);
            match Self::leaf_insert_with_split(&mut leaf, idx, key, rid) {
                None => {
                    self.write_leaf(self.meta.root_page_no, frame_no, leaf, true)?;
                }
                Some((split_key, mut right_leaf)) => {
                    let (right_page_no, right_frame) = self.buf_mgr.alloc_page(&mut self.file)?;
                    right_leaf.right_sib = leaf.right_sib;
                    leaf.right_sib = right_page_no;
                    self.write_leaf(self.meta.root_page_no, frame_no, leaf, true)?;
                    self.write_leaf(right_page_no, right_frame, right_leaf, true)?;

                    let (new_root_no, new_root_frame) = self.buf_mgr.alloc_page(&mut self.file)?;
                    let mut new_root = NonLeafNode::<K, NKEYS, NCHILDREN>::empty(1);
                    new_root.children[0] = self.meta.root_page_no;
                    new_root.insert_at(0, split_key, right_page_no);
                    self.write_nonleaf(new_root_no, new_root_frame, new_root, true)?;

                    trace!(?new_root_no, "leaf root split, tree grew a level");
                    self.meta.root_page_no = new_root_no;
                    self.meta.root_is_leaf = false;
                    self.write_meta()?;
                }
            }
            return Ok(());
        }

        let (leaf_page, mut path) = self.descend_with_path(&key)?;

        let (leaf_frame, mut leaf) = self.read_leaf(leaf_page)?;
        let idx = leaf.lower_bound(&key);
        let mut propagate = match Self::leaf_insert_with_split(&mut leaf, idx, key, rid) {
            None => {
                self.write_leaf(leaf_page, leaf_frame, leaf, true)?;
                None
            }
            Some((split_key, mut right_leaf)) => {
                let (right_page_no, right_frame) = self.buf_mgr.alloc_page(&mut self.file)?;
                right_leaf.right_sib = leaf.right_sib;
                leaf.right_sib = right_page_no;
                self.write_leaf(leaf_page, leaf_frame, leaf, true)?;
                self.write_leaf(right_page_no, right_frame, right_leaf, true)?;
                Some((split_key, right_page_no))
            }
        };

        let mut last_split_level: Option<u8> = None;
        while let Some((split_key, right_page_no)) = propagate {
            match path.pop() {
                None => {
                    // The root's own non-leaf node just split; grow a new
                    // root above it.
                    let old_root_level = last_split_level.expect("root split before any path pop");
                    let (new_root_no, new_root_frame) = self.buf_mgr.alloc_page(&mut self.file)?;
                    let mut new_root = NonLeafNode::<K, NKEYS, NCHILDREN>::empty(old_root_level + 1);
                    new_root.children[0] = self.meta.root_page_no;
                    new_root.insert_at(0, split_key, right_page_no);
                    self.write_nonleaf(new_root_no, new_root_frame, new_root, true)?;

                    trace!(?new_root_no, "non-leaf root split, tree grew a level");
                    self.meta.root_page_no = new_root_no;
                    self.write_meta()?;
                    propagate = None;
                }
                Some((child_idx, parent_page)) => {
                    let (frame_no, mut node) = self.read_nonleaf(parent_page)?;
                    last_split_level = Some(node.level);
                    propagate =
                        match Self::nonleaf_insert_with_split(&mut node, child_idx, split_key, right_page_no)
                        {
                            None => {
                                self.write_nonleaf(parent_page, frame_no, node, true)?;
                                None
                            }
                            Some((median, right_node)) => {
                                let (rp, rf) = self.buf_mgr.alloc_page(&mut self.file)?;
                                self.write_nonleaf(parent_page, frame_no, node, true)?;
                                self.write_nonleaf(rp, rf, right_node, true)?;
                                Some((median, rp))
                            }
                        };
                }
            }
        }

        Ok(())
    }

    // ---- scan engine ----

    fn satisfies_low(k: K, low: K, op: Operator) -> bool {
        match op {
            Operator::Gt => k > low,
            Operator::Gte => k >= low,
            Operator::Lt | Operator::Lte => unreachable!("low bound validated in start_scan"),
        }
    }

    fn satisfies_high(k: K, high: K, op: Operator) -> bool {
        match op {
            Operator::Lt => k < high,
            Operator::Lte => k <= high,
            Operator::Gt | Operator::Gte => unreachable!("high bound validated in start_scan"),
        }
    }

    pub fn start_scan(&mut self, low: K, low_op: Operator, high: K, high_op: Operator) -> DbResult<()> {
        if !matches!(low_op, Operator::Gt | Operator::Gte) || !matches!(high_op, Operator::Lt | Operator::Lte)
        {
            return Err(DbError::BadOpcodes);
        }
        if low > high {
            return Err(DbError::BadScanRange);
        }

        let mut page = self.locate_leaf(&low)?;
        loop {
            let (_, leaf) = self.read_leaf(page)?;
            let mut slot = leaf.lower_bound(&low);
            while slot < leaf.live_keys().len() {
                let k = leaf.live_keys()[slot];
                if Self::satisfies_low(k, low, low_op) {
                    if !Self::satisfies_high(k, high, high_op) {
                        self.unpin_leaf(page)?;
                        return Err(DbError::NoSuchKeyFound);
                    }
                    self.scan = Some(ScanState {
                        high,
                        high_op,
                        next_page: page,
                        next_slot: slot,
                        completed: false,
                    });
                    self.unpin_leaf(page)?;
                    return Ok(());
                }
                slot += 1;
            }
            let next = leaf.right_sib;
            self.unpin_leaf(page)?;
            if !next.is_valid() {
                return Err(DbError::NoSuchKeyFound);
            }
            page = next;
        }
    }

    pub fn scan_next(&mut self) -> DbResult<RecordId> {
        let mut state = *self.scan.as_ref().ok_or(DbError::ScanNotInitialized)?;
        if state.completed {
            return Err(DbError::IndexScanCompleted);
        }

        loop {
            let (_, leaf) = self.read_leaf(state.next_page)?;
            if state.next_slot >= leaf.live_keys().len() {
                let next = leaf.right_sib;
                self.unpin_leaf(state.next_page)?;
                if !next.is_valid() {
                    state.completed = true;
                    self.scan = Some(state);
                    return Err(DbError::IndexScanCompleted);
                }
                state.next_page = next;
                state.next_slot = 0;
                continue;
            }

            let key = leaf.live_keys()[state.next_slot];
            if !Self::satisfies_high(key, state.high, state.high_op) {
                self.unpin_leaf(state.next_page)?;
                state.completed = true;
                self.scan = Some(state);
                return Err(DbError::IndexScanCompleted);
            }

            let rid = leaf.live_rids()[state.next_slot];
            state.next_slot += 1;
            self.unpin_leaf(state.next_page)?;
            self.scan = Some(state);
            return Ok(rid);
        }
    }

    pub fn end_scan(&mut self) -> DbResult<()> {
        self.scan.take().map(|_| ()).ok_or(DbError::ScanNotInitialized)
    }

    // ---- deletion ----

    fn leaf_remove(leaf: &mut LeafNode<K, LEAF_CAP>, key: &K) -> bool {
        let idx = leaf.lower_bound(key);
        if idx < leaf.num_keys as usize && leaf.keys[idx] == *key {
            leaf.remove_at(idx);
            return true;
        }
        false
    }

    pub fn delete_entry(&mut self, key: K) -> DbResult<bool> {
        if self.meta.root_is_leaf {
            let (frame_no, mut leaf) = self.read_leaf(self.meta.root_page_no)?;
            let deleted = Self::leaf_remove(&mut leaf, &key);
            self.write_leaf(self.meta.root_page_no, frame_no, leaf, deleted)?;
            return Ok(deleted);
        }

        let (leaf_page, path) = self.descend_with_path(&key)?;

        let (leaf_frame, mut leaf) = self.read_leaf(leaf_page)?;
        let deleted = Self::leaf_remove(&mut leaf, &key);
        if !deleted {
            self.write_leaf(leaf_page, leaf_frame, leaf, false)?;
            return Ok(false);
        }

        let min_leaf = LEAF_CAP / 2;
        if leaf.num_keys as usize > min_leaf || path.is_empty() {
            self.write_leaf(leaf_page, leaf_frame, leaf, true)?;
            return Ok(true);
        }

        self.write_leaf(leaf_page, leaf_frame, leaf, true)?;
        self.rebalance_after_leaf_underflow(leaf_page, path)?;
        Ok(true)
    }

    fn rebalance_after_leaf_underflow(&mut self, leaf_page: PageId, mut path: TraversalPath) -> DbResult<()> {
        let (child_idx, parent_page) = path.pop().expect("non-empty path for non-root leaf");
        let (parent_frame, mut parent) = self.read_nonleaf(parent_page)?;
        let min_leaf = LEAF_CAP / 2;

        if child_idx > 0 {
            let left_sib_page = parent.children[child_idx - 1];
            let (left_frame, mut left_leaf) = self.read_leaf(left_sib_page)?;
            if left_leaf.num_keys as usize > min_leaf {
                let (frame_no, mut leaf) = self.read_leaf(leaf_page)?;
                let last = left_leaf.num_keys as usize - 1;
                let (bk, br) = (left_leaf.keys[last], left_leaf.rids[last]);
                left_leaf.remove_at(last);
                leaf.insert_at(0, bk, br);
                parent.keys[child_idx - 1] = leaf.keys[0];
                self.write_leaf(left_sib_page, left_frame, left_leaf, true)?;
                self.write_leaf(leaf_page, frame_no, leaf, true)?;
                self.write_nonleaf(parent_page, parent_frame, parent, true)?;
                return Ok(());
            }
            self.unpin_leaf(left_sib_page)?;
        }

        if child_idx < parent.num_keys as usize {
            let right_sib_page = parent.children[child_idx + 1];
            let (right_frame, mut right_leaf) = self.read_leaf(right_sib_page)?;
            if right_leaf.num_keys as usize > min_leaf {
                let (frame_no, mut leaf) = self.read_leaf(leaf_page)?;
                let (bk, br) = (right_leaf.keys[0], right_leaf.rids[0]);
                right_leaf.remove_at(0);
                leaf.insert_at(leaf.num_keys as usize, bk, br);
                parent.keys[child_idx] = right_leaf.keys[0];
                self.write_leaf(right_sib_page, right_frame, right_leaf, true)?;
                self.write_leaf(leaf_page, frame_no, leaf, true)?;
                self.write_nonleaf(parent_page, parent_frame, parent, true)?;
                return Ok(());
            }
            self.unpin_leaf(right_sib_page)?;
        }

        if child_idx > 0 {
            let left_sib_page = parent.children[child_idx - 1];
            let (left_frame, mut left_leaf) = self.read_leaf(left_sib_page)?;
            let (frame_no, leaf) = self.read_leaf(leaf_page)?;
            let base = left_leaf.num_keys as usize;
            for i in 0..leaf.num_keys as usize {
                left_leaf.insert_at(base + i, leaf.keys[i], leaf.rids[i]);
            }
            left_leaf.right_sib = leaf.right_sib;
            self.write_leaf(left_sib_page, left_frame, left_leaf, true)?;
            self.unpin_leaf(leaf_page)?;
            let _ = frame_no;
            self.buf_mgr.dispose_page(&mut self.file, leaf_page)?;
            parent.remove_at(child_idx - 1, child_idx);
            self.rebalance_nonleaf(parent_page, parent_frame, parent, path)?;
        } else {
            let right_sib_page = parent.children[child_idx + 1];
            let (right_frame, right_leaf) = self.read_leaf(right_sib_page)?;
            let (frame_no, mut leaf) = self.read_leaf(leaf_page)?;
            let base = leaf.num_keys as usize;
            for i in 0..right_leaf.num_keys as usize {
                leaf.insert_at(base + i, right_leaf.keys[i], right_leaf.rids[i]);
            }
            leaf.right_sib = right_leaf.right_sib;
            self.write_leaf(leaf_page, frame_no, leaf, true)?;
            self.unpin_leaf(right_sib_page)?;
            let _ = right_frame;
            self.buf_mgr.dispose_page(&mut self.file, right_sib_page)?;
            parent.remove_at(child_idx, child_idx + 1);
            self.rebalance_nonleaf(parent_page, parent_frame, parent, path)?;
        }
        Ok(())
    }

    fn rebalance_nonleaf(
        &mut self,
        page_no: PageId,
        frame_no: usize,
        mut node: NonLeafNode<K, NKEYS, NCHILDREN>,
        mut path: TraversalPath,
    ) -> DbResult<()> {
        let min_keys = NKEYS / 2;

        if node.num_keys as usize > min_keys || path.is_empty() {
            if path.is_empty() && node.num_keys == 0 {
                // The root shrank to a single child; that child becomes
                // the new root.
                let only_child = node.children[0];
                let child_was_leaf = node.level == 1;
                self.unpin_nonleaf(page_no)?;
                self.buf_mgr.dispose_page(&mut self.file, page_no)?;
                self.meta.root_page_no = only_child;
                self.meta.root_is_leaf = child_was_leaf;
                self.write_meta()?;
                return Ok(());
            }
            self.write_nonleaf(page_no, frame_no, node, true)?;
            return Ok(());
        }

        let (child_idx, parent_page) = path.pop().expect("non-empty path checked above");
        let (parent_frame, mut parent) = self.read_nonleaf(parent_page)?;

        if child_idx > 0 {
            let left_sib_page = parent.children[child_idx - 1];
            let (left_frame, mut left_sib) = self.read_nonleaf(left_sib_page)?;
            if left_sib.num_keys as usize > min_keys {
                let last = left_sib.num_keys as usize - 1;
                let borrowed_key = left_sib.keys[last];
                let borrowed_child = left_sib.children[last + 1];
                let sep = parent.keys[child_idx - 1];
                left_sib.remove_at(last, last + 1);

                let n = node.num_keys as usize;
                node.keys.copy_within(0..n, 1);
                node.children.copy_within(0..=n, 1);
                node.keys[0] = sep;
                node.children[0] = borrowed_child;
                node.num_keys += 1;

                parent.keys[child_idx - 1] = borrowed_key;
                self.write_nonleaf(left_sib_page, left_frame, left_sib, true)?;
                self.write_nonleaf(page_no, frame_no, node, true)?;
                self.write_nonleaf(parent_page, parent_frame, parent, true)?;
                return Ok(());
            }
            self.unpin_nonleaf(left_sib_page)?;
        }

        if child_idx < parent.num_keys as usize {
            let right_sib_page = parent.children[child_idx + 1];
            let (right_frame, mut right_sib) = self.read_nonleaf(right_sib_page)?;
            if right_sib.num_keys as usize > min_keys {
                let sep = parent.keys[child_idx];
                let borrowed_key = right_sib.keys[0];
                let borrowed_child = right_sib.children[0];
                right_sib.remove_at(0, 0);

                let n = node.num_keys as usize;
                node.keys[n] = sep;
                node.children[n + 1] = borrowed_child;
                node.num_keys += 1;

                parent.keys[child_idx] = borrowed_key;
                self.write_nonleaf(right_sib_page, right_frame, right_sib, true)?;
                self.write_nonleaf(page_no, frame_no, node, true)?;
                self.write_nonleaf(parent_page, parent_frame, parent, true)?;
                return Ok(());
            }
            self.unpin_nonleaf(right_sib_page)?;
        }

        if child_idx > 0 {
            let left_sib_page = parent.children[child_idx - 1];
            let (left_frame, mut left_sib) = self.read_nonleaf(left_sib_page)?;
            let sep = parent.keys[child_idx - 1];
            let base = left_sib.num_keys as usize;
            left_sib.keys[base] = sep;
            for i in 0..node.num_keys as usize {
                left_sib.keys[base + 1 + i] = node.keys[i];
            }
            for i in 0..=node.num_keys as usize {
                left_sib.children[base + 1 + i] = node.children[i];
            }
            left_sib.num_keys += node.num_keys + 1;
            self.write_nonleaf(left_sib_page, left_frame, left_sib, true)?;
            self.unpin_nonleaf(page_no)?;
            self.buf_mgr.dispose_page(&mut self.file, page_no)?;
            parent.remove_at(child_idx - 1, child_idx);
            self.rebalance_nonleaf(parent_page, parent_frame, parent, path)?;
        } else {
            let right_sib_page = parent.children[child_idx + 1];
            let (right_frame, right_sib) = self.read_nonleaf(right_sib_page)?;
            let sep = parent.keys[child_idx];
            let base = node.num_keys as usize;
            node.keys[base] = sep;
            for i in 0..right_sib.num_keys as usize {
                node.keys[base + 1 + i] = right_sib.keys[i];
            }
            for i in 0..=right_sib.num_keys as usize {
                node.children[base + 1 + i] = right_sib.children[i];
            }
            node.num_keys += right_sib.num_keys + 1;
            self.write_nonleaf(page_no, frame_no, node, true)?;
            self.unpin_nonleaf(right_sib_page)?;
            let _ = right_frame;
            self.buf_mgr.dispose_page(&mut self.file, right_sib_page)?;
            parent.remove_at(child_idx, child_idx + 1);
            self.rebalance_nonleaf(parent_page, parent_frame, parent, path)?;
        }
        Ok(())
    }
}

pub type IntIndex = BTreeIndex<i32, INT_LEAF_CAP, INT_NONLEAF_NKEYS, INT_NONLEAF_NCHILDREN>;
pub type DoubleIndex =
    BTreeIndex<DoubleKey, DOUBLE_LEAF_CAP, DOUBLE_NONLEAF_NKEYS, DOUBLE_NONLEAF_NCHILDREN>;
pub type StringIndex =
    BTreeIndex<StringKey, STRING_LEAF_CAP, STRING_NONLEAF_NKEYS, STRING_NONLEAF_NCHILDREN>;

/// A key value carried at the handle boundary, before it's been routed
/// to the monomorphized index for its domain.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyValue {
    Int(i32),
    Double(f64),
    String(String),
}

/// Runtime-dispatched wrapper over the three monomorphized key domains.
/// Lets a caller open an index by relation name without knowing its key
/// type at compile time; the stored `DataType` tag picks which variant
/// to construct at runtime.
pub enum Index {
    Int(IntIndex),
    Double(DoubleIndex),
    String(StringIndex),
}

impl Index {
    pub fn create(
        path: &Path,
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: DataType,
        buffer_pool_pages: usize,
    ) -> DbResult<Self> {
        Ok(match attr_type {
            DataType::Int => Index::Int(IntIndex::create(
                path,
                relation_name,
                attr_byte_offset,
                attr_type,
                buffer_pool_pages,
            )?),
            DataType::Double => Index::Double(DoubleIndex::create(
                path,
                relation_name,
                attr_byte_offset,
                attr_type,
                buffer_pool_pages,
            )?),
            DataType::String => Index::String(StringIndex::create(
                path,
                relation_name,
                attr_byte_offset,
                attr_type,
                buffer_pool_pages,
            )?),
        })
    }

    pub fn open(
        path: &Path,
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: DataType,
        buffer_pool_pages: usize,
    ) -> DbResult<Self> {
        Ok(match attr_type {
            DataType::Int => Index::Int(IntIndex::open(
                path,
                relation_name,
                attr_byte_offset,
                attr_type,
                buffer_pool_pages,
            )?),
            DataType::Double => Index::Double(DoubleIndex::open(
                path,
                relation_name,
                attr_byte_offset,
                attr_type,
                buffer_pool_pages,
            )?),
            DataType::String => Index::String(StringIndex::open(
                path,
                relation_name,
                attr_byte_offset,
                attr_type,
                buffer_pool_pages,
            )?),
        })
    }

    pub fn flush(&mut self) -> DbResult<()> {
        match self {
            Index::Int(i) => i.flush(),
            Index::Double(i) => i.flush(),
            Index::String(i) => i.flush(),
        }
    }

    pub fn insert_entry(&mut self, key: KeyValue, rid: RecordId) -> DbResult<()> {
        match (self, key) {
            (Index::Int(idx), KeyValue::Int(k)) => idx.insert_entry(k, rid),
            (Index::Double(idx), KeyValue::Double(k)) => idx.insert_entry(DoubleKey(k), rid),
            (Index::String(idx), KeyValue::String(k)) => idx.insert_entry(StringKey::from_str(&k), rid),
            _ => Err(DbError::BadIndexInfo),
        }
    }

    pub fn delete_entry(&mut self, key: KeyValue) -> DbResult<bool> {
        match (self, key) {
            (Index::Int(idx), KeyValue::Int(k)) => idx.delete_entry(k),
            (Index::Double(idx), KeyValue::Double(k)) => idx.delete_entry(DoubleKey(k)),
            (Index::String(idx), KeyValue::String(k)) => idx.delete_entry(StringKey::from_str(&k)),
            _ => Err(DbError::BadIndexInfo),
        }
    }

    pub fn search(&mut self, key: KeyValue) -> DbResult<Vec<RecordId>> {
        match (self, key) {
            (Index::Int(idx), KeyValue::Int(k)) => idx.search(k),
            (Index::Double(idx), KeyValue::Double(k)) => idx.search(DoubleKey(k)),
            (Index::String(idx), KeyValue::String(k)) => idx.search(StringKey::from_str(&k)),
            _ => Err(DbError::BadIndexInfo),
        }
    }

    pub fn start_scan(
        &mut self,
        low: KeyValue,
        low_op: Operator,
        high: KeyValue,
        high_op: Operator,
    ) -> DbResult<()> {
        match (self, low, high) {
            (Index::Int(idx), KeyValue::Int(lo), KeyValue::Int(hi)) => {
                idx.start_scan(lo, low_op, hi, high_op)
            }
            (Index::Double(idx), KeyValue::Double(lo), KeyValue::Double(hi)) => {
                idx.start_scan(DoubleKey(lo), low_op, DoubleKey(hi), high_op)
            }
            (Index::String(idx), KeyValue::String(lo), KeyValue::String(hi)) => {
                idx.start_scan(StringKey::from_str(&lo), low_op, StringKey::from_str(&hi), high_op)
            }
            _ => Err(DbError::BadIndexInfo),
        }
    }

    pub fn scan_next(&mut self) -> DbResult<RecordId> {
        match self {
            Index::Int(idx) => idx.scan_next(),
            Index::Double(idx) => idx.scan_next(),
            Index::String(idx) => idx.scan_next(),
        }
    }

    pub fn end_scan(&mut self) -> DbResult<()> {
        match self {
            Index::Int(idx) => idx.end_scan(),
            Index::Double(idx) => idx.end_scan(),
            Index::String(idx) => idx.end_scan(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn open_int_index(dir: &std::path::Path, pages: usize) -> IntIndex {
        IntIndex::create(&dir.join("ix.bin"), "t", 0, DataType::Int, pages).unwrap()
    }

    #[test]
    fn insert_and_search_round_trip() {
        let dir = tempdir().unwrap();
        let mut index = open_int_index(dir.path(), 64);
        for i in 0..50 {
            index
                .insert_entry(i, RecordId { page_id: PageId(i as u64), slot: 0 })
                .unwrap();
        }
        for i in 0..50 {
            let rids = index.search(i).unwrap();
            assert_eq!(rids, vec![RecordId { page_id: PageId(i as u64), slot: 0 }]);
        }
    }

    #[test]
    fn insert_enough_keys_to_force_splits_and_levels() {
        let dir = tempdir().unwrap();
        let mut index = open_int_index(dir.path(), 256);
        let n = 5000;
        for i in 0..n {
            index
                .insert_entry(i, RecordId { page_id: PageId(i as u64), slot: 0 })
                .unwrap();
        }
        for i in (0..n).step_by(37) {
            let rids = index.search(i).unwrap();
            assert_eq!(rids, vec![RecordId { page_id: PageId(i as u64), slot: 0 }]);
        }
    }

    #[test]
    fn insert_shuffled_then_scan_in_order() {
        let dir = tempdir().unwrap();
        let mut index = open_int_index(dir.path(), 256);
        let mut keys: Vec<i32> = (0..2000).collect();
        // deterministic shuffle: reverse-and-interleave, no RNG needed
        let mut shuffled = Vec::with_capacity(keys.len());
        while !keys.is_empty() {
            shuffled.push(keys.remove(keys.len() / 2));
        }
        for k in &shuffled {
            index
                .insert_entry(*k, RecordId { page_id: PageId(*k as u64), slot: 0 })
                .unwrap();
        }

        index.start_scan(0, Operator::Gte, 1999, Operator::Lte).unwrap();
        let mut seen = Vec::new();
        loop {
            match index.scan_next() {
                Ok(rid) => seen.push(rid.page_id.0 as i32),
                Err(DbError::IndexScanCompleted) => break,
                Err(e) => panic!("unexpected scan error: {e}"),
            }
        }
        index.end_scan().unwrap();
        assert_eq!(seen, (0..2000).collect::<Vec<_>>());
    }

    #[test]
    fn scan_respects_strict_operators() {
        let dir = tempdir().unwrap();
        let mut index = open_int_index(dir.path(), 64);
        for i in 0..10 {
            index
                .insert_entry(i, RecordId { page_id: PageId(i as u64), slot: 0 })
                .unwrap();
        }
        index.start_scan(2, Operator::Gt, 7, Operator::Lt).unwrap();
        let mut seen = Vec::new();
        loop {
            match index.scan_next() {
                Ok(rid) => seen.push(rid.page_id.0),
                Err(DbError::IndexScanCompleted) => break,
                Err(e) => panic!("unexpected scan error: {e}"),
            }
        }
        assert_eq!(seen, vec![3, 4, 5, 6]);
    }

    #[test]
    fn start_scan_rejects_backwards_operators() {
        let dir = tempdir().unwrap();
        let mut index = open_int_index(dir.path(), 64);
        assert!(matches!(
            index.start_scan(0, Operator::Lt, 10, Operator::Gt),
            Err(DbError::BadOpcodes)
        ));
    }

    #[test]
    fn start_scan_rejects_inverted_range() {
        let dir = tempdir().unwrap();
        let mut index = open_int_index(dir.path(), 64);
        assert!(matches!(
            index.start_scan(10, Operator::Gte, 0, Operator::Lte),
            Err(DbError::BadScanRange)
        ));
    }

    #[test]
    fn scan_next_without_start_scan_is_an_error() {
        let dir = tempdir().unwrap();
        let mut index = open_int_index(dir.path(), 64);
        assert!(matches!(index.scan_next(), Err(DbError::ScanNotInitialized)));
    }

    #[test]
    fn scan_next_after_completion_keeps_reporting_completed() {
        let dir = tempdir().unwrap();
        let mut index = open_int_index(dir.path(), 64);
        index
            .insert_entry(1, RecordId { page_id: PageId(1), slot: 0 })
            .unwrap();
        index.start_scan(0, Operator::Gte, 5, Operator::Lte).unwrap();
        assert!(index.scan_next().is_ok());
        assert!(matches!(index.scan_next(), Err(DbError::IndexScanCompleted)));
        assert!(matches!(index.scan_next(), Err(DbError::IndexScanCompleted)));
    }

    #[test]
    fn delete_every_key_then_reinsert() {
        let dir = tempdir().unwrap();
        let mut index = open_int_index(dir.path(), 256);
        let n = 3000;
        for i in 0..n {
            index
                .insert_entry(i, RecordId { page_id: PageId(i as u64), slot: 0 })
                .unwrap();
        }
        for i in 0..n {
            let deleted = index.delete_entry(i).unwrap();
            assert!(deleted, "key {i} should have been present");
        }
        for i in 0..n {
            assert_eq!(index.search(i).unwrap(), Vec::<RecordId>::new());
        }
        index
            .insert_entry(42, RecordId { page_id: PageId(42), slot: 1 })
            .unwrap();
        assert_eq!(
            index.search(42).unwrap(),
            vec![RecordId { page_id: PageId(42), slot: 1 }]
        );
    }

    #[test]
    fn delete_missing_entry_returns_false() {
        let dir = tempdir().unwrap();
        let mut index = open_int_index(dir.path(), 64);
        index
            .insert_entry(1, RecordId { page_id: PageId(1), slot: 0 })
            .unwrap();
        let deleted = index.delete_entry(2).unwrap();
        assert!(!deleted);
    }

    #[test]
    fn reopen_preserves_tree_after_splits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.bin");
        {
            let mut index = IntIndex::create(&path, "t", 0, DataType::Int, 32).unwrap();
            for i in 0..1000 {
                index
                    .insert_entry(i, RecordId { page_id: PageId(i as u64), slot: 0 })
                    .unwrap();
            }
            index.flush().unwrap();
        }
        let mut reopened = IntIndex::open(&path, "t", 0, DataType::Int, 32).unwrap();
        for i in (0..1000).step_by(13) {
            assert_eq!(
                reopened.search(i).unwrap(),
                vec![RecordId { page_id: PageId(i as u64), slot: 0 }]
            );
        }
    }

    #[test]
    fn open_rejects_mismatched_index_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ix.bin");
        IntIndex::create(&path, "t", 0, DataType::Int, 32).unwrap();
        let reopened = IntIndex::open(&path, "t", 4, DataType::Int, 32);
        assert!(matches!(reopened, Err(DbError::BadIndexInfo)));
    }

    #[test]
    fn runtime_dispatch_handles_all_three_domains() {
        let dir = tempdir().unwrap();

        let mut int_ix = Index::create(&dir.path().join("i.bin"), "t", 0, DataType::Int, 32).unwrap();
        int_ix
            .insert_entry(KeyValue::Int(7), RecordId { page_id: PageId(7), slot: 0 })
            .unwrap();
        assert_eq!(
            int_ix.search(KeyValue::Int(7)).unwrap(),
            vec![RecordId { page_id: PageId(7), slot: 0 }]
        );

        let mut double_ix =
            Index::create(&dir.path().join("d.bin"), "t", 0, DataType::Double, 32).unwrap();
        double_ix
            .insert_entry(KeyValue::Double(3.5), RecordId { page_id: PageId(1), slot: 0 })
            .unwrap();
        assert_eq!(
            double_ix.search(KeyValue::Double(3.5)).unwrap(),
            vec![RecordId { page_id: PageId(1), slot: 0 }]
        );

        let mut string_ix =
            Index::create(&dir.path().join("s.bin"), "t", 0, DataType::String, 32).unwrap();
        string_ix
            .insert_entry(
                KeyValue::String("hello".into()),
                RecordId { page_id: PageId(2), slot: 0 },
            )
            .unwrap();
        assert_eq!(
            string_ix.search(KeyValue::String("hello".into())).unwrap(),
            vec![RecordId { page_id: PageId(2), slot: 0 }]
        );
    }

    #[test]
    fn runtime_dispatch_rejects_mismatched_domain() {
        let dir = tempdir().unwrap();
        let mut int_ix = Index::create(&dir.path().join("i.bin"), "t", 0, DataType::Int, 32).unwrap();
        assert!(matches!(
            int_ix.insert_entry(KeyValue::String("oops".into()), RecordId::default()),
            Err(DbError::BadIndexInfo)
        ));
    }

    proptest! {
        // However the keys arrive, a full-range scan over distinct values
        // must come back in ascending sorted order: leaf chaining and
        // split/promotion bookkeeping must never reorder or drop a key.
        #[test]
        fn scan_returns_keys_in_sorted_order_regardless_of_insert_order(
            mut keys in prop::collection::vec(any::<i16>(), 1..300)
        ) {
            keys.sort_unstable();
            keys.dedup();
            prop_assume!(!keys.is_empty());

            let dir = tempdir().unwrap();
            let mut index = open_int_index(dir.path(), 256);
            for &k in &keys {
                index
                    .insert_entry(k as i32, RecordId { page_id: PageId(k as u64), slot: 0 })
                    .unwrap();
            }

            let lo = *keys.first().unwrap() as i32;
            let hi = *keys.last().unwrap() as i32;
            index.start_scan(lo, Operator::Gte, hi, Operator::Lte).unwrap();

            let mut seen = Vec::new();
            loop {
                match index.scan_next() {
                    Ok(rid) => seen.push(rid.page_id.0 as i32 as i16),
                    Err(DbError::IndexScanCompleted) => break,
                    Err(e) => prop_assert!(false, "unexpected scan error: {e:?}"),
                }
            }
            index.end_scan().unwrap();

            prop_assert_eq!(&seen, &keys);
            for &k in &keys {
                prop_assert_eq!(index.search(k as i32).unwrap().len(), 1);
            }
        }
    }
}
