//! B+Tree index implementation for persistent on-disk indexes.
//!
//! This crate provides a page-based B+Tree structure that integrates with
//! the database's buffer pool for efficient key-based lookups over a
//! single fixed-width key domain (`i32`, `f64`, or a 10-byte string).

mod index;
mod key;
mod meta;
mod node;

pub use index::{BTreeIndex, DoubleIndex, Index, IntIndex, KeyValue, Operator, StringIndex};
pub use key::{DoubleKey, IndexKey, StringKey, STRING_KEY_SIZE};
pub use meta::{DataType, IndexMetaInfo, RELATION_NAME_LEN};
pub use node::{
    DoubleLeaf, DoubleNonLeaf, IntLeaf, IntNonLeaf, LeafNode, NonLeafNode, StringLeaf,
    StringNonLeaf, DOUBLE_LEAF_CAP, DOUBLE_NONLEAF_NCHILDREN, DOUBLE_NONLEAF_NKEYS, INT_LEAF_CAP,
    INT_NONLEAF_NCHILDREN, INT_NONLEAF_NKEYS, STRING_LEAF_CAP, STRING_NONLEAF_NCHILDREN,
    STRING_NONLEAF_NKEYS,
};
