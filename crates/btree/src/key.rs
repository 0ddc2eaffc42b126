//! The three fixed-width key domains this index supports.

use serde::{Deserialize, Serialize};

/// Width, in bytes, of a `StringKey`'s fixed comparison window.
pub const STRING_KEY_SIZE: usize = 10;

/// A key type that can live inside a `LeafNode`/`NonLeafNode` array.
///
/// `Ord` on the three implementors below gives plain numeric order for
/// `i32`/`DoubleKey`, and a `strncmp(a, b, STRINGSIZE)`-equivalent
/// byte-window order for `StringKey` (a derived `Ord` on `[u8; 10]`
/// already compares lexicographically byte-by-byte, which is what
/// `strncmp` does over a fixed window).
pub trait IndexKey:
    Copy + Ord + Default + std::fmt::Debug + Serialize + for<'de> Deserialize<'de>
{
    /// Width of this key's attribute as stored in a base-relation record.
    const ATTR_BYTES: usize;
}

impl IndexKey for i32 {
    const ATTR_BYTES: usize = 4;
}

/// A key wrapper for `f64` attributes.
///
/// `f64` alone isn't `Ord`/`Eq`; this domain has no notion of NaN keys,
/// so total ordering via `f64::total_cmp` gives a safe, deterministic
/// comparator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DoubleKey(pub f64);

impl Eq for DoubleKey {}

impl PartialOrd for DoubleKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DoubleKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl IndexKey for DoubleKey {
    const ATTR_BYTES: usize = 8;
}

/// A fixed 10-byte string key, compared like `strncmp(a, b, STRINGSIZE)`:
/// byte by byte across the whole window, including any zero padding past
/// a short string's terminator. No implicit trimming of trailing
/// whitespace or padding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StringKey(pub [u8; STRING_KEY_SIZE]);

impl StringKey {
    pub fn from_str(s: &str) -> Self {
        let mut buf = [0u8; STRING_KEY_SIZE];
        let bytes = s.as_bytes();
        let n = bytes.len().min(STRING_KEY_SIZE);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self(buf)
    }

    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(STRING_KEY_SIZE);
        String::from_utf8_lossy(&self.0[..end])
    }
}

impl IndexKey for StringKey {
    const ATTR_BYTES: usize = STRING_KEY_SIZE;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_key_orders_like_strncmp() {
        let a = StringKey::from_str("alice");
        let b = StringKey::from_str("bob");
        assert!(a < b);

        let a_again = StringKey::from_str("alice");
        assert_eq!(a, a_again);
    }

    #[test]
    fn string_key_padding_participates_in_comparison() {
        let short = StringKey::from_str("a");
        let longer = StringKey::from_str("ab");
        // "a\0\0..." < "ab\0..." because the zero byte at index 1 is less
        // than 'b'.
        assert!(short < longer);
    }

    #[test]
    fn double_key_orders_numerically() {
        let a = DoubleKey(1.5);
        let b = DoubleKey(2.5);
        assert!(a < b);
        assert_eq!(DoubleKey(1.0).cmp(&DoubleKey(1.0)), std::cmp::Ordering::Equal);
    }
}
