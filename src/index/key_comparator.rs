use std::cmp::Ordering;

/// Orders fixed-size binary keys. The tree never interprets key bytes
/// itself; every comparison goes through this trait.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Compares keys whose first four bytes are a little-endian `i32`.
/// Any remaining bytes break ties bytewise.
pub struct IntegerComparator;

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        if a.len() < 4 || b.len() < 4 {
            return a.cmp(b);
        }

        let a_val = i32::from_le_bytes([a[0], a[1], a[2], a[3]]);
        let b_val = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);

        a_val.cmp(&b_val).then_with(|| a[4..].cmp(&b[4..]))
    }
}

/// Lexicographic byte order; big-endian integers sort numerically under it.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}
