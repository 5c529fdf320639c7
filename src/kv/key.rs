// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::fmt;

#[allow(unused_imports)]
#[cfg(test)]
use proptest::arbitrary::any_with;
#[allow(unused_imports)]
#[cfg(test)]
use proptest::collection::size_range;
#[cfg(test)]
use proptest_derive::Arbitrary;

use super::HexRepr;

const _PROPTEST_KEY_MAX: usize = 1024 * 2; // 2 KB

/// The key part of a key/value pair.
///
/// Keys are an ordered sequence of bytes; valid `UTF-8` is not required, so
/// users may store any data representable as bytes. The derived `Ord` compares
/// octets unsigned, left to right, which gives the total order the cluster
/// sorts by. Comparison never allocates.
///
/// This type wraps an owned buffer, so treat it like `String` or `Vec<u8>`.
///
/// # Examples
/// ```rust
/// use rangekv_client::Key;
///
/// let from_str = Key::from("rangekv".to_owned());
/// let from_vec = Key::from(b"rangekv".to_vec());
/// assert_eq!(from_str, from_vec);
/// ```
///
/// Many functions accepting a key take an `Into<Key>`, so all of the above
/// types can be passed directly.
#[derive(Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(test, derive(Arbitrary))]
#[repr(transparent)]
pub struct Key(
    #[cfg_attr(
        test,
        proptest(strategy = "any_with::<Vec<u8>>((size_range(_PROPTEST_KEY_MAX), ()))")
    )]
    pub(crate) Vec<u8>,
);

impl Key {
    /// The empty key.
    pub const EMPTY: Self = Key(Vec::new());

    /// Return whether the key is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Key(v)
    }
}

impl From<String> for Key {
    fn from(v: String) -> Key {
        Key(v.into_bytes())
    }
}

impl From<Key> for Vec<u8> {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl<'a> From<&'a Key> for &'a [u8] {
    fn from(key: &'a Key) -> Self {
        &key.0
    }
}

impl AsRef<Key> for Key {
    fn as_ref(&self) -> &Key {
        self
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Key({})", HexRepr(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn order_is_unsigned() {
        // 0x7F < 0x80 must hold even though the bytes differ in sign as i8.
        let low: Key = vec![0x7F].into();
        let high: Key = vec![0x80].into();
        assert!(low < high);
    }

    #[test]
    fn prefix_sorts_first() {
        let short: Key = vec![1, 2].into();
        let long: Key = vec![1, 2, 0].into();
        assert!(short < long);
        assert!(Key::EMPTY < short);
    }

    proptest! {
        #[test]
        fn order_matches_byte_slices(a in any::<Key>(), b in any::<Key>()) {
            prop_assert_eq!(a.cmp(&b), a.0.as_slice().cmp(b.0.as_slice()));
        }

        #[test]
        fn order_is_total(a in any::<Key>(), b in any::<Key>(), c in any::<Key>()) {
            if a <= b && b <= c {
                prop_assert!(a <= c);
            }
        }
    }
}
