use std::cmp::Ordering;

/// Total order over fixed-size keys stored in a tree.
///
/// Both slices always have the tree's key size. Any `Fn(&[u8], &[u8]) ->
/// Ordering` closure is a comparator, which takes the place of a
/// comparator-plus-context pair.
pub trait KeyComparator {
    /// Compares two encoded keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Key size this comparator requires, if it only understands one.
    fn key_size(&self) -> Option<usize> {
        None
    }
}

impl<F> KeyComparator for F
where
    F: Fn(&[u8], &[u8]) -> Ordering,
{
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self(a, b)
    }
}

/// Lexicographic byte order.
#[derive(Clone, Copy, Debug, Default)]
pub struct ByteOrder;

impl KeyComparator for ByteOrder {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

macro_rules! native_comparator {
    ($(#[$doc:meta])* $name:ident, $ty:ty) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Default)]
        pub struct $name;

        impl KeyComparator for $name {
            fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
                decode::<$ty, { std::mem::size_of::<$ty>() }>(a, <$ty>::from_ne_bytes)
                    .cmp(&decode::<$ty, { std::mem::size_of::<$ty>() }>(b, <$ty>::from_ne_bytes))
            }

            fn key_size(&self) -> Option<usize> {
                Some(std::mem::size_of::<$ty>())
            }
        }
    };
}

fn decode<T, const N: usize>(bytes: &[u8], from: fn([u8; N]) -> T) -> T {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&bytes[..N]);
    from(raw)
}

native_comparator!(
    /// Numeric order of native-endian `u32` keys.
    NativeU32,
    u32
);
native_comparator!(
    /// Numeric order of native-endian `i32` keys.
    NativeI32,
    i32
);
native_comparator!(
    /// Numeric order of native-endian `u64` keys.
    NativeU64,
    u64
);
native_comparator!(
    /// Numeric order of native-endian `i64` keys.
    NativeI64,
    i64
);
