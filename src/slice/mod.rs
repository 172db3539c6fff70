// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use byteview::ByteView;
use std::sync::Arc;

/// An immutable byte slice that can be cloned without additional heap allocation
///
/// Small slices are stored inline, larger ones are reference counted.
#[derive(Debug, Clone, Eq, Hash, Ord)]
pub struct Slice(ByteView);

impl Slice {
    /// Construct a [`Slice`] from a byte slice.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        Self(ByteView::new(bytes))
    }

    /// Returns an empty slice.
    #[must_use]
    pub fn empty() -> Self {
        Self(ByteView::new(&[]))
    }

    /// Reads exactly `len` bytes from the reader.
    pub(crate) fn from_reader<R: std::io::Read>(
        reader: &mut R,
        len: usize,
    ) -> std::io::Result<Self> {
        let mut buf = vec![0; len];
        reader.read_exact(&mut buf)?;
        Ok(Self::from(buf))
    }
}

impl AsRef<[u8]> for Slice {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Slice {
    fn from(value: &[u8]) -> Self {
        Self::new(value)
    }
}

// Arc::from<Vec<u8>> is specialized
impl From<Vec<u8>> for Slice {
    fn from(value: Vec<u8>) -> Self {
        Self(ByteView::from(value))
    }
}

impl From<&Vec<u8>> for Slice {
    fn from(value: &Vec<u8>) -> Self {
        Self::from(value.as_slice())
    }
}

impl From<&str> for Slice {
    fn from(value: &str) -> Self {
        Self::from(value.as_bytes())
    }
}

impl From<String> for Slice {
    fn from(value: String) -> Self {
        Self::from(value.into_bytes())
    }
}

impl From<&String> for Slice {
    fn from(value: &String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Arc<[u8]>> for Slice {
    fn from(value: Arc<[u8]>) -> Self {
        Self::from(&*value)
    }
}

impl<const N: usize> From<[u8; N]> for Slice {
    fn from(value: [u8; N]) -> Self {
        Self::from(value.as_slice())
    }
}

impl<const N: usize> From<&[u8; N]> for Slice {
    fn from(value: &[u8; N]) -> Self {
        Self::from(value.as_slice())
    }
}

impl From<Slice> for Vec<u8> {
    fn from(value: Slice) -> Self {
        value.to_vec()
    }
}

impl FromIterator<u8> for Slice {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = u8>,
    {
        Vec::from_iter(iter).into()
    }
}

impl std::ops::Deref for Slice {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

impl std::borrow::Borrow<[u8]> for Slice {
    fn borrow(&self) -> &[u8] {
        self
    }
}

impl<T> PartialEq<T> for Slice
where
    T: AsRef<[u8]>,
{
    fn eq(&self, other: &T) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl PartialEq<Slice> for &[u8] {
    fn eq(&self, other: &Slice) -> bool {
        *self == other.as_ref()
    }
}

impl<T> PartialOrd<T> for Slice
where
    T: AsRef<[u8]>,
{
    fn partial_cmp(&self, other: &T) -> Option<std::cmp::Ordering> {
        self.as_ref().partial_cmp(other.as_ref())
    }
}

impl PartialOrd<Slice> for &[u8] {
    fn partial_cmp(&self, other: &Slice) -> Option<std::cmp::Ordering> {
        (*self).partial_cmp(other.as_ref())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::Slice;
    use std::{fmt::Debug, sync::Arc};
    use test_log::test;

    fn assert_slice_handles<T>(v: T)
    where
        T: Clone + Debug,
        Slice: From<T> + PartialEq<T> + PartialOrd<T>,
    {
        let slice: Slice = v.clone().into();
        assert_eq!(slice, v, "slice: {slice:?}, v: {v:?}");
        assert!(slice >= v, "slice: {slice:?}, v: {v:?}");
    }

    #[test]
    fn slice_empty() {
        assert_eq!(Slice::empty(), []);
        assert!(Slice::empty().is_empty());
    }

    #[test]
    fn slice_ordering_is_bytewise() {
        assert!(Slice::from("a") < Slice::from("b"));
        assert!(Slice::from("a") < Slice::from("aa"));
        assert!(Slice::from("") < Slice::from("a"));
    }

    #[test]
    fn slice_instantiation() {
        assert_slice_handles::<&[u8]>(&[1, 2, 3, 4]);
        assert_slice_handles::<Arc<[u8]>>(Arc::new([1, 2, 3, 4]));
        assert_slice_handles::<Vec<u8>>(vec![1, 2, 3, 4]);
        assert_slice_handles::<&str>("hello");
        assert_slice_handles::<String>("hello".to_string());
        assert_slice_handles::<[u8; 4]>([1, 2, 3, 4]);

        let slice = Slice::from_iter(vec![1, 2, 3, 4]);
        assert_eq!(slice, vec![1, 2, 3, 4]);

        let mut reader = std::io::Cursor::new(vec![1, 2, 3, 4]);
        let slice = Slice::from_reader(&mut reader, 4).expect("read");
        assert_eq!(slice, vec![1, 2, 3, 4]);
    }
}
