//! Append-only binary buffer with a typed read cursor
//!
//! Every frame, fragment, and collective payload in the toolbox bottoms out
//! in this buffer. The layout is normative: scalars are native-endian,
//! ordered sequences are `i32 count || elements`, strings and nested
//! buffers are `u64 length || bytes`.

use crate::error::{narrow_to_i32, CommError, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Plain-old-data value with a stable in-memory byte layout.
///
/// Implemented for the primitive scalars, fixed arrays, and pairs of them;
/// user types serialize field-by-field through pack/unpack pairs instead.
pub trait Pod: Copy {
    const SIZE: usize;
    fn write_to(&self, out: &mut Vec<u8>);
    /// Caller guarantees `bytes.len() >= Self::SIZE`.
    fn read_from(bytes: &[u8]) -> Self;
}

macro_rules! impl_pod_scalar {
    ($($t:ty),*) => {$(
        impl Pod for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            fn write_to(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
            fn read_from(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_ne_bytes(raw)
            }
        }
    )*};
}

impl_pod_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl Pod for bool {
    const SIZE: usize = 1;
    fn write_to(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }
    fn read_from(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl<T: Pod, const N: usize> Pod for [T; N] {
    const SIZE: usize = N * T::SIZE;
    fn write_to(&self, out: &mut Vec<u8>) {
        for item in self {
            item.write_to(out);
        }
    }
    fn read_from(bytes: &[u8]) -> Self {
        std::array::from_fn(|i| T::read_from(&bytes[i * T::SIZE..]))
    }
}

impl<A: Pod, B: Pod> Pod for (A, B) {
    const SIZE: usize = A::SIZE + B::SIZE;
    fn write_to(&self, out: &mut Vec<u8>) {
        self.0.write_to(out);
        self.1.write_to(out);
    }
    fn read_from(bytes: &[u8]) -> Self {
        (A::read_from(bytes), B::read_from(&bytes[A::SIZE..]))
    }
}

/// Reinterpret a slice of pod values as their wire bytes.
pub fn pod_bytes<T: Pod>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::SIZE);
    for v in values {
        v.write_to(&mut out);
    }
    out
}

/// Rebuild pod values from wire bytes; the length must be a whole multiple
/// of the element size.
pub fn pod_from_bytes<T: Pod>(bytes: &[u8]) -> Result<Vec<T>> {
    if T::SIZE == 0 || bytes.len() % T::SIZE != 0 {
        return Err(CommError::Invariant(format!(
            "byte buffer of length {} is not a multiple of element size {}",
            bytes.len(),
            T::SIZE
        )));
    }
    Ok(bytes.chunks_exact(T::SIZE).map(T::read_from).collect())
}

/// Append-only byte blob with a monotonically advancing read cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    blob: Vec<u8>,
    cursor: usize,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt an externally produced buffer; the cursor starts at zero.
    pub fn from_bytes(blob: Vec<u8>) -> Self {
        Self { blob, cursor: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.blob
    }

    pub fn len(&self) -> usize {
        self.blob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.blob.reserve(additional);
    }

    /// Rewind the read cursor; call once filling is done and before reading.
    pub fn finalize(&mut self) {
        self.cursor = 0;
    }

    fn take(&mut self, bytes: usize) -> Result<&[u8]> {
        if self.cursor + bytes > self.blob.len() {
            return Err(CommError::OutOfRange {
                offset: self.cursor,
                requested: bytes,
                available: self.blob.len(),
            });
        }
        let slice = &self.blob[self.cursor..self.cursor + bytes];
        self.cursor += bytes;
        Ok(slice)
    }

    pub fn pack<T: Pod>(&mut self, value: T) {
        value.write_to(&mut self.blob);
    }

    pub fn unpack<T: Pod>(&mut self) -> Result<T> {
        Ok(T::read_from(self.take(T::SIZE)?))
    }

    /// Append raw bytes with no length prefix.
    pub fn pack_raw(&mut self, bytes: &[u8]) {
        self.blob.extend_from_slice(bytes);
    }

    pub fn pack_str(&mut self, s: &str) {
        self.pack(s.len() as u64);
        self.blob.extend_from_slice(s.as_bytes());
    }

    pub fn unpack_string(&mut self) -> Result<String> {
        let n = self.unpack::<u64>()? as usize;
        let bytes = self.take(n)?.to_vec();
        String::from_utf8(bytes)
            .map_err(|e| CommError::Invariant(format!("string is not valid utf-8: {e}")))
    }

    pub fn pack_slice<T: Pod>(&mut self, values: &[T]) -> Result<()> {
        let n = narrow_to_i32(values.len())?;
        self.pack(n);
        for v in values {
            v.write_to(&mut self.blob);
        }
        Ok(())
    }

    pub fn unpack_vec<T: Pod>(&mut self) -> Result<Vec<T>> {
        let n = self.unpack::<i32>()?;
        let n = usize::try_from(n)
            .map_err(|_| CommError::Invariant(format!("negative sequence count {n}")))?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.unpack::<T>()?);
        }
        Ok(out)
    }

    /// Nested buffer: `u64 length || bytes`.
    pub fn pack_message(&mut self, other: &Message) {
        self.pack(other.len() as u64);
        self.blob.extend_from_slice(&other.blob);
    }

    pub fn unpack_message(&mut self) -> Result<Message> {
        let n = self.unpack::<u64>()? as usize;
        Ok(Message::from_bytes(self.take(n)?.to_vec()))
    }

    pub fn pack_set<T: Pod + Ord>(&mut self, set: &BTreeSet<T>) -> Result<()> {
        let n = narrow_to_i32(set.len())?;
        self.pack(n);
        for v in set {
            v.write_to(&mut self.blob);
        }
        Ok(())
    }

    pub fn unpack_set<T: Pod + Ord>(&mut self) -> Result<BTreeSet<T>> {
        Ok(self.unpack_vec::<T>()?.into_iter().collect())
    }

    pub fn pack_map<K: Pod + Ord, V: Pod>(&mut self, map: &BTreeMap<K, V>) -> Result<()> {
        let n = narrow_to_i32(map.len())?;
        self.pack(n);
        for (k, v) in map {
            k.write_to(&mut self.blob);
            v.write_to(&mut self.blob);
        }
        Ok(())
    }

    pub fn unpack_map<K: Pod + Ord, V: Pod>(&mut self) -> Result<BTreeMap<K, V>> {
        let n = self.unpack::<i32>()?;
        let mut out = BTreeMap::new();
        for _ in 0..n {
            let k = self.unpack::<K>()?;
            let v = self.unpack::<V>()?;
            out.insert(k, v);
        }
        Ok(out)
    }

    /// Sequence of non-pod elements: `i32 count` then each element through
    /// the caller-supplied packer.
    pub fn pack_seq_with<T>(
        &mut self,
        items: &[T],
        mut pack_one: impl FnMut(&mut Message, &T),
    ) -> Result<()> {
        let n = narrow_to_i32(items.len())?;
        self.pack(n);
        for item in items {
            pack_one(self, item);
        }
        Ok(())
    }

    pub fn unpack_seq_with<T>(
        &mut self,
        mut unpack_one: impl FnMut(&mut Message) -> Result<T>,
    ) -> Result<Vec<T>> {
        let n = self.unpack::<i32>()?;
        let n = usize::try_from(n)
            .map_err(|_| CommError::Invariant(format!("negative sequence count {n}")))?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(unpack_one(self)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        let mut msg = Message::new();
        msg.pack(42i32);
        msg.pack(9.75f64);
        msg.pack(true);
        msg.pack(7u64);
        msg.finalize();
        assert_eq!(msg.unpack::<i32>().unwrap(), 42);
        assert_eq!(msg.unpack::<f64>().unwrap(), 9.75);
        assert!(msg.unpack::<bool>().unwrap());
        assert_eq!(msg.unpack::<u64>().unwrap(), 7);
    }

    #[test]
    fn test_slice_roundtrip_preserves_order() {
        let values = vec![3i64, 1, 4, 1, 5, 9, 2, 6];
        let mut msg = Message::new();
        msg.pack_slice(&values).unwrap();
        msg.finalize();
        assert_eq!(msg.unpack_vec::<i64>().unwrap(), values);
    }

    #[test]
    fn test_string_and_nested_message() {
        let mut inner = Message::new();
        inner.pack(123i32);
        let mut msg = Message::new();
        msg.pack_str("hello chimera");
        msg.pack_message(&inner);
        msg.finalize();
        assert_eq!(msg.unpack_string().unwrap(), "hello chimera");
        let mut inner_out = msg.unpack_message().unwrap();
        assert_eq!(inner_out.unpack::<i32>().unwrap(), 123);
    }

    #[test]
    fn test_map_and_set_roundtrip() {
        let map: BTreeMap<i32, f64> = [(1, 0.5), (9, -2.0)].into_iter().collect();
        let set: BTreeSet<i64> = [10, 20, 30].into_iter().collect();
        let mut msg = Message::new();
        msg.pack_map(&map).unwrap();
        msg.pack_set(&set).unwrap();
        msg.finalize();
        assert_eq!(msg.unpack_map::<i32, f64>().unwrap(), map);
        assert_eq!(msg.unpack_set::<i64>().unwrap(), set);
    }

    #[test]
    fn test_read_past_end_is_out_of_range() {
        let mut msg = Message::new();
        msg.pack(1u8);
        msg.finalize();
        msg.unpack::<u8>().unwrap();
        let err = msg.unpack::<i32>().unwrap_err();
        assert!(matches!(err, CommError::OutOfRange { .. }));
    }

    #[test]
    fn test_finalize_rewinds_cursor() {
        let mut msg = Message::new();
        msg.pack(5i32);
        msg.finalize();
        assert_eq!(msg.unpack::<i32>().unwrap(), 5);
        msg.finalize();
        assert_eq!(msg.unpack::<i32>().unwrap(), 5);
    }

    #[test]
    fn test_point_array_roundtrip() {
        let p = [0.25f64, -1.5, 3.0];
        let mut msg = Message::new();
        msg.pack(p);
        msg.finalize();
        assert_eq!(msg.unpack::<[f64; 3]>().unwrap(), p);
    }
}
