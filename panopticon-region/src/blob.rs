//! Shared byte blobs.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::RegionError;

/// Reference-counted constant byte data.
///
/// Blobs either own their bytes or borrow them from a memory-mapped file
/// without copying. Clones share the backing storage; a mapped file is
/// unmapped when the last clone drops.
#[derive(Debug, Clone)]
pub struct Blob(Repr);

#[derive(Debug, Clone)]
enum Repr {
    Owned(Arc<Vec<u8>>),
    Mapped(Arc<memmap2::Mmap>),
}

impl Blob {
    /// Blob owning `data`.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Blob(Repr::Owned(Arc::new(data)))
    }

    /// Map the file at `path` read-only.
    ///
    /// Empty files cannot be mapped and fall back to an owned empty blob.
    pub fn map_file(path: impl AsRef<Path>) -> Result<Self, RegionError> {
        let file = File::open(path)?;

        if file.metadata()?.len() == 0 {
            return Ok(Self::from_vec(Vec::new()));
        }

        // The mapping is read-only and keeps the file handle alive.
        #[allow(unsafe_code)]
        let map = unsafe { memmap2::Mmap::map(&file)? };

        Ok(Blob(Repr::Mapped(Arc::new(map))))
    }

    /// The bytes.
    pub fn data(&self) -> &[u8] {
        match &self.0 {
            Repr::Owned(v) => v,
            Repr::Mapped(m) => m,
        }
    }

    /// Number of bytes.
    pub fn size(&self) -> u64 {
        self.data().len() as u64
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.data() == other.data()
    }
}

impl Eq for Blob {}

impl From<Vec<u8>> for Blob {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&[u8]> for Blob {
    fn from(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Blob {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.data())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Blob {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Mapped blobs come back as owned bytes.
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = Blob;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("byte data")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Blob, E> {
                Ok(Blob::from_vec(v.to_vec()))
            }

            fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Blob, E> {
                Ok(Blob::from_vec(v))
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> Result<Blob, A::Error> {
                let mut data = Vec::with_capacity(seq.size_hint().unwrap_or(0));

                while let Some(byte) = seq.next_element::<u8>()? {
                    data.push(byte);
                }

                Ok(Blob::from_vec(data))
            }
        }

        deserializer.deserialize_byte_buf(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn owned_blob() {
        let b = Blob::from_vec(vec![1, 2, 3]);

        assert_eq!(b.size(), 3);
        assert_eq!(b.data(), &[1, 2, 3]);
        assert_eq!(b, b.clone());
    }

    #[test]
    fn mapped_blob() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"panopticon").unwrap();
        f.flush().unwrap();

        let b = Blob::map_file(f.path()).unwrap();
        let shared = b.clone();

        drop(b);
        assert_eq!(shared.data(), b"panopticon");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            Blob::map_file("/nonexistent/panopticon-test"),
            Err(crate::RegionError::Io(_))
        ));
    }

    #[test]
    fn empty_file_maps_to_empty_blob() {
        let f = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(Blob::map_file(f.path()).unwrap().size(), 0);
    }

    #[test]
    fn serde_round_trip() {
        let b = Blob::from_vec(vec![0xde, 0xad, 0xbe, 0xef]);
        let b2: Blob = bincode::deserialize(&bincode::serialize(&b).unwrap()).unwrap();

        assert_eq!(b, b2);
    }
}
