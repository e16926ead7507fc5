//! Stackable byte layers.

use std::collections::HashMap;
use std::sync::Arc;

use panopticon_types::{Offset, Tryte};

use crate::{Blob, RegionError, Slab};

/// One element of a region's layer stack.
///
/// A layer transforms the slab produced by the layers below it: sparse maps
/// override single trytes, blobs and undefined runs replace the input
/// entirely.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Layer {
    name: String,
    data: LayerData,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
enum LayerData {
    /// Mutable per-offset overrides; absent offsets pass through.
    Sparse(#[cfg_attr(feature = "serde", serde(with = "sparse_as_pairs"))] Arc<HashMap<Offset, Tryte>>),
    /// Constant bytes, ignores input.
    Blob(Blob),
    /// A run of undefined trytes, ignores input.
    Undefined(u64),
}

impl Layer {
    /// Empty sparse layer called `name`.
    pub fn sparse(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: LayerData::Sparse(Arc::new(HashMap::new())),
        }
    }

    /// Sparse layer seeded with `entries`.
    pub fn sparse_from(
        name: impl Into<String>,
        entries: impl IntoIterator<Item = (Offset, Tryte)>,
    ) -> Self {
        Self {
            name: name.into(),
            data: LayerData::Sparse(Arc::new(entries.into_iter().collect())),
        }
    }

    /// Constant layer over `blob`.
    pub fn blob(name: impl Into<String>, blob: impl Into<Blob>) -> Self {
        Self {
            name: name.into(),
            data: LayerData::Blob(blob.into()),
        }
    }

    /// `size` undefined trytes.
    pub fn undefined(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            data: LayerData::Undefined(size),
        }
    }

    /// Name of the layer.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if this layer yields only undefined trytes.
    pub fn is_undefined(&self) -> bool {
        matches!(self.data, LayerData::Undefined(_))
    }

    /// True if this layer can be written to.
    pub fn is_writable(&self) -> bool {
        matches!(self.data, LayerData::Sparse(_))
    }

    /// Apply this layer to the slab produced so far.
    pub fn filter(&self, input: &Slab) -> Slab {
        match &self.data {
            LayerData::Sparse(map) => Slab::overlay(Arc::clone(map), input),
            LayerData::Blob(blob) => Slab::from_blob(blob.clone()),
            LayerData::Undefined(size) => Slab::undefined(*size),
        }
    }

    /// Override the tryte at `pos`.
    ///
    /// Only sparse layers are writable; slabs handed out earlier keep the
    /// bytes they were read with.
    pub fn write(&mut self, pos: Offset, tryte: Tryte) -> Result<(), RegionError> {
        match &mut self.data {
            LayerData::Sparse(map) => {
                Arc::make_mut(map).insert(pos, tryte);
                Ok(())
            }
            _ => Err(RegionError::ReadOnly),
        }
    }

    /// The tryte this layer itself stores at `pos`, if any.
    pub fn written(&self, pos: Offset) -> Option<Tryte> {
        match &self.data {
            LayerData::Sparse(map) => map.get(&pos).copied(),
            _ => None,
        }
    }
}

#[cfg(feature = "serde")]
mod sparse_as_pairs {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        map: &Arc<HashMap<Offset, Tryte>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        // sorted for deterministic output
        let mut pairs: Vec<(&Offset, &Tryte)> = map.iter().collect();
        pairs.sort();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Arc<HashMap<Offset, Tryte>>, D::Error> {
        let pairs = Vec::<(Offset, Tryte)>::deserialize(deserializer)?;
        Ok(Arc::new(pairs.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_filter_overlays() {
        let mut layer = Layer::sparse("patch");

        layer.write(1, Some(0xff)).unwrap();
        layer.write(2, None).unwrap();

        let out = layer.filter(&Slab::from_vec(vec![1, 2, 3, 4]));
        assert_eq!(
            out.iter().collect::<Vec<_>>(),
            vec![Some(1), Some(0xff), None, Some(4)]
        );
    }

    #[test]
    fn blob_and_undefined_ignore_input() {
        let input = Slab::from_vec(vec![9, 9]);

        let out = Layer::blob("code", vec![1u8, 2, 3]).filter(&input);
        assert_eq!(out.size(), 3);
        assert_eq!(out.read(0).unwrap(), Some(1));

        let out = Layer::undefined("bss", 5).filter(&input);
        assert_eq!(out.size(), 5);
        assert_eq!(out.read(4).unwrap(), None);
    }

    #[test]
    fn writes_to_read_only_layers_fail() {
        let mut blob = Layer::blob("code", vec![0u8]);
        let mut undef = Layer::undefined("bss", 1);

        assert!(matches!(blob.write(0, Some(1)), Err(RegionError::ReadOnly)));
        assert!(matches!(undef.write(0, Some(1)), Err(RegionError::ReadOnly)));
    }

    #[test]
    fn filtered_slabs_snapshot_the_layer() {
        let mut layer = Layer::sparse_from("patch", [(0, Some(1))]);
        let layer2 = Layer::sparse_from("patch", [(0, Some(1))]);
        assert_eq!(layer, layer2);

        let before = layer.filter(&Slab::undefined(2));
        layer.write(0, Some(2)).unwrap();
        let after = layer.filter(&Slab::undefined(2));

        assert_eq!(before.read(0).unwrap(), Some(1));
        assert_eq!(after.read(0).unwrap(), Some(2));
    }

    #[test]
    fn serde_round_trip() {
        let layer = Layer::sparse_from("patch", [(0, Some(1)), (9, None)]);
        let bytes = bincode::serialize(&layer).unwrap();

        assert_eq!(layer, bincode::deserialize::<Layer>(&bytes).unwrap());
    }
}
