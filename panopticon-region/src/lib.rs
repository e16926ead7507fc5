//! Layered, copy-on-write memory model.
//!
//! A [`Region`] owns a base [`Layer`] and a stack of bounded layers applied
//! on top, modelling patches, mapped sections and undefined holes. Reading
//! a region composes the stack into a [`Slab`], a lazy random-access
//! sequence of [`Tryte`]s (optional bytes). Multiple regions form a
//! [`RegionGraph`] describing which region is mapped into which.

#![warn(missing_docs)]

mod blob;
mod layer;
mod region;
mod slab;

pub use blob::Blob;
pub use layer::Layer;
pub use region::{projection, root, Region, RegionGraph};
pub use slab::{Slab, SlabIter};

/// Errors of the memory model.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// A read touched offsets past the end of a slab or region.
    #[error("read past the end ({offset} not below {size})")]
    OutOfRange {
        /// Offset of the failed access.
        offset: panopticon_types::Offset,
        /// Size of the slab or region.
        size: u64,
    },
    /// A write hit a layer that is not a sparse map.
    #[error("layer is read-only")]
    ReadOnly,
    /// The backing file could not be read or mapped.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
