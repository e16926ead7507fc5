//! Regions and the region graph.

use std::collections::BTreeSet;
use std::path::Path;

use panopticon_graph::{Digraph, VertexDescriptor};
use panopticon_types::{Bound, Offset};

use crate::{Blob, Layer, RegionError, Slab};

/// A continuous address space composed of layers.
///
/// The base layer fixes the size; layers added on top apply to a sub-range
/// and are composed in insertion order when reading.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Region {
    name: String,
    base: Layer,
    stack: Vec<(Bound, Layer)>,
    size: u64,
}

impl Region {
    /// Region over the given base layer.
    pub fn new(name: impl Into<String>, base: Layer) -> Self {
        let size = base.filter(&Slab::empty()).size();

        Self {
            name: name.into(),
            base,
            stack: Vec::new(),
            size,
        }
    }

    /// Region backed by the memory-mapped file at `path`.
    pub fn map_file(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, RegionError> {
        Ok(Self::new(name, Layer::blob("base", Blob::map_file(path)?)))
    }

    /// Region of `size` undefined trytes.
    pub fn undefined(name: impl Into<String>, size: u64) -> Self {
        Self::new(name, Layer::undefined("base", size))
    }

    /// Region wrapping in-memory bytes.
    pub fn wrap(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(name, Layer::blob("base", data))
    }

    /// Name of the region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes, fixed by the base layer.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The layer stack above the base, in application order.
    pub fn stack(&self) -> &[(Bound, Layer)] {
        &self.stack
    }

    /// Push `layer` over the offsets in `bound` (clamped to the region).
    pub fn add(&mut self, bound: Bound, layer: Layer) {
        let clamped = bound.intersect(&Bound::new(0, self.size));

        self.stack.push((clamped, layer));
    }

    /// Write one tryte into the topmost writable layer covering `pos`.
    pub fn write(&mut self, pos: Offset, tryte: panopticon_types::Tryte) -> Result<(), RegionError> {
        if pos >= self.size {
            return Err(RegionError::OutOfRange {
                offset: pos,
                size: self.size,
            });
        }

        for (bound, layer) in self.stack.iter_mut().rev() {
            if bound.contains(pos) && layer.is_writable() {
                return layer.write(pos - bound.lower(), tryte);
            }
        }

        Err(RegionError::ReadOnly)
    }

    /// Compose the layer stack into a slab.
    pub fn read(&self) -> Slab {
        let mut slab = self.base.filter(&Slab::empty());

        for (bound, layer) in &self.stack {
            let mut filtered = layer.filter(&slab.slice(bound.lower(), bound.upper()));
            // a layer may produce fewer or more trytes than its window; the
            // window size wins
            let window = bound.size();
            let produced = filtered.size();

            if produced > window {
                filtered = filtered.slice(0, window);
            } else if produced < window {
                filtered = Slab::append(filtered, Slab::undefined(window - produced));
            }

            let mut next = slab.slice(0, bound.lower());
            next = Slab::append(next, filtered);
            if bound.upper() < slab.size() {
                next = Slab::append(next, slab.slice(bound.upper(), slab.size()));
            }

            slab = next;
        }

        debug_assert_eq!(slab.size(), self.size);
        slab
    }

    /// Project the layer stack onto a non-overlapping `(bound, layer)`
    /// covering of the region, topmost layer winning.
    pub fn flatten(&self) -> Vec<(Bound, &Layer)> {
        let mut cuts = BTreeSet::from([0, self.size]);

        for (bound, _) in &self.stack {
            cuts.insert(bound.lower());
            cuts.insert(bound.upper());
        }

        let cuts: Vec<Offset> = cuts.into_iter().collect();
        let mut out: Vec<(Bound, &Layer)> = Vec::new();

        for pair in cuts.windows(2) {
            let segment = Bound::new(pair[0], pair[1]);

            if segment.is_empty() {
                continue;
            }

            let top = self
                .stack
                .iter()
                .rev()
                .find(|(bound, _)| bound.includes(&segment))
                .map(|(_, layer)| layer)
                .unwrap_or(&self.base);

            match out.last_mut() {
                Some((prev, layer)) if std::ptr::eq(*layer, top) && prev.upper() == segment.lower() => {
                    *prev = prev.hull(&segment);
                }
                _ => out.push((segment, top)),
            }
        }

        out
    }
}

/// Memory map: which region is mapped into which, and where.
///
/// An edge runs from the containing region to the embedded one and carries
/// the bound the embedded region occupies inside its container.
pub type RegionGraph = Digraph<Region, Bound>;

/// The region that is not mapped into any other.
pub fn root(regions: &RegionGraph) -> Option<VertexDescriptor> {
    regions.vertices().find(|vx| regions.in_degree(*vx) == 0)
}

/// Flatten the graph into a non-overlapping `(bound, region)` sequence
/// covering `[0, root.size)` in root coordinates, innermost region winning.
pub fn projection(regions: &RegionGraph) -> Vec<(Bound, VertexDescriptor)> {
    let mut out = Vec::new();

    if let Some(r) = root(regions) {
        let mut visited = BTreeSet::new();

        project(regions, r, 0, &mut visited, &mut out);
    }

    out
}

fn project(
    regions: &RegionGraph,
    vx: VertexDescriptor,
    base: Offset,
    visited: &mut BTreeSet<VertexDescriptor>,
    out: &mut Vec<(Bound, VertexDescriptor)>,
) {
    let size = regions.vertex_label(vx).map_or(0, Region::size);
    let mut edges: Vec<_> = regions.out_edges(vx).collect();

    edges.sort_by_key(|ed| regions.edge_label(*ed).map(Bound::lower));

    let mut last = 0;

    for ed in edges {
        let bound = *regions.edge_label(ed).expect("edge of this graph");
        let child = regions.target(ed);

        if last < bound.lower() {
            out.push((Bound::new(base + last, base + bound.lower()), vx));
        }
        last = bound.upper();

        if visited.insert(child) {
            project(regions, child, base + bound.lower(), visited, out);
        }
    }

    if last < size {
        out.push((Bound::new(base + last, base + size), vx));
    }
}
