//! The session database.

use std::collections::BTreeMap;

use panopticon_analysis::Program;
use panopticon_graph::VertexDescriptor;
use panopticon_region::{projection, RegionGraph};
use panopticon_types::{Bound, Offset, Ref};
use uuid::Uuid;

/// A user-defined data structure at a fixed place in a region.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Structure {
    /// Display name.
    pub name: String,
    /// Region the structure lives in.
    pub region: String,
    /// Covered offsets.
    pub area: Bound,
}

/// Everything a session knows about one image.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Database {
    /// Session title, usually the file name.
    pub title: String,
    /// Memory map of the image.
    pub data: RegionGraph,
    /// Disassembled programs.
    pub programs: Vec<Program>,
    /// User-defined structures.
    pub structures: Vec<Structure>,
    /// Comments keyed by position.
    #[serde(with = "panopticon_graph::map_as_pairs")]
    pub comments: BTreeMap<Ref, String>,
    /// Per-function display overrides for variables, keyed by function
    /// identity and variable name.
    pub values: BTreeMap<Uuid, BTreeMap<String, String>>,
}

impl Database {
    /// Empty database titled `title`.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            data: RegionGraph::new(),
            programs: Vec::new(),
            structures: Vec::new(),
            comments: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    /// Vertex of the region called `name`.
    pub fn find_region(&self, name: &str) -> Option<VertexDescriptor> {
        self.data
            .vertices()
            .find(|vx| self.data.vertex_label(*vx).is_some_and(|r| r.name() == name))
    }

    /// Non-overlapping covering of the root region; see
    /// [`panopticon_region::projection`].
    pub fn projection(&self) -> Vec<(Bound, VertexDescriptor)> {
        projection(&self.data)
    }
}

/// One addressable thing the record iteration can yield.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A user-defined structure.
    Structure(Structure),
    /// A decoded basic block.
    Block {
        /// Program owning the block.
        program: Uuid,
        /// Procedure owning the block.
        procedure: Uuid,
        /// Covered offsets.
        area: Bound,
    },
}

impl Record {
    fn area(&self) -> Bound {
        match self {
            Record::Structure(s) => s.area,
            Record::Block { area, .. } => *area,
        }
    }
}

/// The structure or basic block at or closest after `at` in its region.
pub fn next_record(at: &Ref, db: &Database) -> Option<Record> {
    fn consider(best: &mut Option<(Offset, Record)>, offset: Offset, record: Record) {
        let area = record.area();

        if area.contains(offset) {
            *best = Some((0, record));
        } else if offset < area.lower() {
            let distance = area.lower() - offset;

            if best.as_ref().map_or(true, |(d, _)| distance < *d) {
                *best = Some((distance, record));
            }
        }
    }

    let mut best: Option<(Offset, Record)> = None;

    for structure in &db.structures {
        if structure.region == at.region {
            consider(&mut best, at.offset, Record::Structure(structure.clone()));
        }
    }

    for program in &db.programs {
        if program.region != at.region {
            continue;
        }

        for (_, proc) in program.procedures() {
            for (_, bb) in proc.blocks() {
                consider(
                    &mut best,
                    at.offset,
                    Record::Block {
                        program: program.uuid,
                        procedure: proc.uuid,
                        area: bb.area(),
                    },
                );
            }
        }
    }

    best.map(|(_, record)| record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use panopticon_region::Region;

    fn sample() -> Database {
        let mut db = Database::new("sample");

        db.data.insert_vertex(Region::undefined("base", 100));
        db.structures.push(Structure {
            name: "header".to_string(),
            region: "base".to_string(),
            area: Bound::new(10, 20),
        });
        db.structures.push(Structure {
            name: "table".to_string(),
            region: "base".to_string(),
            area: Bound::new(40, 60),
        });
        db
    }

    #[test]
    fn next_record_scans_forward() {
        let db = sample();

        let at = |off| next_record(&Ref::new("base", off), &db);

        assert!(matches!(at(0), Some(Record::Structure(s)) if s.name == "header"));
        assert!(matches!(at(15), Some(Record::Structure(s)) if s.name == "header"));
        assert!(matches!(at(20), Some(Record::Structure(s)) if s.name == "table"));
        assert!(at(60).is_none());
        assert!(at(0).is_some());
        assert!(next_record(&Ref::new("other", 0), &db).is_none());
    }

    #[test]
    fn projection_covers_the_root() {
        let db = sample();
        let proj = db.projection();

        assert_eq!(proj.len(), 1);
        assert_eq!(proj[0].0, Bound::new(0, 100));
    }
}
