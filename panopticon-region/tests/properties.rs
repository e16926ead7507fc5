use panopticon_region::{Layer, Region, Slab};
use panopticon_types::Bound;
use quickcheck_macros::quickcheck;

// Writing the bytes a slab produced back into a sparse layer on top of the
// same data changes nothing.
#[quickcheck]
fn sparse_write_back_is_identity(data: Vec<u8>) -> bool {
    let baseline: Vec<_> = Region::wrap("base", data.clone()).read().iter().collect();

    let mut reg = Region::wrap("base", data);
    reg.add(Bound::new(0, reg.size()), Layer::sparse("patch"));

    let before: Vec<_> = reg.read().iter().collect();

    for (off, tryte) in before.iter().enumerate() {
        reg.write(off as u64, *tryte).unwrap();
    }

    let after: Vec<_> = reg.read().iter().collect();

    after == before && after == baseline
}

#[quickcheck]
fn slicing_never_changes_content(data: Vec<u8>, cut: usize) -> bool {
    let slab = Slab::from_vec(data.clone());
    let cut = (cut % (data.len() + 1)) as u64;

    let glued = Slab::append(slab.slice(0, cut), slab.slice(cut, slab.size()));

    glued.iter().collect::<Vec<_>>() == slab.iter().collect::<Vec<_>>()
}

#[quickcheck]
fn reads_inside_are_defined_outside_fail(data: Vec<u8>) -> bool {
    let slab = Slab::from_vec(data.clone());

    (0..data.len() as u64).all(|off| slab.read(off).is_ok()) && slab.read(data.len() as u64).is_err()
}
