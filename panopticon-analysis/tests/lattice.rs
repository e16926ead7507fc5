use panopticon_analysis::{AbstractDomain, ConcreteDomain, KSetDomain, KSetValue};
use panopticon_il::Rvalue;
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;

#[derive(Debug, Clone)]
struct AnyKSet(KSetValue);

impl Arbitrary for AnyKSet {
    fn arbitrary(g: &mut Gen) -> Self {
        let value = match u8::arbitrary(g) % 4 {
            0 => KSetValue::Meet,
            1 => KSetValue::Join,
            _ => {
                // small constants so collisions between sets are common
                let constants: Vec<u64> = Vec::<u8>::arbitrary(g)
                    .into_iter()
                    .take(4)
                    .map(|c| u64::from(c % 8))
                    .collect();

                KSetValue::Set(constants.into_iter().collect())
            }
        };

        AnyKSet(value)
    }
}

#[quickcheck]
fn supremum_is_idempotent(a: AnyKSet) -> bool {
    let d = KSetDomain::<3>;

    d.supremum(&a.0, &a.0) == a.0
}

#[quickcheck]
fn supremum_is_commutative(a: AnyKSet, b: AnyKSet) -> bool {
    let d = KSetDomain::<3>;

    d.supremum(&a.0, &b.0) == d.supremum(&b.0, &a.0)
}

#[quickcheck]
fn supremum_is_associative(a: AnyKSet, b: AnyKSet, c: AnyKSet) -> bool {
    let d = KSetDomain::<3>;

    d.supremum(&d.supremum(&a.0, &b.0), &c.0) == d.supremum(&a.0, &d.supremum(&b.0, &c.0))
}

#[derive(Debug, Clone)]
struct AnyConcrete(Rvalue);

impl Arbitrary for AnyConcrete {
    fn arbitrary(g: &mut Gen) -> Self {
        let value = if bool::arbitrary(g) {
            Rvalue::Undefined
        } else {
            Rvalue::Constant(u64::from(u8::arbitrary(g) % 4))
        };

        AnyConcrete(value)
    }
}

#[quickcheck]
fn concrete_supremum_laws(a: AnyConcrete, b: AnyConcrete, c: AnyConcrete) -> bool {
    let d = ConcreteDomain;

    d.supremum(&a.0, &a.0) == a.0
        && d.supremum(&a.0, &b.0) == d.supremum(&b.0, &a.0)
        && d.supremum(&d.supremum(&a.0, &b.0), &c.0)
            == d.supremum(&a.0, &d.supremum(&b.0, &c.0))
}
