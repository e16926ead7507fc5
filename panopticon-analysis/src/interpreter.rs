//! Abstract interpretation over the IL.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use panopticon_il::{Operation, Rvalue, Variable};

use crate::{CfgNode, Procedure};

/// An abstract domain the fixed-point solver can run over.
///
/// `supremum` must be commutative, associative and idempotent;
/// `overapproximate` lifts concrete rvalues into the lattice.
pub trait AbstractDomain {
    /// Elements of the lattice.
    type Value: Clone + PartialEq + fmt::Debug;

    /// Lift a concrete rvalue.
    fn overapproximate(&self, rv: &Rvalue) -> Self::Value;

    /// Least upper bound of two elements.
    fn supremum(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;

    /// Evaluate one operation over lifted operands.
    fn execute(&self, op: &Operation<Self::Value>) -> Self::Value;
}

/// Run the fixed-point solver over `proc`.
///
/// Each basic block's IL executes sequentially against a variable
/// environment; whenever a variable changes, the block's successors are
/// re-queued. Terminates when the worklist drains, which every proper
/// abstract domain guarantees.
pub fn approximate<D: AbstractDomain>(
    proc: &Procedure,
    domain: &D,
) -> BTreeMap<Variable, D::Value> {
    let cfg = proc.cfg();
    let mut env: BTreeMap<Variable, D::Value> = BTreeMap::new();
    let mut worklist: BTreeSet<_> = cfg
        .vertices()
        .filter(|vx| matches!(cfg.vertex_label(*vx), Some(CfgNode::Block(_))))
        .collect();

    while let Some(vx) = worklist.pop_first() {
        let Some(bb) = proc.block(vx) else {
            continue;
        };
        let mut modified = false;

        bb.execute(|stmt| {
            let lifted = stmt.op.map(|rv| match rv {
                Rvalue::Variable(var) => env
                    .get(var)
                    .cloned()
                    .unwrap_or_else(|| domain.overapproximate(rv)),
                other => domain.overapproximate(other),
            });
            let result = domain.execute(&lifted);

            if let Some(var) = stmt.assignee.as_variable() {
                modified |= env.get(var) != Some(&result);
                env.insert(var.clone(), result);
            }
        });

        if modified {
            for ed in cfg.out_edges(vx) {
                let succ = cfg.target(ed);

                if matches!(cfg.vertex_label(succ), Some(CfgNode::Block(_))) {
                    worklist.insert(succ);
                }
            }
        }
    }

    env
}

/// Concrete execution with C-style two's-complement semantics on 64 bit
/// unsigned integers. Not a proper abstract domain: loops need not
/// terminate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcreteDomain;

fn truthy(c: u64) -> bool {
    c != 0
}

impl ConcreteDomain {
    fn binary(a: &Rvalue, b: &Rvalue, f: impl FnOnce(u64, u64) -> Option<u64>) -> Rvalue {
        match (a, b) {
            (Rvalue::Constant(a), Rvalue::Constant(b)) => {
                f(*a, *b).map(Rvalue::Constant).unwrap_or(Rvalue::Undefined)
            }
            _ => Rvalue::Undefined,
        }
    }

    fn unary(a: &Rvalue, f: impl FnOnce(u64) -> u64) -> Rvalue {
        match a {
            Rvalue::Constant(a) => Rvalue::Constant(f(*a)),
            _ => Rvalue::Undefined,
        }
    }
}

impl AbstractDomain for ConcreteDomain {
    type Value = Rvalue;

    fn overapproximate(&self, rv: &Rvalue) -> Rvalue {
        match rv {
            Rvalue::Constant(c) => Rvalue::Constant(*c),
            _ => Rvalue::Undefined,
        }
    }

    fn supremum(&self, a: &Rvalue, b: &Rvalue) -> Rvalue {
        if a == b {
            a.clone()
        } else {
            Rvalue::Undefined
        }
    }

    fn execute(&self, op: &Operation<Rvalue>) -> Rvalue {
        use Operation::*;

        match op {
            // booleans short-circuit on absorbing constants even when the
            // other side is undefined
            LogicAnd(a, b) => match (a.as_constant(), b.as_constant()) {
                (Some(0), _) | (_, Some(0)) => Rvalue::Constant(0),
                (Some(a), Some(b)) => Rvalue::Constant((truthy(a) && truthy(b)) as u64),
                _ => Rvalue::Undefined,
            },
            LogicOr(a, b) => match (a.as_constant(), b.as_constant()) {
                (Some(a), _) if truthy(a) => Rvalue::Constant(1),
                (_, Some(b)) if truthy(b) => Rvalue::Constant(1),
                (Some(_), Some(_)) => Rvalue::Constant(0),
                _ => Rvalue::Undefined,
            },
            LogicNeg(a) => Self::unary(a, |a| (!truthy(a)) as u64),
            LogicImpl(a, b) => Self::binary(a, b, |a, b| {
                Some((!truthy(a) || truthy(b)) as u64)
            }),
            LogicEquiv(a, b) => Self::binary(a, b, |a, b| {
                Some((truthy(a) == truthy(b)) as u64)
            }),
            LogicLift(a) => Self::unary(a, |a| truthy(a) as u64),
            LogicRshift(a, b) | IntRshift(a, b) => Self::binary(a, b, |a, b| {
                Some(u32::try_from(b).ok().and_then(|b| a.checked_shr(b)).unwrap_or(0))
            }),
            LogicLshift(a, b) | IntLshift(a, b) => Self::binary(a, b, |a, b| {
                Some(u32::try_from(b).ok().and_then(|b| a.checked_shl(b)).unwrap_or(0))
            }),
            IntAdd(a, b) => Self::binary(a, b, |a, b| Some(a.wrapping_add(b))),
            IntSub(a, b) => Self::binary(a, b, |a, b| Some(a.wrapping_sub(b))),
            IntMul(a, b) => Self::binary(a, b, |a, b| Some(a.wrapping_mul(b))),
            IntDiv(a, b) => Self::binary(a, b, |a, b| a.checked_div(b)),
            IntMod(a, b) => Self::binary(a, b, |a, b| a.checked_rem(b)),
            IntAnd(a, b) => Self::binary(a, b, |a, b| Some(a & b)),
            IntOr(a, b) => Self::binary(a, b, |a, b| Some(a | b)),
            IntXor(a, b) => Self::binary(a, b, |a, b| Some(a ^ b)),
            IntLess(a, b) => Self::binary(a, b, |a, b| Some((a < b) as u64)),
            IntEqual(a, b) => Self::binary(a, b, |a, b| Some((a == b) as u64)),
            IntCall(_) => Rvalue::Undefined,
            UnivNop(a) => self.overapproximate(a),
            UnivPhi(ops) => ops
                .iter()
                .map(|rv| self.overapproximate(rv))
                .reduce(|a, b| self.supremum(&a, &b))
                .unwrap_or(Rvalue::Undefined),
        }
    }
}

/// Element of the K-Set lattice: `⊥`, up to `K` constants, or `⊤`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KSetValue {
    /// Bottom: no value observed yet.
    Meet,
    /// A set of at most `K` constants.
    Set(BTreeSet<u64>),
    /// Top: more than `K` constants.
    Join,
}

impl KSetValue {
    /// The singleton set.
    pub fn singleton(c: u64) -> Self {
        KSetValue::Set(BTreeSet::from([c]))
    }
}

/// Sets of up to `K` constants, collapsing to `⊤` beyond that.
#[derive(Debug, Clone, Copy, Default)]
pub struct KSetDomain<const K: usize>;

impl<const K: usize> KSetDomain<K> {
    fn clamp(set: BTreeSet<u64>) -> KSetValue {
        if set.len() > K {
            KSetValue::Join
        } else {
            KSetValue::Set(set)
        }
    }
}

impl<const K: usize> AbstractDomain for KSetDomain<K> {
    type Value = KSetValue;

    fn overapproximate(&self, rv: &Rvalue) -> KSetValue {
        match rv {
            Rvalue::Constant(c) => KSetValue::singleton(*c),
            Rvalue::Undefined => KSetValue::Join,
            _ => KSetValue::Meet,
        }
    }

    fn supremum(&self, a: &KSetValue, b: &KSetValue) -> KSetValue {
        match (a, b) {
            (KSetValue::Meet, other) | (other, KSetValue::Meet) => other.clone(),
            (KSetValue::Join, _) | (_, KSetValue::Join) => KSetValue::Join,
            (KSetValue::Set(a), KSetValue::Set(b)) => {
                Self::clamp(a.union(b).copied().collect())
            }
        }
    }

    fn execute(&self, op: &Operation<KSetValue>) -> KSetValue {
        use Operation::*;

        // φ joins its operands, calls are opaque
        match op {
            UnivPhi(ops) => {
                return ops
                    .iter()
                    .fold(KSetValue::Meet, |acc, v| self.supremum(&acc, v));
            }
            IntCall(_) => return KSetValue::Join,
            _ => {}
        }

        let operands = op.operands();

        if operands.iter().any(|v| matches!(v, KSetValue::Join)) {
            return KSetValue::Join;
        }
        if operands.iter().any(|v| matches!(v, KSetValue::Meet)) {
            return KSetValue::Meet;
        }

        let sets: Vec<&BTreeSet<u64>> = operands
            .iter()
            .map(|v| match v {
                KSetValue::Set(set) => set,
                _ => unreachable!("filtered above"),
            })
            .collect();

        // evaluate pointwise under the concrete semantics
        let concrete = ConcreteDomain;
        let mut out = BTreeSet::new();

        match sets.as_slice() {
            [single] => {
                for &c in *single {
                    let mut args = [c].into_iter();
                    let lifted = op.map(|_| Rvalue::Constant(args.next().expect("arity 1")));

                    if let Rvalue::Constant(r) = concrete.execute(&lifted) {
                        out.insert(r);
                    }
                }
            }
            [left, right] => {
                for &l in *left {
                    for &r in *right {
                        let mut args = [l, r].into_iter();
                        let lifted =
                            op.map(|_| Rvalue::Constant(args.next().expect("arity 2")));

                        if let Rvalue::Constant(r) = concrete.execute(&lifted) {
                            out.insert(r);
                        }
                    }
                }
            }
            _ => return KSetValue::Join,
        }

        Self::clamp(out)
    }
}
