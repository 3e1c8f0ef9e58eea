//! Merge identical siblings.
//!
//! ```text
//! Load(f1) -+-> Distinct -> Store(a)        Load(f1) -> Distinct -+-> Store(a)
//!           +-> Distinct -> Store(b)   =>                         +-> Store(b)
//! ```
//!
//! Within a sibling group the smallest id of each equality class survives;
//! every other member is replaced by it. Pairs feeding a common successor
//! are left alone (collapsing them would turn two inputs into one), as are
//! pairs with different ordering constraints.

use super::sibling_groups;
use crate::error::RewriteResult;
use crate::plan::{OperatorId, Plan};
use std::collections::BTreeSet;
use tracing::debug;

pub fn apply(plan: &mut Plan) -> RewriteResult<BTreeSet<OperatorId>> {
    let mut changed = BTreeSet::new();

    for group in sibling_groups(plan, None) {
        let mut removed = BTreeSet::new();
        for (i, &winner) in group.iter().enumerate() {
            if removed.contains(&winner) {
                continue;
            }
            for &loser in &group[i + 1..] {
                if removed.contains(&loser) || !mergeable(plan, winner, loser) {
                    continue;
                }
                plan.replace(loser, winner)?;
                removed.insert(loser);
                changed.insert(winner);
                debug!(winner = %winner, loser = %loser, "merged identical operators");
            }
        }
    }

    Ok(changed)
}

fn mergeable(plan: &Plan, winner: OperatorId, loser: OperatorId) -> bool {
    let loser_succs = plan.successors(loser);
    if plan.successors(winner).iter().any(|s| loser_succs.contains(s)) {
        return false;
    }

    let soft_w: BTreeSet<_> = plan.soft_predecessors(winner).iter().collect();
    let soft_l: BTreeSet<_> = plan.soft_predecessors(loser).iter().collect();
    soft_w == soft_l && plan.is_equal(winner, loser)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{col, int, ComparisonOp, Predicate};
    use crate::plan::PlanBuilder;

    #[test]
    fn test_identical_filters_collapse() {
        let mut b = PlanBuilder::new("p");
        let l = b.load("f1", &["a"]);
        let p = || Predicate::compare(col(0), ComparisonOp::GreaterThan, int(5));
        let f1 = b.filter(l, p());
        let f2 = b.filter(l, p());
        let f3 = b.filter(l, p());
        let s1 = b.store(f1, "x");
        let s2 = b.store(f2, "y");
        let s3 = b.store(f3, "z");
        let mut plan = b.build().unwrap();

        let changed = apply(&mut plan).unwrap();

        assert_eq!(changed, BTreeSet::from([f1]));
        assert_eq!(plan.len(), 5);
        assert_eq!(plan.successors(f1), &[s1, s2, s3]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_logically_equal_filters_stay_apart() {
        let mut b = PlanBuilder::new("p");
        let l = b.load("f1", &["a"]);
        b.filter(l, Predicate::compare(col(0), ComparisonOp::GreaterThan, int(5)));
        b.filter(l, Predicate::compare(int(5), ComparisonOp::LessThan, col(0)));
        let mut plan = b.build().unwrap();

        assert!(apply(&mut plan).unwrap().is_empty());
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_shared_successor_not_merged() {
        // self join over two copies of the same input
        let mut b = PlanBuilder::new("p");
        let l = b.load("f1", &["a"]);
        let d1 = b.distinct(l);
        let d2 = b.distinct(l);
        let j = b.join(&[d1, d2], vec![vec![0], vec![0]], &["a", "a2"]);
        let mut plan = b.build().unwrap();

        assert!(apply(&mut plan).unwrap().is_empty());
        assert_eq!(plan.predecessors(j), &[d1, d2]);
    }

    #[test]
    fn test_identical_sources_merge() {
        let mut b = PlanBuilder::new("p");
        let l1 = b.load("f1", &["a"]);
        let l2 = b.load("f1", &["b"]);
        let s = b.store(l2, "out");
        let mut plan = b.build().unwrap();

        let changed = apply(&mut plan).unwrap();

        assert_eq!(changed, BTreeSet::from([l1]));
        assert!(!plan.contains(l2));
        assert_eq!(plan.predecessors(s), &[l1]);
    }

    #[test]
    fn test_different_soft_predecessors_not_merged() {
        let mut b = PlanBuilder::new("p");
        let setup = b.load("init", &["x"]);
        let w = b.store(setup, "f1");
        let l1 = b.load("f1", &["a"]);
        let l2 = b.load("f1", &["a"]);
        b.soft_link(w, l2);
        let mut plan = b.build().unwrap();

        assert!(apply(&mut plan).unwrap().is_empty());
        assert!(plan.contains(l1) && plan.contains(l2));
    }
}
