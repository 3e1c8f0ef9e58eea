//! Plan merging across scripts: sharing, ordering and failure handling.

use planshare::ir::{
    col, int, ComparisonOp, Expression, GenerateItem, NestedStep, OperatorKind, Predicate,
};
use planshare::{MergeError, OperatorId, Plan, PlanBuilder, PlanMerger};

fn over_five() -> Predicate {
    Predicate::compare(col(0), ComparisonOp::GreaterThan, int(5))
}

/// Load(f1) -> Filter($0 > 5) -> Store(out)
fn filtered_store(name: &str, out: &str) -> Plan {
    let mut b = PlanBuilder::new(name);
    let l = b.load("f1", &["a", "b"]);
    let f = b.filter(l, over_five());
    b.store(f, out);
    b.build().unwrap()
}

#[test]
fn test_two_scripts_share_prefix() {
    let mut merger = PlanMerger::new();
    merger.merge_plan("a", &filtered_store("a", "s1")).unwrap();
    merger.merge_plan("b", &filtered_store("b", "s2")).unwrap();

    let merged = merger.finish();
    assert_eq!(merged.plan.len(), 4);
    assert_eq!(merged.plan.sources().len(), 1);
    assert_eq!(merged.plan.sinks().len(), 2);
    assert!(merged.plan.validate().is_ok());
}

#[test]
fn test_nested_nan_filter_merges_with_itself() {
    let mut b = PlanBuilder::new("nested");
    let l = b.load("f1", &["a", "b"]);
    let g = b.generate(l, vec![GenerateItem::column(0)], &["a"]);
    b.store(g, "out");
    let mut plan = b.build().unwrap();
    plan.operator_mut(g).unwrap().kind = OperatorKind::Generate {
        nested: vec![NestedStep::Filter {
            bag: 1,
            predicate: Predicate::compare(
                col(0),
                ComparisonOp::Equal,
                Expression::Float(f64::NAN),
            ),
        }],
        items: vec![GenerateItem::column(0)],
        output_schema: vec!["a".into()],
    };

    let mut merger = PlanMerger::new();
    merger.merge_plan("x", &plan).unwrap();
    let outcome = merger.merge_plan("x-again", &plan).unwrap();

    assert_eq!(outcome.created, 0);
    assert_eq!(merger.plan().len(), 3);
}

#[test]
fn test_merging_same_plan_twice_is_idempotent() {
    let mut b = PlanBuilder::new("wide");
    let l = b.load("f1", &["a", "b"]);
    let r = b.load("f2", &["a", "c"]);
    let f = b.filter(l, over_five());
    let j = b.join(&[f, r], vec![vec![0], vec![0]], &["a", "b", "a2", "c"]);
    let g = b.group(&[j], vec![vec![1]], &["b", "rows"]);
    b.store(g, "out");
    let plan = b.build().unwrap();

    let mut once = PlanMerger::new();
    once.merge_plan("x", &plan).unwrap();

    let mut twice = PlanMerger::new();
    twice.merge_plan("x", &plan).unwrap();
    let outcome = twice.merge_plan("x-again", &plan).unwrap();

    assert_eq!(outcome.created, 0);
    assert_eq!(outcome.folded, plan.len());
    assert_eq!(twice.plan().len(), once.plan().len());
}

#[test]
fn test_every_operator_maps_and_edges_are_preserved() {
    let plans = [
        filtered_store("a", "s1"),
        filtered_store("b", "s2"),
        {
            let mut b = PlanBuilder::new("c");
            let l = b.load("f1", &["a", "b"]);
            let d = b.distinct(l);
            let s = b.sort(
                d,
                vec![planshare::ir::SortKey {
                    column: 1,
                    descending: true,
                }],
            );
            b.limit(s, 10);
            b.build().unwrap()
        },
    ];

    let mut merger = PlanMerger::new();
    for (i, plan) in plans.iter().enumerate() {
        let outcome = merger.merge_plan(plan.name(), plan).unwrap();
        assert_eq!(outcome.script, i);
    }

    for (script, plan) in plans.iter().enumerate() {
        for id in plan.ids() {
            let merged = merger.resolve(script, id).expect("every operator is mapped");
            let expected: Vec<OperatorId> = plan
                .predecessors(id)
                .iter()
                .map(|&p| merger.resolve(script, p).unwrap())
                .collect();
            assert_eq!(merger.plan().predecessors(merged), expected.as_slice());
        }
    }
}

#[test]
fn test_smallest_candidate_wins() {
    // a merged plan holding two identical filters (a self-join script)
    let mut b = PlanBuilder::new("a");
    let l = b.load("f1", &["a"]);
    let f1 = b.filter(l, over_five());
    let f2 = b.filter(l, over_five());
    b.join(&[f1, f2], vec![vec![0], vec![0]], &["a", "a2"]);
    let first = b.build().unwrap();

    let mut merger = PlanMerger::new();
    merger.merge_plan("a", &first).unwrap();
    merger.merge_plan("b", &filtered_store("b", "s")).unwrap();

    let canonical_f1 = merger.resolve(0, f1).unwrap();
    let folded_into = merger.resolve(1, OperatorId::new(1)).unwrap();
    assert_eq!(folded_into, canonical_f1);
}

#[test]
fn test_failed_script_leaves_earlier_state_intact() {
    let mut merger = PlanMerger::new();
    merger.merge_plan("a", &filtered_store("a", "s1")).unwrap();
    let snapshot = merger.plan().explain();

    let mut b = PlanBuilder::new("bad");
    let l = b.load("f1", &["a", "b"]);
    let f = b.filter(l, over_five());
    let s = b.store(f, "s9");
    let bad = b.build().unwrap();

    let err = merger.merge_in_order("bad", &bad, &[l, s, f]).unwrap_err();
    assert!(matches!(err, MergeError::UnresolvedPredecessor { .. }));
    assert_eq!(merger.plan().explain(), snapshot);

    // the merger stays usable
    merger.merge_plan("b", &filtered_store("b", "s2")).unwrap();
    assert_eq!(merger.plan().len(), 4);
    assert_eq!(merger.script_name(1), Some("b"));
}

#[test]
fn test_join_input_order_distinguishes_operators() {
    let join = |name: &str, swap: bool| {
        let mut b = PlanBuilder::new(name);
        let l = b.load("left", &["k"]);
        let r = b.load("right", &["k"]);
        let inputs = if swap { [r, l] } else { [l, r] };
        b.join(&inputs, vec![vec![0], vec![0]], &["k", "k2"]);
        b.build().unwrap()
    };

    let mut merger = PlanMerger::new();
    merger.merge_plan("a", &join("a", false)).unwrap();
    let outcome = merger.merge_plan("b", &join("b", true)).unwrap();

    assert_eq!(outcome.folded, 2);
    assert_eq!(outcome.created, 1);
}

#[test]
fn test_syntactically_different_filters_not_merged() {
    let mut b = PlanBuilder::new("b");
    let l = b.load("f1", &["a", "b"]);
    let f = b.filter(l, Predicate::compare(int(5), ComparisonOp::LessThan, col(0)));
    b.store(f, "s2");
    let flipped = b.build().unwrap();

    let mut merger = PlanMerger::new();
    merger.merge_plan("a", &filtered_store("a", "s1")).unwrap();
    merger.merge_plan("b", &flipped).unwrap();

    assert_eq!(merger.plan().len(), 5);
}
