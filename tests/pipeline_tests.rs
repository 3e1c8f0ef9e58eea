//! End-to-end batch runs: matcher report, merge, rewrite.

use planshare::ir::{col, int, ComparisonOp, Expression, Predicate};
use planshare::{BatchOptimizer, Config, MergeError, PipelineError, PlanBuilder, Script};

fn script(name: &str, threshold: i64, out: &str) -> Script {
    let mut b = PlanBuilder::new(name);
    let l = b.load("events", &["user", "bytes", "day"]);
    let f = b.filter(
        l,
        Predicate::compare(col(1), ComparisonOp::GreaterThan, int(threshold)),
    );
    let p = b.project(f, &[0, 2], &["user", "day"]);
    b.store(p, out);
    Script::new(name, b.build().unwrap())
}

/// A script whose plan cannot be put in dependency order
fn cyclic(name: &str) -> Script {
    let mut plan = planshare::Plan::new(name);
    let a = plan.add(planshare::OperatorKind::Distinct);
    let b = plan.add(planshare::OperatorKind::Distinct);
    plan.connect(a, b).unwrap();
    // a strong back edge is refused; an ordering edge still closes the loop
    assert!(plan.connect(b, a).is_err());
    plan.create_soft_link(b, a).unwrap();
    Script::new(name, plan)
}

#[test]
fn test_batch_shares_and_reports() {
    let scripts = [
        script("a", 1024, "out/a"),
        script("b", 1024, "out/b"),
        script("c", 1024, "out/c"),
    ];
    let outcome = BatchOptimizer::new(Config::default())
        .unwrap()
        .run(&scripts)
        .unwrap();

    // shared load, filter, projection; one store per script
    assert_eq!(outcome.plan.len(), 6);
    assert_eq!(outcome.merge_stats.operators_in, 12);
    assert_eq!(outcome.merge_stats.operators_folded, 6);
    assert!(outcome.failures.is_empty());

    let report = outcome.rewrite.unwrap();
    assert!(!report.changed());

    let index = outcome.common_subplans.unwrap();
    let entries = index.report();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].size(), 3);
    assert_eq!(entries[0].scripts.len(), 3);
}

#[test]
fn test_canonical_operators_name_their_scripts() {
    let scripts = [script("a", 1, "out/a"), script("b", 1, "out/b")];
    let outcome = BatchOptimizer::new(Config::default())
        .unwrap()
        .run(&scripts)
        .unwrap();

    let shared = outcome
        .plan
        .operators()
        .filter(|(_, op)| op.annotations.get("scripts").map(String::as_str) == Some("a,b"))
        .count();
    assert_eq!(shared, 3);
    assert_eq!(outcome.merged.iter().filter(|m| m.members().len() == 2).count(), 3);
}

#[test]
fn test_failed_script_skipped() {
    let scripts = [script("a", 1, "out/a"), cyclic("broken"), script("c", 1, "out/c")];
    let outcome = BatchOptimizer::new(Config::default())
        .unwrap()
        .run(&scripts)
        .unwrap();

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].script, "broken");
    assert!(matches!(outcome.failures[0].error, MergeError::Cyclic { .. }));
    assert_eq!(outcome.scripts, vec!["a".to_string(), "c".to_string()]);
    assert_eq!(outcome.plan.len(), 5);
}

#[test]
fn test_failed_script_aborts_when_not_skipping() {
    let mut config = Config::default();
    config.merge.skip_failed_scripts = false;

    let scripts = [script("a", 1, "out/a"), cyclic("broken")];
    let err = BatchOptimizer::new(config).unwrap().run(&scripts).unwrap_err();
    assert!(matches!(err, PipelineError::Merge(MergeError::Cyclic { .. })));
}

#[test]
fn test_rewrite_combines_divergent_projections() {
    let mut b = PlanBuilder::new("wide");
    let l = b.load("events", &["user", "bytes", "day"]);
    let f = b.filter(
        l,
        Predicate::compare(col(1), ComparisonOp::GreaterThan, int(0)),
    );
    let p = b.project(f, &[1], &["bytes"]);
    b.store(p, "out/wide");
    let wide = Script::new("wide", b.build().unwrap());

    let scripts = [script("a", 0, "out/a"), wide];
    let outcome = BatchOptimizer::new(Config::default())
        .unwrap()
        .run(&scripts)
        .unwrap();

    let report = outcome.rewrite.unwrap();
    assert!(report.changed());
    assert!(outcome.plan.validate().is_ok());
    assert!(outcome.rewrite_error.is_none());
}

#[test]
fn test_ill_formed_operators_never_merge() {
    let broken = |name: &str| {
        let mut b = PlanBuilder::new(name);
        let l = b.load("events", &["user"]);
        let f = b.filter(l, Predicate::IsNull(Expression::Named("ghost".into())));
        b.store(f, "out");
        Script::new(name, b.build().unwrap())
    };

    let outcome = BatchOptimizer::new(Config::default())
        .unwrap()
        .run(&[broken("a"), broken("b")])
        .unwrap();

    // the loads fold, the unresolved filters do not; nor do the stores
    // sitting on different filters
    assert_eq!(outcome.merge_stats.operators_folded, 1);
    assert_eq!(outcome.plan.len(), 5);
}
