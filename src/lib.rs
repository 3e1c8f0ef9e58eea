//! # planshare
//!
//! Shares computation across a batch of independently compiled data-flow
//! scripts. Each script arrives as an operator graph ([`Plan`]); the crate
//! folds them into one graph where structurally equivalent work is done
//! once, then applies local rewrites to a fixpoint.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Compiled scripts (one Plan each)
//!     ↓
//! [Subplan Matcher]        → common preprocessing report (read only)
//!     ↓
//! [Plan Merger]            → one merged Plan + merged-operator table
//!     ↓
//! [Rewrite Engine]         → merge_identical, combine_projections,
//!     ↓                       combine_filters, repeated to fixpoint
//! Reduced Plan             → handed to the job compiler
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use planshare::ir::{col, int, ComparisonOp, Predicate};
//! use planshare::{BatchOptimizer, Config, PlanBuilder, Script};
//!
//! let script = |name: &str, out: &str| {
//!     let mut b = PlanBuilder::new(name);
//!     let raw = b.load("logs/day", &["user", "bytes"]);
//!     let big = b.filter(raw, Predicate::compare(col(1), ComparisonOp::GreaterThan, int(1024)));
//!     b.store(big, out);
//!     Script::new(name, b.build().unwrap())
//! };
//!
//! let optimizer = BatchOptimizer::new(Config::default()).unwrap();
//! let outcome = optimizer
//!     .run(&[script("a", "out/a"), script("b", "out/b")])
//!     .unwrap();
//!
//! // shared Load and Filter, one Store per script
//! assert_eq!(outcome.plan.len(), 4);
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod ir;
pub mod logging;
pub mod matcher;
pub mod merge;
pub mod plan;
pub mod rewrite;

pub use batch::{BatchOptimizer, BatchOutcome, Script, ScriptFailure};
pub use config::Config;
pub use error::{
    EqualityError, GraphError, GraphResult, MergeError, MergeResult, PipelineError,
    PipelineResult, RewriteError, RewriteResult,
};
pub use ir::{Operator, OperatorKind, OperatorTag};
pub use matcher::{CommonSubplan, CommonSubplanIndex, SubplanMatcher};
pub use merge::{MergeStats, MergedOperator, MergedPlan, PlanMerger};
pub use plan::{structural_signature, structurally_equal, OperatorId, Plan, PlanBuilder};
pub use rewrite::{RewriteEngine, RewriteReport, RuleKind};
