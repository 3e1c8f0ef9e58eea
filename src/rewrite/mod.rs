//! # Rule-Based Rewriting
//!
//! Local rewrites of a (merged) plan, applied to fixpoint:
//!
//! - Merge identical: structurally equal siblings collapse into the one
//!   with the smallest id
//! - Combine projections: sibling pure projections over one input become a
//!   single projection feeding thin per-sibling re-selections
//! - Combine filters: sibling filters over one input are detected only
//!
//! Every rule works on **sibling groups**: operators with the same ordered
//! list of strong predecessors, optionally restricted to one operator kind.
//!
//! Rule sets run in declared order; rules inside a set run in declared
//! order too. When any rule changed the plan during a pass, the whole
//! sequence runs again.
//!
//! ```text
//! merged Plan -> [merge_identical] -> [combine_projections, combine_filters] -+
//!                      ^                                                      |
//!                      +---------------------- changed -----------------------+
//! ```

pub mod combine_filters;
pub mod combine_projections;
pub mod merge_identical;

use crate::config::RewriteConfig;
use crate::error::{RewriteError, RewriteResult};
use crate::ir::OperatorTag;
use crate::plan::{OperatorId, Plan};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// The fixed catalogue of rewrite rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RuleKind {
    MergeIdentical,
    CombineProjections,
    CombineFilters,
}

impl RuleKind {
    pub const ALL: [RuleKind; 3] = [
        RuleKind::MergeIdentical,
        RuleKind::CombineProjections,
        RuleKind::CombineFilters,
    ];

    /// Name used in configuration files
    pub fn name(self) -> &'static str {
        match self {
            RuleKind::MergeIdentical => "merge_identical",
            RuleKind::CombineProjections => "combine_projections",
            RuleKind::CombineFilters => "combine_filters",
        }
    }

    /// Operator kind the rule's sibling groups are restricted to
    pub fn target(self) -> Option<OperatorTag> {
        match self {
            RuleKind::MergeIdentical => None,
            RuleKind::CombineProjections => Some(OperatorTag::Generate),
            RuleKind::CombineFilters => Some(OperatorTag::Filter),
        }
    }

    /// Run the rule once over `plan`; returns created or mutated operators
    pub fn apply(self, plan: &mut Plan) -> RewriteResult<BTreeSet<OperatorId>> {
        match self {
            RuleKind::MergeIdentical => merge_identical::apply(plan),
            RuleKind::CombineProjections => combine_projections::apply(plan),
            RuleKind::CombineFilters => combine_filters::apply(plan),
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuleKind {
    type Err = RewriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleKind::ALL
            .into_iter()
            .find(|rule| rule.name() == s.trim())
            .ok_or_else(|| RewriteError::UnknownRule(s.to_string()))
    }
}

/// Sibling groups of `plan` with more than one member, each ascending by id.
///
/// Members share the same ordered predecessor list (sources form one group)
/// and, when `target` is set, the same operator kind. Every operator is in
/// at most one group.
pub fn sibling_groups(plan: &Plan, target: Option<OperatorTag>) -> Vec<Vec<OperatorId>> {
    let wanted = |id: OperatorId| {
        target.map_or(true, |tag| {
            plan.operator(id).is_some_and(|op| op.tag() == tag)
        })
    };

    let mut visited = HashSet::new();
    let mut groups = Vec::new();
    for id in plan.ids() {
        if visited.contains(&id) || !wanted(id) {
            continue;
        }
        let preds = plan.predecessors(id);
        let group: Vec<OperatorId> = plan
            .find_siblings(id)
            .into_iter()
            .filter(|&s| !visited.contains(&s) && wanted(s) && plan.predecessors(s) == preds)
            .collect();
        visited.extend(group.iter().copied());
        if group.len() > 1 {
            groups.push(group);
        }
    }
    groups
}

/// One rule invocation that changed the plan
#[derive(Debug, Clone, Serialize)]
pub struct RuleApplication {
    pub iteration: usize,
    pub rule: RuleKind,
    pub changed: BTreeSet<OperatorId>,
}

/// One rule invocation that failed and was discarded
#[derive(Debug, Clone)]
pub struct RuleFailure {
    pub iteration: usize,
    pub rule: RuleKind,
    pub error: RewriteError,
}

/// Outcome of a rewrite run
#[derive(Debug, Clone, Default)]
pub struct RewriteReport {
    /// Passes over all rule sets, including the final unchanged pass
    pub iterations: usize,
    pub applications: Vec<RuleApplication>,
    pub failures: Vec<RuleFailure>,
    pub operators_before: usize,
    pub operators_after: usize,
}

impl RewriteReport {
    pub fn changed(&self) -> bool {
        !self.applications.is_empty()
    }

    /// Number of successful applications of `rule`
    pub fn applied(&self, rule: RuleKind) -> usize {
        self.applications.iter().filter(|a| a.rule == rule).count()
    }
}

/// Fixpoint driver over a declared sequence of rule sets
#[derive(Debug, Clone)]
pub struct RewriteEngine {
    rule_sets: Vec<Vec<RuleKind>>,
    max_iterations: usize,
}

impl RewriteEngine {
    /// Engine with the default rule sets and iteration budget
    pub fn new() -> Self {
        RewriteEngine {
            rule_sets: vec![
                vec![RuleKind::MergeIdentical],
                vec![RuleKind::CombineProjections, RuleKind::CombineFilters],
            ],
            max_iterations: 32,
        }
    }

    pub fn with_rule_sets(rule_sets: Vec<Vec<RuleKind>>, max_iterations: usize) -> Self {
        RewriteEngine {
            rule_sets,
            max_iterations,
        }
    }

    /// Build from configuration, resolving rule names
    pub fn from_config(config: &RewriteConfig) -> RewriteResult<Self> {
        let rule_sets = config
            .rule_sets
            .iter()
            .map(|set| set.iter().map(|name| name.parse()).collect())
            .collect::<RewriteResult<Vec<Vec<RuleKind>>>>()?;
        Ok(Self::with_rule_sets(rule_sets, config.max_iterations))
    }

    pub fn rule_sets(&self) -> &[Vec<RuleKind>] {
        &self.rule_sets
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Rewrite `plan` in place until no rule reports a change.
    ///
    /// Each rule runs on a copy of the plan that is committed only when the
    /// rule succeeds, so a failing rule leaves the plan as it was. When the
    /// iteration budget runs out the partially reduced, valid plan is kept
    /// and `RewriteError::NonTermination` is returned.
    pub fn run(&self, plan: &mut Plan) -> RewriteResult<RewriteReport> {
        let mut report = RewriteReport {
            operators_before: plan.len(),
            ..RewriteReport::default()
        };

        for iteration in 1..=self.max_iterations {
            let mut changed = false;

            for rule in self.rule_sets.iter().flatten().copied() {
                let mut candidate = plan.clone();
                match rule.apply(&mut candidate) {
                    Ok(ops) if ops.is_empty() => {}
                    Ok(ops) => {
                        debug!(iteration, rule = %rule, changed = ops.len(), "rule applied");
                        *plan = candidate;
                        changed = true;
                        report.applications.push(RuleApplication {
                            iteration,
                            rule,
                            changed: ops,
                        });
                    }
                    Err(error) => {
                        warn!(iteration, rule = %rule, error = %error, "rule failed, skipping");
                        report.failures.push(RuleFailure {
                            iteration,
                            rule,
                            error,
                        });
                    }
                }
            }

            report.iterations = iteration;
            if !changed {
                report.operators_after = plan.len();
                info!(
                    iterations = iteration,
                    before = report.operators_before,
                    after = report.operators_after,
                    "rewrite reached fixpoint"
                );
                return Ok(report);
            }
        }

        warn!(
            iterations = self.max_iterations,
            operators = plan.len(),
            "rewrite budget exhausted"
        );
        Err(RewriteError::NonTermination {
            iterations: self.max_iterations,
        })
    }
}

impl Default for RewriteEngine {
    fn default() -> Self {
        Self::new()
    }
}
