//! # Common Subplan Detection
//!
//! Finds the preprocessing that pairs of plans have in common, starting from
//! their sources and following successors while operators stay structurally
//! equal. Results of all pairwise comparisons are aggregated into an index
//! from subplan structure to the scripts it was seen in.
//!
//! ## Algorithm Overview
//!
//! 1. **Seed**: compare every source of A with every source of B
//! 2. **Grow**: on a match, compare the cartesian product of both successor
//!    lists and recurse into matching pairs
//! 3. **Collect**: a match with no matching successors starts a new subplan;
//!    otherwise it joins every subplan found below it
//! 4. **Index**: key each subplan by size and structural signature and
//!    union the contributing scripts; small subplans are pruned
//!
//! ## Example
//!
//! ```text
//! a: Load(f1) -> Filter(p) -> Store(s1)
//! b: Load(f1) -> Filter(p) -> Group(..) -> Store(s2)
//! c: Load(f1) -> Filter(p) -> Distinct -> Store(s3)
//!
//! common: {Load(f1), Filter(p)} in a, b, c
//! ```
//!
//! The matcher only reads its inputs; it has no influence on merging.

use crate::config::MatcherConfig;
use crate::plan::{structural_signature, structurally_equal, OperatorId, Plan};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

/// Total order on subplans: by size, then by structure
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SubplanKey {
    pub size: usize,
    /// Sorted structural signatures of the member operators
    pub signature: Vec<String>,
}

/// Common subplan found between two scripts, expressed in the first
/// script's operator ids
#[derive(Debug, Clone, Serialize)]
pub struct CommonSubplan {
    pub key: SubplanKey,
    pub operators: BTreeSet<OperatorId>,
    /// Operators rendered in dependency order
    pub description: Vec<String>,
    pub scripts: (String, String),
}

impl CommonSubplan {
    pub fn size(&self) -> usize {
        self.key.size
    }
}

/// Aggregated common subplan with every script it occurs in
#[derive(Debug, Clone, Serialize)]
pub struct SubplanEntry {
    pub key: SubplanKey,
    pub description: Vec<String>,
    pub scripts: BTreeSet<String>,
    /// Pairwise matches that reported this subplan
    pub occurrences: usize,
}

impl SubplanEntry {
    pub fn size(&self) -> usize {
        self.key.size
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        let scripts: Vec<&str> = self.scripts.iter().map(String::as_str).collect();
        format!(
            "{} operators [{}] shared by {} scripts: {}",
            self.key.size,
            self.description.join(" -> "),
            self.scripts.len(),
            scripts.join(", ")
        )
    }
}

impl fmt::Display for SubplanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Subplan structure -> contributing scripts
#[derive(Debug, Clone, Default)]
pub struct CommonSubplanIndex {
    min_size: usize,
    entries: BTreeMap<SubplanKey, SubplanEntry>,
}

impl CommonSubplanIndex {
    pub fn new(min_size: usize) -> Self {
        CommonSubplanIndex {
            min_size,
            entries: BTreeMap::new(),
        }
    }

    /// Fold one pairwise result into the index
    pub fn record(&mut self, subplan: &CommonSubplan) {
        let entry = self
            .entries
            .entry(subplan.key.clone())
            .or_insert_with(|| SubplanEntry {
                key: subplan.key.clone(),
                description: subplan.description.clone(),
                scripts: BTreeSet::new(),
                occurrences: 0,
            });
        entry.scripts.insert(subplan.scripts.0.clone());
        entry.scripts.insert(subplan.scripts.1.clone());
        entry.occurrences += 1;
    }

    /// Entries at or above the minimum size, largest first
    pub fn report(&self) -> Vec<&SubplanEntry> {
        self.entries
            .values()
            .rev()
            .filter(|e| e.size() >= self.min_size)
            .collect()
    }

    /// Free-text summaries of [`report`](Self::report)
    pub fn summaries(&self) -> Vec<String> {
        self.report().into_iter().map(SubplanEntry::summary).collect()
    }

    /// Number of reportable entries
    pub fn len(&self) -> usize {
        self.report().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pairwise common-subplan matcher
pub struct SubplanMatcher {
    min_subplan_size: usize,
}

impl SubplanMatcher {
    pub fn new() -> Self {
        SubplanMatcher {
            min_subplan_size: 2,
        }
    }

    pub fn from_config(config: &MatcherConfig) -> Self {
        SubplanMatcher {
            min_subplan_size: config.min_subplan_size,
        }
    }

    /// Set the smallest subplan size kept in indexes built by
    /// [`analyze`](Self::analyze)
    pub fn set_min_size(&mut self, size: usize) {
        self.min_subplan_size = size;
    }

    /// Common subplans of two plans, deduplicated and ordered by key
    pub fn find_common(
        &self,
        name_a: &str,
        a: &Plan,
        name_b: &str,
        b: &Plan,
    ) -> Vec<CommonSubplan> {
        let mut search = Search {
            a,
            b,
            memo: HashMap::new(),
        };

        let mut found: BTreeSet<BTreeSet<OperatorId>> = BTreeSet::new();
        for sa in a.sources() {
            for sb in b.sources() {
                if structurally_equal(a, sa, b, sb) {
                    found.extend(search.grow(sa, sb));
                }
            }
        }

        let mut subplans: Vec<CommonSubplan> = found
            .into_iter()
            .map(|operators| describe(a, operators, name_a, name_b))
            .collect();
        subplans.sort_by(|x, y| x.key.cmp(&y.key));

        debug!(
            left = name_a,
            right = name_b,
            found = subplans.len(),
            "compared plans"
        );
        subplans
    }

    /// Compare every pair of scripts (in submission order) and index the
    /// results
    pub fn analyze(&self, scripts: &[(&str, &Plan)]) -> CommonSubplanIndex {
        let mut index = CommonSubplanIndex::new(self.min_subplan_size);
        for (i, (name_a, a)) in scripts.iter().enumerate() {
            for (name_b, b) in &scripts[i + 1..] {
                for subplan in self.find_common(name_a, a, name_b, b) {
                    index.record(&subplan);
                }
            }
        }
        index
    }
}

impl Default for SubplanMatcher {
    fn default() -> Self {
        Self::new()
    }
}

struct Search<'a> {
    a: &'a Plan,
    b: &'a Plan,
    memo: HashMap<(OperatorId, OperatorId), Vec<BTreeSet<OperatorId>>>,
}

impl Search<'_> {
    /// Subplans rooted at the matched pair `(x, y)`, in `a`'s ids
    fn grow(&mut self, x: OperatorId, y: OperatorId) -> Vec<BTreeSet<OperatorId>> {
        if let Some(known) = self.memo.get(&(x, y)) {
            return known.clone();
        }

        let (a, b) = (self.a, self.b);
        let mut below = Vec::new();
        for &sx in a.successors(x) {
            for &sy in b.successors(y) {
                if structurally_equal(a, sx, b, sy) {
                    below.extend(self.grow(sx, sy));
                }
            }
        }

        let result = if below.is_empty() {
            vec![BTreeSet::from([x])]
        } else {
            for subplan in &mut below {
                subplan.insert(x);
            }
            below
        };
        self.memo.insert((x, y), result.clone());
        result
    }
}

fn describe(plan: &Plan, operators: BTreeSet<OperatorId>, left: &str, right: &str) -> CommonSubplan {
    let mut signature: Vec<String> = operators
        .iter()
        .map(|&id| structural_signature(plan, id))
        .collect();
    signature.sort();

    let description = plan
        .induced_subplan(&operators)
        .and_then(|sub| sub.topological_order().map(|order| (sub, order)))
        .map(|(sub, order)| {
            order
                .into_iter()
                .filter_map(|id| sub.operator(id).map(|op| op.kind.to_string()))
                .collect()
        })
        .unwrap_or_default();

    CommonSubplan {
        key: SubplanKey {
            size: operators.len(),
            signature,
        },
        operators,
        description,
        scripts: (left.to_string(), right.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{col, int, ComparisonOp, Predicate};
    use crate::plan::PlanBuilder;

    fn prefix(b: &mut PlanBuilder) -> OperatorId {
        let l = b.load("f1", &["a", "b"]);
        b.filter(l, Predicate::compare(col(0), ComparisonOp::GreaterThan, int(5)))
    }

    #[test]
    fn test_shared_prefix_between_two_plans() {
        let mut b = PlanBuilder::new("a");
        let f = prefix(&mut b);
        b.store(f, "s1");
        let a = b.build().unwrap();

        let mut b = PlanBuilder::new("b");
        let f = prefix(&mut b);
        b.distinct(f);
        let other = b.build().unwrap();

        let found = SubplanMatcher::new().find_common("a", &a, "b", &other);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].size(), 2);
        assert!(found[0].description[0].starts_with("Load(f1)"));
        assert_eq!(found[0].description[1], "Filter($0 > 5)");
        assert_eq!(found[0].scripts, ("a".to_string(), "b".to_string()));
    }

    #[test]
    fn test_no_common_sources() {
        let mut b = PlanBuilder::new("a");
        b.load("f1", &["a"]);
        let a = b.build().unwrap();
        let mut b = PlanBuilder::new("b");
        b.load("f2", &["a"]);
        let other = b.build().unwrap();

        assert!(SubplanMatcher::new()
            .find_common("a", &a, "b", &other)
            .is_empty());
    }

    #[test]
    fn test_branches_yield_separate_subplans() {
        let mut b = PlanBuilder::new("a");
        let l = b.load("f1", &["a"]);
        b.distinct(l);
        b.limit(l, 10);
        let a = b.build().unwrap();

        let found = SubplanMatcher::new().find_common("a", &a, "a2", &a);
        let sizes: Vec<usize> = found.iter().map(CommonSubplan::size).collect();
        assert_eq!(sizes, vec![2, 2]);
    }

    #[test]
    fn test_index_prunes_single_operators() {
        let mut b = PlanBuilder::new("a");
        let l = b.load("f1", &["a"]);
        b.store(l, "x");
        let a = b.build().unwrap();
        let mut b = PlanBuilder::new("b");
        let l = b.load("f1", &["a"]);
        b.store(l, "y");
        let other = b.build().unwrap();

        let index = SubplanMatcher::new().analyze(&[("a", &a), ("b", &other)]);
        assert!(index.is_empty());

        let mut matcher = SubplanMatcher::new();
        matcher.set_min_size(1);
        let index = matcher.analyze(&[("a", &a), ("b", &other)]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_summary() {
        let mut b = PlanBuilder::new("a");
        let f = prefix(&mut b);
        b.store(f, "s1");
        let a = b.build().unwrap();

        let mut b = PlanBuilder::new("b");
        let f = prefix(&mut b);
        b.store(f, "s2");
        let other = b.build().unwrap();

        let index = SubplanMatcher::new().analyze(&[("a", &a), ("b", &other)]);
        let summaries = index.summaries();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].starts_with("2 operators [Load(f1)"));
        assert!(summaries[0].ends_with("-> Filter($0 > 5)] shared by 2 scripts: a, b"));
    }
}
