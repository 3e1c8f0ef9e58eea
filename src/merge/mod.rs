//! # Plan Merging
//!
//! Folds independently compiled plans into one shared plan, one plan at a
//! time, so that structurally equivalent operators at the same position are
//! computed once.
//!
//! ## Algorithm Overview
//!
//! For every operator of the incoming plan, in dependency order:
//!
//! 1. **Resolve**: map each strong and soft predecessor to its merged
//!    counterpart (always known thanks to dependency order)
//! 2. **Narrow**: start from all merged operators and intersect with the
//!    merged successors of every resolved predecessor (strong and soft
//!    separately)
//! 3. **Fold**: the first candidate, by ascending id, with exactly the
//!    resolved predecessors, no member from the same script and structural
//!    equality absorbs the operator
//! 4. **Create**: otherwise copy the operator into the merged plan and wire
//!    it to the resolved predecessors
//!
//! ## Example
//!
//! ```text
//! A: Load(f1) -> Filter(p) -> Store(s1)
//! B: Load(f1) -> Filter(p) -> Store(s2)
//!
//! merged: Load(f1) -> Filter(p) -+-> Store(s1)
//!                                +-> Store(s2)
//! ```
//!
//! Merging one plan is all-or-nothing: if it fails, everything created for
//! that plan is rolled back and earlier plans are untouched.

use crate::error::{GraphError, MergeError, MergeResult};
use crate::ir::Operator;
use crate::plan::{structurally_equal, OperatorId, Plan};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Position of a script in merge order
pub type ScriptId = usize;

/// Original operator: script and operator id inside that script's plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MemberRef {
    pub script: ScriptId,
    pub operator: OperatorId,
}

/// One original operator folded into a merged operator
#[derive(Debug, Clone)]
pub struct Member {
    pub origin: MemberRef,
    pub alias: Option<String>,
    pub annotations: BTreeMap<String, String>,
}

/// Equivalence class of original operators sharing one canonical operator
#[derive(Debug, Clone)]
pub struct MergedOperator {
    canonical: OperatorId,
    members: Vec<Member>,
}

impl MergedOperator {
    fn new(canonical: OperatorId, first: Member) -> Self {
        MergedOperator {
            canonical,
            members: vec![first],
        }
    }

    /// Id of the canonical operator in the merged plan
    pub fn canonical(&self) -> OperatorId {
        self.canonical
    }

    /// Members in the order they were folded in; never empty
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Name derived from the first member: its alias, or its id
    pub fn name(&self) -> String {
        match self.members.first() {
            Some(Member {
                alias: Some(alias), ..
            }) => alias.clone(),
            Some(first) => format!("{}@{}", first.origin.operator, first.origin.script),
            None => self.canonical.to_string(),
        }
    }

    /// Scripts contributing a member
    pub fn scripts(&self) -> BTreeSet<ScriptId> {
        self.members.iter().map(|m| m.origin.script).collect()
    }

    pub fn contains_script(&self, script: ScriptId) -> bool {
        self.members.iter().any(|m| m.origin.script == script)
    }

    /// Store an annotation on every member
    pub fn push_annotation(&mut self, key: &str, value: &str) {
        for member in &mut self.members {
            member
                .annotations
                .insert(key.to_string(), value.to_string());
        }
    }

    /// Union of member annotations; on conflicting keys the earliest member
    /// wins
    pub fn pulled_annotations(&self) -> BTreeMap<String, String> {
        let mut pulled = BTreeMap::new();
        for member in &self.members {
            for (k, v) in &member.annotations {
                pulled.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        pulled
    }
}

/// Statistics about merging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Scripts merged successfully
    pub scripts_merged: usize,
    /// Operators read from successfully merged scripts
    pub operators_in: usize,
    /// Operators created in the merged plan
    pub operators_created: usize,
    /// Operators folded into an existing merged operator
    pub operators_folded: usize,
}

/// Result of merging one script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub script: ScriptId,
    pub created: usize,
    pub folded: usize,
}

/// Merged plan plus the equivalence classes that produced it
#[derive(Debug, Clone)]
pub struct MergedPlan {
    pub plan: Plan,
    pub operators: Vec<MergedOperator>,
    pub scripts: Vec<String>,
    pub stats: MergeStats,
}

/// What one merge call changed, for rollback
#[derive(Default)]
struct Journal {
    created: Vec<OperatorId>,
    folded: Vec<(MemberRef, OperatorId)>,
    mapped: Vec<MemberRef>,
}

/// Incremental merger of plans
pub struct PlanMerger {
    plan: Plan,
    merged: BTreeMap<OperatorId, MergedOperator>,
    mapping: HashMap<MemberRef, OperatorId>,
    scripts: Vec<String>,
    stats: MergeStats,
}

impl PlanMerger {
    pub fn new() -> Self {
        Self::with_name("merged")
    }

    /// Create a merger whose output plan is called `name`
    pub fn with_name(name: &str) -> Self {
        PlanMerger {
            plan: Plan::new(name),
            merged: BTreeMap::new(),
            mapping: HashMap::new(),
            scripts: Vec::new(),
            stats: MergeStats::default(),
        }
    }

    /// Merge a whole plan, visiting operators in its dependency order
    pub fn merge_plan(&mut self, name: &str, plan: &Plan) -> MergeResult<MergeOutcome> {
        let order = plan.topological_order().map_err(|source| MergeError::Cyclic {
            script: name.to_string(),
            source,
        })?;
        self.merge_in_order(name, plan, &order)
    }

    /// Merge the operators of `plan` in the caller-supplied `order`.
    ///
    /// Every operator's predecessors must appear before it in `order`,
    /// and every operator of `plan` must appear in it; otherwise the merge
    /// of this plan is rolled back and `MergeError::UnresolvedPredecessor`
    /// or `MergeError::IncompleteOrder` is returned.
    pub fn merge_in_order(
        &mut self,
        name: &str,
        plan: &Plan,
        order: &[OperatorId],
    ) -> MergeResult<MergeOutcome> {
        let script = self.scripts.len();
        self.scripts.push(name.to_string());

        let mut journal = Journal::default();
        let mut created = 0;
        let mut folded = 0;

        for &op in order {
            if self.mapping.contains_key(&MemberRef {
                script,
                operator: op,
            }) {
                continue;
            }
            match self.merge_operator(script, name, plan, op, &mut journal) {
                Ok(true) => folded += 1,
                Ok(false) => created += 1,
                Err(e) => return Err(self.abort(name, op, journal, e)),
            }
        }

        let unvisited = plan.ids().find(|&id| {
            !self.mapping.contains_key(&MemberRef {
                script,
                operator: id,
            })
        });
        if let Some(op) = unvisited {
            let e = MergeError::IncompleteOrder {
                script: name.to_string(),
                operator: op,
            };
            return Err(self.abort(name, op, journal, e));
        }

        self.stats.scripts_merged += 1;
        self.stats.operators_in += plan.len();
        self.stats.operators_created += created;
        self.stats.operators_folded += folded;

        info!(
            script = name,
            created,
            folded,
            merged_size = self.plan.len(),
            "merged script"
        );

        Ok(MergeOutcome {
            script,
            created,
            folded,
        })
    }

    fn abort(
        &mut self,
        name: &str,
        op: OperatorId,
        journal: Journal,
        error: MergeError,
    ) -> MergeError {
        warn!(script = name, operator = %op, error = %error, "merge aborted, rolling back");
        self.rollback(journal);
        self.scripts.pop();
        error
    }

    /// Returns true when the operator was folded into an existing one
    fn merge_operator(
        &mut self,
        script: ScriptId,
        name: &str,
        plan: &Plan,
        op: OperatorId,
        journal: &mut Journal,
    ) -> MergeResult<bool> {
        let operator = plan.operator(op).ok_or(GraphError::NotFound(op))?;
        let key = MemberRef {
            script,
            operator: op,
        };

        let strong = self.resolve_all(script, name, op, plan.predecessors(op))?;
        let soft = self.resolve_all(script, name, op, plan.soft_predecessors(op))?;
        let soft_set: BTreeSet<OperatorId> = soft.iter().copied().collect();

        let mut candidates: BTreeSet<OperatorId> = self.merged.keys().copied().collect();
        for &p in &strong {
            let succs: BTreeSet<OperatorId> = self.plan.successors(p).iter().copied().collect();
            candidates = candidates.intersection(&succs).copied().collect();
        }
        for &p in &soft {
            let succs: BTreeSet<OperatorId> =
                self.plan.soft_successors(p).iter().copied().collect();
            candidates = candidates.intersection(&succs).copied().collect();
        }

        for candidate in candidates {
            if self.try_fold(script, plan, op, candidate, &strong, &soft_set) {
                if let Some(merged) = self.merged.get_mut(&candidate) {
                    merged.members.push(member_of(key, operator));
                }
                self.mapping.insert(key, candidate);
                journal.folded.push((key, candidate));
                journal.mapped.push(key);
                debug!(script = name, operator = %op, into = %candidate, "folded operator");
                return Ok(true);
            }
        }

        let id = self.plan.add(operator.clone());
        journal.created.push(id);
        for &p in &strong {
            self.plan.connect(p, id)?;
        }
        for &p in &soft {
            self.plan.create_soft_link(p, id)?;
        }
        self.merged
            .insert(id, MergedOperator::new(id, member_of(key, operator)));
        self.mapping.insert(key, id);
        journal.mapped.push(key);
        Ok(false)
    }

    /// Whether `op` of `plan` may be folded into merged operator `candidate`.
    ///
    /// Operators of the same script never share a merged operator here;
    /// the `merge_identical` rewrite folds such duplicates later.
    fn try_fold(
        &self,
        script: ScriptId,
        plan: &Plan,
        op: OperatorId,
        candidate: OperatorId,
        strong: &[OperatorId],
        soft: &BTreeSet<OperatorId>,
    ) -> bool {
        if self.plan.predecessors(candidate) != strong {
            return false;
        }
        let candidate_soft: BTreeSet<OperatorId> =
            self.plan.soft_predecessors(candidate).iter().copied().collect();
        if &candidate_soft != soft {
            return false;
        }
        if self
            .merged
            .get(&candidate)
            .map_or(true, |m| m.contains_script(script))
        {
            return false;
        }
        structurally_equal(plan, op, &self.plan, candidate)
    }

    fn resolve_all(
        &self,
        script: ScriptId,
        name: &str,
        op: OperatorId,
        preds: &[OperatorId],
    ) -> MergeResult<Vec<OperatorId>> {
        preds
            .iter()
            .map(|&p| {
                self.mapping
                    .get(&MemberRef {
                        script,
                        operator: p,
                    })
                    .copied()
                    .ok_or_else(|| MergeError::UnresolvedPredecessor {
                        script: name.to_string(),
                        operator: op,
                        predecessor: p,
                    })
            })
            .collect()
    }

    fn rollback(&mut self, journal: Journal) {
        for key in journal.mapped {
            self.mapping.remove(&key);
        }
        for (key, candidate) in journal.folded {
            if let Some(merged) = self.merged.get_mut(&candidate) {
                merged.members.retain(|m| m.origin != key);
            }
        }
        for id in journal.created.into_iter().rev() {
            self.merged.remove(&id);
            if let Err(e) = self.plan.remove(id) {
                warn!(operator = %id, error = %e, "rollback could not remove operator");
            }
        }
    }

    /// Merged counterpart of an original operator
    pub fn resolve(&self, script: ScriptId, operator: OperatorId) -> Option<OperatorId> {
        self.mapping.get(&MemberRef { script, operator }).copied()
    }

    pub fn merged_operator(&self, canonical: OperatorId) -> Option<&MergedOperator> {
        self.merged.get(&canonical)
    }

    pub fn merged_operator_mut(&mut self, canonical: OperatorId) -> Option<&mut MergedOperator> {
        self.merged.get_mut(&canonical)
    }

    /// Merged operators, ascending by canonical id
    pub fn merged_operators(&self) -> impl Iterator<Item = &MergedOperator> + '_ {
        self.merged.values()
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    pub fn script_name(&self, script: ScriptId) -> Option<&str> {
        self.scripts.get(script).map(String::as_str)
    }

    /// Record the contributing script names on every canonical operator
    /// (annotation `scripts`, comma separated)
    pub fn annotate_scripts(&mut self) {
        for merged in self.merged.values() {
            let names: Vec<&str> = merged
                .scripts()
                .into_iter()
                .filter_map(|s| self.scripts.get(s).map(String::as_str))
                .collect();
            if let Some(op) = self.plan.operator_mut(merged.canonical) {
                op.annotations
                    .insert("scripts".to_string(), names.join(","));
            }
        }
    }

    /// Copy pulled member annotations onto the canonical operators; keys
    /// already set on a canonical operator are kept
    pub fn pull_annotations(&mut self) {
        for merged in self.merged.values() {
            if let Some(op) = self.plan.operator_mut(merged.canonical) {
                for (k, v) in merged.pulled_annotations() {
                    op.annotations.entry(k).or_insert(v);
                }
            }
        }
    }

    pub fn finish(self) -> MergedPlan {
        MergedPlan {
            plan: self.plan,
            operators: self.merged.into_values().collect(),
            scripts: self.scripts,
            stats: self.stats,
        }
    }
}

impl Default for PlanMerger {
    fn default() -> Self {
        Self::new()
    }
}

fn member_of(origin: MemberRef, operator: &Operator) -> Member {
    Member {
        origin,
        alias: operator.alias.clone(),
        annotations: operator.annotations.clone(),
    }
}
