//! # Operator Graph
//!
//! An owned, mutable DAG of [`Operator`]s stored in an arena and addressed by
//! [`OperatorId`] handles. Ids follow creation order and are never reused
//! inside one plan, so "smallest id" is a stable, deterministic tie-break
//! for every component built on top of this module.
//!
//! Two edge relations are kept per node:
//!
//! - **strong** edges: data dependencies; the order of a node's strong
//!   predecessors is significant (join inputs)
//! - **soft** edges: ordering hints that carry no data
//!
//! Neither relation holds parallel edges: connecting an already connected
//! pair is a no-op.
//!
//! ```text
//! Load(f1) ──> Filter(p) ──> Store(s1)
//!                  │
//!                  └──────> Store(s2)
//! ```

pub mod builder;
pub mod equality;

pub use builder::PlanBuilder;
pub use equality::{structural_signature, structurally_equal};

use crate::error::{GraphError, GraphResult};
use crate::ir::Operator;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashSet};
use std::fmt;

/// Stable handle of an operator inside a [`Plan`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OperatorId(u32);

impl OperatorId {
    pub const fn new(index: u32) -> Self {
        OperatorId(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Strong,
    Soft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    op: Operator,
    preds: Vec<OperatorId>,
    succs: Vec<OperatorId>,
    #[serde(default)]
    soft_preds: Vec<OperatorId>,
    #[serde(default)]
    soft_succs: Vec<OperatorId>,
}

impl Node {
    fn new(op: Operator) -> Self {
        Node {
            op,
            preds: Vec::new(),
            succs: Vec::new(),
            soft_preds: Vec::new(),
            soft_succs: Vec::new(),
        }
    }

    fn incoming(&self, kind: EdgeKind) -> &Vec<OperatorId> {
        match kind {
            EdgeKind::Strong => &self.preds,
            EdgeKind::Soft => &self.soft_preds,
        }
    }

    fn outgoing(&self, kind: EdgeKind) -> &Vec<OperatorId> {
        match kind {
            EdgeKind::Strong => &self.succs,
            EdgeKind::Soft => &self.soft_succs,
        }
    }

    fn incoming_mut(&mut self, kind: EdgeKind) -> &mut Vec<OperatorId> {
        match kind {
            EdgeKind::Strong => &mut self.preds,
            EdgeKind::Soft => &mut self.soft_preds,
        }
    }

    fn outgoing_mut(&mut self, kind: EdgeKind) -> &mut Vec<OperatorId> {
        match kind {
            EdgeKind::Strong => &mut self.succs,
            EdgeKind::Soft => &mut self.soft_succs,
        }
    }
}

/// Operator graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    name: String,
    nodes: Vec<Option<Node>>,
}

impl Plan {
    /// Create an empty plan
    pub fn new(name: impl Into<String>) -> Self {
        Plan {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of operators currently in the plan
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: OperatorId) -> bool {
        self.slot(id).is_some()
    }

    pub fn operator(&self, id: OperatorId) -> Option<&Operator> {
        self.slot(id).map(|n| &n.op)
    }

    pub fn operator_mut(&mut self, id: OperatorId) -> Option<&mut Operator> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .map(|n| &mut n.op)
    }

    /// Ids of all operators, ascending
    pub fn ids(&self) -> impl Iterator<Item = OperatorId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| OperatorId(i as u32))
    }

    /// All operators with their ids, ascending
    pub fn operators(&self) -> impl Iterator<Item = (OperatorId, &Operator)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (OperatorId(i as u32), &n.op)))
    }

    /// Insert an operator under a fresh id
    pub fn add(&mut self, op: impl Into<Operator>) -> OperatorId {
        let id = OperatorId(self.nodes.len() as u32);
        self.nodes.push(Some(Node::new(op.into())));
        id
    }

    /// Insert an operator under an explicit id
    pub fn insert_at(&mut self, id: OperatorId, op: impl Into<Operator>) -> GraphResult<()> {
        if self.contains(id) {
            return Err(GraphError::AlreadyPresent(id));
        }
        if self.nodes.len() <= id.index() {
            self.nodes.resize_with(id.index() + 1, || None);
        }
        self.nodes[id.index()] = Some(Node::new(op.into()));
        Ok(())
    }

    /// Detach all edges of an operator and delete it
    pub fn remove(&mut self, id: OperatorId) -> GraphResult<Operator> {
        for kind in [EdgeKind::Strong, EdgeKind::Soft] {
            let node = self.node(id)?;
            let preds = node.incoming(kind).clone();
            let succs = node.outgoing(kind).clone();
            for p in preds {
                self.unlink(kind, p, id);
            }
            for s in succs {
                self.unlink(kind, id, s);
            }
        }
        self.nodes[id.index()]
            .take()
            .map(|n| n.op)
            .ok_or(GraphError::NotFound(id))
    }

    /// Add a strong edge `from -> to`; fails with `GraphError::Cycle` when
    /// `to` already reaches `from`
    pub fn connect(&mut self, from: OperatorId, to: OperatorId) -> GraphResult<()> {
        self.link(EdgeKind::Strong, from, to)
    }

    /// Remove a strong edge; returns whether an edge was removed
    pub fn disconnect(&mut self, from: OperatorId, to: OperatorId) -> bool {
        self.unlink(EdgeKind::Strong, from, to)
    }

    /// Add a soft (ordering-only) edge `from -> to`
    pub fn create_soft_link(&mut self, from: OperatorId, to: OperatorId) -> GraphResult<()> {
        self.link(EdgeKind::Soft, from, to)
    }

    /// Remove a soft edge; returns whether an edge was removed
    pub fn remove_soft_link(&mut self, from: OperatorId, to: OperatorId) -> bool {
        self.unlink(EdgeKind::Soft, from, to)
    }

    pub fn has_edge(&self, from: OperatorId, to: OperatorId) -> bool {
        self.successors(from).contains(&to)
    }

    pub fn predecessors(&self, id: OperatorId) -> &[OperatorId] {
        self.slot(id).map_or(&[], |n| n.preds.as_slice())
    }

    pub fn successors(&self, id: OperatorId) -> &[OperatorId] {
        self.slot(id).map_or(&[], |n| n.succs.as_slice())
    }

    pub fn soft_predecessors(&self, id: OperatorId) -> &[OperatorId] {
        self.slot(id).map_or(&[], |n| n.soft_preds.as_slice())
    }

    pub fn soft_successors(&self, id: OperatorId) -> &[OperatorId] {
        self.slot(id).map_or(&[], |n| n.soft_succs.as_slice())
    }

    /// Operators without strong predecessors
    pub fn sources(&self) -> Vec<OperatorId> {
        self.ids()
            .filter(|&id| self.predecessors(id).is_empty())
            .collect()
    }

    /// Operators without strong successors
    pub fn sinks(&self) -> Vec<OperatorId> {
        self.ids()
            .filter(|&id| self.successors(id).is_empty())
            .collect()
    }

    /// Move every edge of `old` onto `new`, then delete `old`.
    ///
    /// Fails with `GraphError::Cycle`, leaving the plan untouched, when the
    /// rewired strong edges would close a cycle.
    ///
    /// `new` takes over `old`'s position in each successor's predecessor
    /// list. Edges that would become self-loops or parallel edges are
    /// dropped.
    pub fn replace(&mut self, old: OperatorId, new: OperatorId) -> GraphResult<()> {
        self.node(old)?;
        self.node(new)?;
        if old == new {
            return Ok(());
        }
        let node = self.node(old)?;
        let closes_cycle = node
            .outgoing(EdgeKind::Strong)
            .iter()
            .any(|&s| s != new && self.reaches(s, new))
            || node
                .incoming(EdgeKind::Strong)
                .iter()
                .any(|&p| p != new && self.reaches(new, p));
        if closes_cycle {
            return Err(GraphError::Cycle(new));
        }

        for kind in [EdgeKind::Strong, EdgeKind::Soft] {
            let preds = self.node(old)?.incoming(kind).clone();
            for p in preds {
                self.unlink(kind, p, old);
                if p != new {
                    self.link(kind, p, new)?;
                }
            }

            let succs = self.node(old)?.outgoing(kind).clone();
            for s in succs {
                self.node_mut(old)?.outgoing_mut(kind).retain(|&x| x != s);
                if s == new {
                    self.node_mut(new)?.incoming_mut(kind).retain(|&x| x != old);
                    continue;
                }

                let succ_in = self.node_mut(s)?.incoming_mut(kind);
                if succ_in.contains(&new) {
                    succ_in.retain(|&x| x != old);
                } else if let Some(pos) = succ_in.iter().position(|&x| x == old) {
                    succ_in[pos] = new;
                }

                let new_out = self.node_mut(new)?.outgoing_mut(kind);
                if !new_out.contains(&s) {
                    new_out.push(s);
                }
            }
        }

        self.remove(old)?;
        Ok(())
    }

    /// For each predecessor of `id`, all of that predecessor's successors,
    /// unioned and ascending. Sources are siblings of every other source.
    pub fn find_siblings(&self, id: OperatorId) -> Vec<OperatorId> {
        let Some(node) = self.slot(id) else {
            return Vec::new();
        };
        if node.preds.is_empty() {
            return self.sources();
        }
        let siblings: BTreeSet<OperatorId> = node
            .preds
            .iter()
            .flat_map(|&p| self.successors(p).iter().copied())
            .collect();
        siblings.into_iter().collect()
    }

    /// Dependency order over strong and soft edges; among ready operators
    /// the smallest id goes first.
    pub fn topological_order(&self) -> GraphResult<Vec<OperatorId>> {
        self.kahn(true)
    }

    /// Check that adjacency lists are symmetric, reference present
    /// operators, hold no parallel edges, and that strong edges are acyclic.
    pub fn validate(&self) -> GraphResult<()> {
        for (id, node) in self.nodes_iter() {
            for kind in [EdgeKind::Strong, EdgeKind::Soft] {
                let incoming = node.incoming(kind);
                let outgoing = node.outgoing(kind);
                if has_duplicates(incoming) || has_duplicates(outgoing) {
                    return Err(GraphError::Invalid(format!("parallel edge at {id}")));
                }
                for &p in incoming {
                    let pred = self.slot(p).ok_or_else(|| {
                        GraphError::Invalid(format!("{id} has missing predecessor {p}"))
                    })?;
                    if !pred.outgoing(kind).contains(&id) {
                        return Err(GraphError::Invalid(format!(
                            "edge {p} -> {id} is not recorded at {p}"
                        )));
                    }
                }
                for &s in outgoing {
                    let succ = self.slot(s).ok_or_else(|| {
                        GraphError::Invalid(format!("{id} has missing successor {s}"))
                    })?;
                    if !succ.incoming(kind).contains(&id) {
                        return Err(GraphError::Invalid(format!(
                            "edge {id} -> {s} is not recorded at {s}"
                        )));
                    }
                }
            }
        }
        self.kahn(false).map(|_| ())
    }

    /// Structural equality of two operators of this plan
    pub fn is_equal(&self, a: OperatorId, b: OperatorId) -> bool {
        structurally_equal(self, a, self, b)
    }

    /// Copy of the operators in `ids` (keeping their ids) and the edges
    /// among them
    pub fn induced_subplan(&self, ids: &BTreeSet<OperatorId>) -> GraphResult<Plan> {
        let mut sub = Plan::new(format!("{}[sub]", self.name));
        for &id in ids {
            sub.insert_at(id, self.node(id)?.op.clone())?;
        }
        for &id in ids {
            for &s in self.successors(id) {
                if ids.contains(&s) {
                    sub.connect(id, s)?;
                }
            }
            for &s in self.soft_successors(id) {
                if ids.contains(&s) {
                    sub.create_soft_link(id, s)?;
                }
            }
        }
        Ok(sub)
    }

    /// Pretty-printed JSON form of the plan
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a plan from JSON and check its adjacency lists
    pub fn from_json(json: &str) -> GraphResult<Plan> {
        let plan: Plan =
            serde_json::from_str(json).map_err(|e| GraphError::Invalid(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Render the plan from its sinks down to its sources
    pub fn explain(&self) -> String {
        let mut out = format!("Plan '{}' ({} operators)\n", self.name, self.len());
        let mut printed = HashSet::new();
        for sink in self.sinks() {
            self.explain_node(sink, 1, &mut printed, &mut out);
        }
        out
    }

    fn explain_node(
        &self,
        id: OperatorId,
        indent: usize,
        printed: &mut HashSet<OperatorId>,
        out: &mut String,
    ) {
        let prefix = "  ".repeat(indent);
        let Some(node) = self.slot(id) else {
            return;
        };
        let alias = node
            .op
            .alias
            .as_deref()
            .map(|a| format!("{a} = "))
            .unwrap_or_default();

        if !printed.insert(id) {
            out.push_str(&format!("{prefix}{id} {alias}(see above)\n"));
            return;
        }
        out.push_str(&format!("{prefix}{id} {alias}{}", node.op.kind));
        if !node.soft_preds.is_empty() {
            let soft: Vec<String> = node.soft_preds.iter().map(ToString::to_string).collect();
            out.push_str(&format!(" after [{}]", soft.join(", ")));
        }
        out.push('\n');
        for &p in &node.preds {
            self.explain_node(p, indent + 1, printed, out);
        }
    }

    fn kahn(&self, include_soft: bool) -> GraphResult<Vec<OperatorId>> {
        let mut indegree = vec![0usize; self.nodes.len()];
        let mut ready = BinaryHeap::new();
        for (id, node) in self.nodes_iter() {
            let mut degree = node.preds.len();
            if include_soft {
                degree += node.soft_preds.len();
            }
            indegree[id.index()] = degree;
            if degree == 0 {
                ready.push(Reverse(id));
            }
        }

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            let node = self.node(id)?;
            let soft: &[OperatorId] = if include_soft { &node.soft_succs } else { &[] };
            for &s in node.succs.iter().chain(soft) {
                indegree[s.index()] -= 1;
                if indegree[s.index()] == 0 {
                    ready.push(Reverse(s));
                }
            }
        }

        if order.len() < self.len() {
            let stuck = self
                .ids()
                .find(|id| indegree[id.index()] > 0)
                .unwrap_or(OperatorId(0));
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }

    fn link(&mut self, kind: EdgeKind, from: OperatorId, to: OperatorId) -> GraphResult<()> {
        if from == to {
            return Err(GraphError::SelfLoop(from));
        }
        self.node(to)?;
        if self.node(from)?.outgoing(kind).contains(&to) {
            return Ok(());
        }
        if kind == EdgeKind::Strong && self.reaches(to, from) {
            return Err(GraphError::Cycle(from));
        }
        let out = self.node_mut(from)?.outgoing_mut(kind);
        out.push(to);
        self.node_mut(to)?.incoming_mut(kind).push(from);
        Ok(())
    }

    /// Whether a path of strong edges leads from `from` to `to`
    fn reaches(&self, from: OperatorId, to: OperatorId) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if std::mem::replace(&mut seen[id.index()], true) {
                continue;
            }
            stack.extend_from_slice(self.successors(id));
        }
        false
    }

    fn unlink(&mut self, kind: EdgeKind, from: OperatorId, to: OperatorId) -> bool {
        let mut removed = false;
        if let Some(Some(node)) = self.nodes.get_mut(from.index()) {
            let out = node.outgoing_mut(kind);
            let before = out.len();
            out.retain(|&x| x != to);
            removed = out.len() != before;
        }
        if let Some(Some(node)) = self.nodes.get_mut(to.index()) {
            node.incoming_mut(kind).retain(|&x| x != from);
        }
        removed
    }

    fn slot(&self, id: OperatorId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    fn node(&self, id: OperatorId) -> GraphResult<&Node> {
        self.slot(id).ok_or(GraphError::NotFound(id))
    }

    fn node_mut(&mut self, id: OperatorId) -> GraphResult<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(GraphError::NotFound(id))
    }

    fn nodes_iter(&self) -> impl Iterator<Item = (OperatorId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (OperatorId(i as u32), n)))
    }
}

fn has_duplicates(ids: &[OperatorId]) -> bool {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().any(|id| !seen.insert(*id))
}
