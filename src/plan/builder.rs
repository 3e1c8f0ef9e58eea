//! Builder for Plan Construction
//!
//! Fluent API for assembling operator graphs, mostly used by tests and by
//! callers that lower their own representation into a [`Plan`].
//!
//! ## Example
//!
//! ```rust
//! use planshare::ir::{col, int, ComparisonOp, Predicate};
//! use planshare::PlanBuilder;
//!
//! let mut b = PlanBuilder::new("daily");
//! let raw = b.load("logs/day", &["user", "bytes"]);
//! let big = b.filter(raw, Predicate::compare(col(1), ComparisonOp::GreaterThan, int(1024)));
//! b.store(big, "out/big");
//! let plan = b.build().unwrap();
//!
//! assert_eq!(plan.len(), 3);
//! ```

use super::{OperatorId, Plan};
use crate::error::{GraphError, GraphResult};
use crate::ir::{GenerateItem, Operator, OperatorKind, Predicate, SortKey};

/// Builder for constructing Plan instances
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    plan: Plan,
    error: Option<GraphError>,
}

impl PlanBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        PlanBuilder {
            plan: Plan::new(name),
            error: None,
        }
    }

    /// Add `kind` fed by `inputs` (in order)
    pub fn attach(&mut self, kind: OperatorKind, inputs: &[OperatorId]) -> OperatorId {
        let id = self.plan.add(Operator::new(kind));
        for &input in inputs {
            if let Err(e) = self.plan.connect(input, id) {
                self.error.get_or_insert(e);
            }
        }
        id
    }

    pub fn load(&mut self, path: &str, schema: &[&str]) -> OperatorId {
        self.attach(
            OperatorKind::Load {
                path: path.to_string(),
                schema: names(schema),
            },
            &[],
        )
    }

    pub fn filter(&mut self, input: OperatorId, predicate: Predicate) -> OperatorId {
        self.attach(OperatorKind::Filter { predicate }, &[input])
    }

    /// Pure projection of `columns`
    pub fn project(&mut self, input: OperatorId, columns: &[usize], output: &[&str]) -> OperatorId {
        self.attach(OperatorKind::projection(columns, names(output)), &[input])
    }

    pub fn generate(
        &mut self,
        input: OperatorId,
        items: Vec<GenerateItem>,
        output: &[&str],
    ) -> OperatorId {
        self.attach(
            OperatorKind::Generate {
                nested: Vec::new(),
                items,
                output_schema: names(output),
            },
            &[input],
        )
    }

    pub fn join(
        &mut self,
        inputs: &[OperatorId],
        keys: Vec<Vec<usize>>,
        output: &[&str],
    ) -> OperatorId {
        self.attach(
            OperatorKind::Join {
                keys,
                output_schema: names(output),
            },
            inputs,
        )
    }

    pub fn group(
        &mut self,
        inputs: &[OperatorId],
        keys: Vec<Vec<usize>>,
        output: &[&str],
    ) -> OperatorId {
        self.attach(
            OperatorKind::Group {
                keys,
                output_schema: names(output),
            },
            inputs,
        )
    }

    pub fn union(&mut self, inputs: &[OperatorId]) -> OperatorId {
        self.attach(OperatorKind::Union, inputs)
    }

    pub fn distinct(&mut self, input: OperatorId) -> OperatorId {
        self.attach(OperatorKind::Distinct, &[input])
    }

    pub fn sort(&mut self, input: OperatorId, keys: Vec<SortKey>) -> OperatorId {
        self.attach(OperatorKind::Sort { keys }, &[input])
    }

    pub fn limit(&mut self, input: OperatorId, count: u64) -> OperatorId {
        self.attach(OperatorKind::Limit { count }, &[input])
    }

    pub fn store(&mut self, input: OperatorId, path: &str) -> OperatorId {
        self.attach(
            OperatorKind::Store {
                path: path.to_string(),
            },
            &[input],
        )
    }

    /// Set the display alias of an operator
    pub fn alias(&mut self, id: OperatorId, alias: &str) -> &mut Self {
        match self.plan.operator_mut(id) {
            Some(op) => op.alias = Some(alias.to_string()),
            None => {
                self.error.get_or_insert(GraphError::NotFound(id));
            }
        }
        self
    }

    /// `to` must run after `from`
    pub fn soft_link(&mut self, from: OperatorId, to: OperatorId) -> &mut Self {
        if let Err(e) = self.plan.create_soft_link(from, to) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Finish; reports the first edit that failed
    pub fn build(self) -> GraphResult<Plan> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.plan),
        }
    }
}

fn names(cols: &[&str]) -> Vec<String> {
    cols.iter().map(|c| (*c).to_string()).collect()
}
