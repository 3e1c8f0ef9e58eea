//! Structural equality and structural signatures of operators.
//!
//! Two operators are equal when they have the same kind, equal parameters
//! and, position by position, equal strong predecessors. Soft edges,
//! aliases, output names and annotations are not compared.

use super::{OperatorId, Plan};
use crate::ir::OperatorKind;
use std::collections::HashMap;
use tracing::debug;

/// Structural equality of `a` in `left` and `b` in `right`.
///
/// Parameter comparison failures (ill-formed operators) are logged and make
/// the pair unequal.
pub fn structurally_equal(left: &Plan, a: OperatorId, right: &Plan, b: OperatorId) -> bool {
    let mut comparison = Comparison {
        left,
        right,
        same_plan: std::ptr::eq(left, right),
        memo: HashMap::new(),
    };
    comparison.equal(a, b)
}

struct Comparison<'a> {
    left: &'a Plan,
    right: &'a Plan,
    same_plan: bool,
    memo: HashMap<(OperatorId, OperatorId), bool>,
}

impl Comparison<'_> {
    fn equal(&mut self, a: OperatorId, b: OperatorId) -> bool {
        if self.same_plan && a == b {
            return self.left.contains(a);
        }
        if let Some(&known) = self.memo.get(&(a, b)) {
            return known;
        }
        let result = self.compute(a, b);
        self.memo.insert((a, b), result);
        result
    }

    fn compute(&mut self, a: OperatorId, b: OperatorId) -> bool {
        let (left, right) = (self.left, self.right);
        let (Some(op_a), Some(op_b)) = (left.operator(a), right.operator(b)) else {
            return false;
        };

        match op_a.kind.params_equal(&op_b.kind) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                debug!(
                    left_plan = left.name(),
                    left = %a,
                    right_plan = right.name(),
                    right = %b,
                    error = %e,
                    "operator comparison failed, treating as unequal"
                );
                return false;
            }
        }

        let preds_a = left.predecessors(a);
        let preds_b = right.predecessors(b);
        preds_a.len() == preds_b.len()
            && preds_a
                .iter()
                .zip(preds_b)
                .all(|(&pa, &pb)| self.equal(pa, pb))
    }
}

/// Canonical text describing the structure rooted at `id`: kind,
/// parameters (with display names erased) and, recursively, predecessors.
///
/// Operators with equal signatures are structurally equal; ill-formed
/// operators still get a signature.
pub fn structural_signature(plan: &Plan, id: OperatorId) -> String {
    let mut memo = HashMap::new();
    signature_of(plan, id, &mut memo)
}

fn signature_of(plan: &Plan, id: OperatorId, memo: &mut HashMap<OperatorId, String>) -> String {
    if let Some(sig) = memo.get(&id) {
        return sig.clone();
    }
    let Some(op) = plan.operator(id) else {
        return String::from("?");
    };

    let mut sig = format!("{:?}", erase_names(&op.kind));
    let preds = plan.predecessors(id);
    if !preds.is_empty() {
        let inputs: Vec<String> = preds.iter().map(|&p| signature_of(plan, p, memo)).collect();
        sig.push_str(&format!(" <- [{}]", inputs.join(", ")));
    }
    memo.insert(id, sig.clone());
    sig
}

fn erase_names(kind: &OperatorKind) -> OperatorKind {
    let mut kind = kind.clone();
    match &mut kind {
        OperatorKind::Load { schema, .. } => {
            let arity = schema.len();
            *schema = vec![String::new(); arity];
        }
        OperatorKind::Generate { output_schema, .. }
        | OperatorKind::Join { output_schema, .. }
        | OperatorKind::Group { output_schema, .. } => output_schema.clear(),
        _ => {}
    }
    kind
}
