//! Combine sibling pure projections.
//!
//! ```text
//!        +-> Gen($2, $0) -> ..              +-> Gen($0, $1) -> ..
//! Input -+                   =>  Input -> Gen($2, $0, $1) -+
//!        +-> Gen($0, $1) -> ..              +-> Gen($1, $2) -> ..
//! ```
//!
//! The combined projection selects the union of all sibling columns in
//! first-seen order. Each sibling is replaced by a thin projection over the
//! combined one that re-selects its columns in its original order, so its
//! consumers see the same columns at the same positions. Alias, output
//! names and annotations of a sibling carry over to its thin replacement.
//!
//! Siblings whose shared input is itself a pure projection are skipped; the
//! thin projections produced here would otherwise be combined again on
//! every pass.

use super::sibling_groups;
use crate::error::{GraphError, RewriteResult};
use crate::ir::{Operator, OperatorKind, OperatorTag};
use crate::plan::{OperatorId, Plan};
use std::collections::BTreeSet;
use tracing::debug;

pub fn apply(plan: &mut Plan) -> RewriteResult<BTreeSet<OperatorId>> {
    let mut changed = BTreeSet::new();

    for group in sibling_groups(plan, Some(OperatorTag::Generate)) {
        let projections: Vec<(OperatorId, Vec<usize>)> = group
            .iter()
            .filter_map(|&id| {
                plan.operator(id)
                    .and_then(|op| op.kind.projected_columns())
                    .map(|cols| (id, cols))
            })
            .collect();
        if projections.len() < 2 {
            continue;
        }

        let &[input] = plan.predecessors(projections[0].0) else {
            continue;
        };
        if plan
            .operator(input)
            .is_some_and(|op| op.kind.is_pure_projection())
        {
            continue;
        }

        changed.extend(combine(plan, input, &projections)?);
    }

    Ok(changed)
}

fn combine(
    plan: &mut Plan,
    input: OperatorId,
    projections: &[(OperatorId, Vec<usize>)],
) -> RewriteResult<Vec<OperatorId>> {
    let mut columns: Vec<usize> = Vec::new();
    for (_, cols) in projections {
        for &c in cols {
            if !columns.contains(&c) {
                columns.push(c);
            }
        }
    }

    let input_schema = plan
        .operator(input)
        .and_then(|op| op.kind.declared_schema())
        .map(<[String]>::to_vec)
        .unwrap_or_default();
    let names = columns
        .iter()
        .map(|&c| input_schema.get(c).cloned().unwrap_or_else(|| format!("${c}")))
        .collect();

    let combined = plan.add(OperatorKind::projection(&columns, names));
    plan.connect(input, combined)?;
    let mut created = vec![combined];

    for (sibling, cols) in projections {
        let original = plan
            .operator(*sibling)
            .cloned()
            .ok_or(GraphError::NotFound(*sibling))?;
        let positions: Vec<usize> = cols
            .iter()
            .filter_map(|c| columns.iter().position(|x| x == c))
            .collect();
        let output_schema = original
            .kind
            .declared_schema()
            .map(<[String]>::to_vec)
            .unwrap_or_default();

        let thin = plan.add(Operator {
            kind: OperatorKind::projection(&positions, output_schema),
            alias: original.alias,
            annotations: original.annotations,
        });
        plan.disconnect(input, *sibling);
        plan.replace(*sibling, thin)?;
        plan.connect(combined, thin)?;
        created.push(thin);
    }

    debug!(
        input = %input,
        combined = %combined,
        siblings = projections.len(),
        columns = columns.len(),
        "combined projections"
    );
    Ok(created)
}
