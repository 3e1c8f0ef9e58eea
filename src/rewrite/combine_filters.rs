//! Sibling filter detection.
//!
//! Filters over the same input are candidates for combination (one filter
//! subsuming another). No combination is performed yet: the rule logs the
//! candidates and never reports a change.

use super::sibling_groups;
use crate::error::RewriteResult;
use crate::ir::OperatorTag;
use crate::plan::{OperatorId, Plan};
use std::collections::BTreeSet;
use tracing::debug;

pub fn apply(plan: &mut Plan) -> RewriteResult<BTreeSet<OperatorId>> {
    for group in candidates(plan) {
        debug!(
            input = %plan.predecessors(group[0])[0],
            filters = group.len(),
            "sibling filters left uncombined"
        );
    }
    Ok(BTreeSet::new())
}

/// Groups of at least two filters sharing exactly one input
pub fn candidates(plan: &Plan) -> Vec<Vec<OperatorId>> {
    sibling_groups(plan, Some(OperatorTag::Filter))
        .into_iter()
        .filter(|group| plan.predecessors(group[0]).len() == 1)
        .collect()
}
