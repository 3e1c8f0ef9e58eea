//! Error Types
//!
//! One enum per concern. Equality failures never leave the graph model;
//! the others propagate to the caller of the failing operation.

use crate::plan::OperatorId;
use thiserror::Error;

/// Graph edit errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Operator is not part of the plan
    #[error("Operator {0} not found in plan")]
    NotFound(OperatorId),

    /// Slot is already occupied
    #[error("Operator {0} already present in plan")]
    AlreadyPresent(OperatorId),

    /// Edge from an operator to itself
    #[error("Cannot connect operator {0} to itself")]
    SelfLoop(OperatorId),

    /// The plan has no dependency order
    #[error("Plan contains a cycle through operator {0}")]
    Cycle(OperatorId),

    /// Adjacency lists are inconsistent
    #[error("Invalid plan: {0}")]
    Invalid(String),
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Failure while comparing kind-specific operator parameters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EqualityError {
    /// Expression references a column by a name that was never bound
    #[error("Unresolved column reference '{0}'")]
    UnresolvedColumn(String),

    /// Operator parameters are inconsistent
    #[error("Malformed operator: {0}")]
    Malformed(String),
}

/// Result type for parameter comparison
pub type EqualityResult<T> = Result<T, EqualityError>;

/// Errors raised while folding one plan into the merged plan
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// A predecessor was visited after its successor
    #[error("Script '{script}': predecessor {predecessor} of operator {operator} has not been merged")]
    UnresolvedPredecessor {
        script: String,
        operator: OperatorId,
        predecessor: OperatorId,
    },

    /// The visiting order left an operator of the plan out
    #[error("Script '{script}': operator {operator} is missing from the merge order")]
    IncompleteOrder { script: String, operator: OperatorId },

    /// The input plan has no dependency order
    #[error("Script '{script}' is not a DAG: {source}")]
    Cyclic {
        script: String,
        #[source]
        source: GraphError,
    },

    /// Edit of the merged plan failed
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Result type for merge operations
pub type MergeResult<T> = Result<T, MergeError>;

/// Errors raised by the rewrite engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    /// Rules kept reporting changes until the budget ran out
    #[error("Rewrite did not reach a fixpoint after {iterations} iterations")]
    NonTermination { iterations: usize },

    /// Unknown rule name in configuration
    #[error("Unknown rewrite rule '{0}'")]
    UnknownRule(String),

    /// Graph edit failed while transforming
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Result type for rewrite operations
pub type RewriteResult<T> = Result<T, RewriteError>;

/// Errors surfaced by the batch pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Merge failed and skipping was disabled
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// Rewrite engine could not be built or run
    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    /// Merged plan failed validation
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

impl From<figment::Error> for PipelineError {
    fn from(err: figment::Error) -> Self {
        PipelineError::Config(Box::new(err))
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::NotFound(OperatorId::new(3));
        assert_eq!(format!("{err}"), "Operator #3 not found in plan");

        let err = MergeError::UnresolvedPredecessor {
            script: "daily".to_string(),
            operator: OperatorId::new(2),
            predecessor: OperatorId::new(1),
        };
        assert_eq!(
            format!("{err}"),
            "Script 'daily': predecessor #1 of operator #2 has not been merged"
        );

        let err = RewriteError::NonTermination { iterations: 7 };
        assert_eq!(
            format!("{err}"),
            "Rewrite did not reach a fixpoint after 7 iterations"
        );
    }

    #[test]
    fn test_graph_error_converts() {
        let err: MergeError = GraphError::SelfLoop(OperatorId::new(0)).into();
        assert!(matches!(err, MergeError::Graph(GraphError::SelfLoop(_))));

        let err: PipelineError = RewriteError::UnknownRule("x".into()).into();
        assert_eq!(format!("{err}"), "Rewrite error: Unknown rewrite rule 'x'");
    }
}
