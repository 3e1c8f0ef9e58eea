//! Batch optimisation: matcher report, merge and rewrite of a set of
//! compiled scripts, driven by [`Config`].
//!
//! ```text
//! scripts --+--> [SubplanMatcher] --> common subplan report
//!           |
//!           +--> [PlanMerger] --> merged Plan --> [RewriteEngine] --> reduced Plan
//! ```
//!
//! Scripts are merged in submission order. A script that fails to merge is
//! rolled back, recorded and skipped unless `merge.skip_failed_scripts` is
//! off. A rewrite that does not reach a fixpoint is recorded as well; the
//! plan it leaves behind is still valid.

use crate::config::Config;
use crate::error::{MergeError, PipelineError, PipelineResult, RewriteError};
use crate::matcher::{CommonSubplanIndex, SubplanMatcher};
use crate::merge::{MergeStats, MergedOperator, PlanMerger};
use crate::plan::Plan;
use crate::rewrite::{RewriteEngine, RewriteReport};
use tracing::{info, warn};

/// A compiled script handed over for optimisation
#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    pub plan: Plan,
}

impl Script {
    pub fn new(name: impl Into<String>, plan: Plan) -> Self {
        Script {
            name: name.into(),
            plan,
        }
    }
}

/// A script that was left out of the merged plan
#[derive(Debug, Clone)]
pub struct ScriptFailure {
    pub script: String,
    pub error: MergeError,
}

/// Everything a batch run produces
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Merged and rewritten plan
    pub plan: Plan,
    /// Equivalence classes built while merging, in merged-plan ids before
    /// rewriting
    pub merged: Vec<MergedOperator>,
    /// Names of the scripts that made it into the plan, in merge order
    pub scripts: Vec<String>,
    pub merge_stats: MergeStats,
    pub failures: Vec<ScriptFailure>,
    /// Absent when rewriting is disabled or did not finish
    pub rewrite: Option<RewriteReport>,
    pub rewrite_error: Option<RewriteError>,
    /// Absent when the matcher is disabled
    pub common_subplans: Option<CommonSubplanIndex>,
}

/// Configured batch pipeline
pub struct BatchOptimizer {
    config: Config,
    engine: Option<RewriteEngine>,
    matcher: Option<SubplanMatcher>,
}

impl BatchOptimizer {
    /// Validate the configuration and set up the pipeline stages
    pub fn new(config: Config) -> PipelineResult<Self> {
        let engine = if config.rewrite.enabled {
            Some(RewriteEngine::from_config(&config.rewrite)?)
        } else {
            None
        };
        let matcher = config
            .matcher
            .enabled
            .then(|| SubplanMatcher::from_config(&config.matcher));

        Ok(BatchOptimizer {
            config,
            engine,
            matcher,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(&self, scripts: &[Script]) -> PipelineResult<BatchOutcome> {
        let common_subplans = self.matcher.as_ref().map(|matcher| {
            let pairs: Vec<(&str, &Plan)> = scripts
                .iter()
                .map(|s| (s.name.as_str(), &s.plan))
                .collect();
            matcher.analyze(&pairs)
        });

        let mut merger = PlanMerger::with_name(&self.config.merge.plan_name);
        let mut failures = Vec::new();
        for script in scripts {
            if let Err(error) = merger.merge_plan(&script.name, &script.plan) {
                if !self.config.merge.skip_failed_scripts {
                    return Err(PipelineError::Merge(error));
                }
                warn!(script = %script.name, error = %error, "skipping script");
                failures.push(ScriptFailure {
                    script: script.name.clone(),
                    error,
                });
            }
        }
        merger.annotate_scripts();
        let merged = merger.finish();
        let mut plan = merged.plan;

        let (rewrite, rewrite_error) = match &self.engine {
            Some(engine) => match engine.run(&mut plan) {
                Ok(report) => (Some(report), None),
                Err(e) => {
                    warn!(error = %e, "rewrite stopped early");
                    (None, Some(e))
                }
            },
            None => (None, None),
        };
        plan.validate()?;

        info!(
            scripts = scripts.len(),
            failed = failures.len(),
            operators_in = merged.stats.operators_in,
            operators_out = plan.len(),
            "batch optimised"
        );

        Ok(BatchOutcome {
            plan,
            merged: merged.operators,
            scripts: merged.scripts,
            merge_stats: merged.stats,
            failures,
            rewrite,
            rewrite_error,
            common_subplans,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::plan::PlanBuilder;

    fn script(name: &str, out: &str) -> Script {
        let mut b = PlanBuilder::new(name);
        let l = b.load("f1", &["a"]);
        let d = b.distinct(l);
        b.store(d, out);
        Script::new(name, b.build().unwrap())
    }

    #[test]
    fn test_disabled_stages() {
        let mut config = Config::default();
        config.rewrite.enabled = false;
        config.matcher.enabled = false;

        let outcome = BatchOptimizer::new(config)
            .unwrap()
            .run(&[script("a", "x"), script("b", "y")])
            .unwrap();

        assert_eq!(outcome.plan.len(), 4);
        assert!(outcome.rewrite.is_none());
        assert!(outcome.common_subplans.is_none());
        assert_eq!(outcome.scripts, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_unknown_rule_rejected_up_front() {
        let mut config = Config::default();
        config.rewrite.rule_sets = vec![vec!["nope".to_string()]];
        assert!(matches!(
            BatchOptimizer::new(config),
            Err(PipelineError::Rewrite(RewriteError::UnknownRule(_)))
        ));
    }
}
