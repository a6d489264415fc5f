//! Parallel fan-out of independent training runs.
//!
//! Every task owns its agent, environment and configuration copy, so the
//! pool only needs isolation, never synchronization.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::info;

use crate::algorithms::rl::config::{AgentConfig, SweepConfig, SweepVariant};
use crate::error::Result;

/// One unit of sweep work: a fully resolved agent configuration and the
/// directory its results go to.
#[derive(Debug, Clone)]
pub struct SweepTask {
    pub variant: SweepVariant,
    pub agent: AgentConfig,
    pub output_dir: PathBuf,
}

/// Expands a sweep grid into tasks rooted at `results_root`.
pub fn plan_sweep(base: &AgentConfig, sweep: &SweepConfig, results_root: &Path) -> Vec<SweepTask> {
    sweep
        .variants
        .iter()
        .map(|variant| SweepTask {
            variant: *variant,
            agent: variant.apply(base),
            output_dir: results_root.join(variant.label(base.action_space.bins)),
        })
        .collect()
}

/// Runs `work` on every task in parallel and joins them all.
///
/// Results come back in task order; one failing task does not stop the
/// others.
pub fn run_all<T, R, F>(tasks: Vec<T>, work: F) -> Vec<Result<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R> + Sync + Send,
{
    let n = tasks.len();
    info!(tasks = n, threads = rayon::current_num_threads(), "starting sweep");
    tasks.into_par_iter().map(work).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn plan_sweep_applies_variants() {
        let base = AgentConfig::default();
        let tasks = plan_sweep(&base, &SweepConfig::default(), Path::new("result"));
        assert_eq!(tasks.len(), 6);
        assert_eq!(tasks[4].agent.k_neighbors, 11);
        assert!(!tasks[4].agent.reward_filter);
        assert_eq!(
            tasks[4].output_dir,
            Path::new("result").join("9_equivalent(11)-0.6,filter(false)")
        );
        // untouched fields come from the base config
        assert_eq!(tasks[4].agent.gamma, base.gamma);
    }

    #[test]
    fn run_all_preserves_order() {
        let results = run_all((0..32).collect(), |i: u64| Ok(i * i));
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..32).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn run_all_isolates_failures() {
        let results = run_all(vec![1, 2, 3], |i: i32| {
            if i == 2 {
                Err(Error::InvalidConfig("boom".to_string()))
            } else {
                Ok(i)
            }
        });
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}
