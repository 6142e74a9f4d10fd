use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::time::Instant;

use crate::simulator::{Backtest, BacktestRun, Policy};
use crate::stress::{apply_scenario, ScenarioSpec};

/// Outcome of one (scenario, policy) replay.
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub scenario: String,
    pub run: BacktestRun,
    pub elapsed_ms: u128,
}

/// Runs independent replays on a rayon pool. Replays share the base
/// backtest's read-only inputs; results come back in job order.
pub struct ParallelRunner {
    num_workers: usize,
    pool: Option<ThreadPool>,
    show_progress: bool,
}

impl ParallelRunner {
    pub fn new() -> Self {
        Self::with_workers(num_cpus::get())
    }

    pub fn with_workers(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        info!("Initializing ParallelRunner with {} workers", num_workers);
        let pool = match rayon::ThreadPoolBuilder::new().num_threads(num_workers).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!("Could not build a dedicated thread pool ({}), using the global pool", e);
                None
            }
        };
        Self {
            num_workers,
            pool,
            show_progress: true,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    fn progress(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(len as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        progress
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Every policy over the same inputs.
    pub fn run_policies(&self, backtest: &Backtest<'_>) -> Vec<BacktestRun> {
        let progress = self.progress(Policy::ALL.len());
        let runs = self.install(|| {
            Policy::ALL
                .par_iter()
                .map(|&policy| {
                    let run = backtest.run(policy);
                    progress.inc(1);
                    run
                })
                .collect()
        });
        progress.finish_with_message("Backtest completed");
        runs
    }

    /// Every policy under every scenario. Scenario calls are derived from the
    /// calls inside the base replay window, with the given seed.
    pub fn run_scenarios(
        &self,
        base: &Backtest<'_>,
        scenarios: &[ScenarioSpec],
        seed: u64,
    ) -> Vec<ScenarioRun> {
        let prepared: Vec<(String, Backtest<'_>)> = scenarios
            .iter()
            .map(|spec| {
                let (calls, params) =
                    apply_scenario(&spec.scenario, base.window_calls(), base.params(), seed);
                let backtest = base.clone().with_calls(calls).with_params(params);
                (spec.name.clone(), backtest)
            })
            .collect();

        let jobs: Vec<(usize, Policy)> = (0..prepared.len())
            .flat_map(|i| Policy::ALL.iter().map(move |&p| (i, p)))
            .collect();
        info!(
            "Running {} stress replays ({} scenarios x {} policies)",
            jobs.len(),
            prepared.len(),
            Policy::ALL.len()
        );

        let progress = self.progress(jobs.len());
        let results = self.install(|| {
            jobs.par_iter()
                .map(|&(i, policy)| {
                    let start = Instant::now();
                    let (name, backtest) = &prepared[i];
                    let run = backtest.run(policy);
                    progress.inc(1);
                    ScenarioRun {
                        scenario: name.clone(),
                        run,
                        elapsed_ms: start.elapsed().as_millis(),
                    }
                })
                .collect()
        });
        progress.finish_with_message("Stress tests completed");
        results
    }
}

impl Default for ParallelRunner {
    fn default() -> Self {
        Self::new()
    }
}
