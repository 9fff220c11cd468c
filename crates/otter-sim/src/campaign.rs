//! Campaign runner: many seeds, one configuration.
//!
//! Executes every seed in a range, collecting pass/fail results and the first
//! failing seed so it can be replayed with full detail.

use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::warn;

use crate::oracle::{ConvergenceOracle, InvariantViolation, OracleResult};
use crate::{ActionWeights, SimulationConfig, SimulationResult, Simulator, StorageFaults, runtime};

/// Seeds to run and the simulation parameters shared by all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g. `0..100`.
    pub seed_range: Range<u64>,
    pub replicas: usize,
    pub steps: u64,
    pub keys: usize,
    pub delete_percent: u8,
    pub weights: ActionWeights,
    pub faults: StorageFaults,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            replicas: sim.replicas,
            steps: sim.steps,
            keys: sim.keys,
            delete_percent: sim.delete_percent,
            weights: sim.weights,
            faults: sim.faults,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            replicas: self.replicas,
            steps: self.steps,
            keys: self.keys,
            delete_percent: self.delete_percent,
            weights: self.weights,
            faults: self.faults,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the seed range is empty or any simulation
    /// parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

/// Load a campaign from a TOML file; omitted fields take their defaults.
///
/// # Errors
///
/// Fails when the file cannot be read, is not valid TOML, or describes an
/// invalid campaign.
pub fn load_campaign_config(path: &Path) -> Result<CampaignConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = toml::from_str::<CampaignConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid campaign in {}", path.display()))?;
    Ok(config)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

/// Aggregate outcome of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds where faults were injected and branches had to be merged.
    pub interesting_states_reached: usize,
    /// Storage faults injected across all seeds.
    pub faults_injected: u64,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Full detail of one replayed seed.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
    /// Final commit graph in Graphviz DOT, head highlighted.
    pub graphviz: String,
}

/// Run every seed in the campaign.
///
/// # Errors
///
/// Returns an error if config validation fails or a simulation hits a
/// harness error. Invariant violations are reported, not returned as errors.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;
    let runtime = runtime()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
        faults_injected: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let (result, oracle) = run_seed(&runtime, seed, config)?;
        report.faults_injected += result.faults.total();
        if result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }

        if oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: oracle.violations.iter().map(ToString::to_string).collect(),
            });
        }
    }

    Ok(report)
}

/// Run one seed: `Ok(Ok(()))` on pass, `Ok(Err(violations))` on failure.
///
/// # Errors
///
/// The outer error is a harness failure (invalid config, runtime, settle).
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let (_, oracle) = run_seed(&runtime()?, seed, config)?;
    if oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(oracle.violations))
    }
}

/// Replay a single seed with its trace, oracle verdict and graph dump.
///
/// # Errors
///
/// Returns an error when config validation or the simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    let (result, oracle) = run_seed(&runtime()?, seed, config)?;
    let head = result.head();
    let graphviz = result
        .settled
        .graph
        .to_graphviz(head.as_ref(), |diffs| {
            let keys: usize = diffs.iter().map(|diff| diff.operations().len()).sum();
            format!("{keys} key(s)")
        })
        .context("failed to render commit graph")?;
    Ok(DetailedTrace {
        result,
        oracle,
        graphviz,
    })
}

fn run_seed(
    runtime: &Runtime,
    seed: u64,
    config: &CampaignConfig,
) -> Result<(SimulationResult, OracleResult)> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = runtime
        .block_on(simulator.run())
        .with_context(|| format!("seed {seed} aborted"))?;
    let oracle = ConvergenceOracle::check_all(&result.settled);
    Ok((result, oracle))
}
