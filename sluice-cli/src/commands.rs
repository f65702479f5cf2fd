//! CLI command implementations

use anyhow::{Context, bail};
use clap::Subcommand;
use futures::future::join_all;
use sluice_core::SluiceConfig;
use sluice_core::config::SimulationConfig;
use sluice_sim::{BufferSimulation, Scenario, SimulationReport};
use tracing::info;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Play a period through the buffer controllers on simulated time
    Simulate {
        /// Named setup to run
        #[arg(short, long, default_value_t = Scenario::Steady)]
        scenario: Scenario,
        /// Seed of the first run
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Number of runs, seeded consecutively from `seed`
        #[arg(short, long, default_value = "1")]
        runs: u64,
        /// Override the number of segments per track
        #[arg(long)]
        segments: Option<u64>,
        /// Override the sink quota in bytes
        #[arg(long)]
        quota: Option<u64>,
        /// Override the probability of a quality switch per fetch
        #[arg(long)]
        switch_rate: Option<f64>,
    },
    /// List the named scenarios
    Scenarios,
}

/// Settings shared by every run of a `simulate` invocation.
#[derive(Debug, Clone, Copy)]
struct Overrides {
    segments: Option<u64>,
    quota: Option<u64>,
    switch_rate: Option<f64>,
}

impl Overrides {
    fn apply(self, mut config: SimulationConfig) -> SimulationConfig {
        if let Some(segments) = self.segments {
            config.segment_count = segments;
        }
        if let Some(quota) = self.quota {
            config.sink_quota_bytes = quota;
        }
        if let Some(rate) = self.switch_rate {
            config.quality_switch_rate = rate;
        }
        config
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Simulate {
            scenario,
            seed,
            runs,
            segments,
            quota,
            switch_rate,
        } => {
            let overrides = Overrides {
                segments,
                quota,
                switch_rate,
            };
            simulate(scenario, seed, runs, overrides).await
        }
        Commands::Scenarios => {
            list_scenarios();
            Ok(())
        }
    }
}

/// Runs `runs` simulations of `scenario` in parallel and prints each report.
///
/// # Errors
/// - Any run that fails to build, exceeds its time limit or violates
///   invariants too often
/// - Any run that finishes without reaching the end of playback
async fn simulate(
    scenario: Scenario,
    seed: u64,
    runs: u64,
    overrides: Overrides,
) -> anyhow::Result<()> {
    if runs == 0 {
        bail!("At least one run is required");
    }
    if let Some(rate) = overrides.switch_rate {
        if !(0.0..=1.0).contains(&rate) {
            bail!("Switch rate must be within 0..=1, got {rate}");
        }
    }

    let controller = SluiceConfig::from_env().controller;
    info!("Running {} x {} from seed {}", runs, scenario, seed);

    let tasks = (seed..seed.saturating_add(runs)).map(|seed| {
        let config = overrides.apply(scenario.config(seed));
        let controller = controller.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<SimulationReport> {
            let mut sim = BufferSimulation::new(config, controller)
                .with_context(|| format!("Failed to set up seed {seed}"))?;
            let limit = sim.default_time_limit();
            sim.run(limit)
                .with_context(|| format!("Simulation with seed {seed} failed"))
        })
    });

    let mut failures = 0;
    for joined in join_all(tasks).await {
        let report = joined.context("Simulation task panicked")??;
        println!("{}", report.summary());
        if !report.success {
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{failures} of {runs} runs did not play to the end");
    }
    println!("All {runs} runs of {scenario} played to the end");
    Ok(())
}

fn list_scenarios() {
    for scenario in Scenario::ALL {
        let config = scenario.config(0);
        println!(
            "{:<18} {} segments, quota {} bytes, {} B/s download, switch rate {:.2}",
            scenario.as_str(),
            config.segment_count,
            config.sink_quota_bytes,
            config.download_speed,
            config.quality_switch_rate
        );
    }
}
