//! Named simulation setups.

use std::fmt;
use std::str::FromStr;

use sluice_core::config::{ControllerConfig, SimulationConfig};

use crate::deterministic::{BufferSimulation, SimulationError};

/// Pre-built conditions for exercising the controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Fast network and a roomy sink
    Steady,
    /// A sink that fills up long before the period ends
    ConstrainedSink,
    /// Frequent quality switches on the video track
    QualityChurn,
    /// Downloads barely keep up with the top bitrate
    SlowNetwork,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::Steady,
        Scenario::ConstrainedSink,
        Scenario::QualityChurn,
        Scenario::SlowNetwork,
    ];

    /// Simulation settings for this scenario, seeded with `seed`.
    pub fn config(self, seed: u64) -> SimulationConfig {
        let base = match self {
            Scenario::Steady => SimulationConfig::deterministic_testing(),
            Scenario::ConstrainedSink => SimulationConfig::constrained_sink(),
            Scenario::QualityChurn => SimulationConfig {
                quality_switch_rate: 0.5,
                ..SimulationConfig::deterministic_testing()
            },
            Scenario::SlowNetwork => SimulationConfig {
                download_speed: 262_144, // 256 KiB/s
                sink_latency_ms: 50,
                segment_count: 30,
                ..SimulationConfig::default()
            },
        };
        SimulationConfig {
            deterministic_seed: Some(seed),
            ..base
        }
    }

    /// Builds a ready-to-run simulation.
    ///
    /// # Errors
    /// - `SimulationError::InvalidConfig` - The scenario settings are unusable
    pub fn build(
        self,
        seed: u64,
        controller: ControllerConfig,
    ) -> Result<BufferSimulation, SimulationError> {
        BufferSimulation::new(self.config(seed), controller)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Steady => "steady",
            Scenario::ConstrainedSink => "constrained-sink",
            Scenario::QualityChurn => "quality-churn",
            Scenario::SlowNetwork => "slow-network",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == s)
            .ok_or_else(|| format!("Unknown scenario: {s}"))
    }
}
