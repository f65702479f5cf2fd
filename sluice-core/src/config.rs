//! Centralized configuration for Sluice.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

/// Central configuration for all Sluice components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct SluiceConfig {
    pub controller: ControllerConfig,
    pub simulation: SimulationConfig,
}

/// Buffer admission controller tuning.
///
/// Controls stall detection, cross-track balancing and the target buffer
/// used until a representation supplies its own.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Level below which a track is always reported as short of buffer
    pub stall_threshold_secs: f64,
    /// Multiple of the target buffer a track may lead the least buffered track by
    pub outrun_factor: f64,
    /// Lower bound applied when deriving the target from manifest values
    pub default_min_buffer_time_secs: f64,
    /// Target buffer in force before the first representation update
    pub initial_target_buffer_secs: f64,
    /// Capacity of the controller command channel
    pub command_channel_capacity: usize,
    /// Capacity of the signal bus
    pub signal_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            stall_threshold_secs: 0.5,
            outrun_factor: 2.0,
            default_min_buffer_time_secs: 8.0,
            initial_target_buffer_secs: 8.0,
            command_channel_capacity: 100,
            signal_capacity: 256,
        }
    }
}

/// Simulation mode configuration for testing and development.
///
/// Controls the simulated sink and playback used for deterministic runs.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Deterministic seed for reproducible simulations
    pub deterministic_seed: Option<u64>,
    /// Sink capacity in bytes before appends are rejected
    pub sink_quota_bytes: u64,
    /// Simulated latency of a sink append or remove in milliseconds
    pub sink_latency_ms: u64,
    /// Simulated segment duration in seconds
    pub segment_duration_secs: f64,
    /// Number of media segments per track
    pub segment_count: u64,
    /// Simulated download throughput in bytes per second
    pub download_speed: u64,
    /// Probability that a fetched segment triggers a quality switch
    pub quality_switch_rate: f64,
    /// Number of quality levels available per track
    pub quality_levels: u32,
    /// Video bytes per media second at the lowest quality; higher levels scale linearly
    pub bitrate_bytes_per_sec: u64,
    /// Fetching pauses once this much media is buffered ahead of playback
    pub max_buffer_ahead_secs: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            sink_quota_bytes: 16 * 1024 * 1024, // 16 MiB
            sink_latency_ms: 20,
            segment_duration_secs: 2.0,
            segment_count: 60,
            download_speed: 1_048_576, // 1 MB/s
            quality_switch_rate: 0.05,
            quality_levels: 4,
            bitrate_bytes_per_sec: 65_536, // 64 KiB/s
            max_buffer_ahead_secs: 30.0,
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration for deterministic testing.
    pub fn deterministic_testing() -> Self {
        Self {
            deterministic_seed: Some(42), // Fixed seed for reproducible tests
            sink_latency_ms: 0,           // No latency for fast tests
            segment_count: 20,            // Fewer segments for faster tests
            download_speed: 10_485_760,   // 10 MB/s for fast downloads
            ..Default::default()
        }
    }

    /// Creates a configuration where the sink fills up quickly.
    pub fn constrained_sink() -> Self {
        Self {
            deterministic_seed: Some(7),
            sink_quota_bytes: 2 * 1024 * 1024, // 2 MiB
            segment_count: 120,
            quality_levels: 2,
            ..Default::default()
        }
    }
}

impl SluiceConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Controller configuration overrides
        if let Ok(threshold) = std::env::var("SLUICE_STALL_THRESHOLD") {
            if let Ok(seconds) = threshold.parse::<f64>() {
                config.controller.stall_threshold_secs = seconds;
            }
        }

        if let Ok(factor) = std::env::var("SLUICE_OUTRUN_FACTOR") {
            if let Ok(value) = factor.parse::<f64>() {
                config.controller.outrun_factor = value;
            }
        }

        if let Ok(min_buffer) = std::env::var("SLUICE_DEFAULT_MIN_BUFFER_TIME") {
            if let Ok(seconds) = min_buffer.parse::<f64>() {
                config.controller.default_min_buffer_time_secs = seconds;
                config.controller.initial_target_buffer_secs = seconds;
            }
        }

        // Simulation configuration overrides
        if let Ok(seed) = std::env::var("SLUICE_SIMULATION_SEED") {
            if let Ok(seed_value) = seed.parse::<u64>() {
                config.simulation.deterministic_seed = Some(seed_value);
            }
        }

        if let Ok(quota) = std::env::var("SLUICE_SINK_QUOTA_BYTES") {
            if let Ok(bytes) = quota.parse::<u64>() {
                config.simulation.sink_quota_bytes = bytes;
            }
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            simulation: SimulationConfig::deterministic_testing(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = SluiceConfig::default();

        assert_eq!(config.controller.stall_threshold_secs, 0.5);
        assert_eq!(config.controller.outrun_factor, 2.0);
        assert_eq!(config.controller.default_min_buffer_time_secs, 8.0);
        assert_eq!(config.controller.command_channel_capacity, 100);
        assert_eq!(config.simulation.deterministic_seed, None);
    }

    #[test]
    fn test_simulation_config_presets() {
        let testing_config = SimulationConfig::deterministic_testing();
        assert_eq!(testing_config.deterministic_seed, Some(42));
        assert_eq!(testing_config.sink_latency_ms, 0);

        let constrained = SimulationConfig::constrained_sink();
        assert!(constrained.sink_quota_bytes < SimulationConfig::default().sink_quota_bytes);
        assert!(constrained.deterministic_seed.is_some());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("SLUICE_STALL_THRESHOLD", "1.5");
            std::env::set_var("SLUICE_OUTRUN_FACTOR", "3");
            std::env::set_var("SLUICE_DEFAULT_MIN_BUFFER_TIME", "12");
            std::env::set_var("SLUICE_SIMULATION_SEED", "12345");
            std::env::set_var("SLUICE_SINK_QUOTA_BYTES", "4096");
        }

        let config = SluiceConfig::from_env();

        assert_eq!(config.controller.stall_threshold_secs, 1.5);
        assert_eq!(config.controller.outrun_factor, 3.0);
        assert_eq!(config.controller.default_min_buffer_time_secs, 12.0);
        assert_eq!(config.controller.initial_target_buffer_secs, 12.0);
        assert_eq!(config.simulation.deterministic_seed, Some(12345));
        assert_eq!(config.simulation.sink_quota_bytes, 4096);

        // Cleanup
        unsafe {
            std::env::remove_var("SLUICE_STALL_THRESHOLD");
            std::env::remove_var("SLUICE_OUTRUN_FACTOR");
            std::env::remove_var("SLUICE_DEFAULT_MIN_BUFFER_TIME");
            std::env::remove_var("SLUICE_SIMULATION_SEED");
            std::env::remove_var("SLUICE_SINK_QUOTA_BYTES");
        }
    }
}
