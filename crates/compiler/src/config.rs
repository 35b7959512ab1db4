//! Compiler configuration
//!
//! Scheduler constants baked into the generated artifact. Defaults can be
//! overridden from a TOML file (`--config`), and the network's own `config`
//! block overrides both.

use serde::Deserialize;

/// Default bound on tidal cycles before the scheduler gives up.
pub const DEFAULT_MAX_CYCLES: u64 = 100_000;

/// Default bump-heap arena size in bytes (1 MiB).
pub const DEFAULT_ARENA_SIZE: u64 = 1 << 20;

/// Smallest arena the scheduler accepts.
pub const MIN_ARENA_SIZE: u64 = 64 * 1024;

/// Default per-queue ring capacity in slots.
pub const DEFAULT_QUEUE_CAPACITY: u64 = 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    pub max_cycles: u64,
    pub arena_size: u64,
    pub queue_capacity: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            max_cycles: DEFAULT_MAX_CYCLES,
            arena_size: DEFAULT_ARENA_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl CompilerConfig {
    pub fn from_toml(content: &str) -> Result<Self, String> {
        let config: CompilerConfig =
            toml::from_str(content).map_err(|e| format!("bad config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.arena_size < MIN_ARENA_SIZE {
            return Err(format!(
                "arena_size {} is below the minimum of {} bytes",
                self.arena_size, MIN_ARENA_SIZE
            ));
        }
        if self.max_cycles == 0 {
            return Err("max_cycles must be positive".to_string());
        }
        if self.queue_capacity < 2 {
            return Err("queue_capacity must be at least 2".to_string());
        }
        Ok(())
    }

    /// Apply a network-level `config { ... }` block. Unknown keys are an
    /// error so typos do not silently fall back to defaults.
    pub fn apply_network_overrides(
        &mut self,
        overrides: &[(String, i64)],
    ) -> Result<(), String> {
        for (key, value) in overrides {
            if *value < 0 {
                return Err(format!("config key '{}' cannot be negative", key));
            }
            let value = *value as u64;
            match key.as_str() {
                "max_cycles" => self.max_cycles = value,
                "arena_size" => self.arena_size = value,
                "queue_capacity" => self.queue_capacity = value,
                other => return Err(format!("unknown config key '{}'", other)),
            }
        }
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert_eq!(config.max_cycles, DEFAULT_MAX_CYCLES);
        assert_eq!(config.arena_size, DEFAULT_ARENA_SIZE);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CompilerConfig::from_toml("max_cycles = 500\n").unwrap();
        assert_eq!(config.max_cycles, 500);
        assert_eq!(config.arena_size, DEFAULT_ARENA_SIZE);
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        assert!(CompilerConfig::from_toml("max_cycle = 500\n").is_err());
    }

    #[test]
    fn test_arena_minimum_enforced() {
        let err = CompilerConfig::from_toml("arena_size = 1024\n").unwrap_err();
        assert!(err.contains("minimum"));
    }

    #[test]
    fn test_network_overrides() {
        let mut config = CompilerConfig::default();
        config
            .apply_network_overrides(&[("max_cycles".to_string(), 77)])
            .unwrap();
        assert_eq!(config.max_cycles, 77);
        assert!(
            config
                .apply_network_overrides(&[("bogus".to_string(), 1)])
                .is_err()
        );
    }
}
