use serde::{Deserialize, Serialize};

use crate::error::{ConfigIssue, SimError, SimResult};

/// Engine-wide settings. Every field has a default so partial JSON documents load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum change iterations per tick before a loop is reported as unsettled.
    pub iteration_bound: u32,
    /// Halt the engine on any bus contention.
    pub strict_contention: bool,
    /// Clocked storage latches the value settled at the end of the previous tick
    /// instead of the post-change value.
    pub latch_pre_edge: bool,
    /// Maximum number of trace records kept; 0 keeps everything.
    pub trace_capacity: usize,
    /// Stamp trace records with the wall clock.
    pub trace_wall_clock: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            iteration_bound: 64,
            strict_contention: false,
            latch_pre_edge: false,
            trace_capacity: 0,
            trace_wall_clock: false,
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl EngineConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.iteration_bound == 0 {
            return Err(SimError::config("engine", None, ConfigIssue::InvalidIterationBound));
        }
        Ok(())
    }

    /// FNV-1a 64 over the little-endian encoding of every field, in declaration order.
    pub fn config_hash(&self) -> u64 {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&self.iteration_bound.to_le_bytes());
        bytes.push(self.strict_contention as u8);
        bytes.push(self.latch_pre_edge as u8);
        bytes.extend_from_slice(&(self.trace_capacity as u64).to_le_bytes());
        bytes.push(self.trace_wall_clock as u8);

        bytes.iter().fold(FNV_OFFSET, |hash, byte| {
            (hash ^ *byte as u64).wrapping_mul(FNV_PRIME)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.iteration_bound, 64);
        assert!(!config.strict_contention);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig = serde_json::from_str(r#"{"strict_contention": true}"#).unwrap();
        assert!(config.strict_contention);
        assert_eq!(config.iteration_bound, 64);
    }

    #[test]
    fn test_zero_iteration_bound_rejected() {
        let config = EngineConfig {
            iteration_bound: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err().issue(),
            Some(&ConfigIssue::InvalidIterationBound)
        );
    }

    #[test]
    fn test_hash_tracks_fields() {
        let base = EngineConfig::default();
        assert_eq!(base.config_hash(), EngineConfig::default().config_hash());

        let strict = EngineConfig {
            strict_contention: true,
            ..Default::default()
        };
        let bounded = EngineConfig {
            iteration_bound: 8,
            ..Default::default()
        };
        assert_ne!(base.config_hash(), strict.config_hash());
        assert_ne!(base.config_hash(), bounded.config_hash());
    }
}
