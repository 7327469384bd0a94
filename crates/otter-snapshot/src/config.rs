//! Snapshot configuration

use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapshotError};

/// Serializer and deserializer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Emit hot-object references (default: true)
    pub use_hot_objects: bool,
    /// Collapse runs of identical references (default: true)
    pub use_repeats: bool,
    /// Depth past which object bodies are deferred (default: 32)
    pub max_recursion_depth: usize,
    /// Chunk capacity in slots (default: 16384)
    pub chunk_capacity: u32,
    /// Stream length is padded to a multiple of this (default: 8)
    pub padding: usize,
    /// Largest object, in slots, either side accepts (default: 1M)
    pub max_object_slots: usize,
    /// Nesting depth of new objects past which both sides give up instead
    /// of recursing further (default: 256)
    pub max_nesting_depth: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            use_hot_objects: true,
            use_repeats: true,
            max_recursion_depth: 32,
            chunk_capacity: 16 * 1024,
            padding: 8,
            max_object_slots: 1 << 20,
            max_nesting_depth: 256,
        }
    }
}

impl SnapshotConfig {
    /// Load a config from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SnapshotError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the encoder cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_capacity == 0 {
            return Err(SnapshotError::Config("chunk_capacity must be non-zero".into()));
        }
        if self.padding == 0 {
            return Err(SnapshotError::Config("padding must be non-zero".into()));
        }
        if self.max_object_slots == 0 {
            return Err(SnapshotError::Config("max_object_slots must be non-zero".into()));
        }
        // Ordinary objects must be deferred before the nesting limit is reached.
        if self.max_nesting_depth <= self.max_recursion_depth {
            return Err(SnapshotError::Config(
                "max_nesting_depth must exceed max_recursion_depth".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        SnapshotConfig::default().validate().unwrap();
    }

    #[test]
    fn test_from_json_partial() {
        let config = SnapshotConfig::from_json(r#"{ "max_recursion_depth": 4 }"#).unwrap();
        assert_eq!(config.max_recursion_depth, 4);
        assert!(config.use_hot_objects);
        assert_eq!(config.chunk_capacity, 16 * 1024);
    }

    #[test]
    fn test_from_json_rejects_zero_capacity() {
        assert!(matches!(
            SnapshotConfig::from_json(r#"{ "chunk_capacity": 0 }"#),
            Err(SnapshotError::Config(_))
        ));
        assert!(SnapshotConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_nesting_limit_above_deferral_depth() {
        assert!(matches!(
            SnapshotConfig::from_json(r#"{ "max_recursion_depth": 64, "max_nesting_depth": 64 }"#),
            Err(SnapshotError::Config(_))
        ));
        assert!(matches!(
            SnapshotConfig::from_json(r#"{ "max_object_slots": 0 }"#),
            Err(SnapshotError::Config(_))
        ));
    }
}
