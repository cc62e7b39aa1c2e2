//! Gateway configuration sections loaded from `shardgate.toml`.

use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};

/// Scatter executor configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScatterConfig {
    /// Name of the per-shard call timing family. The error counter family
    /// derives its name by appending `ErrorCount`. Empty disables naming
    /// (families still record, but export under no name).
    #[serde(default = "default_stats_name")]
    pub stats_name: String,
    /// Fixed seed for the split-query shuffler. `None` (the default) seeds
    /// from entropy; setting it makes part order reproducible for replay.
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
    /// Shard calls slower than this are logged at WARN (0 = disabled).
    #[serde(default)]
    pub slow_call_threshold_ms: u64,
}

fn default_stats_name() -> String {
    "TabletCall".to_string()
}

impl Default for ScatterConfig {
    fn default() -> Self {
        Self {
            stats_name: default_stats_name(),
            shuffle_seed: None,
            slow_call_threshold_ms: 0,
        }
    }
}

impl ScatterConfig {
    /// Parse a TOML document containing a `[scatter]` section; missing
    /// fields fall back to defaults.
    pub fn from_toml_str(doc: &str) -> GateResult<Self> {
        #[derive(Deserialize)]
        struct Root {
            #[serde(default)]
            scatter: Option<ScatterConfig>,
        }
        let root: Root = toml::from_str(doc)
            .map_err(|e| GateError::Config(format!("invalid scatter config: {e}")))?;
        Ok(root.scatter.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ScatterConfig::default();
        assert_eq!(cfg.stats_name, "TabletCall");
        assert_eq!(cfg.shuffle_seed, None);
        assert_eq!(cfg.slow_call_threshold_ms, 0);
    }

    #[test]
    fn test_from_toml_full_section() {
        let cfg = ScatterConfig::from_toml_str(
            r#"
            [scatter]
            stats_name = "GatewayCall"
            shuffle_seed = 7
            slow_call_threshold_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.stats_name, "GatewayCall");
        assert_eq!(cfg.shuffle_seed, Some(7));
        assert_eq!(cfg.slow_call_threshold_ms, 250);
    }

    #[test]
    fn test_from_toml_missing_section_uses_defaults() {
        let cfg = ScatterConfig::from_toml_str("[server]\nnode_id = 1\n").unwrap();
        assert_eq!(cfg.stats_name, "TabletCall");
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        let err = ScatterConfig::from_toml_str("[scatter\nstats_name=").unwrap_err();
        assert!(matches!(err, GateError::Config(_)));
    }
}
