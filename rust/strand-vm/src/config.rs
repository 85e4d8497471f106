//! Machine configuration, usually read from a `strand.toml` `[vm]` table or
//! built in code.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What an operator opcode does when its operands have no fast path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Send the operator's selector to the left operand.
    #[default]
    Send,
    /// Apply builtin structural/numeric semantics without method lookup.
    Builtin,
    /// Raise `TypeError`.
    Raise,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum number of simultaneously active frames.
    pub max_call_depth: usize,
    /// Handlers a single outermost run may execute; `None` is unbounded.
    pub instruction_limit: Option<u64>,
    pub fallback: FallbackPolicy,
    /// Disable to route every operator through the fallback.
    pub fast_paths: bool,
    /// Skip fast paths for operators the object model reports as redefined.
    pub honor_redefinition: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            instruction_limit: None,
            fallback: FallbackPolicy::default(),
            fast_paths: true,
            honor_redefinition: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid toml: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    vm: Option<VmConfig>,
}

impl VmConfig {
    /// Parse a config document. Accepts either a bare table or one nested
    /// under `[vm]`; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        match file.vm {
            Some(vm) => Ok(vm),
            None => Ok(toml::from_str(content)?),
        }
    }

    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VmConfig::from_toml_str("").unwrap();
        assert_eq!(config, VmConfig::default());
        assert_eq!(config.max_call_depth, 256);
        assert_eq!(config.fallback, FallbackPolicy::Send);
        assert!(config.fast_paths);
    }

    #[test]
    fn test_vm_table() {
        let config = VmConfig::from_toml_str(
            r#"
            [vm]
            max_call_depth = 32
            instruction_limit = 10000
            fallback = "builtin"
            honor_redefinition = false
            "#,
        )
        .unwrap();
        assert_eq!(config.max_call_depth, 32);
        assert_eq!(config.instruction_limit, Some(10_000));
        assert_eq!(config.fallback, FallbackPolicy::Builtin);
        assert!(!config.honor_redefinition);
        assert!(config.fast_paths);
    }

    #[test]
    fn test_bare_table() {
        let config = VmConfig::from_toml_str("fallback = \"raise\"\nfast_paths = false").unwrap();
        assert_eq!(config.fallback, FallbackPolicy::Raise);
        assert!(!config.fast_paths);
    }

    #[test]
    fn test_bad_policy_is_rejected() {
        let err = VmConfig::from_toml_str("fallback = \"maybe\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = VmConfig::load_from(Path::new("/nonexistent/strand.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/strand.toml"));
    }
}
