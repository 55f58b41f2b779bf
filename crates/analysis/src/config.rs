//! Analyzer configuration
//!
//! All knobs the engine recognizes, with defaults that match the
//! documented behavior. Configs can be built in code or loaded from TOML;
//! a loaded config can be merged over the defaults.

use serde::Deserialize;
use std::path::Path;

fn default_widening_threshold() -> usize {
    3
}

fn default_max_block_iterations() -> usize {
    100
}

fn default_context_cache_size() -> usize {
    256
}

fn default_function_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

/// Configuration for one analysis run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Iterations before range/sign widening activates at a loop header
    pub widening_threshold: usize,
    /// Hard per-block iteration cap; exceeding it forces widening to top
    pub max_block_iterations: usize,
    /// LRU capacity of the per-function context cache
    pub context_cache_size: usize,
    /// Per-function wall-clock budget in milliseconds
    pub function_timeout_ms: u64,
    pub enable_range_domain: bool,
    pub enable_nullability_domain: bool,
    pub enable_sign_domain: bool,
    /// If true, calls to unresolvable callees are not treated as I/O and
    /// their nullability result stays precise. Numeric components are
    /// still top.
    pub treat_unknown_callees_as_pure: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            widening_threshold: default_widening_threshold(),
            max_block_iterations: default_max_block_iterations(),
            context_cache_size: default_context_cache_size(),
            function_timeout_ms: default_function_timeout_ms(),
            enable_range_domain: default_true(),
            enable_nullability_domain: default_true(),
            enable_sign_domain: default_true(),
            treat_unknown_callees_as_pure: false,
        }
    }
}

impl AnalysisConfig {
    pub fn new() -> Self {
        AnalysisConfig::default()
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("Failed to parse analysis config: {}", e))
    }

    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config '{}': {}", path.display(), e))?;
        Self::from_toml(&content)
    }

    /// Overlay another config onto this one. Fields in `other` that differ
    /// from the defaults win.
    pub fn merge(&mut self, other: AnalysisConfig) {
        let defaults = AnalysisConfig::default();
        macro_rules! take {
            ($field:ident) => {
                if other.$field != defaults.$field {
                    self.$field = other.$field;
                }
            };
        }
        take!(widening_threshold);
        take!(max_block_iterations);
        take!(context_cache_size);
        take!(function_timeout_ms);
        take!(enable_range_domain);
        take!(enable_nullability_domain);
        take!(enable_sign_domain);
        take!(treat_unknown_callees_as_pure);
    }

    pub fn with_widening_threshold(mut self, threshold: usize) -> Self {
        self.widening_threshold = threshold;
        self
    }

    pub fn with_max_block_iterations(mut self, cap: usize) -> Self {
        self.max_block_iterations = cap;
        self
    }

    pub fn with_context_cache_size(mut self, size: usize) -> Self {
        self.context_cache_size = size;
        self
    }

    pub fn with_function_timeout_ms(mut self, ms: u64) -> Self {
        self.function_timeout_ms = ms;
        self
    }

    pub fn with_range_domain(mut self, enabled: bool) -> Self {
        self.enable_range_domain = enabled;
        self
    }

    pub fn with_nullability_domain(mut self, enabled: bool) -> Self {
        self.enable_nullability_domain = enabled;
        self
    }

    pub fn with_sign_domain(mut self, enabled: bool) -> Self {
        self.enable_sign_domain = enabled;
        self
    }

    pub fn with_pure_unknown_callees(mut self, pure: bool) -> Self {
        self.treat_unknown_callees_as_pure = pure;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.widening_threshold, 3);
        assert_eq!(config.max_block_iterations, 100);
        assert_eq!(config.context_cache_size, 256);
        assert_eq!(config.function_timeout_ms, 30_000);
        assert!(config.enable_range_domain);
        assert!(config.enable_nullability_domain);
        assert!(config.enable_sign_domain);
        assert!(!config.treat_unknown_callees_as_pure);
    }

    #[test]
    fn test_builder() {
        let config = AnalysisConfig::new()
            .with_widening_threshold(11)
            .with_range_domain(false);
        assert_eq!(config.widening_threshold, 11);
        assert!(!config.enable_range_domain);
        // untouched fields keep defaults
        assert_eq!(config.max_block_iterations, 100);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = AnalysisConfig::from_toml(
            r#"
widening_threshold = 5
enable_sign_domain = false
"#,
        )
        .unwrap();
        assert_eq!(config.widening_threshold, 5);
        assert!(!config.enable_sign_domain);
        assert_eq!(config.context_cache_size, 256);
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        assert!(AnalysisConfig::from_toml("widening_threshold = \"lots\"").is_err());
    }

    #[test]
    fn test_merge_overrides_non_default_fields() {
        let mut base = AnalysisConfig::new().with_widening_threshold(7);
        let user = AnalysisConfig::from_toml("function_timeout_ms = 500").unwrap();
        base.merge(user);
        assert_eq!(base.function_timeout_ms, 500);
        // user config left threshold at default, so the base value survives
        assert_eq!(base.widening_threshold, 7);
    }
}
