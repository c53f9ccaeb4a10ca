//! Runtime configuration.

use serde::{Deserialize, Serialize};

fn env_parsed<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

/// Configuration for the control runtime.
///
/// Defaults can be overridden via environment variables:
/// - `TILLER_MASK_VALUE`: logit value written over masked tokens (default: -1e9)
/// - `TILLER_MOD_BUDGET_MS`: per-mod wall-clock budget per event (default: 5000)
/// - `TILLER_MAX_REPAIR_ATTEMPTS`: bound on backtrack-repair loops (default: 3)
/// - `TILLER_TRACE_ENABLED`: whether trace records are emitted (default: true)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Logit value written over masked tokens.
    pub mask_value: f32,
    /// Per-mod wall-clock budget per event, in milliseconds. A mod that
    /// returns after exceeding this is fatal to the request.
    pub mod_budget_ms: u64,
    /// Maximum strategy-driven backtrack repairs per self-prompt before
    /// the fallback applies.
    pub max_repair_attempts: u32,
    /// Whether trace records are pushed to the sink.
    pub trace_enabled: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            mask_value: env_parsed("TILLER_MASK_VALUE").unwrap_or(-1e9),
            mod_budget_ms: env_parsed("TILLER_MOD_BUDGET_MS").unwrap_or(5000),
            max_repair_attempts: env_parsed("TILLER_MAX_REPAIR_ATTEMPTS").unwrap_or(3),
            trace_enabled: env_parsed("TILLER_TRACE_ENABLED").unwrap_or(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_hold_without_env() {
        let config = ControlConfig {
            mask_value: -1e9,
            mod_budget_ms: 5000,
            max_repair_attempts: 3,
            trace_enabled: true,
        };
        assert_eq!(config.mod_budget_ms, 5000);
        assert_eq!(config.max_repair_attempts, 3);
        assert!(config.trace_enabled);
    }

    #[test]
    fn round_trips_through_serde() {
        let config = ControlConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ControlConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mod_budget_ms, config.mod_budget_ms);
    }
}
