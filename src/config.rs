use crate::error::{LedgerError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HORIZON: usize = 60;

/// Longest horizon a document may cover.
pub const MAX_HORIZON: usize = 10 * DEFAULT_HORIZON;

/// Tunables shared by the calculator, the validator and the mutation engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LedgerConfig {
    #[schemars(description = "Number of months tracked by a new document.")]
    pub horizon: usize,

    #[schemars(
        description = "Maximum absolute gap between allocations (savings plus categories) and available funds before a month counts as unbalanced."
    )]
    pub balance_tolerance: f64,

    #[schemars(
        description = "Maximum gap between a manually entered previous-savings value and the calculated carry before a mismatch warning is raised."
    )]
    pub carry_mismatch_tolerance: f64,

    #[schemars(description = "Days after a month starts during which last month's leftovers can be rolled into savings.")]
    pub rollover_window_days: i64,

    #[schemars(description = "How many undo snapshots are retained per adjustment kind.")]
    pub history_depth: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            horizon: DEFAULT_HORIZON,
            balance_tolerance: 0.5,
            carry_mismatch_tolerance: 1.0,
            rollover_window_days: 5,
            history_depth: 1,
        }
    }
}

impl LedgerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LedgerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 || self.horizon > MAX_HORIZON {
            return Err(LedgerError::InvalidConfig(format!(
                "horizon of {} months is outside 1..={}",
                self.horizon, MAX_HORIZON
            )));
        }
        if self.balance_tolerance < 0.0 || self.carry_mismatch_tolerance < 0.0 {
            return Err(LedgerError::InvalidConfig(format!(
                "tolerances must be non-negative (balance {}, carry mismatch {})",
                self.balance_tolerance, self.carry_mismatch_tolerance
            )));
        }
        if self.rollover_window_days < 0 {
            return Err(LedgerError::InvalidConfig(format!(
                "rollover window of {} days is negative",
                self.rollover_window_days
            )));
        }
        if self.history_depth == 0 {
            return Err(LedgerError::InvalidConfig(
                "history depth must keep at least one snapshot".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_keep_both_tolerances() {
        let config = LedgerConfig::default();
        assert_eq!(config.horizon, 60);
        assert_eq!(config.balance_tolerance, 0.5);
        assert_eq!(config.carry_mismatch_tolerance, 1.0);
        assert_eq!(config.rollover_window_days, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = LedgerConfig::from_json_str(r#"{ "horizon": 24 }"#).unwrap();
        assert_eq!(config.horizon, 24);
        assert_eq!(config.history_depth, 1);
    }

    #[test]
    fn test_rejects_zero_horizon() {
        let result = LedgerConfig::from_json_str(r#"{ "horizon": 0 }"#);
        assert!(matches!(result, Err(LedgerError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_horizon_past_maximum() {
        let json = format!(r#"{{ "horizon": {} }}"#, MAX_HORIZON + 1);
        let result = LedgerConfig::from_json_str(&json);
        assert!(matches!(result, Err(LedgerError::InvalidConfig(_))));
    }
}
