//! Trading limits record.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Single-row trading limits. Read on every risk check, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeConfig {
    /// Maximum quote value of a single trade.
    pub max_trade_amount: Decimal,
    /// Maximum aggregate open buy exposure.
    pub max_position_amount: Decimal,
    /// Master switch for automatic execution.
    pub auto_trade_enabled: bool,
    /// Trades at or above this value are flagged for attention.
    pub high_value_threshold: Decimal,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            max_trade_amount: Decimal::from(100),
            max_position_amount: Decimal::from(500),
            auto_trade_enabled: false,
            high_value_threshold: Decimal::from(250),
            updated_at: Utc::now(),
        }
    }
}

impl TradeConfig {
    /// Validate limits.
    ///
    /// - max_trade_amount > 0
    /// - max_position_amount >= max_trade_amount
    /// - high_value_threshold > 0
    pub fn validate(&self) -> Result<()> {
        if self.max_trade_amount <= Decimal::ZERO {
            return Err(CoreError::InvalidConfig(format!(
                "max_trade_amount ({}) must be positive",
                self.max_trade_amount
            )));
        }
        if self.max_position_amount < self.max_trade_amount {
            return Err(CoreError::InvalidConfig(format!(
                "max_position_amount ({}) must be >= max_trade_amount ({})",
                self.max_position_amount, self.max_trade_amount
            )));
        }
        if self.high_value_threshold <= Decimal::ZERO {
            return Err(CoreError::InvalidConfig(format!(
                "high_value_threshold ({}) must be positive",
                self.high_value_threshold
            )));
        }
        Ok(())
    }

    /// Merge a partial update (last write wins per field) and validate the result.
    ///
    /// `self` is left untouched when validation fails.
    pub fn merged(&self, update: &TradeConfigUpdate) -> Result<Self> {
        let merged = Self {
            max_trade_amount: update.max_trade_amount.unwrap_or(self.max_trade_amount),
            max_position_amount: update
                .max_position_amount
                .unwrap_or(self.max_position_amount),
            auto_trade_enabled: update.auto_trade_enabled.unwrap_or(self.auto_trade_enabled),
            high_value_threshold: update
                .high_value_threshold
                .unwrap_or(self.high_value_threshold),
            updated_at: Utc::now(),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Partial update of `TradeConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeConfigUpdate {
    #[serde(default)]
    pub max_trade_amount: Option<Decimal>,
    #[serde(default)]
    pub max_position_amount: Option<Decimal>,
    #[serde(default)]
    pub auto_trade_enabled: Option<bool>,
    #[serde(default)]
    pub high_value_threshold: Option<Decimal>,
}

impl TradeConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.max_trade_amount.is_none()
            && self.max_position_amount.is_none()
            && self.auto_trade_enabled.is_none()
            && self.high_value_threshold.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = TradeConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.auto_trade_enabled);
    }

    #[test]
    fn test_merge_partial_update() {
        let config = TradeConfig::default();
        let update = TradeConfigUpdate {
            auto_trade_enabled: Some(true),
            max_trade_amount: Some(dec!(200)),
            ..Default::default()
        };
        let merged = config.merged(&update).unwrap();
        assert!(merged.auto_trade_enabled);
        assert_eq!(merged.max_trade_amount, dec!(200));
        assert_eq!(merged.max_position_amount, config.max_position_amount);
    }

    #[test]
    fn test_merge_rejects_position_below_trade() {
        let config = TradeConfig::default();
        let update = TradeConfigUpdate {
            max_position_amount: Some(dec!(50)),
            ..Default::default()
        };
        assert!(config.merged(&update).is_err());
    }

    #[test]
    fn test_merge_rejects_non_positive_trade_amount() {
        let config = TradeConfig::default();
        let update = TradeConfigUpdate {
            max_trade_amount: Some(dec!(0)),
            ..Default::default()
        };
        assert!(config.merged(&update).is_err());
    }
}
