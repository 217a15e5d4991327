//! Risk gate.
//!
//! Gate evaluation order:
//! 1. TradingDisabled - config unavailable or auto trading off
//! 2. InvalidInputs - price and quantity must be positive
//! 3. MaxTradeAmount - clamp quantity so value <= max_trade_amount
//! 4. MaxPosition - exposure + post-clamp value <= max_position_amount
//!
//! The config is read on every call so updates apply to the next trade.

use std::fmt;
use std::sync::Arc;

use newlist_core::TradeConfig;
use newlist_persistence::{ConfigStore, ExposureSource};
use newlist_telemetry::Metrics;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{RiskError, RiskResult};

/// Why a trade was refused or adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RiskReason {
    TradingDisabled,
    InvalidInputs,
    AdjustedToMax,
    ExceedsPositionLimit,
    ExposureUnavailable,
}

impl RiskReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TradingDisabled => "trading disabled",
            Self::InvalidInputs => "invalid order inputs",
            Self::AdjustedToMax => "adjusted to max limit",
            Self::ExceedsPositionLimit => "exceeds position limit",
            Self::ExposureUnavailable => "exposure unavailable",
        }
    }

    /// Metric label.
    fn label(&self) -> &'static str {
        match self {
            Self::TradingDisabled => "trading_disabled",
            Self::InvalidInputs => "invalid_inputs",
            Self::AdjustedToMax => "adjusted",
            Self::ExceedsPositionLimit => "position_limit",
            Self::ExposureUnavailable => "exposure_unavailable",
        }
    }
}

impl fmt::Display for RiskReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of `RiskGate::validate_trade`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub reason: Option<RiskReason>,
    /// Set when the quantity was clamped to the per-trade cap.
    pub adjusted_quantity: Option<Decimal>,
    /// Quote value after clamping.
    pub trade_value: Decimal,
    /// Approved trade at or above the high-value threshold.
    pub high_value: bool,
}

impl RiskDecision {
    pub fn refuse(reason: RiskReason) -> Self {
        Self {
            approved: false,
            reason: Some(reason),
            adjusted_quantity: None,
            trade_value: Decimal::ZERO,
            high_value: false,
        }
    }

    /// Quantity to submit: adjusted if clamped, else `requested`.
    pub fn effective_quantity(&self, requested: Decimal) -> Decimal {
        self.adjusted_quantity.unwrap_or(requested)
    }
}

/// Pre-trade risk gate.
pub struct RiskGate {
    config: Arc<dyn ConfigStore>,
    exposure: Arc<dyn ExposureSource>,
}

impl RiskGate {
    pub fn new(config: Arc<dyn ConfigStore>, exposure: Arc<dyn ExposureSource>) -> Self {
        Self { config, exposure }
    }

    /// Validate a prospective buy of `quantity` at `price`.
    pub async fn validate_trade(&self, symbol: &str, quantity: Decimal, price: Decimal) -> RiskDecision {
        let decision = self.evaluate(symbol, quantity, price).await;

        match decision.reason {
            Some(reason) if !decision.approved => {
                Metrics::risk_rejection(reason.label());
                debug!(symbol, %quantity, %price, %reason, "Risk gate blocked");
            }
            _ => {
                trace!(
                    symbol,
                    trade_value = %decision.trade_value,
                    adjusted = ?decision.adjusted_quantity,
                    "Risk gate passed"
                );
            }
        }
        decision
    }

    async fn evaluate(&self, symbol: &str, quantity: Decimal, price: Decimal) -> RiskDecision {
        let config = match self.load_limits().await {
            Ok(config) if config.auto_trade_enabled => config,
            Ok(_) => return RiskDecision::refuse(RiskReason::TradingDisabled),
            Err(e) => {
                warn!(symbol, error = %e, "Trade config unavailable, refusing trade");
                return RiskDecision::refuse(RiskReason::TradingDisabled);
            }
        };

        if price <= Decimal::ZERO || quantity <= Decimal::ZERO {
            return RiskDecision::refuse(RiskReason::InvalidInputs);
        }

        // Feed prices are unbounded; out-of-range products refuse instead of panicking.
        let Some(mut trade_value) = quantity.checked_mul(price) else {
            return RiskDecision::refuse(RiskReason::InvalidInputs);
        };
        let mut adjusted_quantity = None;
        let mut reason = None;
        if trade_value > config.max_trade_amount {
            let Some(clamped) = config.max_trade_amount.checked_div(price) else {
                return RiskDecision::refuse(RiskReason::InvalidInputs);
            };
            adjusted_quantity = Some(clamped);
            trade_value = config.max_trade_amount;
            reason = Some(RiskReason::AdjustedToMax);
        }

        let exposure = match self.current_exposure().await {
            Ok(exposure) => exposure,
            Err(e) => {
                warn!(symbol, error = %e, "Exposure unavailable, refusing trade");
                return RiskDecision::refuse(RiskReason::ExposureUnavailable);
            }
        };

        let Some(projected) = exposure.checked_add(trade_value) else {
            return RiskDecision::refuse(RiskReason::InvalidInputs);
        };
        if projected > config.max_position_amount {
            debug!(
                symbol,
                %exposure,
                %trade_value,
                %projected,
                max_position = %config.max_position_amount,
                "Projected exposure above position limit"
            );
            return RiskDecision {
                approved: false,
                reason: Some(RiskReason::ExceedsPositionLimit),
                adjusted_quantity,
                trade_value,
                high_value: false,
            };
        }

        let high_value = trade_value >= config.high_value_threshold;
        if high_value {
            warn!(
                symbol,
                %trade_value,
                threshold = %config.high_value_threshold,
                "High-value trade approved"
            );
        }

        RiskDecision {
            approved: true,
            reason,
            adjusted_quantity,
            trade_value,
            high_value,
        }
    }

    async fn load_limits(&self) -> RiskResult<TradeConfig> {
        match self.config.load_config().await {
            Ok(Some(config)) => Ok(config),
            Ok(None) => Err(RiskError::ConfigUnavailable("no trade config record".to_string())),
            Err(e) => Err(RiskError::ConfigUnavailable(e.to_string())),
        }
    }

    async fn current_exposure(&self) -> RiskResult<Decimal> {
        self.exposure
            .open_buy_exposure()
            .await
            .map_err(RiskError::ExposureUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newlist_core::{OrderSide, TradeAttempt, TradeMode};
    use newlist_persistence::{
        BoxFuture, MemoryStore, PersistenceError, PersistenceResult, TradeStore,
    };
    use rust_decimal_macros::dec;

    struct FixedExposure(Decimal);

    impl ExposureSource for FixedExposure {
        fn open_buy_exposure(&self) -> BoxFuture<'_, PersistenceResult<Decimal>> {
            let value = self.0;
            Box::pin(async move { Ok(value) })
        }
    }

    struct FailingExposure;

    impl ExposureSource for FailingExposure {
        fn open_buy_exposure(&self) -> BoxFuture<'_, PersistenceResult<Decimal>> {
            Box::pin(async { Err(PersistenceError::Unavailable("db down".to_string())) })
        }
    }

    fn limits(max_trade: Decimal, max_position: Decimal, enabled: bool) -> TradeConfig {
        TradeConfig {
            max_trade_amount: max_trade,
            max_position_amount: max_position,
            auto_trade_enabled: enabled,
            high_value_threshold: dec!(1000),
            ..Default::default()
        }
    }

    fn gate(config: TradeConfig, exposure: Arc<dyn ExposureSource>) -> RiskGate {
        RiskGate::new(Arc::new(MemoryStore::with_config(config)), exposure)
    }

    #[tokio::test]
    async fn test_clamps_to_max_trade_amount() {
        let gate = gate(
            limits(dec!(100), dec!(500), true),
            Arc::new(FixedExposure(Decimal::ZERO)),
        );
        let decision = gate.validate_trade("NEWUSDT", dec!(3), dec!(50)).await;

        assert!(decision.approved);
        assert_eq!(decision.adjusted_quantity, Some(dec!(2)));
        assert_eq!(decision.reason, Some(RiskReason::AdjustedToMax));
        assert_eq!(decision.trade_value, dec!(100));
        assert_eq!(decision.effective_quantity(dec!(3)), dec!(2));
    }

    #[tokio::test]
    async fn test_out_of_range_value_refused() {
        let gate = gate(
            limits(dec!(100), dec!(500), true),
            Arc::new(FixedExposure(Decimal::ZERO)),
        );

        let huge = gate.validate_trade("NEWUSDT", Decimal::MAX, dec!(2)).await;
        assert!(!huge.approved);
        assert_eq!(huge.reason, Some(RiskReason::InvalidInputs));

        let tiny = gate
            .validate_trade("NEWUSDT", dec!(50), dec!(0.0000000000000000000000000001))
            .await;
        assert!(tiny.approved);
    }

    #[tokio::test]
    async fn test_position_limit_overrides_clamp() {
        let gate = gate(
            limits(dec!(90), dec!(150), true),
            Arc::new(FixedExposure(dec!(80))),
        );
        // 4 x 30 = 120, clamped to 90; 80 + 90 = 170 > 150.
        let decision = gate.validate_trade("NEWUSDT", dec!(4), dec!(30)).await;

        assert!(!decision.approved);
        assert_eq!(decision.reason, Some(RiskReason::ExceedsPositionLimit));
        assert_eq!(decision.reason.map(|r| r.as_str()), Some("exceeds position limit"));
    }

    #[tokio::test]
    async fn test_within_limits_approved_without_reason() {
        let gate = gate(
            limits(dec!(100), dec!(500), true),
            Arc::new(FixedExposure(dec!(50))),
        );
        let decision = gate.validate_trade("NEWUSDT", dec!(1), dec!(40)).await;

        assert!(decision.approved);
        assert!(decision.reason.is_none());
        assert!(decision.adjusted_quantity.is_none());
        assert!(!decision.high_value);
    }

    #[tokio::test]
    async fn test_disabled_refuses_everything() {
        let gate = gate(
            limits(dec!(100), dec!(500), false),
            Arc::new(FixedExposure(Decimal::ZERO)),
        );
        for (qty, price) in [(dec!(0.001), dec!(1)), (dec!(1000), dec!(1000))] {
            let decision = gate.validate_trade("NEWUSDT", qty, price).await;
            assert!(!decision.approved);
            assert_eq!(decision.reason, Some(RiskReason::TradingDisabled));
        }
    }

    #[tokio::test]
    async fn test_missing_config_is_disabled() {
        let gate = RiskGate::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FixedExposure(Decimal::ZERO)),
        );
        let decision = gate.validate_trade("NEWUSDT", dec!(1), dec!(1)).await;
        assert_eq!(decision.reason, Some(RiskReason::TradingDisabled));
    }

    #[tokio::test]
    async fn test_exposure_unavailable_refuses() {
        let gate = gate(limits(dec!(100), dec!(500), true), Arc::new(FailingExposure));
        let decision = gate.validate_trade("NEWUSDT", dec!(1), dec!(10)).await;
        assert!(!decision.approved);
        assert_eq!(decision.reason, Some(RiskReason::ExposureUnavailable));
    }

    #[tokio::test]
    async fn test_invalid_inputs_refused() {
        let gate = gate(
            limits(dec!(100), dec!(500), true),
            Arc::new(FixedExposure(Decimal::ZERO)),
        );
        let zero_price = gate.validate_trade("NEWUSDT", dec!(1), dec!(0)).await;
        let negative_qty = gate.validate_trade("NEWUSDT", dec!(-1), dec!(10)).await;
        assert_eq!(zero_price.reason, Some(RiskReason::InvalidInputs));
        assert_eq!(negative_qty.reason, Some(RiskReason::InvalidInputs));
    }

    #[tokio::test]
    async fn test_high_value_flagged() {
        let mut config = limits(dec!(300), dec!(1000), true);
        config.high_value_threshold = dec!(250);
        let gate = gate(config, Arc::new(FixedExposure(Decimal::ZERO)));

        let decision = gate.validate_trade("NEWUSDT", dec!(10), dec!(25)).await;
        assert!(decision.approved);
        assert!(decision.high_value);
    }

    #[tokio::test]
    async fn test_reads_latest_config_and_store_exposure() {
        let store = Arc::new(MemoryStore::with_config(limits(dec!(100), dec!(150), true)));
        let gate = RiskGate::new(store.clone(), store.clone());

        let mut filled = TradeAttempt::pending("OLDUSDT", OrderSide::Buy, dec!(100), TradeMode::Live);
        filled.fill("1", None);
        store.insert_trade(&filled).await.unwrap();

        let decision = gate.validate_trade("NEWUSDT", dec!(1), dec!(60)).await;
        assert_eq!(decision.reason, Some(RiskReason::ExceedsPositionLimit));

        let update = newlist_core::TradeConfigUpdate {
            max_position_amount: Some(dec!(200)),
            ..Default::default()
        };
        store.update_config(&update).await.unwrap();

        let decision = gate.validate_trade("NEWUSDT", dec!(1), dec!(60)).await;
        assert!(decision.approved);
    }
}
