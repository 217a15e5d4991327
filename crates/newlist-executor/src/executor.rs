//! Order executor.
//!
//! # Execution Flow
//!
//! 1. RiskGate                 → rejected row (no exchange call)
//! 2. dry-run                  → filled row, `exchange_order_id = "simulated"`
//! 3. live: pending row        → durable intent before the first call
//! 4. submit with retry        → same client order id on every call
//! 5. guarded finalize         → filled / failed, never over a terminal row
//!
//! Exchange failures end as a `failed` row, not as an error. Only failures
//! before any row exists (or of the row writes themselves) are returned
//! as `ExecutorError`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use newlist_core::{ClientOrderId, OrderSide, TradeAttempt, TradeMode, TradeStatus};
use newlist_persistence::TradeStore;
use newlist_risk::{RiskDecision, RiskGate, RiskReason};
use newlist_telemetry::Metrics;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ExecutorError, ExecutorResult};
use crate::gateway::{GatewayError, GatewayResult, MarketBuy, OrderGateway, OrderRef, OrderReport};
use crate::price_provider::PriceProvider;
use crate::retry::RetryPolicy;

/// Exchange order id recorded for dry-run fills.
pub const SIMULATED_ORDER_ID: &str = "simulated";

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Quote amount spent on each new listing.
    #[serde(default = "default_listing_quote_qty")]
    pub listing_quote_qty: Decimal,
    /// How long shutdown waits for in-flight live orders.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Exchange request timeout.
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,
}

fn default_listing_quote_qty() -> Decimal {
    Decimal::from(50)
}

fn default_drain_timeout_ms() -> u64 {
    10_000
}

fn default_order_timeout_ms() -> u64 {
    5_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            listing_quote_qty: default_listing_quote_qty(),
            drain_timeout_ms: default_drain_timeout_ms(),
            order_timeout_ms: default_order_timeout_ms(),
        }
    }
}

/// One logical buy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub symbol: String,
    pub quote_qty: Decimal,
    pub mode: TradeMode,
}

impl TradeRequest {
    pub fn new(symbol: &str, quote_qty: Decimal, mode: TradeMode) -> Self {
        Self {
            symbol: newlist_core::listing::normalize_symbol(symbol),
            quote_qty,
            mode,
        }
    }
}

#[derive(Debug, Clone)]
struct InflightOrder {
    symbol: String,
    client_order_id: ClientOrderId,
    since: DateTime<Utc>,
}

/// Removes an in-flight entry when the submission resolves or unwinds.
struct InflightGuard<'a> {
    executor: &'a OrderExecutor,
    id: Uuid,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.executor.inflight.remove(&self.id);
        self.executor.settled.notify_waiters();
    }
}

struct Submission {
    result: GatewayResult<OrderReport>,
    calls: u32,
    latency_ms: u64,
}

/// Risk-gated order executor.
pub struct OrderExecutor {
    gate: Arc<RiskGate>,
    trades: Arc<dyn TradeStore>,
    gateway: Option<Arc<dyn OrderGateway>>,
    prices: Arc<dyn PriceProvider>,
    retry: RetryPolicy,
    inflight: DashMap<Uuid, InflightOrder>,
    settled: Notify,
}

impl OrderExecutor {
    /// `gateway` may be `None` for dry-run-only sessions; live requests
    /// then end as `failed`.
    pub fn new(
        gate: Arc<RiskGate>,
        trades: Arc<dyn TradeStore>,
        gateway: Option<Arc<dyn OrderGateway>>,
        prices: Arc<dyn PriceProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gate,
            trades,
            gateway,
            prices,
            retry,
            inflight: DashMap::new(),
            settled: Notify::new(),
        }
    }

    /// Execute one buy and return its audit record.
    pub async fn execute_trade(&self, request: &TradeRequest) -> ExecutorResult<TradeAttempt> {
        if request.symbol.is_empty() {
            return Err(ExecutorError::InvalidRequest("empty symbol".to_string()));
        }

        let price = self
            .prices
            .last_price(&request.symbol)
            .filter(|p| *p > Decimal::ZERO);
        // Without a price the gate is evaluated in quote units.
        let (quantity, unit_price) = match price {
            Some(p) => match request.quote_qty.checked_div(p) {
                Some(quantity) => (quantity, p),
                None => {
                    warn!(symbol = %request.symbol, price = %p, "Quantity out of range for price");
                    let decision = RiskDecision::refuse(RiskReason::InvalidInputs);
                    return self.record_rejection(request, &decision).await;
                }
            },
            None => (request.quote_qty, Decimal::ONE),
        };

        let decision = self
            .gate
            .validate_trade(&request.symbol, quantity, unit_price)
            .await;
        if !decision.approved {
            return self.record_rejection(request, &decision).await;
        }

        let quote_qty = decision.trade_value;
        let base_qty = price.map(|_| decision.effective_quantity(quantity));
        match request.mode {
            TradeMode::DryRun => self.simulate(request, quote_qty, base_qty).await,
            TradeMode::Live => self.submit_live(request, quote_qty).await,
        }
    }

    async fn record_rejection(
        &self,
        request: &TradeRequest,
        decision: &RiskDecision,
    ) -> ExecutorResult<TradeAttempt> {
        let reason = decision
            .reason
            .map(|r| r.as_str())
            .unwrap_or("rejected by risk gate");
        let attempt = TradeAttempt::rejected(
            &request.symbol,
            OrderSide::Buy,
            request.quote_qty,
            request.mode,
            reason,
        );
        self.trades.insert_trade(&attempt).await?;
        Metrics::trade_recorded(request.mode.as_str(), attempt.status.as_str());
        info!(
            symbol = %request.symbol,
            mode = %request.mode,
            reason,
            trade_id = %attempt.id,
            "Trade rejected by risk gate"
        );
        Ok(attempt)
    }

    async fn simulate(
        &self,
        request: &TradeRequest,
        quote_qty: Decimal,
        base_qty: Option<Decimal>,
    ) -> ExecutorResult<TradeAttempt> {
        let started = Instant::now();
        let mut attempt =
            TradeAttempt::pending(&request.symbol, OrderSide::Buy, quote_qty, TradeMode::DryRun);
        attempt.fill(SIMULATED_ORDER_ID, base_qty);
        attempt.latency_ms = started.elapsed().as_millis() as u64;

        self.trades.insert_trade(&attempt).await?;
        Metrics::trade_recorded(TradeMode::DryRun.as_str(), attempt.status.as_str());
        Metrics::trade_latency(TradeMode::DryRun.as_str(), attempt.latency_ms as f64);
        info!(
            symbol = %attempt.symbol,
            %quote_qty,
            trade_id = %attempt.id,
            "Dry-run trade filled"
        );
        Ok(attempt)
    }

    async fn submit_live(
        &self,
        request: &TradeRequest,
        quote_qty: Decimal,
    ) -> ExecutorResult<TradeAttempt> {
        let mut attempt =
            TradeAttempt::pending(&request.symbol, OrderSide::Buy, quote_qty, TradeMode::Live);
        self.trades.insert_trade(&attempt).await?;

        let _guard = self.track(&attempt);
        match self.gateway.clone() {
            Some(gateway) => {
                let submission = self.submit_with_retry(gateway.as_ref(), &attempt).await;
                attempt.retries = submission.calls.saturating_sub(1);
                attempt.latency_ms = submission.latency_ms;
                match submission.result {
                    Ok(report) if report.is_accepted() => {
                        let base_qty = self.read_back_base_qty(gateway.as_ref(), &attempt.symbol, &report).await;
                        attempt.fill(report.exchange_order_id, base_qty);
                    }
                    Ok(report) => {
                        attempt.exchange_order_id = Some(report.exchange_order_id);
                        attempt.fail(format!("order {}", report.status.to_lowercase()));
                    }
                    Err(e) => attempt.fail(e.to_string()),
                }
            }
            None => attempt.fail("exchange gateway not configured"),
        }

        self.finalize(&attempt).await?;
        Ok(attempt)
    }

    /// Sequential calls, same client order id, bounded by the retry policy.
    async fn submit_with_retry(
        &self,
        gateway: &dyn OrderGateway,
        attempt: &TradeAttempt,
    ) -> Submission {
        let order = MarketBuy {
            symbol: attempt.symbol.clone(),
            quote_qty: attempt.quote_qty,
            client_order_id: attempt.client_order_id.clone(),
        };
        let started = Instant::now();
        let mut calls = 0u32;
        // A transient failure may still have reached the exchange.
        let mut ambiguous = false;

        let result = loop {
            calls += 1;
            match gateway.place_market_buy(&order).await {
                Ok(report) => break Ok(report),
                Err(GatewayError::DuplicateClientOrderId(msg)) if ambiguous => {
                    info!(
                        symbol = %order.symbol,
                        cloid = %order.client_order_id,
                        %msg,
                        "Earlier submission landed, reading order back"
                    );
                    break self.read_back_by_client_id(gateway, &order).await;
                }
                Err(GatewayError::Undecodable(msg)) => {
                    warn!(
                        symbol = %order.symbol,
                        cloid = %order.client_order_id,
                        %msg,
                        "Order response unreadable, reading order back"
                    );
                    break self.read_back_by_client_id(gateway, &order).await;
                }
                Err(e) if e.is_transient() && self.retry.allows_retry(calls) => {
                    ambiguous = true;
                    let delay = self.retry.jittered_delay(calls - 1);
                    Metrics::exchange_retry();
                    warn!(
                        symbol = %order.symbol,
                        cloid = %order.client_order_id,
                        call = calls,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient exchange error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        symbol = %order.symbol,
                        cloid = %order.client_order_id,
                        call = calls,
                        error = %e,
                        "Order submission failed"
                    );
                    break Err(e);
                }
            }
        };

        Submission {
            result,
            calls,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Resolve an order whose submission outcome is unknown.
    ///
    /// Transient lookup failures follow the retry policy. If the order still
    /// cannot be read, the error says the state is unknown.
    async fn read_back_by_client_id(
        &self,
        gateway: &dyn OrderGateway,
        order: &MarketBuy,
    ) -> GatewayResult<OrderReport> {
        let lookup = OrderRef::Client(order.client_order_id.clone());
        let mut calls = 0u32;
        loop {
            calls += 1;
            match gateway.order_status(&order.symbol, &lookup).await {
                Ok(report) => return Ok(report),
                Err(e) if e.is_transient() && self.retry.allows_retry(calls) => {
                    tokio::time::sleep(self.retry.jittered_delay(calls - 1)).await;
                }
                Err(e) => {
                    error!(
                        symbol = %order.symbol,
                        cloid = %order.client_order_id,
                        error = %e,
                        "Order state unknown after read-back"
                    );
                    return Err(GatewayError::Unresolved(format!("read-back failed: {e}")));
                }
            }
        }
    }

    /// Best-effort status read to learn the executed base quantity.
    async fn read_back_base_qty(
        &self,
        gateway: &dyn OrderGateway,
        symbol: &str,
        ack: &OrderReport,
    ) -> Option<Decimal> {
        let lookup = OrderRef::Exchange(ack.exchange_order_id.clone());
        match gateway.order_status(symbol, &lookup).await {
            Ok(report) => report.executed_qty.or(ack.executed_qty),
            Err(e) => {
                debug!(symbol, order_id = %ack.exchange_order_id, error = %e, "Order read-back failed");
                ack.executed_qty
            }
        }
    }

    async fn finalize(&self, attempt: &TradeAttempt) -> ExecutorResult<()> {
        match self.trades.finalize_trade(attempt).await {
            Ok(true) => {
                Metrics::trade_recorded(attempt.mode.as_str(), attempt.status.as_str());
                if attempt.status == TradeStatus::Filled {
                    Metrics::trade_latency(attempt.mode.as_str(), attempt.latency_ms as f64);
                }
                info!(
                    symbol = %attempt.symbol,
                    status = %attempt.status,
                    latency_ms = attempt.latency_ms,
                    retries = attempt.retries,
                    order_id = ?attempt.exchange_order_id,
                    error = ?attempt.error_reason,
                    trade_id = %attempt.id,
                    "Live trade finalized"
                );
                Ok(())
            }
            Ok(false) => {
                warn!(trade_id = %attempt.id, status = %attempt.status, "Trade already terminal, outcome not written");
                Ok(())
            }
            Err(e) => {
                error!(
                    trade_id = %attempt.id,
                    symbol = %attempt.symbol,
                    status = %attempt.status,
                    order_id = ?attempt.exchange_order_id,
                    error_reason = ?attempt.error_reason,
                    error = %e,
                    "Failed to record trade outcome"
                );
                Err(e.into())
            }
        }
    }

    fn track(&self, attempt: &TradeAttempt) -> InflightGuard<'_> {
        self.inflight.insert(
            attempt.id,
            InflightOrder {
                symbol: attempt.symbol.clone(),
                client_order_id: attempt.client_order_id.clone(),
                since: Utc::now(),
            },
        );
        InflightGuard {
            executor: self,
            id: attempt.id,
        }
    }

    /// Cancel an open order.
    pub async fn cancel_order(&self, symbol: &str, order: &OrderRef) -> GatewayResult<OrderReport> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| GatewayError::Terminal {
                status: 0,
                message: "exchange gateway not configured".to_string(),
            })?;
        let report = gateway.cancel_order(symbol, order).await?;
        info!(symbol, order_id = %report.exchange_order_id, status = %report.status, "Order cancel requested");
        Ok(report)
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Wait for in-flight live submissions. Returns how many did not resolve.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let settled = self.settled.notified();
            if self.inflight.is_empty() {
                return 0;
            }
            if tokio::time::timeout_at(deadline, settled).await.is_err() {
                break;
            }
        }

        let unresolved = self.inflight.len();
        for entry in self.inflight.iter() {
            warn!(
                trade_id = %entry.key(),
                symbol = %entry.symbol,
                cloid = %entry.client_order_id,
                since = %entry.since,
                "Order submission unresolved at shutdown"
            );
        }
        unresolved
    }
}
