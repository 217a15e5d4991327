//! Risk-gated order execution for the new-listing bot.
//!
//! # Key Components
//!
//! - [`OrderExecutor`]: RiskGate → exchange call with retry → durable `TradeAttempt`
//! - [`OrderGateway`]: exchange trading API (market buy, cancel, status)
//! - [`RestOrderGateway`]: HMAC-SHA256 signed REST implementation
//! - [`MockOrderGateway`]: scripted gateway for tests
//! - [`RetryPolicy`]: bounded exponential backoff for transient failures
//! - [`PriceProvider`]: latest price used to size orders

pub mod error;
pub mod executor;
pub mod gateway;
pub mod price_provider;
pub mod rest_gateway;
pub mod retry;
pub mod signer;

pub use error::{ExecutorError, ExecutorResult};
pub use executor::{ExecutorConfig, OrderExecutor, TradeRequest, SIMULATED_ORDER_ID};
pub use gateway::{
    BoxFuture, GatewayError, GatewayResult, MarketBuy, MockOrderGateway, OrderGateway, OrderRef,
    OrderReport,
};
pub use price_provider::{PriceProvider, StaticPrices};
pub use rest_gateway::RestOrderGateway;
pub use retry::RetryPolicy;
pub use signer::{canonical_query, sign_query, ApiCredentials, RequestSigner};
