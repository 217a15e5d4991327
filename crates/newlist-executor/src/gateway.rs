//! Exchange order gateway trait.
//!
//! Abstracts the trading API so the executor can be driven by the signed
//! REST client in production and by `MockOrderGateway` in tests.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use newlist_core::ClientOrderId;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Market buy sized by quote amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketBuy {
    pub symbol: String,
    pub quote_qty: Decimal,
    pub client_order_id: ClientOrderId,
}

/// How to address an existing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    Exchange(String),
    Client(ClientOrderId),
}

/// Order state as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReport {
    pub exchange_order_id: String,
    pub client_order_id: String,
    /// Exchange status string, e.g. `FILLED`, `NEW`, `EXPIRED`.
    pub status: String,
    /// Executed base quantity.
    pub executed_qty: Option<Decimal>,
    /// Executed quote quantity.
    pub quote_qty: Option<Decimal>,
}

impl OrderReport {
    /// The exchange accepted the order and it did not end unfilled.
    pub fn is_accepted(&self) -> bool {
        !matches!(
            self.status.as_str(),
            "REJECTED" | "EXPIRED" | "EXPIRED_IN_MATCH" | "CANCELED"
        )
    }
}

/// Exchange call failure, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Timeouts, 5xx, connection errors, 408 and 429. Retried.
    #[error("Transient exchange error: {0}")]
    Transient(String),

    /// Validation errors, insufficient balance, invalid symbol. Never retried.
    #[error("Exchange rejected request ({status}): {message}")]
    Terminal { status: u16, message: String },

    /// The client order id was already used.
    #[error("Duplicate client order id: {0}")]
    DuplicateClientOrderId(String),

    /// Success status with an unreadable body. The order may exist.
    #[error("Unreadable exchange response: {0}")]
    Undecodable(String),

    /// Submission outcome could not be established.
    #[error("Order state unknown: {0}")]
    Unresolved(String),
}

/// Exchange error code for a reused client order id.
const DUPLICATE_ORDER_CODE: i64 = -2010;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    msg: String,
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify an HTTP error response.
    pub fn from_response(status: u16, body: &str) -> Self {
        if status == 408 || status == 429 || status == 418 || status >= 500 {
            return Self::Transient(format!("http {status}: {body}"));
        }
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(err) if err.code == DUPLICATE_ORDER_CODE && err.msg.to_lowercase().contains("duplicate") => {
                Self::DuplicateClientOrderId(err.msg)
            }
            Ok(err) => Self::Terminal {
                status,
                message: format!("{} ({})", err.msg, err.code),
            },
            Err(_) => Self::Terminal {
                status,
                message: body.to_string(),
            },
        }
    }

    /// Classify a transport error.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Transient(err.to_string())
        } else if err.is_decode() {
            Self::Undecodable(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Exchange trading API.
pub trait OrderGateway: Send + Sync {
    fn place_market_buy<'a>(&'a self, order: &'a MarketBuy)
        -> BoxFuture<'a, GatewayResult<OrderReport>>;

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        order: &'a OrderRef,
    ) -> BoxFuture<'a, GatewayResult<OrderReport>>;

    fn order_status<'a>(
        &'a self,
        symbol: &'a str,
        order: &'a OrderRef,
    ) -> BoxFuture<'a, GatewayResult<OrderReport>>;
}

/// Scripted gateway for tests.
///
/// `place_market_buy` pops scripted results in order and fills the order
/// once the script is exhausted. `order_status` returns the scripted
/// status result if set, else a filled report for the requested order.
#[derive(Debug, Default)]
pub struct MockOrderGateway {
    place_script: Mutex<VecDeque<GatewayResult<OrderReport>>>,
    status_result: Mutex<Option<GatewayResult<OrderReport>>>,
    placed: Mutex<Vec<MarketBuy>>,
    status_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl MockOrderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next unscripted `place_market_buy`.
    pub fn push_place_result(&self, result: GatewayResult<OrderReport>) {
        self.place_script.lock().push_back(result);
    }

    pub fn set_status_result(&self, result: GatewayResult<OrderReport>) {
        *self.status_result.lock() = Some(result);
    }

    /// Orders submitted, in call order.
    pub fn placed(&self) -> Vec<MarketBuy> {
        self.placed.lock().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn network_calls(&self) -> usize {
        self.placed.lock().len()
            + self.status_calls.load(Ordering::SeqCst)
            + self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Filled report for `order`.
    pub fn filled_report(order: &MarketBuy, executed_qty: Decimal) -> OrderReport {
        OrderReport {
            exchange_order_id: "1001".to_string(),
            client_order_id: order.client_order_id.to_string(),
            status: "FILLED".to_string(),
            executed_qty: Some(executed_qty),
            quote_qty: Some(order.quote_qty),
        }
    }
}

impl OrderGateway for MockOrderGateway {
    fn place_market_buy<'a>(
        &'a self,
        order: &'a MarketBuy,
    ) -> BoxFuture<'a, GatewayResult<OrderReport>> {
        Box::pin(async move {
            self.placed.lock().push(order.clone());
            match self.place_script.lock().pop_front() {
                Some(result) => result,
                None => Ok(Self::filled_report(order, Decimal::ONE)),
            }
        })
    }

    fn cancel_order<'a>(
        &'a self,
        _symbol: &'a str,
        order: &'a OrderRef,
    ) -> BoxFuture<'a, GatewayResult<OrderReport>> {
        Box::pin(async move {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            let (exchange_order_id, client_order_id) = match order {
                OrderRef::Exchange(id) => (id.clone(), String::new()),
                OrderRef::Client(cloid) => (String::new(), cloid.to_string()),
            };
            Ok(OrderReport {
                exchange_order_id,
                client_order_id,
                status: "CANCELED".to_string(),
                executed_qty: None,
                quote_qty: None,
            })
        })
    }

    fn order_status<'a>(
        &'a self,
        _symbol: &'a str,
        order: &'a OrderRef,
    ) -> BoxFuture<'a, GatewayResult<OrderReport>> {
        Box::pin(async move {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(result) = self.status_result.lock().clone() {
                return result;
            }
            let client_order_id = match order {
                OrderRef::Client(cloid) => cloid.to_string(),
                OrderRef::Exchange(_) => String::new(),
            };
            Ok(OrderReport {
                exchange_order_id: "1001".to_string(),
                client_order_id,
                status: "FILLED".to_string(),
                executed_qty: Some(Decimal::ONE),
                quote_qty: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transient_statuses() {
        for status in [408, 429, 500, 502, 503] {
            assert!(GatewayError::from_response(status, "").is_transient());
        }
    }

    #[test]
    fn test_classify_terminal_with_exchange_code() {
        let err = GatewayError::from_response(400, r#"{"code":-1121,"msg":"Invalid symbol."}"#);
        assert_eq!(
            err,
            GatewayError::Terminal {
                status: 400,
                message: "Invalid symbol. (-1121)".to_string()
            }
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classify_duplicate_cloid() {
        let err = GatewayError::from_response(400, r#"{"code":-2010,"msg":"Duplicate order sent."}"#);
        assert!(matches!(err, GatewayError::DuplicateClientOrderId(_)));
    }

    #[test]
    fn test_insufficient_balance_is_terminal() {
        let err = GatewayError::from_response(
            400,
            r#"{"code":-2010,"msg":"Account has insufficient balance for requested action."}"#,
        );
        assert!(matches!(err, GatewayError::Terminal { .. }));
    }

    #[test]
    fn test_unaccepted_statuses() {
        let mut report = OrderReport {
            exchange_order_id: "1".to_string(),
            client_order_id: "c".to_string(),
            status: "FILLED".to_string(),
            executed_qty: None,
            quote_qty: None,
        };
        assert!(report.is_accepted());
        report.status = "EXPIRED".to_string();
        assert!(!report.is_accepted());
    }

    #[tokio::test]
    async fn test_mock_gateway_script_then_fill() {
        let gateway = MockOrderGateway::new();
        gateway.push_place_result(Err(GatewayError::Transient("timeout".to_string())));

        let order = MarketBuy {
            symbol: "NEWUSDT".to_string(),
            quote_qty: Decimal::TEN,
            client_order_id: ClientOrderId::new(),
        };
        assert!(gateway.place_market_buy(&order).await.is_err());
        assert!(gateway.place_market_buy(&order).await.is_ok());
        assert_eq!(gateway.placed().len(), 2);
        assert_eq!(gateway.network_calls(), 2);
    }
}
