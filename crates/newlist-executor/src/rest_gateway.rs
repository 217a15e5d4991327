//! Signed REST implementation of `OrderGateway`.

use std::time::Duration;

use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::error::ExecutorResult;
use crate::gateway::{BoxFuture, GatewayError, GatewayResult, MarketBuy, OrderGateway, OrderRef, OrderReport};
use crate::signer::RequestSigner;

const ORDER_PATH: &str = "/api/v3/order";

/// Order payload returned by place, cancel and query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    #[serde(default)]
    client_order_id: String,
    #[serde(default)]
    orig_client_order_id: Option<String>,
    status: String,
    #[serde(default)]
    executed_qty: Option<Decimal>,
    #[serde(default, rename = "cummulativeQuoteQty")]
    cumulative_quote_qty: Option<Decimal>,
}

impl From<OrderResponse> for OrderReport {
    fn from(resp: OrderResponse) -> Self {
        Self {
            exchange_order_id: resp.order_id.to_string(),
            // Cancel responses carry the cancel's own id in clientOrderId.
            client_order_id: resp.orig_client_order_id.unwrap_or(resp.client_order_id),
            status: resp.status,
            executed_qty: resp.executed_qty,
            quote_qty: resp.cumulative_quote_qty,
        }
    }
}

/// HMAC-signed trading API client.
pub struct RestOrderGateway {
    http: Client,
    base_url: String,
    signer: RequestSigner,
}

impl RestOrderGateway {
    pub fn new(base_url: &str, signer: RequestSigner, timeout_ms: u64) -> ExecutorResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
        })
    }

    async fn send_signed(
        &self,
        method: Method,
        params: Vec<(String, String)>,
    ) -> GatewayResult<OrderReport> {
        let query = self.signer.signed_query(params).map_err(|e| GatewayError::Terminal {
            status: 0,
            message: e.to_string(),
        })?;
        let url = format!("{}{}?{}", self.base_url, ORDER_PATH, query);
        trace!(%method, path = ORDER_PATH, "Signed exchange request");

        let resp = self
            .http
            .request(method, url)
            .header("X-MBX-APIKEY", self.signer.api_key())
            .send()
            .await
            .map_err(|e| GatewayError::from_transport(&e))?;

        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) if status.is_success() => {
                return Err(GatewayError::Undecodable(format!("http {status}: {e}")))
            }
            Err(e) => return Err(GatewayError::from_transport(&e)),
        };
        if !status.is_success() {
            debug!(status = status.as_u16(), body = %body, "Exchange error response");
            return Err(GatewayError::from_response(status.as_u16(), &body));
        }

        serde_json::from_str::<OrderResponse>(&body)
            .map(OrderReport::from)
            .map_err(|e| {
                warn!(status = status.as_u16(), body = %body, error = %e, "Unparseable exchange response");
                GatewayError::Undecodable(format!("http {status}: {e}"))
            })
    }
}

fn order_ref_params(symbol: &str, order: &OrderRef) -> Vec<(String, String)> {
    let mut params = vec![("symbol".to_string(), symbol.to_string())];
    match order {
        OrderRef::Exchange(id) => params.push(("orderId".to_string(), id.clone())),
        OrderRef::Client(cloid) => {
            params.push(("origClientOrderId".to_string(), cloid.to_string()))
        }
    }
    params
}

impl OrderGateway for RestOrderGateway {
    fn place_market_buy<'a>(
        &'a self,
        order: &'a MarketBuy,
    ) -> BoxFuture<'a, GatewayResult<OrderReport>> {
        Box::pin(async move {
            let params = vec![
                ("symbol".to_string(), order.symbol.clone()),
                ("side".to_string(), "BUY".to_string()),
                ("type".to_string(), "MARKET".to_string()),
                ("quoteOrderQty".to_string(), order.quote_qty.normalize().to_string()),
                ("newClientOrderId".to_string(), order.client_order_id.to_string()),
                ("newOrderRespType".to_string(), "RESULT".to_string()),
            ];
            self.send_signed(Method::POST, params).await
        })
    }

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        order: &'a OrderRef,
    ) -> BoxFuture<'a, GatewayResult<OrderReport>> {
        Box::pin(async move {
            self.send_signed(Method::DELETE, order_ref_params(symbol, order))
                .await
        })
    }

    fn order_status<'a>(
        &'a self,
        symbol: &'a str,
        order: &'a OrderRef,
    ) -> BoxFuture<'a, GatewayResult<OrderReport>> {
        Box::pin(async move {
            self.send_signed(Method::GET, order_ref_params(symbol, order))
                .await
        })
    }
}
