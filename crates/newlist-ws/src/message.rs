//! Feed wire messages.
//!
//! Ticker payloads follow the Binance stream format: objects with `s`
//! (symbol), `c` (last price, string) and `E` (event time, ms), delivered
//! either as a bare array (`!ticker@arr`), a single object, or wrapped in a
//! combined-stream envelope `{"stream": ..., "data": ...}`.

use chrono::{DateTime, TimeZone, Utc};
use newlist_core::{ListingSource, TickerEvent};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WsError, WsResult};

/// Subscribe control message.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub method: &'static str,
    pub params: Vec<String>,
    pub id: u64,
}

impl SubscribeRequest {
    pub fn new(streams: &[String], id: u64) -> Self {
        Self {
            method: "SUBSCRIBE",
            params: streams.to_vec(),
            id,
        }
    }
}

/// One ticker object as sent on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTicker {
    #[serde(rename = "s", alias = "symbol")]
    pub symbol: String,
    #[serde(rename = "c", alias = "price")]
    pub price: Decimal,
    #[serde(rename = "E", alias = "timestamp")]
    pub event_time_ms: i64,
}

impl RawTicker {
    pub fn into_event(self) -> WsResult<TickerEvent> {
        if self.symbol.trim().is_empty() {
            return Err(WsError::ParseError("empty symbol".to_string()));
        }
        let timestamp: DateTime<Utc> = Utc
            .timestamp_millis_opt(self.event_time_ms)
            .single()
            .ok_or_else(|| {
                WsError::ParseError(format!("invalid event time {}", self.event_time_ms))
            })?;
        Ok(TickerEvent::new(
            &self.symbol,
            self.price,
            timestamp,
            ListingSource::Feed,
        ))
    }
}

/// A decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Ticker events; `malformed` counts elements dropped from the frame.
    Tickers {
        events: Vec<TickerEvent>,
        malformed: usize,
    },
    /// Reply to a control message (`{"result": null, "id": 1}`).
    Ack { id: u64 },
    /// Valid JSON that carries no ticker data (other event types).
    Ignored,
}

/// Decode one text frame.
///
/// Returns `ParseError` only when the frame as a whole is unusable; bad
/// elements inside an otherwise valid array are dropped and counted.
pub fn parse_frame(text: &str) -> WsResult<FeedMessage> {
    let value: Value = serde_json::from_str(text)?;
    parse_value(value)
}

fn parse_value(value: Value) -> WsResult<FeedMessage> {
    match value {
        Value::Array(items) => {
            let total = items.len();
            let events: Vec<TickerEvent> = items
                .into_iter()
                .filter_map(|item| parse_ticker(item).ok())
                .collect();
            let malformed = total - events.len();
            if total > 0 && events.is_empty() {
                return Err(WsError::ParseError(format!(
                    "no valid tickers in array of {total}"
                )));
            }
            Ok(FeedMessage::Tickers { events, malformed })
        }
        Value::Object(mut map) => {
            if let Some(data) = map.remove("data") {
                return parse_value(data);
            }
            if map.contains_key("result") {
                let id = map.get("id").and_then(Value::as_u64).unwrap_or(0);
                return Ok(FeedMessage::Ack { id });
            }
            if map.contains_key("s") || map.contains_key("symbol") {
                let event = parse_ticker(Value::Object(map))?;
                return Ok(FeedMessage::Tickers {
                    events: vec![event],
                    malformed: 0,
                });
            }
            Ok(FeedMessage::Ignored)
        }
        other => Err(WsError::ParseError(format!(
            "unexpected frame type: {}",
            json_kind(&other)
        ))),
    }
}

fn parse_ticker(value: Value) -> WsResult<TickerEvent> {
    let raw: RawTicker = serde_json::from_value(value)?;
    raw.into_event()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_subscribe_request_format() {
        let req = SubscribeRequest::new(&["!ticker@arr".to_string()], 7);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"method":"SUBSCRIBE","params":["!ticker@arr"],"id":7}"#);
    }

    #[test]
    fn test_parse_ticker_array() {
        let text = r#"[
            {"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","c":"37000.10","C":1700000000000},
            {"e":"24hrTicker","E":1700000000001,"s":"newusdt","c":"0.5"}
        ]"#;
        match parse_frame(text).unwrap() {
            FeedMessage::Tickers { events, malformed } => {
                assert_eq!(malformed, 0);
                assert_eq!(events.len(), 2);
                assert_eq!(events[1].symbol, "NEWUSDT");
                assert_eq!(events[1].price, dec!(0.5));
                assert_eq!(events[0].timestamp.timestamp_millis(), 1_700_000_000_000);
            }
            other => panic!("expected tickers, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_long_names_and_envelope() {
        let text = r#"{"stream":"newusdt@ticker","data":{"symbol":"NEWUSDT","price":"1.25","timestamp":1700000000000}}"#;
        match parse_frame(text).unwrap() {
            FeedMessage::Tickers { events, .. } => {
                assert_eq!(events[0].symbol, "NEWUSDT");
                assert_eq!(events[0].price, dec!(1.25));
            }
            other => panic!("expected tickers, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_elements_dropped_and_counted() {
        let text = r#"[{"s":"AUSDT","c":"1","E":1700000000000},{"s":"BUSDT","c":"oops","E":1}]"#;
        match parse_frame(text).unwrap() {
            FeedMessage::Tickers { events, malformed } => {
                assert_eq!(events.len(), 1);
                assert_eq!(malformed, 1);
            }
            other => panic!("expected tickers, got {other:?}"),
        }
    }

    #[test]
    fn test_ack_and_ignored() {
        assert_eq!(
            parse_frame(r#"{"result":null,"id":3}"#).unwrap(),
            FeedMessage::Ack { id: 3 }
        );
        assert_eq!(
            parse_frame(r#"{"e":"kline","k":{}}"#).unwrap(),
            FeedMessage::Ignored
        );
    }

    #[test]
    fn test_malformed_frames() {
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame("42").is_err());
        assert!(parse_frame(r#"[{"s":"AUSDT"}]"#).is_err());
        assert!(parse_frame(r#"{"s":"AUSDT","c":"1"}"#).is_err());
    }
}
