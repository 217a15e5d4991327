//! Integration tests for feed frame decoding through the public API.

use newlist_core::ListingSource;
use newlist_ws::{parse_frame, FeedMessage, SubscribeRequest};

/// Full Binance `!ticker@arr` element, including fields we ignore.
#[test]
fn test_full_binance_ticker_frame() {
    let raw = r#"[{
        "e": "24hrTicker",
        "E": 1700000000123,
        "s": "NEWUSDT",
        "p": "0.0015",
        "P": "250.000",
        "w": "0.0012",
        "c": "0.00210000",
        "Q": "10",
        "o": "0.0006",
        "h": "0.0030",
        "l": "0.0005",
        "v": "1000000",
        "q": "1200",
        "O": 1699913600123,
        "C": 1700000000123,
        "F": 0,
        "L": 99,
        "n": 100
    }]"#;

    let msg = parse_frame(raw).expect("parse frame");
    let FeedMessage::Tickers { events, malformed } = msg else {
        panic!("Expected ticker frame");
    };
    assert_eq!(malformed, 0);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].symbol, "NEWUSDT");
    assert_eq!(events[0].price.to_string(), "0.00210000");
    assert_eq!(events[0].timestamp.timestamp_millis(), 1_700_000_000_123);
    assert_eq!(events[0].source, ListingSource::Feed);
}

/// Subscribe request round-trips through serde_json as the server sees it.
#[test]
fn test_subscribe_request_json_shape() {
    let req = SubscribeRequest::new(&["!ticker@arr".to_string(), "newusdt@ticker".to_string()], 1);
    let value: serde_json::Value = serde_json::to_value(&req).unwrap();

    assert_eq!(value["method"], "SUBSCRIBE");
    assert_eq!(value["params"][1], "newusdt@ticker");
    assert_eq!(value["id"], 1);
}

/// Array frames where every element is broken are a parse error as a whole.
#[test]
fn test_all_bad_elements_is_error() {
    let raw = r#"[{"s":"AUSDT","c":"x","E":1},{"c":"1","E":1}]"#;
    assert!(parse_frame(raw).is_err());
}
