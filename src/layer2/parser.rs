// Feed Message Parser - classifies KuCoin push messages by `subject`
// Stateless; counters live with the maintainer

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::layer2::orderbook::{BookChanges, PendingUpdate};

pub const SUBJECT_L2_UPDATE: &str = "trade.l2update";
pub const SUBJECT_L3_MATCH: &str = "trade.l3match";
pub const SUBJECT_DEPTH_SNAPSHOT: &str = "level2";

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Missing or malformed field: {0}")]
    MissingField(&'static str),
}

/// A classified feed message
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// `trade.l2update`: queued for the merge worker
    DepthUpdate(PendingUpdate),
    /// `trade.l3match`: last trade price
    TradeMatch { symbol: String, price: String },
    /// `level2` depth push: applied directly as a snapshot
    DepthSnapshot { symbol: String, asks: Vec<[String; 2]>, bids: Vec<[String; 2]> },
    /// No `subject` (welcome, ack, pong) or a subject this maintainer does not consume
    Ignored,
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct RawDepth {
    #[serde(default)]
    asks: Vec<[String; 2]>,
    #[serde(default)]
    bids: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct RawL2Update {
    symbol: String,
    changes: BookChanges,
}

fn data_of(value: &Value) -> Result<Value, ParseError> {
    value.get("data").cloned().ok_or(ParseError::MissingField("data"))
}

/// Symbol from a topic such as `/spotMarket/level2Depth50:BTC-USDT`
fn symbol_from_topic(value: &Value) -> Result<String, ParseError> {
    value
        .get("topic")
        .and_then(|t| t.as_str())
        .and_then(|t| t.split(':').nth(1))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or(ParseError::MissingField("topic"))
}

pub fn parse_feed_message(raw: &str) -> Result<FeedMessage, ParseError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    parse_feed_value(&value)
}

pub fn parse_feed_value(value: &Value) -> Result<FeedMessage, ParseError> {
    let subject = match value.get("subject").and_then(|s| s.as_str()) {
        Some(subject) => subject,
        None => return Ok(FeedMessage::Ignored),
    };

    match subject {
        SUBJECT_L2_UPDATE => {
            let raw: RawL2Update =
                serde_json::from_value(data_of(value)?).map_err(|_| ParseError::MissingField("data.changes"))?;
            Ok(FeedMessage::DepthUpdate(PendingUpdate { symbol: raw.symbol, changes: raw.changes }))
        }
        SUBJECT_L3_MATCH => {
            let raw: RawMatch =
                serde_json::from_value(data_of(value)?).map_err(|_| ParseError::MissingField("data.price"))?;
            Ok(FeedMessage::TradeMatch { symbol: raw.symbol, price: raw.price })
        }
        SUBJECT_DEPTH_SNAPSHOT => {
            let symbol = symbol_from_topic(value)?;
            let raw: RawDepth =
                serde_json::from_value(data_of(value)?).map_err(|_| ParseError::MissingField("data.asks"))?;
            Ok(FeedMessage::DepthSnapshot { symbol, asks: raw.asks, bids: raw.bids })
        }
        _ => Ok(FeedMessage::Ignored),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_l2update() {
        let raw = r#"{"type":"message","topic":"/market/level2:BTC-USDT","subject":"trade.l2update",
            "data":{"changes":{"asks":[["18906","0.00331","14103845"]],"bids":[["18891.9","0","14103846"]]},
            "sequenceEnd":14103846,"sequenceStart":14103845,"symbol":"BTC-USDT","time":1663747970273}}"#;

        match parse_feed_message(raw).unwrap() {
            FeedMessage::DepthUpdate(update) => {
                assert_eq!(update.symbol, "BTC-USDT");
                assert_eq!(update.changes.asks.len(), 1);
                assert_eq!(update.changes.bids[0].triple().unwrap(), ["18891.9", "0", "14103846"]);
            }
            other => panic!("expected depth update, got {:?}", other),
        }
    }

    #[test]
    fn test_l2update_with_bad_entry_still_parses() {
        let raw = r#"{"type":"message","topic":"/market/level2:BTC-USDT","subject":"trade.l2update",
            "data":{"changes":{"asks":[["18906","0.00331","14103845"],[18907,"1","14103846"]],
            "bids":[["18891.9","0","14103847","x"]]},"symbol":"BTC-USDT"}}"#;

        match parse_feed_message(raw).unwrap() {
            FeedMessage::DepthUpdate(update) => {
                assert_eq!(update.changes.asks.len(), 2);
                assert!(update.changes.asks[0].triple().is_ok());
                assert!(update.changes.asks[1].triple().is_err());
                assert!(update.changes.bids[0].triple().is_err());
            }
            other => panic!("expected depth update, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_match() {
        let raw = r#"{"type":"message","topic":"/market/match:BTC-USDT","subject":"trade.l3match",
            "data":{"sequence":"1545896669145","type":"match","symbol":"BTC-USDT","side":"buy",
            "price":"0.08200000000000000000","size":"0.01022222000000000000","tradeId":"5c24c5da03aa673885cd67aa"}}"#;
        assert_eq!(
            parse_feed_message(raw).unwrap(),
            FeedMessage::TradeMatch { symbol: "BTC-USDT".to_string(), price: "0.08200000000000000000".to_string() }
        );
    }

    #[test]
    fn test_parse_depth_push() {
        let raw = r#"{"type":"message","topic":"/spotMarket/level2Depth50:ETH-USDT","subject":"level2",
            "data":{"asks":[["9989","8"],["9990","32"]],"bids":[["9988","56"]],"timestamp":1586948108193}}"#;
        match parse_feed_message(raw).unwrap() {
            FeedMessage::DepthSnapshot { symbol, asks, bids } => {
                assert_eq!(symbol, "ETH-USDT");
                assert_eq!(asks.len(), 2);
                assert_eq!(bids[0], ["9988".to_string(), "56".to_string()]);
            }
            other => panic!("expected depth snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_messages_without_subject_are_ignored() {
        assert_eq!(parse_feed_message(r#"{"id":"hQvf8jkno","type":"welcome"}"#).unwrap(), FeedMessage::Ignored);
        assert_eq!(parse_feed_message(r#"{"id":"1","type":"pong"}"#).unwrap(), FeedMessage::Ignored);
        assert_eq!(
            parse_feed_message(r#"{"type":"message","subject":"trade.ticker","data":{}}"#).unwrap(),
            FeedMessage::Ignored
        );
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(parse_feed_message("not json"), Err(ParseError::InvalidJson(_))));
        assert_eq!(
            parse_feed_message(r#"{"subject":"trade.l3match","data":{"symbol":"BTC-USDT"}}"#),
            Err(ParseError::MissingField("data.price"))
        );
        assert_eq!(
            parse_feed_message(r#"{"subject":"level2","topic":"/spotMarket/level2Depth50","data":{}}"#),
            Err(ParseError::MissingField("topic"))
        );
        // Changes must still be lists
        assert_eq!(
            parse_feed_message(r#"{"subject":"trade.l2update","data":{"symbol":"BTC-USDT","changes":{"asks":"oops"}}}"#),
            Err(ParseError::MissingField("data.changes"))
        );
    }
}
