//! Listing records and their dedup key.

use crate::error::CoreError;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Where a listing observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingSource {
    /// Streaming ticker feed.
    Feed,
    /// REST-poll fallback.
    Poll,
    /// Injected by an operator or a test.
    Injected,
}

impl ListingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Poll => "poll",
            Self::Injected => "injected",
        }
    }
}

impl fmt::Display for ListingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feed" => Ok(Self::Feed),
            "poll" => Ok(Self::Poll),
            "injected" => Ok(Self::Injected),
            _ => Err(CoreError::UnknownVariant {
                kind: "listing source",
                value: s.to_string(),
            }),
        }
    }
}

/// Dedup key for a listing: (symbol, listed_at).
///
/// Symbols are upper-cased and timestamps truncated to milliseconds so the
/// in-process key and the stored row always agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
    symbol: String,
    listed_at: DateTime<Utc>,
}

impl ListingKey {
    pub fn new(symbol: &str, listed_at: DateTime<Utc>) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            listed_at: listed_at.trunc_subsecs(3),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn listed_at(&self) -> DateTime<Utc> {
        self.listed_at
    }
}

impl fmt::Display for ListingKey {
    /// `SYMBOL|2024-01-01T00:00:00.000Z`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}",
            self.symbol,
            self.listed_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

/// A detected listing, written once per unique (symbol, listed_at).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: Uuid,
    pub symbol: String,
    pub listed_at: DateTime<Utc>,
    pub source: ListingSource,
    pub created_at: DateTime<Utc>,
}

impl ListingRecord {
    /// Build a fresh record for a key (id and created_at assigned here).
    pub fn new(key: &ListingKey, source: ListingSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: key.symbol().to_string(),
            listed_at: key.listed_at(),
            source,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ListingKey {
        ListingKey::new(&self.symbol, self.listed_at)
    }
}

/// Upper-case and trim a symbol.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}
