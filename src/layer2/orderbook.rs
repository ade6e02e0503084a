// Order Book - per-symbol price ladder with sequence-ordered merging
// BTreeMap keyed by OrderedFloat keeps both sides sorted without manual insertion scans

use ordered_float::OrderedFloat;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::core::{BookLevel, BookSide};

type Price = OrderedFloat<f64>;
type Size = f64;

#[derive(Debug, Error, PartialEq)]
pub enum OrderBookError {
    #[error("Invalid {field}: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("Malformed change entry: {0}")]
    MalformedChange(String),
}

fn parse_f64(value: &str, field: &'static str) -> Result<f64, OrderBookError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| OrderBookError::InvalidNumber { field, value: value.to_string() })
}

/// Sequence tokens are decimal digit strings
pub fn parse_sequence(value: &str) -> Result<u64, OrderBookError> {
    value
        .parse::<u64>()
        .map_err(|_| OrderBookError::InvalidNumber { field: "sequence", value: value.to_string() })
}

/// One change entry as received. Expected to be a `[price, size, sequence]`
/// array of strings; anything else is rejected when the batch is merged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RawChange(pub Value);

impl RawChange {
    pub fn new(price: &str, size: &str, sequence: &str) -> Self {
        Self(Value::Array(vec![price.into(), size.into(), sequence.into()]))
    }

    pub fn triple(&self) -> Result<[&str; 3], OrderBookError> {
        match self.0.as_array().map(Vec::as_slice) {
            Some([Value::String(price), Value::String(size), Value::String(seq)]) => {
                Ok([price.as_str(), size.as_str(), seq.as_str()])
            }
            _ => Err(OrderBookError::MalformedChange(self.0.to_string())),
        }
    }
}

/// Raw change lists of one `trade.l2update`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BookChanges {
    #[serde(default)]
    pub asks: Vec<RawChange>,
    #[serde(default)]
    pub bids: Vec<RawChange>,
}

impl BookChanges {
    pub fn from_triples(asks: &[[&str; 3]], bids: &[[&str; 3]]) -> Self {
        let convert = |entries: &[[&str; 3]]| -> Vec<RawChange> {
            entries.iter().map(|[p, s, q]| RawChange::new(p, s, q)).collect()
        };
        Self { asks: convert(asks), bids: convert(bids) }
    }
}

/// Queue entry for the merge worker
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PendingUpdate {
    pub symbol: String,
    pub changes: BookChanges,
}

/// What a single `[price, size, seq]` change did to the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// seq <= book sequence
    Stale,
    /// Zero size for a price not on the book
    NoOp,
    Removed,
    /// Existing level's size overwritten
    Updated,
    /// New level; `best` when it became the new best of its side
    Inserted { best: bool },
}

/// Totals for one merged batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: u64,
    pub stale: u64,
    pub malformed: u64,
    /// A new best ask or best bid was inserted
    pub best_changed: bool,
}

/// Order book for a single symbol
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    asks: BTreeMap<Price, Size>,
    bids: BTreeMap<Price, Size>,
    sequence: u64,
}

impl OrderBook {
    /// Empty book with the zero sequence sentinel
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn side_mut(&mut self, side: BookSide) -> &mut BTreeMap<Price, Size> {
        match side {
            BookSide::Asks => &mut self.asks,
            BookSide::Bids => &mut self.bids,
        }
    }

    /// Replace the top of the book with a snapshot.
    ///
    /// The snapshot's levels become the first N levels of each side. Levels
    /// that sat deeper than position N before the snapshot survive only if
    /// they lie beyond the snapshot's deepest price, so a shallow depth push
    /// refreshes the top without discarding known deeper liquidity and
    /// without breaking price order. The sequence is replaced outright.
    pub fn apply_snapshot(
        &mut self,
        asks: &[[String; 2]],
        bids: &[[String; 2]],
        sequence: u64,
    ) -> Result<(), OrderBookError> {
        let new_asks = parse_levels(asks)?;
        let new_bids = parse_levels(bids)?;

        self.asks = rebuild_side(&self.asks, new_asks, BookSide::Asks);
        self.bids = rebuild_side(&self.bids, new_bids, BookSide::Bids);
        self.sequence = sequence;
        Ok(())
    }

    /// Apply one `[price, size, seq]` change to one side
    pub fn apply_change<T: AsRef<str>>(&mut self, side: BookSide, change: &[T; 3]) -> Result<ChangeOutcome, OrderBookError> {
        let seq = parse_sequence(change[2].as_ref())?;
        if seq <= self.sequence {
            return Ok(ChangeOutcome::Stale);
        }

        let price = OrderedFloat(parse_f64(change[0].as_ref(), "price")?);
        let size = parse_f64(change[1].as_ref(), "size")?;
        let levels = self.side_mut(side);

        if size == 0.0 {
            return Ok(match levels.remove(&price) {
                Some(_) => ChangeOutcome::Removed,
                None => ChangeOutcome::NoOp,
            });
        }

        if let Some(existing) = levels.get_mut(&price) {
            *existing = size;
            return Ok(ChangeOutcome::Updated);
        }

        let best = match side {
            BookSide::Asks => levels.keys().next().map_or(true, |best| price < *best),
            BookSide::Bids => levels.keys().next_back().map_or(true, |best| price > *best),
        };
        levels.insert(price, size);
        Ok(ChangeOutcome::Inserted { best })
    }

    /// Merge a batch of changes, asks first then bids.
    ///
    /// Staleness is judged per change against the sequence the batch started
    /// from; once the batch is done the sequence advances to the highest one
    /// applied, so replaying the same batch is a no-op.
    pub fn merge(&mut self, changes: &BookChanges) -> MergeReport {
        let mut report = MergeReport::default();
        let mut highest = self.sequence;

        let sides = [(BookSide::Asks, &changes.asks), (BookSide::Bids, &changes.bids)];
        for (side, entries) in sides {
            for entry in entries {
                let Ok(change) = entry.triple() else {
                    report.malformed += 1;
                    continue;
                };
                match self.apply_change(side, &change) {
                    Ok(ChangeOutcome::Stale) => report.stale += 1,
                    Ok(outcome) => {
                        report.applied += 1;
                        if let Ok(seq) = parse_sequence(change[2]) {
                            highest = highest.max(seq);
                        }
                        if outcome == (ChangeOutcome::Inserted { best: true }) {
                            report.best_changed = true;
                        }
                    }
                    Err(_) => report.malformed += 1,
                }
            }
        }

        self.sequence = highest;
        report
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.iter().next().map(|(p, s)| BookLevel::new(p.0, *s))
    }

    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.iter().next_back().map(|(p, s)| BookLevel::new(p.0, *s))
    }

    /// Top N ask levels, best (lowest) first
    pub fn top_asks(&self, n: usize) -> Vec<BookLevel> {
        self.asks.iter().take(n).map(|(p, s)| BookLevel::new(p.0, *s)).collect()
    }

    /// Top N bid levels, best (highest) first
    pub fn top_bids(&self, n: usize) -> Vec<BookLevel> {
        self.bids.iter().rev().take(n).map(|(p, s)| BookLevel::new(p.0, *s)).collect()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn size_at(&self, side: BookSide, price: f64) -> Option<f64> {
        let levels = match side {
            BookSide::Asks => &self.asks,
            BookSide::Bids => &self.bids,
        };
        levels.get(&OrderedFloat(price)).copied()
    }

    /// Text ladder: asks highest first down to the best ask, the current
    /// price between delimiters, then bids from the best bid down.
    pub fn render(&self, depth: usize, current_price: &str) -> String {
        let delim = "\n--------------------------\n";
        let mut asks = self.top_asks(depth);
        asks.reverse();
        let asks: Vec<String> = asks.iter().map(|l| l.to_string()).collect();
        let bids: Vec<String> = self.top_bids(depth).iter().map(|l| l.to_string()).collect();

        format!("{}{}\n{}\n{}{}", asks.join("\n"), delim, current_price, delim, bids.join("\n"))
    }
}

impl fmt::Display for OrderBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OrderBook(seq={}, asks={}, bids={})",
            self.sequence, self.asks.len(), self.bids.len()
        )
    }
}

fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<(Price, Size)>, OrderBookError> {
    raw.iter()
        .map(|[p, s]| Ok::<_, OrderBookError>((OrderedFloat(parse_f64(p, "price")?), parse_f64(s, "size")?)))
        .collect()
}

fn rebuild_side(old: &BTreeMap<Price, Size>, new: Vec<(Price, Size)>, side: BookSide) -> BTreeMap<Price, Size> {
    let depth = new.len();
    let deepest = match side {
        BookSide::Asks => new.iter().map(|(p, _)| *p).max(),
        BookSide::Bids => new.iter().map(|(p, _)| *p).min(),
    };

    let mut rebuilt: BTreeMap<Price, Size> = new.into_iter().filter(|(_, s)| *s != 0.0).collect();

    let old_ranked: Box<dyn Iterator<Item = (&Price, &Size)>> = match side {
        BookSide::Asks => Box::new(old.iter()),
        BookSide::Bids => Box::new(old.iter().rev()),
    };
    for (price, size) in old_ranked.skip(depth) {
        let beyond = match (side, deepest) {
            (_, None) => true,
            (BookSide::Asks, Some(d)) => *price > d,
            (BookSide::Bids, Some(d)) => *price < d,
        };
        if beyond {
            rebuilt.insert(*price, *size);
        }
    }
    rebuilt
}
