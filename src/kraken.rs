//! Kraken trade history PDF parsing.
//!
//! Kraken's PDF export places each trade on two adjacent lines: a date line
//! (`2024-01-05`) followed by the trade details
//! (`TXID BTC/EUR Buy Market <price> <cost> <volume> <fee> <margin>`).
//! Parsing happens in three steps:
//!
//! 1. [`merge_trade_lines`] joins date and detail lines into candidates,
//! 2. [`match_trade`] validates a candidate and captures its fields,
//! 3. `TradeRow::try_from(RawTrade)` converts the captures into typed values.

use std::{path::Path, str::FromStr, sync::LazyLock};

use anyhow::Result;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::{
    base::{split_pair, ExecutionType, ExtractError, RawField, TradeRow, TradeType},
    pdf, time,
};

/// Decimal places retained for parsed numbers.
pub(crate) const PARSE_DECIMAL_PLACES: u32 = 10;

static DATE_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

static TRADE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?P<date>\d{4}-\d{2}-\d{2})\s+",
        r"(?P<uid>[A-Z0-9-]+)\s+",
        r"(?P<pair>[A-Z0-9]+/[A-Z0-9]+)\s+",
        r"(?P<type>Buy|Sell)\s+",
        r"(?P<subtype>Limit|Market)\s+",
        r"(?P<price>\d+\.\d+)\s+",
        r"(?P<cost>\d+\.\d+)\s+",
        r"(?P<volume>\d+\.\d+)\s+",
        r"(?P<fee>\d+\.\d+)\s+",
        r"(?P<margin>\d+\.\d+)$",
    ))
    .unwrap()
});

/// The named captures of one matched trade line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawTrade {
    pub date: String,
    pub uid: String,
    pub pair: String,
    pub trade_type: String,
    pub subtype: String,
    pub price: String,
    pub cost: String,
    pub volume: String,
    pub fee: String,
    pub margin: String,
}

impl RawTrade {
    pub(crate) fn field(&self, field: RawField) -> &str {
        match field {
            RawField::Uid => &self.uid,
            RawField::Date => &self.date,
            RawField::Pair => &self.pair,
            RawField::Type => &self.trade_type,
            RawField::Subtype => &self.subtype,
            RawField::Price => &self.price,
            RawField::Cost => &self.cost,
            RawField::Volume => &self.volume,
            RawField::Fee => &self.fee,
        }
    }

    fn invalid(&self, field: RawField) -> ExtractError {
        ExtractError::InvalidField { field, value: self.field(field).to_owned() }
    }

    fn decimal(&self, field: RawField) -> Result<Decimal, ExtractError> {
        Decimal::from_str(self.field(field))
            .map(|d| d.round_dp(PARSE_DECIMAL_PLACES))
            .map_err(|_| self.invalid(field))
    }
}

impl TryFrom<RawTrade> for TradeRow {
    type Error = ExtractError;

    fn try_from(raw: RawTrade) -> Result<Self, Self::Error> {
        let date = time::parse_pdf_date(&raw.date).map_err(|_| raw.invalid(RawField::Date))?;
        let trade_type = TradeType::try_from(raw.trade_type.as_str()).map_err(|_| raw.invalid(RawField::Type))?;
        let execution_type = ExecutionType::try_from(raw.subtype.as_str()).map_err(|_| raw.invalid(RawField::Subtype))?;
        let (token, currency) = split_pair(&raw.pair).ok_or_else(|| raw.invalid(RawField::Pair))?;

        Ok(TradeRow {
            trade_price: raw.decimal(RawField::Price)?,
            transaction_price: raw.decimal(RawField::Cost)?,
            transferred_volume: raw.decimal(RawField::Volume)?,
            fee: raw.decimal(RawField::Fee)?,
            token: token.to_owned(),
            currency: currency.to_owned(),
            unique_id: raw.uid,
            date,
            pair: raw.pair,
            trade_type,
            execution_type,
        })
    }
}

/// Merges each date line with the trade line that follows it.
///
/// The last line is never examined as a date line.
pub(crate) fn merge_trade_lines<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let mut merged = Vec::new();
    let mut i = 0;
    while i + 1 < lines.len() {
        let date_line = lines[i].as_ref().trim();
        let trade_line = lines[i + 1].as_ref().trim();

        if DATE_LINE.is_match(date_line) && !trade_line.starts_with("Page") {
            merged.push(format!("{} {}", date_line, trade_line));
            i += 2;
        } else {
            i += 1;
        }
    }
    merged
}

pub(crate) fn match_trade(candidate: &str) -> Option<RawTrade> {
    let captures = TRADE_LINE.captures(candidate)?;
    let group = |name: &str| captures.name(name).map_or_else(String::new, |m| m.as_str().to_owned());

    Some(RawTrade {
        date: group("date"),
        uid: group("uid"),
        pair: group("pair"),
        trade_type: group("type"),
        subtype: group("subtype"),
        price: group("price"),
        cost: group("cost"),
        volume: group("volume"),
        fee: group("fee"),
        margin: group("margin"),
    })
}

/// Extracts the raw trade records of a whole document.
///
/// Fails when not a single trade matched, since that always means the
/// export format changed.
pub(crate) fn extract_raw_trades<S: AsRef<str>>(pages: &[Vec<S>]) -> Result<Vec<RawTrade>, ExtractError> {
    let mut records = Vec::new();

    for (page_num, lines) in pages.iter().enumerate() {
        debug!("Page {}: {} lines", page_num + 1, lines.len());

        for merged in merge_trade_lines(lines.as_slice()) {
            match match_trade(&merged) {
                Some(record) => {
                    debug!("Matched trade: {:?}", record);
                    records.push(record);
                }
                None => warn!("Unmatched trade line: {}", merged),
            }
        }
    }

    if records.is_empty() {
        return Err(ExtractError::NoTrades);
    }

    info!("Extracted {} trade records", records.len());
    Ok(records)
}

/// Turns page text into normalized trade rows.
pub(crate) trait TradeExtractor {
    fn extract(&self, pages: &[Vec<String>]) -> Result<Vec<TradeRow>, ExtractError>;
}

/// Line-merging regex extractor for Kraken's trade history export.
pub(crate) struct RegexTradeExtractor;

impl TradeExtractor for RegexTradeExtractor {
    /// Records with a field that does not convert (e.g. `2024-02-30`) are
    /// logged and skipped like unmatched lines.
    fn extract(&self, pages: &[Vec<String>]) -> Result<Vec<TradeRow>, ExtractError> {
        let rows: Vec<TradeRow> = extract_raw_trades(pages)?
            .into_iter()
            .filter_map(|raw| {
                let uid = raw.uid.clone();
                match TradeRow::try_from(raw) {
                    Ok(row) => Some(row),
                    Err(e) => {
                        warn!("Skipping trade {}: {}", uid, e);
                        None
                    }
                }
            })
            .collect();

        if rows.is_empty() {
            return Err(ExtractError::NoTrades);
        }
        Ok(rows)
    }
}

pub(crate) fn load_kraken_trades_pdf(path: &Path, extractor: &dyn TradeExtractor) -> Result<Vec<TradeRow>> {
    info!("Starting PDF extraction from: {}", path.display());
    let pages = pdf::page_lines(path)?;
    let rows = extractor.extract(&pages)?;
    info!("Built trade table with {} rows", rows.len());
    Ok(rows)
}
