use std::{fmt, path::PathBuf};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExtractError {
    MissingFile(PathBuf),
    NoTrades,
    InvalidField { field: RawField, value: String },
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExtractError::MissingFile(path) => write!(f, "PDF file not found: {}", path.display()),
            ExtractError::NoTrades => f.write_str("No trades matched, check PDF format or regex"),
            ExtractError::InvalidField { field, value } => {
                write!(f, "Invalid {} ('{}'): {}", field.column().header(), field.group_name(), value)
            }
        }
    }
}

impl std::error::Error for ExtractError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum TradeType {
    Buy,
    Sell,
}

impl TryFrom<&str> for TradeType {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "Buy" => Ok(TradeType::Buy),
            "Sell" => Ok(TradeType::Sell),
            _ => Err(format!("unknown trade type: {}", s)),
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TradeType::Buy => f.write_str("Buy"),
            TradeType::Sell => f.write_str("Sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum ExecutionType {
    Limit,
    Market,
}

impl TryFrom<&str> for ExecutionType {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "Limit" => Ok(ExecutionType::Limit),
            "Market" => Ok(ExecutionType::Market),
            _ => Err(format!("unknown execution type: {}", s)),
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecutionType::Limit => f.write_str("Limit"),
            ExecutionType::Market => f.write_str("Market"),
        }
    }
}

/// Columns of a normalized trade table, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub(crate) enum TradeColumn {
    UniqueId,
    Date,
    Pair,
    TradeType,
    ExecutionType,
    TradePrice,
    TransactionPrice,
    TransferredVolume,
    Fee,
    Currency,
    Token,
}

impl TradeColumn {
    pub(crate) fn header(self) -> &'static str {
        match self {
            TradeColumn::UniqueId => "Unique ID",
            TradeColumn::Date => "Date",
            TradeColumn::Pair => "Pair",
            TradeColumn::TradeType => "Trade Type",
            TradeColumn::ExecutionType => "Execution Type",
            TradeColumn::TradePrice => "Trade Price",
            TradeColumn::TransactionPrice => "Transaction Price",
            TradeColumn::TransferredVolume => "Transferred Volume",
            TradeColumn::Fee => "Fee",
            TradeColumn::Currency => "Currency",
            TradeColumn::Token => "Token",
        }
    }

    /// Identifier-like columns, rendered left aligned.
    pub(crate) fn is_label(self) -> bool {
        matches!(
            self,
            TradeColumn::UniqueId
                | TradeColumn::Date
                | TradeColumn::Pair
                | TradeColumn::TradeType
                | TradeColumn::ExecutionType
        )
    }

    /// Columns shown on the per-pair breakdown sheets.
    pub(crate) fn breakdown_columns() -> impl Iterator<Item = TradeColumn> {
        TradeColumn::iter().filter(|c| !matches!(c, TradeColumn::Currency | TradeColumn::Token))
    }
}

/// Named capture groups of the trade line regex that carry a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub(crate) enum RawField {
    Uid,
    Date,
    Pair,
    Type,
    Subtype,
    Price,
    Cost,
    Volume,
    Fee,
}

impl RawField {
    pub(crate) fn group_name(self) -> &'static str {
        match self {
            RawField::Uid => "uid",
            RawField::Date => "date",
            RawField::Pair => "pair",
            RawField::Type => "type",
            RawField::Subtype => "subtype",
            RawField::Price => "price",
            RawField::Cost => "cost",
            RawField::Volume => "volume",
            RawField::Fee => "fee",
        }
    }

    pub(crate) fn column(self) -> TradeColumn {
        match self {
            RawField::Uid => TradeColumn::UniqueId,
            RawField::Date => TradeColumn::Date,
            RawField::Pair => TradeColumn::Pair,
            RawField::Type => TradeColumn::TradeType,
            RawField::Subtype => TradeColumn::ExecutionType,
            RawField::Price => TradeColumn::TradePrice,
            RawField::Cost => TradeColumn::TransactionPrice,
            RawField::Volume => TradeColumn::TransferredVolume,
            RawField::Fee => TradeColumn::Fee,
        }
    }
}

/// Split a `TOKEN/CURRENCY` pair into `(token, currency)`.
pub(crate) fn split_pair(pair: &str) -> Option<(&str, &str)> {
    match pair.split_once('/') {
        Some((token, currency)) if !token.is_empty() && !currency.is_empty() => Some((token, currency)),
        _ => None,
    }
}

/// A normalized trade, one row of the trade table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TradeRow {
    pub unique_id: String,
    pub date: NaiveDate,
    pub pair: String,
    pub trade_type: TradeType,
    pub execution_type: ExecutionType,
    pub trade_price: Decimal,
    pub transaction_price: Decimal,
    pub transferred_volume: Decimal,
    pub fee: Decimal,
    pub currency: String,
    pub token: String,
}

impl TradeRow {
    pub(crate) fn is_buy(&self) -> bool {
        self.trade_type == TradeType::Buy
    }

    /// Display value of a single column.
    pub(crate) fn cell(&self, column: TradeColumn) -> Cell {
        match column {
            TradeColumn::UniqueId => Cell::Text(self.unique_id.clone()),
            TradeColumn::Date => Cell::Text(crate::time::format_date(&self.date)),
            TradeColumn::Pair => Cell::Text(self.pair.clone()),
            TradeColumn::TradeType => Cell::Text(self.trade_type.to_string()),
            TradeColumn::ExecutionType => Cell::Text(self.execution_type.to_string()),
            TradeColumn::TradePrice => Cell::Number(self.trade_price),
            TradeColumn::TransactionPrice => Cell::Number(self.transaction_price),
            TradeColumn::TransferredVolume => Cell::Number(self.transferred_volume),
            TradeColumn::Fee => Cell::Number(self.fee),
            TradeColumn::Currency => Cell::Text(self.currency.clone()),
            TradeColumn::Token => Cell::Text(self.token.clone()),
        }
    }
}

/// A spreadsheet cell value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cell {
    Empty,
    Text(String),
    Number(Decimal),
}

impl Cell {
    pub(crate) fn display_len(&self) -> usize {
        match self {
            Cell::Empty => 0,
            Cell::Text(text) => text.chars().count(),
            Cell::Number(number) => number.normalize().to_string().len(),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_owned())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<Decimal> for Cell {
    fn from(d: Decimal) -> Self {
        Cell::Number(d)
    }
}

impl From<Option<Decimal>> for Cell {
    fn from(d: Option<Decimal>) -> Self {
        d.map_or(Cell::Empty, Cell::Number)
    }
}
