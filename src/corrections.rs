//! Manual corrections for trades missing from the PDF export.
//!
//! Some historical buys are known not to appear in Kraken's trade history
//! export. They are supplied as a CSV dataset of synthetic buy rows, keyed by
//! pair, and appended to the buy side of that pair before aggregation.

use std::{collections::BTreeMap, io::Read, path::Path};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::{
    base::{split_pair, ExecutionType, TradeRow, TradeType},
    time::deserialize_display_date,
};

/// CSV header:
/// unique_id,date,pair,trade_type,execution_type,trade_price,transaction_price,transferred_volume,fee
#[derive(Debug, Deserialize)]
struct CorrectionRecord {
    unique_id: String,
    #[serde(deserialize_with = "deserialize_display_date")]
    date: NaiveDate,
    pair: String,
    trade_type: TradeType,
    execution_type: ExecutionType,
    trade_price: Decimal,
    transaction_price: Decimal,
    transferred_volume: Decimal,
    fee: Decimal,
}

impl TryFrom<CorrectionRecord> for TradeRow {
    type Error = anyhow::Error;

    fn try_from(record: CorrectionRecord) -> Result<Self> {
        let Some((token, currency)) = split_pair(&record.pair) else {
            bail!("correction {}: invalid pair '{}'", record.unique_id, record.pair);
        };
        if record.trade_type != TradeType::Buy {
            bail!("correction {}: only Buy rows can be injected", record.unique_id);
        }
        if record.transaction_price.is_sign_negative() || record.fee.is_sign_negative() {
            bail!("correction {}: negative transaction price or fee", record.unique_id);
        }

        Ok(TradeRow {
            token: token.to_owned(),
            currency: currency.to_owned(),
            unique_id: record.unique_id,
            date: record.date,
            pair: record.pair,
            trade_type: record.trade_type,
            execution_type: record.execution_type,
            trade_price: record.trade_price,
            transaction_price: record.transaction_price,
            transferred_volume: record.transferred_volume,
            fee: record.fee,
        })
    }
}

/// Synthetic buy rows per pair.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct CorrectionTable {
    rows: BTreeMap<String, Vec<TradeRow>>,
}

impl CorrectionTable {
    /// The corrections shipped with the tool.
    pub(crate) fn builtin() -> Result<Self> {
        let data = include_bytes!("data/manual_corrections.csv");
        Self::from_reader(data.as_slice()).context("invalid built-in corrections")
    }

    pub(crate) fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open corrections file {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("Invalid corrections file {}", path.display()))
    }

    pub(crate) fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut table = CorrectionTable::default();

        for result in rdr.deserialize() {
            let record: CorrectionRecord = result?;
            let row = TradeRow::try_from(record)?;
            table.rows.entry(row.pair.clone()).or_default().push(row);
        }

        Ok(table)
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    pub(crate) fn rows_for(&self, pair: &str) -> &[TradeRow] {
        self.rows.get(pair).map(Vec::as_slice).unwrap_or_default()
    }

    /// Appends the pair's synthetic rows to its buy side.
    pub(crate) fn apply(&self, pair: &str, mut buys: Vec<TradeRow>) -> Vec<TradeRow> {
        let injected = self.rows_for(pair);
        if !injected.is_empty() {
            debug!("Applying {} manual injections for pair: {}", injected.len(), pair);
            buys.extend_from_slice(injected);
        }
        buys
    }
}
