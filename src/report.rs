//! Spreadsheet rendering of the portfolio report.
//!
//! The workbook holds a Portfolio sheet, an Asset ROI sheet and one
//! breakdown sheet per traded pair, in that order.

use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet};
use tracing::{debug, info, warn};

use crate::{
    base::{Cell, TradeColumn, TradeRow},
    metrics::{AssetMetrics, AssetReport},
    portfolio::PortfolioSummary,
};

pub(crate) const PORTFOLIO_SHEET: &str = "Portfolio";
pub(crate) const ASSET_ROI_SHEET: &str = "Asset ROI";

const MAX_SHEET_NAME_LEN: usize = 31;
const MAX_COLUMN_WIDTH: usize = 40;
const COLUMN_PADDING: usize = 4;

const GREEN: u32 = 0xC6EFCE;
const RED: u32 = 0xFFC7CE;

const ROI_HEADERS: [&str; 27] = [
    "Token",
    "Bought Volume",
    "Sold Volume",
    "Remaining Volume",
    "Avg Buy Price (€)",
    "Avg Sell Price (€)",
    "Current Market Price (€)",
    "Total Cost (€)",
    "Realized Sells (€)",
    "Unrealized Value (€)",
    "Total Value (€)",
    "ROI (%)",
    "If All Sold Now ROI (%)",
    "Market Cap (€)",
    "24h Volume (€)",
    "Kraken 24h Volume",
    "30d Volatility (%)",
    "30d Momentum (%)",
    "Dominance (%)",
    "24h High (€)",
    "24h Low (€)",
    "Price Change 24h (€)",
    "Price Change 24h (%)",
    "Market Cap Change 24h (%)",
    "All-Time High (€)",
    "ATH Change (%)",
    "ATH Date",
];

/// Indexes of the columns colored by sign.
const ROI_COLUMNS: [usize; 2] = [11, 12];

fn roi_row(m: &AssetMetrics) -> [Cell; 27] {
    let market = &m.market;
    [
        Cell::from(m.token.as_str()),
        m.bought_volume.into(),
        m.sold_volume.into(),
        m.remaining_volume.into(),
        m.average_buy_price.into(),
        m.average_sell_price.into(),
        m.market_price.into(),
        m.total_cost.into(),
        m.realized_sells.into(),
        m.unrealized_value.into(),
        m.total_value.into(),
        m.roi.into(),
        m.potential_roi.into(),
        market.market_cap.into(),
        market.daily_volume.into(),
        market.kraken_volume_24h.into(),
        market.volatility_30d.into(),
        market.momentum_30d.into(),
        market.dominance.into(),
        market.high_24h.into(),
        market.low_24h.into(),
        market.price_change_24h.into(),
        market.price_change_percentage_24h.into(),
        market.market_cap_change_percentage_24h.into(),
        market.ath.into(),
        market.ath_change_percentage.into(),
        market.ath_date.clone().map_or(Cell::Empty, Cell::Text),
    ]
}

/// Sheet name of a pair: `/` replaced and cut to the xlsx name limit.
pub(crate) fn sheet_name(pair: &str) -> String {
    pair.replace('/', "_").chars().take(MAX_SHEET_NAME_LEN).collect()
}

/// Sheet names for pairs in the given order. A name that is already taken,
/// e.g. by two long pairs cut to the same prefix, gets a `_2`, `_3`, ..
/// suffix. Names compare case-insensitively like in Excel.
fn unique_sheet_names<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut used: HashSet<String> = [PORTFOLIO_SHEET, ASSET_ROI_SHEET]
        .iter()
        .map(|name| name.to_lowercase())
        .collect();

    pairs.into_iter()
        .map(|pair| {
            let base = sheet_name(pair);
            let mut name = base.clone();
            let mut counter = 2;
            while used.contains(&name.to_lowercase()) {
                let suffix = format!("_{}", counter);
                name = base.chars().take(MAX_SHEET_NAME_LEN - suffix.len()).chain(suffix.chars()).collect();
                counter += 1;
            }
            if name != base {
                debug!("Sheet name {} is taken, using {} for {}", base, name, pair);
            }
            used.insert(name.to_lowercase());
            name
        })
        .collect()
}

fn amount(value: Option<Decimal>, unit: &str) -> String {
    match value {
        Some(value) => format!("{} {}", value.normalize(), unit),
        None => format!("N/A {}", unit),
    }
}

/// One of the summary rows below a pair's trades.
#[derive(Debug, PartialEq)]
struct SummaryBlock {
    title: &'static str,
    trade_price: Option<String>,
    transaction_price: String,
    transferred_volume: String,
}

impl SummaryBlock {
    fn cell(&self, column: TradeColumn) -> Cell {
        match column {
            TradeColumn::UniqueId => Cell::from(self.title),
            TradeColumn::TradePrice => self.trade_price.clone().map_or(Cell::Empty, Cell::Text),
            TradeColumn::TransactionPrice => Cell::Text(self.transaction_price.clone()),
            TradeColumn::TransferredVolume => Cell::Text(self.transferred_volume.clone()),
            _ => Cell::Empty,
        }
    }
}

fn summary_blocks(m: &AssetMetrics) -> [SummaryBlock; 3] {
    // values depending on the market price are unknown without one
    let priced = |value: Decimal| m.market_price.map(|_| value);

    [
        SummaryBlock {
            title: "IF ALL SOLD NOW:",
            trade_price: Some(amount(m.market_price, &m.currency)),
            transaction_price: amount(priced(m.potential_value), &m.currency),
            transferred_volume: amount(Some(m.bought_volume), &m.token),
        },
        SummaryBlock {
            title: "ALREADY SOLD:",
            trade_price: None,
            transaction_price: amount(Some(m.realized_sells), &m.currency),
            transferred_volume: amount(Some(m.sold_volume), &m.token),
        },
        SummaryBlock {
            title: "IF REST SOLD NOW:",
            trade_price: None,
            transaction_price: amount(priced(m.unrealized_value), &m.currency),
            transferred_volume: amount(Some(m.remaining_volume), &m.token),
        },
    ]
}

struct Formats {
    header: Format,
    left: Format,
    right: Format,
    green: Format,
    red: Format,
    green_title: Format,
    red_title: Format,
    result_up: Format,
    result_down: Format,
}

impl Formats {
    fn new() -> Self {
        let header = Format::new().set_bold().set_align(FormatAlign::Center);
        let right = Format::new().set_align(FormatAlign::Right);
        Self {
            green_title: header.clone().set_background_color(Color::RGB(GREEN)),
            red_title: header.clone().set_background_color(Color::RGB(RED)),
            result_up: right.clone().set_bold().set_background_color(Color::RGB(GREEN)),
            result_down: right.clone().set_bold().set_background_color(Color::RGB(RED)),
            green: Format::new().set_background_color(Color::RGB(GREEN)),
            red: Format::new().set_background_color(Color::RGB(RED)),
            left: Format::new().set_align(FormatAlign::Left),
            header,
            right,
        }
    }
}

/// A worksheet that remembers the widest cell of every column.
struct SheetBuilder {
    sheet: Worksheet,
    widths: Vec<usize>,
}

impl SheetBuilder {
    fn new(name: &str) -> Result<Self> {
        let mut sheet = Worksheet::new();
        sheet.set_name(name).with_context(|| format!("Invalid sheet name '{}'", name))?;
        Ok(Self { sheet, widths: Vec::new() })
    }

    fn track(&mut self, col: u16, len: usize) {
        let col = col as usize;
        if self.widths.len() <= col {
            self.widths.resize(col + 1, 0);
        }
        self.widths[col] = self.widths[col].max(len);
    }

    fn write(&mut self, row: u32, col: u16, cell: &Cell, format: &Format) -> Result<()> {
        match cell {
            Cell::Empty => return Ok(()),
            Cell::Text(text) => {
                self.sheet.write_string_with_format(row, col, text, format)?;
            }
            Cell::Number(number) => {
                self.sheet.write_number_with_format(row, col, number.to_f64().unwrap_or_default(), format)?;
            }
        }
        self.track(col, cell.display_len());
        Ok(())
    }

    fn write_header<'a>(&mut self, headers: impl IntoIterator<Item = &'a str>, format: &Format) -> Result<()> {
        for (col, header) in headers.into_iter().enumerate() {
            self.write(0, col as u16, &Cell::from(header), format)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Worksheet> {
        for (col, width) in self.widths.iter().enumerate() {
            let width = (width + COLUMN_PADDING).min(MAX_COLUMN_WIDTH);
            self.sheet.set_column_width(col as u16, width as f64)?;
        }
        Ok(self.sheet)
    }
}

fn portfolio_sheet(summary: &PortfolioSummary, formats: &Formats) -> Result<Worksheet> {
    debug!("Rendering {} sheet", PORTFOLIO_SHEET);
    let mut sheet = SheetBuilder::new(PORTFOLIO_SHEET)?;
    sheet.write_header(["Metric", "EUR Value"], &formats.header)?;

    for (row, (label, value)) in summary.rows().into_iter().enumerate() {
        let row = row as u32 + 1;
        let value_format = match label {
            "Result" if summary.is_up() => &formats.result_up,
            "Result" => &formats.result_down,
            _ => &formats.right,
        };
        sheet.write(row, 0, &Cell::from(label), &formats.left)?;
        sheet.write(row, 1, &value, value_format)?;
    }

    sheet.finish()
}

fn asset_roi_sheet(reports: &[AssetReport], formats: &Formats) -> Result<Worksheet> {
    debug!("Rendering {} sheet", ASSET_ROI_SHEET);
    let mut sheet = SheetBuilder::new(ASSET_ROI_SHEET)?;

    if reports.is_empty() {
        warn!("No ROI records found, writing notice only");
        sheet.write_header(["Notice"], &formats.header)?;
        sheet.write(1, 0, &Cell::from("No ROI data available"), &formats.left)?;
        return sheet.finish();
    }

    sheet.write_header(ROI_HEADERS, &formats.header)?;

    let mut metrics: Vec<&AssetMetrics> = reports.iter().map(|r| &r.metrics).collect();
    metrics.sort_by(|a, b| a.roi.cmp(&b.roi));
    let (positive, negative): (Vec<&AssetMetrics>, Vec<&AssetMetrics>) =
        metrics.into_iter().partition(|m| !m.roi.is_sign_negative() || m.roi.is_zero());

    let last_col = (ROI_HEADERS.len() - 1) as u16;
    let sections = [
        ("Positive ROI Assets", &formats.green_title, positive),
        ("Negative ROI Assets", &formats.red_title, negative),
    ];

    let mut row = 1;
    for (title, title_format, section) in sections {
        if section.is_empty() {
            continue;
        }
        sheet.sheet.merge_range(row, 0, row, last_col, title, title_format)?;
        row += 1;

        for m in section {
            for (col, cell) in roi_row(m).iter().enumerate() {
                let format = match cell {
                    Cell::Number(value) if ROI_COLUMNS.contains(&col) => {
                        if value.is_sign_negative() && !value.is_zero() { &formats.red } else { &formats.green }
                    }
                    Cell::Text(_) => &formats.left,
                    _ => &formats.right,
                };
                sheet.write(row, col as u16, cell, format)?;
            }
            row += 1;
        }
    }

    sheet.finish()
}

fn write_trade_rows(sheet: &mut SheetBuilder, row: &mut u32, trades: &[TradeRow], formats: &Formats) -> Result<()> {
    for trade in trades {
        for (col, column) in TradeColumn::breakdown_columns().enumerate() {
            let format = if column.is_label() { &formats.left } else { &formats.right };
            sheet.write(*row, col as u16, &trade.cell(column), format)?;
        }
        *row += 1;
    }
    Ok(())
}

fn pair_sheet(name: &str, report: &AssetReport, formats: &Formats) -> Result<Worksheet> {
    info!("Generating trade sheet for: {}", report.metrics.pair);
    let mut sheet = SheetBuilder::new(name)?;
    sheet.write_header(TradeColumn::breakdown_columns().map(TradeColumn::header), &formats.header)?;

    let mut row = 1;
    sheet.write(row, 0, &Cell::from("Buys"), &formats.left)?;
    row += 1;
    write_trade_rows(&mut sheet, &mut row, &report.buys, formats)?;
    row += 1;

    sheet.write(row, 0, &Cell::from("Sells"), &formats.left)?;
    row += 1;
    write_trade_rows(&mut sheet, &mut row, &report.sells, formats)?;
    row += 1;

    for block in summary_blocks(&report.metrics) {
        for (col, column) in TradeColumn::breakdown_columns().enumerate() {
            let format = if column.is_label() { &formats.left } else { &formats.right };
            sheet.write(row, col as u16, &block.cell(column), format)?;
        }
        row += 1;
    }

    sheet.finish()
}

/// Builds the workbook: Portfolio, Asset ROI, then pair sheets by name.
pub(crate) fn render_workbook(reports: &[AssetReport], summary: &PortfolioSummary) -> Result<Workbook> {
    let formats = Formats::new();
    let mut workbook = Workbook::new();

    workbook.push_worksheet(portfolio_sheet(summary, &formats)?);
    workbook.push_worksheet(asset_roi_sheet(reports, &formats)?);

    let mut sorted: Vec<&AssetReport> = reports.iter().collect();
    sorted.sort_by_cached_key(|report| (sheet_name(&report.metrics.pair), report.metrics.pair.clone()));
    let names = unique_sheet_names(sorted.iter().map(|report| report.metrics.pair.as_str()));
    for (name, report) in names.iter().zip(sorted) {
        workbook.push_worksheet(pair_sheet(name, report, &formats)?);
    }

    Ok(workbook)
}

pub(crate) fn write_report(reports: &[AssetReport], summary: &PortfolioSummary, output_path: &Path) -> Result<()> {
    info!("Writing Excel report to: {}", output_path.display());

    let mut workbook = render_workbook(reports, summary)?;
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }
    workbook.save(output_path)
        .with_context(|| format!("Failed to write workbook {}", output_path.display()))?;

    info!("Excel report successfully written");
    Ok(())
}

fn csv_field(cell: &Cell) -> String {
    match cell {
        Cell::Empty => String::new(),
        Cell::Text(text) => text.clone(),
        Cell::Number(number) => number.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero).to_string(),
    }
}

/// Exports the Asset ROI table, ordered by ROI, with values rounded to cents.
pub(crate) fn write_roi_csv(reports: &[AssetReport], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    wtr.write_record(ROI_HEADERS)?;

    let mut metrics: Vec<&AssetMetrics> = reports.iter().map(|r| &r.metrics).collect();
    metrics.sort_by(|a, b| a.roi.cmp(&b.roi));

    for m in metrics {
        wtr.write_record(roi_row(m).iter().map(csv_field))?;
    }
    wtr.flush()?;

    info!("Asset ROI table written to {}", output_path.display());
    Ok(())
}
