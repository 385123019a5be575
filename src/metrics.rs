//! Per-asset aggregation of the trade table.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use slice_group_by::GroupBy;
use tracing::{debug, info};

use crate::{
    base::{split_pair, TradeRow},
    corrections::CorrectionTable,
    market::MarketData,
    portfolio::{PortfolioSummary, PortfolioTotals},
};

/// Decimal places of the ROI percentages.
pub(crate) const PERCENT_DECIMAL_PLACES: u32 = 8;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct MetricsOptions {
    /// Remaining volume below this fraction of the bought volume counts as
    /// zero. Disabled when `None`.
    pub dust_threshold: Option<Decimal>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct AssetMetrics {
    pub token: String,
    pub pair: String,
    pub currency: String,
    pub bought_volume: Decimal,
    pub sold_volume: Decimal,
    pub remaining_volume: Decimal,
    pub average_buy_price: Decimal,
    pub average_sell_price: Decimal,
    pub market_price: Option<Decimal>,
    pub total_cost: Decimal,
    pub realized_sells: Decimal,
    pub unrealized_value: Decimal,
    pub potential_value: Decimal,
    pub total_value: Decimal,
    pub roi: Decimal,
    pub potential_roi: Decimal,
    pub market: MarketData,
}

/// The metrics of one pair together with the rows they were computed from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AssetReport {
    pub metrics: AssetMetrics,
    pub buys: Vec<TradeRow>,
    pub sells: Vec<TradeRow>,
}

fn ratio(numerator: Decimal, divisor: Decimal) -> Decimal {
    if divisor.is_zero() { Decimal::ZERO } else { numerator / divisor }
}

fn percent_change(value: Decimal, cost: Decimal) -> Decimal {
    if cost > Decimal::ZERO {
        ((value - cost) / cost * dec!(100)).round_dp(PERCENT_DECIMAL_PLACES)
    } else {
        Decimal::ZERO
    }
}

pub(crate) fn compute_asset_metrics(
    pair: &str,
    buys: &[TradeRow],
    sells: &[TradeRow],
    market: Option<&MarketData>,
    options: &MetricsOptions,
) -> AssetMetrics {
    debug!("Computing metrics for pair: {}", pair);

    let bought_volume: Decimal = buys.iter().map(|t| t.transferred_volume).sum();
    let sold_volume: Decimal = sells.iter().map(|t| t.transferred_volume).sum();
    let buy_total: Decimal = buys.iter().map(|t| t.transaction_price).sum();
    let buy_fee: Decimal = buys.iter().map(|t| t.fee).sum();
    let sell_total: Decimal = sells.iter().map(|t| t.transaction_price).sum();

    let mut remaining_volume = (bought_volume - sold_volume).max(Decimal::ZERO);
    if let Some(threshold) = options.dust_threshold {
        if remaining_volume < threshold * bought_volume {
            debug!("Clearing dust of {} for {}", remaining_volume, pair);
            remaining_volume = Decimal::ZERO;
        }
    }

    let cost = buy_total + buy_fee;
    let market = market.cloned().unwrap_or_default();
    let price = market.price.unwrap_or(Decimal::ZERO);
    let unrealized_value = remaining_volume * price;
    let potential_value = bought_volume * price;
    let total_value = unrealized_value + sell_total;

    let (token, currency) = buys.iter().chain(sells)
        .next()
        .map(|t| (t.token.as_str(), t.currency.as_str()))
        .or_else(|| split_pair(pair))
        .unwrap_or((pair, ""));

    AssetMetrics {
        token: token.to_owned(),
        pair: pair.to_owned(),
        currency: currency.to_owned(),
        bought_volume,
        sold_volume,
        remaining_volume,
        average_buy_price: ratio(cost, bought_volume),
        average_sell_price: ratio(sell_total, sold_volume),
        market_price: market.price,
        total_cost: cost,
        realized_sells: sell_total,
        unrealized_value,
        potential_value,
        total_value,
        roi: percent_change(total_value, cost),
        potential_roi: percent_change(potential_value, cost),
        market,
    }
}

/// Groups the trade table by pair and computes every asset, folding the
/// portfolio totals along the way. Reports are ordered by pair.
pub(crate) fn build_asset_reports(
    rows: &[TradeRow],
    market: &HashMap<String, MarketData>,
    corrections: &CorrectionTable,
    options: &MetricsOptions,
) -> (Vec<AssetReport>, PortfolioSummary) {
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| a.pair.cmp(&b.pair));

    let mut totals = PortfolioTotals::default();
    let reports: Vec<AssetReport> = sorted
        .linear_group_by(|a, b| a.pair == b.pair)
        .map(|group| {
            let pair = group[0].pair.as_str();
            info!("Processing pair: {}", pair);

            let (buys, sells): (Vec<TradeRow>, Vec<TradeRow>) = group.iter().cloned().partition(TradeRow::is_buy);
            let buys = corrections.apply(pair, buys);

            let metrics = compute_asset_metrics(pair, &buys, &sells, market.get(pair), options);
            totals.add(&metrics);

            AssetReport { metrics, buys, sells }
        })
        .collect();

    (reports, totals.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{ExecutionType, TradeType};
    use chrono::NaiveDate;

    fn trade(uid: &str, pair: &str, trade_type: TradeType, cost: Decimal, volume: Decimal, fee: Decimal) -> TradeRow {
        let (token, currency) = split_pair(pair).unwrap();
        TradeRow {
            unique_id: uid.to_owned(),
            date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            pair: pair.to_owned(),
            trade_type,
            execution_type: ExecutionType::Market,
            trade_price: if volume.is_zero() { Decimal::ZERO } else { cost / volume },
            transaction_price: cost,
            transferred_volume: volume,
            fee,
            currency: currency.to_owned(),
            token: token.to_owned(),
        }
    }

    fn buy(uid: &str, pair: &str, cost: Decimal, volume: Decimal, fee: Decimal) -> TradeRow {
        trade(uid, pair, TradeType::Buy, cost, volume, fee)
    }

    fn sell(uid: &str, pair: &str, cost: Decimal, volume: Decimal, fee: Decimal) -> TradeRow {
        trade(uid, pair, TradeType::Sell, cost, volume, fee)
    }

    #[test]
    fn test_single_buy_example() {
        let buys = [buy("TXID1", "BTC/EUR", dec!(500.00), dec!(0.01), dec!(1.00))];
        let market = MarketData::with_price(dec!(60000));
        let m = compute_asset_metrics("BTC/EUR", &buys, &[], Some(&market), &MetricsOptions::default());

        assert_eq!(m.token, "BTC");
        assert_eq!(m.currency, "EUR");
        assert_eq!(m.bought_volume, dec!(0.01));
        assert_eq!(m.total_cost, dec!(501.00));
        assert_eq!(m.unrealized_value, dec!(600.00));
        assert_eq!(m.roi.round_dp(2), dec!(19.76));
        assert_eq!(m.average_buy_price, dec!(50100));
        assert_eq!(m.average_sell_price, Decimal::ZERO);
        // nothing sold yet
        assert_eq!(m.potential_roi, m.roi);
        assert_eq!(m.unrealized_value, m.bought_volume * dec!(60000));
    }

    #[test]
    fn test_zero_cost_has_zero_roi() {
        let buys = [buy("AIRDROP", "DOT/EUR", dec!(0), dec!(10), dec!(0))];
        let market = MarketData::with_price(dec!(6));
        let m = compute_asset_metrics("DOT/EUR", &buys, &[], Some(&market), &MetricsOptions::default());
        assert_eq!(m.total_cost, Decimal::ZERO);
        assert_eq!(m.roi, Decimal::ZERO);
        assert_eq!(m.potential_roi, Decimal::ZERO);
        assert_eq!(m.unrealized_value, dec!(60));
    }

    #[test]
    fn test_partial_sell() {
        let buys = [
            buy("B1", "ETH/EUR", dec!(1000), dec!(1), dec!(2)),
            buy("B2", "ETH/EUR", dec!(1500), dec!(1), dec!(3)),
        ];
        let sells = [sell("S1", "ETH/EUR", dec!(1800), dec!(1.5), dec!(4))];
        let market = MarketData::with_price(dec!(2000));
        let m = compute_asset_metrics("ETH/EUR", &buys, &sells, Some(&market), &MetricsOptions::default());

        assert_eq!(m.total_cost, dec!(2505));
        assert_eq!(m.remaining_volume, dec!(0.5));
        assert_eq!(m.unrealized_value, dec!(1000));
        assert_eq!(m.potential_value, dec!(4000));
        assert_eq!(m.total_value, dec!(2800));
        assert_eq!(m.average_sell_price, dec!(1200));
        // (2800 - 2505) / 2505
        assert_eq!(m.roi, dec!(11.77644711));
        assert_eq!(m.potential_roi, dec!(59.68063872));
    }

    #[test]
    fn test_oversold_and_unknown_price() {
        let buys = [buy("B1", "ADA/EUR", dec!(100), dec!(200), dec!(0))];
        let sells = [sell("S1", "ADA/EUR", dec!(150), dec!(250), dec!(0))];
        let m = compute_asset_metrics("ADA/EUR", &buys, &sells, None, &MetricsOptions::default());

        assert_eq!(m.remaining_volume, Decimal::ZERO);
        assert_eq!(m.market_price, None);
        assert_eq!(m.unrealized_value, Decimal::ZERO);
        assert_eq!(m.potential_value, Decimal::ZERO);
        assert_eq!(m.roi, dec!(50));
        assert_eq!(m.potential_roi, dec!(-100));
    }

    #[test]
    fn test_dust_threshold() {
        let buys = [buy("B1", "SOL/EUR", dec!(1000), dec!(10), dec!(0))];
        let sells = [sell("S1", "SOL/EUR", dec!(1200), dec!(9.9), dec!(0))];
        let market = MarketData::with_price(dec!(150));

        let m = compute_asset_metrics("SOL/EUR", &buys, &sells, Some(&market), &MetricsOptions::default());
        assert_eq!(m.remaining_volume, dec!(0.1));

        let options = MetricsOptions { dust_threshold: Some(dec!(0.02)) };
        let m = compute_asset_metrics("SOL/EUR", &buys, &sells, Some(&market), &options);
        assert_eq!(m.remaining_volume, Decimal::ZERO);
        assert_eq!(m.unrealized_value, Decimal::ZERO);

        // 0.5 of 10 is above the 2% threshold
        let sells = [sell("S1", "SOL/EUR", dec!(1200), dec!(9.5), dec!(0))];
        let m = compute_asset_metrics("SOL/EUR", &buys, &sells, Some(&market), &options);
        assert_eq!(m.remaining_volume, dec!(0.5));
    }

    #[test]
    fn test_build_asset_reports() {
        let rows = vec![
            buy("B1", "XCN/EUR", dec!(100), dec!(10000), dec!(1)),
            buy("B2", "BTC/EUR", dec!(500.00), dec!(0.01), dec!(1.00)),
            sell("S1", "XCN/EUR", dec!(50), dec!(5000), dec!(0.5)),
        ];
        let market = HashMap::from([("BTC/EUR".to_owned(), MarketData::with_price(dec!(60000)))]);
        let corrections = CorrectionTable::builtin().unwrap();

        let (reports, summary) = build_asset_reports(&rows, &market, &corrections, &MetricsOptions::default());

        let pairs: Vec<&str> = reports.iter().map(|r| r.metrics.pair.as_str()).collect();
        assert_eq!(pairs, ["BTC/EUR", "XCN/EUR"]);

        let xcn = &reports[1];
        assert_eq!(xcn.buys.len(), 2);
        assert_eq!(xcn.buys[1].unique_id, "MANUAL-ONYX-BUY");
        assert_eq!(xcn.sells.len(), 1);
        assert_eq!(xcn.metrics.total_cost, dec!(771));
        assert_eq!(xcn.metrics.bought_volume, dec!(57339.9627));
        assert_eq!(xcn.metrics.market_price, None);

        // 501 + 771
        assert_eq!(summary.total_buys, dec!(1272));
        assert_eq!(summary.total_sells, dec!(50));
        assert_eq!(summary.unrealized_value, dec!(600));
        // 50 + 600 - 1272
        assert_eq!(summary.net_result, dec!(-622));
    }

    #[test]
    fn test_build_is_deterministic() {
        let rows = vec![
            buy("B1", "DOT/EUR", dec!(65), dec!(10), dec!(0.1)),
            sell("S1", "DOT/EUR", dec!(70), dec!(5), dec!(0.1)),
            buy("B2", "ADA/EUR", dec!(40), dec!(100), dec!(0.1)),
        ];
        let market = HashMap::from([("DOT/EUR".to_owned(), MarketData::with_price(dec!(7)))]);
        let corrections = CorrectionTable::default();
        let options = MetricsOptions::default();

        let first = build_asset_reports(&rows, &market, &corrections, &options);
        let second = build_asset_reports(&rows, &market, &corrections, &options);
        assert_eq!(first, second);
    }
}
