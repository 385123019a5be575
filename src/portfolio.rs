use rust_decimal::{Decimal, RoundingStrategy};
use tracing::info;

use crate::{base::Cell, metrics::AssetMetrics};

fn round_euros(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
}

/// Running totals over all assets, accumulated while the assets are built.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct PortfolioTotals {
    total_buys: Decimal,
    total_sells: Decimal,
    unrealized_value: Decimal,
    all_sold_value: Decimal,
}

impl PortfolioTotals {
    pub(crate) fn add(&mut self, metrics: &AssetMetrics) {
        self.total_buys += metrics.total_cost;
        self.total_sells += metrics.realized_sells;
        self.unrealized_value += metrics.unrealized_value;
        self.all_sold_value += metrics.potential_value;
    }

    pub(crate) fn summary(&self) -> PortfolioSummary {
        info!("Generating portfolio summary");

        PortfolioSummary {
            total_buys: round_euros(self.total_buys),
            total_sells: round_euros(self.total_sells),
            unrealized_value: round_euros(self.unrealized_value),
            all_sold_value: round_euros(self.all_sold_value),
            net_result: round_euros(self.total_sells + self.unrealized_value - self.total_buys),
            potential_profit: round_euros(self.all_sold_value - self.total_buys),
        }
    }
}

/// Portfolio figures in whole euros.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct PortfolioSummary {
    pub total_buys: Decimal,
    pub total_sells: Decimal,
    pub unrealized_value: Decimal,
    pub all_sold_value: Decimal,
    pub net_result: Decimal,
    pub potential_profit: Decimal,
}

impl PortfolioSummary {
    pub(crate) fn is_up(&self) -> bool {
        !self.net_result.is_sign_negative() || self.net_result.is_zero()
    }

    pub(crate) fn potential_status(&self) -> String {
        if self.potential_profit.is_sign_negative() && !self.potential_profit.is_zero() {
            format!("You could be down by €{}", self.potential_profit.abs())
        } else {
            format!("You could be up to €{}", self.potential_profit)
        }
    }

    pub(crate) fn result_status(&self) -> String {
        if self.is_up() {
            format!("You're up €{}", self.net_result.abs())
        } else {
            format!("You're down €{}", self.net_result.abs())
        }
    }

    /// The `Metric | EUR Value` rows of the Portfolio sheet. Result is last.
    pub(crate) fn rows(&self) -> Vec<(&'static str, Cell)> {
        vec![
            ("Total Buys", Cell::Number(self.total_buys)),
            ("Total Sells", Cell::Number(self.total_sells)),
            ("Unrealized Value (if rest sold)", Cell::Number(self.unrealized_value)),
            ("If All Bought Sold Now (market value)", Cell::Number(self.all_sold_value)),
            ("Net Position", Cell::Number(self.net_result)),
            ("You Could Be Up To", Cell::Text(self.potential_status())),
            ("Result", Cell::Text(self.result_status())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn metrics(cost: Decimal, sells: Decimal, unrealized: Decimal, potential: Decimal) -> AssetMetrics {
        AssetMetrics {
            total_cost: cost,
            realized_sells: sells,
            unrealized_value: unrealized,
            potential_value: potential,
            ..Default::default()
        }
    }

    #[test]
    fn test_totals_accumulate() {
        let mut totals = PortfolioTotals::default();
        totals.add(&metrics(dec!(501), dec!(0), dec!(600), dec!(600)));
        totals.add(&metrics(dec!(100.4), dec!(50), dec!(20), dec!(80)));

        let summary = totals.summary();
        assert_eq!(summary.total_buys, dec!(601));
        assert_eq!(summary.total_sells, dec!(50));
        assert_eq!(summary.unrealized_value, dec!(620));
        assert_eq!(summary.all_sold_value, dec!(680));
        // 50 + 620 - 601.4
        assert_eq!(summary.net_result, dec!(69));
        // 680 - 601.4
        assert_eq!(summary.potential_profit, dec!(79));
    }

    #[test]
    fn test_rounds_half_to_even() {
        assert_eq!(round_euros(dec!(2.5)), dec!(2));
        assert_eq!(round_euros(dec!(3.5)), dec!(4));
        assert_eq!(round_euros(dec!(-2.5)), dec!(-2));
    }

    #[test]
    fn test_status_messages() {
        let summary = PortfolioSummary { net_result: dec!(99), potential_profit: dec!(-12), ..Default::default() };
        assert_eq!(summary.result_status(), "You're up €99");
        assert_eq!(summary.potential_status(), "You could be down by €12");
        assert!(summary.is_up());

        let summary = PortfolioSummary { net_result: dec!(-40), potential_profit: dec!(0), ..Default::default() };
        assert_eq!(summary.result_status(), "You're down €40");
        assert_eq!(summary.potential_status(), "You could be up to €0");
        assert!(!summary.is_up());
    }

    #[test]
    fn test_summary_rows() {
        let summary = PortfolioTotals::default().summary();
        let rows = summary.rows();
        let labels: Vec<&str> = rows.iter().map(|(label, _)| *label).collect();
        assert_eq!(labels, [
            "Total Buys",
            "Total Sells",
            "Unrealized Value (if rest sold)",
            "If All Bought Sold Now (market value)",
            "Net Position",
            "You Could Be Up To",
            "Result",
        ]);
        assert_eq!(rows[6].1, Cell::Text("You're up €0".to_owned()));
    }
}
