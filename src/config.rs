use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use clap::Parser;
use rust_decimal::Decimal;

use crate::{
    market::{MarketConfig, COINGECKO_API_URL, KRAKEN_TICKER_URL},
    metrics::MetricsOptions,
};

#[derive(Debug, Parser)]
#[command(name = "kraken-report", version, about = "Turns a Kraken trade history PDF into a portfolio ROI spreadsheet")]
pub(crate) struct Cli {
    /// Kraken trade history PDF export
    #[arg(env = "KRAKEN_TRADES_PDF", default_value = "downloads/trades.pdf")]
    pub pdf: PathBuf,

    /// Spreadsheet to write
    #[arg(short, long, env = "PARSED_TRADES_EXCEL", default_value = "uploads/kraken_trade_summary.xlsx")]
    pub output: PathBuf,

    /// CSV of synthetic buy rows, replacing the built-in corrections
    #[arg(long, env = "MANUAL_CORRECTIONS_CSV")]
    pub corrections: Option<PathBuf>,

    /// Also export the Asset ROI table as CSV
    #[arg(long, env = "ASSET_ROI_CSV")]
    pub roi_csv: Option<PathBuf>,

    /// Count remaining volume below this fraction of the bought volume as sold (e.g. 0.02)
    #[arg(long, env = "DUST_THRESHOLD")]
    pub dust_threshold: Option<Decimal>,

    /// Only fetch market prices, skip CoinGecko statistics
    #[arg(long, env = "NO_MARKET_STATS")]
    pub no_market_stats: bool,

    /// Do not fetch any market data
    #[arg(long, env = "OFFLINE")]
    pub offline: bool,

    #[arg(long, env = "KRAKEN_API_URL", default_value = KRAKEN_TICKER_URL)]
    pub kraken_api_url: String,

    #[arg(long, env = "COINGECKO_API_URL", default_value = COINGECKO_API_URL)]
    pub coingecko_api_url: String,

    /// Per request timeout
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    #[arg(long, env = "HTTP_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Assets fetched in parallel
    #[arg(long, env = "MARKET_CONCURRENCY", default_value_t = 3)]
    pub concurrency: usize,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Write JSON logs to logs/<timestamp>.log
    #[arg(long, env = "LOG_TO_FILE")]
    pub log_to_file: bool,
}

/// Everything the pipeline needs, resolved from the command line and
/// environment.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub pdf_path: PathBuf,
    pub output_path: PathBuf,
    pub corrections_path: Option<PathBuf>,
    pub roi_csv_path: Option<PathBuf>,
    pub metrics: MetricsOptions,
    /// `None` when running offline
    pub market: Option<MarketConfig>,
}

impl TryFrom<Cli> for Config {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        if let Some(threshold) = cli.dust_threshold {
            if threshold.is_sign_negative() || threshold >= Decimal::ONE {
                bail!("dust threshold must be between 0 and 1, got {}", threshold);
            }
        }
        if cli.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }

        let market = (!cli.offline).then(|| MarketConfig {
            kraken_url: cli.kraken_api_url,
            coingecko_url: cli.coingecko_api_url.trim_end_matches('/').to_owned(),
            timeout: Duration::from_secs(cli.timeout_secs),
            max_retries: cli.max_retries,
            concurrency: cli.concurrency,
            fetch_stats: !cli.no_market_stats,
        });

        Ok(Config {
            pdf_path: cli.pdf,
            output_path: cli.output,
            corrections_path: cli.corrections,
            roi_csv_path: cli.roi_csv,
            metrics: MetricsOptions { dust_threshold: cli.dust_threshold },
            market,
        })
    }
}
