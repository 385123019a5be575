mod base;
mod config;
mod corrections;
mod kraken;
mod logging;
mod market;
mod metrics;
mod pdf;
mod portfolio;
mod report;
mod time;

use std::collections::HashMap;

use anyhow::Result;
use clap::Parser;
use config::{Cli, Config};
use corrections::CorrectionTable;
use kraken::{load_kraken_trades_pdf, RegexTradeExtractor};
use market::MarketClient;
use tracing::{error, info};

async fn run(config: Config) -> Result<()> {
    let rows = load_kraken_trades_pdf(&config.pdf_path, &RegexTradeExtractor)?;

    let corrections = match &config.corrections_path {
        Some(path) => CorrectionTable::from_csv_path(path)?,
        None => CorrectionTable::builtin()?,
    };
    info!("Loaded {} manual corrections", corrections.len());

    let mut pairs: Vec<String> = rows.iter().map(|row| row.pair.clone()).collect();
    pairs.sort();
    pairs.dedup();

    let market_data = match config.market {
        Some(market_config) => {
            let client = MarketClient::new(market_config)?;
            client.fetch_bulk_market_data(&pairs).await
        }
        None => {
            info!("Offline, skipping market data for {} pairs", pairs.len());
            HashMap::new()
        }
    };

    let (reports, summary) = metrics::build_asset_reports(&rows, &market_data, &corrections, &config.metrics);
    info!("Net position: {} ({})", summary.net_result, summary.result_status());

    report::write_report(&reports, &summary, &config.output_path)?;
    if let Some(path) = &config.roi_csv_path {
        report::write_roi_csv(&reports, path)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let (guard, logging_ready) = match logging::init(&cli.log_level, cli.log_to_file) {
        Ok(guard) => (guard, true),
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            (None, false)
        }
    };

    let result = match Config::try_from(cli) {
        Ok(config) => run(config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        if logging_ready {
            error!("{:#}", e);
        } else {
            eprintln!("Error: {:#}", e);
        }
        drop(guard);
        std::process::exit(1);
    }
}
