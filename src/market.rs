//! Market data for traded pairs.
//!
//! The current price comes from Kraken's public ticker. Extended statistics
//! (market cap, 24h figures, ATH, 30 day volatility and momentum, dominance)
//! come from CoinGecko. Every failure here is non-fatal: the asset is
//! reported with the fields that could not be fetched left empty.

use std::{collections::HashMap, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use futures::{stream, StreamExt};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    default_on_request_failure, policies::ExponentialBackoff, Retryable, RetryableStrategy,
    RetryTransientMiddleware,
};
use rust_decimal::{prelude::FromPrimitive, Decimal};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::base::split_pair;

pub(crate) const KRAKEN_TICKER_URL: &str = "https://api.kraken.com/0/public/Ticker";
pub(crate) const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

const VS_CURRENCY: &str = "eur";
const SERIES_DAYS: u32 = 30;

/// Maps tokens to their CoinGecko id
pub(crate) fn coingecko_id(token: &str) -> Option<&'static str> {
    const COINGECKO_ID_MAP: &[(&str, &str)] = &[
        ("1000CAT", "1000cat"),
        ("1000X", "1000x-by-virtuals"),
        ("100YEN", "100-token"),
        ("ADA", "cardano"),
        ("AIOZ", "aioz-network"),
        ("AKT", "akash-network"),
        ("ATOM", "cosmos"),
        ("BEAM", "beam"),
        ("BTC", "bitcoin"),
        ("DASH", "dash"),
        ("DOT", "polkadot"),
        ("ETH", "ethereum"),
        ("FET", "fetch-ai"),
        ("FIGS", "10-figs"),
        ("GLM", "golem"),
        ("KAS", "kaspa"),
        ("LDO", "lido-dao"),
        ("LINK", "chainlink"),
        ("LTC", "litecoin"),
        ("MATIC", "polygon"),
        ("NANO", "nano"),
        ("OCEAN", "ocean-protocol"),
        ("PYTH", "pyth-network"),
        ("RENDER", "render-token"),
        ("SOL", "solana"),
        ("TAO", "bittensor"),
        ("WAXL", "wax"),
        ("XCN", "chainx"),
        ("XLM", "stellar"),
        ("XRP", "ripple"),
        ("ZEUS", "zeus-network"),
        ("ZHAO", "-11"),
    ];
    COINGECKO_ID_MAP
        .binary_search_by(|(symbol, _)| (*symbol).cmp(token))
        .ok()
        .map(|index| COINGECKO_ID_MAP[index].1)
}

/// Converts a pair into Kraken's ticker code, e.g. "BTC/EUR" -> "XBTEUR".
pub(crate) fn kraken_pair_code(pair: &str) -> String {
    pair.replace('/', "").replace("BTC", "XBT")
}

#[derive(Debug, Clone)]
pub(crate) struct MarketConfig {
    pub kraken_url: String,
    pub coingecko_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub concurrency: usize,
    pub fetch_stats: bool,
}

/// Market figures of one asset. Fields that could not be fetched stay `None`.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct MarketData {
    pub price: Option<Decimal>,
    pub kraken_volume_24h: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub daily_volume: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub price_change_24h: Option<Decimal>,
    pub price_change_percentage_24h: Option<Decimal>,
    pub market_cap_change_percentage_24h: Option<Decimal>,
    pub ath: Option<Decimal>,
    pub ath_change_percentage: Option<Decimal>,
    pub ath_date: Option<String>,
    pub volatility_30d: Option<Decimal>,
    pub momentum_30d: Option<Decimal>,
    pub dominance: Option<Decimal>,
}

impl MarketData {
    #[cfg(test)]
    pub(crate) fn with_price(price: Decimal) -> Self {
        Self { price: Some(price), ..Default::default() }
    }

    fn apply_stats(&mut self, stats: &CoinStats, token: &str, global: Option<&GlobalMarket>) {
        self.market_cap = to_decimal(stats.market_cap);
        self.daily_volume = to_decimal(stats.total_volume);
        self.high_24h = to_decimal(stats.high_24h);
        self.low_24h = to_decimal(stats.low_24h);
        self.price_change_24h = to_decimal(stats.price_change_24h);
        self.price_change_percentage_24h = to_decimal(stats.price_change_percentage_24h);
        self.market_cap_change_percentage_24h = to_decimal(stats.market_cap_change_percentage_24h);
        self.ath = to_decimal(stats.ath);
        self.ath_change_percentage = to_decimal(stats.ath_change_percentage);
        self.ath_date = stats.ath_date.clone();
        self.dominance = global.and_then(|global| global.dominance(token, stats.market_cap)).and_then(to_f64_decimal);
    }
}

fn to_f64_decimal(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value)
}

fn to_decimal(value: Option<f64>) -> Option<Decimal> {
    value.and_then(to_f64_decimal)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Ticker {
    pub close: Decimal,
    pub volume_24h: Option<Decimal>,
}

// {"error":[],"result":{"XXBTZEUR":{"a":[..],"b":[..],"c":["60000.00000","0.00100000"],"v":["12.3","456.7"],..}}}
#[derive(Debug, Deserialize)]
struct KrakenTickerResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: HashMap<String, KrakenTicker>,
}

#[derive(Debug, Deserialize)]
struct KrakenTicker {
    /// Last trade closed: [price, lot volume]
    c: Vec<String>,
    /// Volume: [today, last 24 hours]
    #[serde(default)]
    v: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CoinStats {
    // id: String,
    // symbol: String,
    // current_price: Option<f64>,
    market_cap: Option<f64>,
    total_volume: Option<f64>,
    high_24h: Option<f64>,
    low_24h: Option<f64>,
    price_change_24h: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    market_cap_change_percentage_24h: Option<f64>,
    ath: Option<f64>,
    ath_change_percentage: Option<f64>,
    ath_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceSeries {
    /// [timestamp in ms, price]
    prices: Vec<(f64, f64)>,
}

#[derive(Debug, Deserialize)]
struct GlobalResponse {
    data: GlobalMarket,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub(crate) struct GlobalMarket {
    #[serde(default)]
    total_market_cap: HashMap<String, f64>,
    #[serde(default)]
    market_cap_percentage: HashMap<String, f64>,
}

impl GlobalMarket {
    /// Share of the total market cap in percent.
    fn dominance(&self, token: &str, market_cap: Option<f64>) -> Option<f64> {
        if let Some(percentage) = self.market_cap_percentage.get(&token.to_lowercase()) {
            return Some(*percentage);
        }
        let total = self.total_market_cap.get(VS_CURRENCY).copied().filter(|total| *total > 0.0)?;
        market_cap.map(|cap| cap / total * 100.0)
    }
}

/// Population standard deviation of the daily returns, in percent.
pub(crate) fn volatility(prices: &[f64]) -> Option<f64> {
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    if returns.is_empty() {
        return None;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    Some(variance.sqrt() * 100.0)
}

/// Price change over the whole series, in percent.
pub(crate) fn momentum(prices: &[f64]) -> Option<f64> {
    match (prices.first(), prices.last()) {
        (Some(first), Some(last)) if *first != 0.0 && prices.len() > 1 => Some((last / first - 1.0) * 100.0),
        _ => None,
    }
}

/// Retries rate limiting and server errors, but not other client errors.
struct TransientStatus;

impl RetryableStrategy for TransientStatus {
    fn handle(&self, res: &Result<reqwest::Response, reqwest_middleware::Error>) -> Option<Retryable> {
        match res {
            Ok(response) => match response.status().as_u16() {
                429 | 500 | 502 | 503 | 504 => Some(Retryable::Transient),
                _ => None,
            },
            Err(error) => default_on_request_failure(error),
        }
    }
}

pub(crate) struct MarketClient {
    http: ClientWithMiddleware,
    config: MarketConfig,
}

impl MarketClient {
    pub(crate) fn new(config: MarketConfig) -> Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(500), Duration::from_secs(5))
            .build_with_max_retries(config.max_retries);

        let http = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(retry_policy, TransientStatus))
            .build();

        Ok(Self { http, config })
    }

    #[instrument(skip(self))]
    pub(crate) async fn fetch_ticker(&self, pair: &str) -> Result<Ticker> {
        let code = kraken_pair_code(pair);
        debug!("Fetching market price for pair: {} (API code: {})", pair, code);

        let response: KrakenTickerResponse = self.http
            .get(&self.config.kraken_url)
            .query(&[("pair", code.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.error.is_empty() {
            bail!("Kraken API error for {}: {}", pair, response.error.join(", "));
        }
        let ticker = response.result.into_values().next()
            .with_context(|| format!("No result found in API response for {}", pair))?;
        let close = ticker.c.first()
            .with_context(|| format!("No closing price found for {}", pair))?;

        Ok(Ticker {
            close: Decimal::from_str(close)?,
            volume_24h: ticker.v.get(1).and_then(|v| Decimal::from_str(v).ok()),
        })
    }

    #[instrument(skip(self))]
    async fn fetch_coin_stats(&self, id: &str) -> Result<CoinStats> {
        let url = format!("{}/coins/markets", self.config.coingecko_url);
        let mut stats: Vec<CoinStats> = self.http
            .get(url)
            .query(&[("vs_currency", VS_CURRENCY), ("ids", id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if stats.is_empty() {
            bail!("No market statistics for {}", id);
        }
        Ok(stats.swap_remove(0))
    }

    #[instrument(skip(self))]
    async fn fetch_price_series(&self, id: &str) -> Result<Vec<f64>> {
        let url = format!("{}/coins/{}/market_chart", self.config.coingecko_url, id);
        let days = SERIES_DAYS.to_string();
        let series: PriceSeries = self.http
            .get(url)
            .query(&[("vs_currency", VS_CURRENCY), ("days", days.as_str()), ("interval", "daily")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(series.prices.into_iter().map(|(_, price)| price).collect())
    }

    #[instrument(skip(self))]
    async fn fetch_global(&self) -> Result<GlobalMarket> {
        let url = format!("{}/global", self.config.coingecko_url);
        let response: GlobalResponse = self.http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.data)
    }

    /// Fetches everything known about one pair, logging whatever fails.
    pub(crate) async fn fetch_market_data(&self, pair: &str, global: Option<&GlobalMarket>) -> MarketData {
        let mut data = MarketData::default();

        match self.fetch_ticker(pair).await {
            Ok(ticker) => {
                info!("Market price for {}: {}", pair, ticker.close);
                data.price = Some(ticker.close);
                data.kraken_volume_24h = ticker.volume_24h;
            }
            Err(e) => warn!("Failed to fetch market price for {}: {:#}", pair, e),
        }

        if !self.config.fetch_stats {
            return data;
        }

        let token = split_pair(pair).map_or(pair, |(token, _)| token);
        let Some(id) = coingecko_id(token) else {
            debug!("No CoinGecko id for {}, skipping market statistics", token);
            return data;
        };

        match self.fetch_coin_stats(id).await {
            Ok(stats) => data.apply_stats(&stats, token, global),
            Err(e) => warn!("Failed to fetch market statistics for {}: {:#}", pair, e),
        }

        match self.fetch_price_series(id).await {
            Ok(prices) => {
                data.volatility_30d = volatility(&prices).and_then(to_f64_decimal);
                data.momentum_30d = momentum(&prices).and_then(to_f64_decimal);
            }
            Err(e) => warn!("Failed to fetch price history for {}: {:#}", pair, e),
        }

        data
    }

    /// Fetches market data for all pairs with a bounded number of requests
    /// in flight. The global market snapshot is fetched once per call.
    #[instrument(skip_all, fields(pairs = pairs.len()))]
    pub(crate) async fn fetch_bulk_market_data(&self, pairs: &[String]) -> HashMap<String, MarketData> {
        let global = if self.config.fetch_stats {
            match self.fetch_global().await {
                Ok(global) => Some(global),
                Err(e) => {
                    warn!("Failed to fetch global market data: {:#}", e);
                    None
                }
            }
        } else {
            None
        };
        let global = global.as_ref();

        stream::iter(pairs)
            .map(|pair| async move { (pair.clone(), self.fetch_market_data(pair, global).await) })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> MarketConfig {
        MarketConfig {
            kraken_url: format!("{}/0/public/Ticker", server.uri()),
            coingecko_url: server.uri(),
            timeout: Duration::from_secs(5),
            max_retries: 0,
            concurrency: 3,
            fetch_stats: false,
        }
    }

    fn ticker_body(code: &str, close: &str) -> serde_json::Value {
        serde_json::json!({
            "error": [],
            "result": { code: { "c": [close, "0.01"], "v": ["1.5", "123.25"] } }
        })
    }

    #[test]
    fn test_kraken_pair_code() {
        assert_eq!(kraken_pair_code("BTC/EUR"), "XBTEUR");
        assert_eq!(kraken_pair_code("ETH/EUR"), "ETHEUR");
        assert_eq!(kraken_pair_code("XCN/EUR"), "XCNEUR");
    }

    #[test]
    fn test_coingecko_id() {
        assert_eq!(coingecko_id("BTC"), Some("bitcoin"));
        assert_eq!(coingecko_id("1000CAT"), Some("1000cat"));
        assert_eq!(coingecko_id("ZHAO"), Some("-11"));
        assert_eq!(coingecko_id("NOPE"), None);
    }

    #[test]
    fn test_volatility_and_momentum() {
        assert_eq!(volatility(&[100.0]), None);
        assert_eq!(momentum(&[100.0]), None);
        assert_eq!(volatility(&[100.0, 100.0, 100.0]), Some(0.0));

        // returns of +10% and -10%: mean 0, deviation 10%
        let v = volatility(&[100.0, 110.0, 99.0]).unwrap();
        assert!((v - 10.0).abs() < 1e-9);

        let m = momentum(&[100.0, 110.0, 99.0]).unwrap();
        assert!((m - -1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dominance() {
        let global = GlobalMarket {
            total_market_cap: HashMap::from([("eur".to_owned(), 1000.0)]),
            market_cap_percentage: HashMap::from([("btc".to_owned(), 52.5)]),
        };
        assert_eq!(global.dominance("BTC", Some(1.0)), Some(52.5));
        assert_eq!(global.dominance("DOT", Some(10.0)), Some(1.0));
        assert_eq!(global.dominance("DOT", None), None);
        assert_eq!(GlobalMarket::default().dominance("DOT", Some(10.0)), None);
    }

    #[tokio::test]
    async fn test_fetch_ticker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .and(query_param("pair", "XBTEUR"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ticker_body("XXBTZEUR", "60000.10000")))
            .mount(&server)
            .await;

        let client = MarketClient::new(test_config(&server)).unwrap();
        let ticker = client.fetch_ticker("BTC/EUR").await.unwrap();
        assert_eq!(ticker, Ticker { close: dec!(60000.1), volume_24h: Some(dec!(123.25)) });
    }

    #[tokio::test]
    async fn test_fetch_ticker_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": ["EQuery:Unknown asset pair"]
            })))
            .mount(&server)
            .await;

        let client = MarketClient::new(test_config(&server)).unwrap();
        let err = client.fetch_ticker("NOPE/EUR").await.unwrap_err();
        assert!(err.to_string().contains("Unknown asset pair"));
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ticker_body("XETHZEUR", "3000.0")))
            .expect(1)
            .mount(&server)
            .await;

        let config = MarketConfig { max_retries: 3, ..test_config(&server) };
        let client = MarketClient::new(config).unwrap();
        let ticker = client.fetch_ticker("ETH/EUR").await.unwrap();
        assert_eq!(ticker.close, dec!(3000));
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let config = MarketConfig { max_retries: 3, ..test_config(&server) };
        let client = MarketClient::new(config).unwrap();
        assert!(client.fetch_ticker("ETH/EUR").await.is_err());
    }

    #[tokio::test]
    async fn test_bulk_fetch_keeps_going_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .and(query_param("pair", "XBTEUR"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ticker_body("XXBTZEUR", "60000.0")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .and(query_param("pair", "DOTEUR"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .and(query_param("pair", "ADAEUR"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = MarketClient::new(test_config(&server)).unwrap();
        let pairs = vec!["BTC/EUR".to_owned(), "DOT/EUR".to_owned(), "ADA/EUR".to_owned()];
        let data = client.fetch_bulk_market_data(&pairs).await;

        assert_eq!(data.len(), 3);
        assert_eq!(data["BTC/EUR"].price, Some(dec!(60000)));
        assert_eq!(data["DOT/EUR"], MarketData::default());
        assert_eq!(data["ADA/EUR"], MarketData::default());
    }

    #[tokio::test]
    async fn test_fetch_market_statistics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ticker_body("DOTEUR", "6.5")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/global"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "total_market_cap": { "eur": 2000.0 },
                    "market_cap_percentage": { "btc": 55.0 }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .and(query_param("ids", "polkadot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "id": "polkadot",
                "symbol": "dot",
                "current_price": 6.5,
                "market_cap": 100.0,
                "total_volume": 25.0,
                "high_24h": 7.0,
                "low_24h": 6.0,
                "price_change_24h": -0.25,
                "price_change_percentage_24h": -3.5,
                "market_cap_change_percentage_24h": -3.25,
                "ath": 50.0,
                "ath_change_percentage": -87.0,
                "ath_date": "2021-11-04T14:10:09.301Z"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/coins/polkadot/market_chart"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "prices": [[1.0, 100.0], [2.0, 110.0], [3.0, 99.0]]
            })))
            .mount(&server)
            .await;

        let config = MarketConfig { fetch_stats: true, ..test_config(&server) };
        let client = MarketClient::new(config).unwrap();
        let data = client.fetch_bulk_market_data(&["DOT/EUR".to_owned()]).await;
        let dot = &data["DOT/EUR"];

        assert_eq!(dot.price, Some(dec!(6.5)));
        assert_eq!(dot.market_cap, Some(dec!(100)));
        assert_eq!(dot.daily_volume, Some(dec!(25)));
        assert_eq!(dot.low_24h, Some(dec!(6)));
        assert_eq!(dot.price_change_percentage_24h, Some(dec!(-3.5)));
        assert_eq!(dot.ath_date.as_deref(), Some("2021-11-04T14:10:09.301Z"));
        assert_eq!(dot.dominance, Some(dec!(5)));
        assert!(dot.volatility_30d.is_some());
        assert!(dot.momentum_30d.unwrap() < Decimal::ZERO);
    }
}
