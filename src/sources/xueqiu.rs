use chrono::{NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use log::debug;
use reqwest::blocking::Client;
use serde::Deserialize;

use super::{decimal_from_json, quantize, PriceSource, SourceError, SourcePrice};

const HOME_URL: &str = "https://xueqiu.com/";
const KLINE_URL: &str = "https://stock.xueqiu.com/v5/stock/chart/kline.json";
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_3) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/73.0.3683.103 Safari/537.36";

pub const EXPECTED_COLUMNS: [&str; 12] = [
    "timestamp",
    "volume",
    "open",
    "high",
    "low",
    "close",
    "chg",
    "percent",
    "turnoverrate",
    "amount",
    "volume_post",
    "amount_post",
];
const TIMESTAMP: usize = 0;
const CLOSE: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Region {
    Cn,
    Hk,
    Us,
}

impl Region {
    pub fn currency(self) -> &'static str {
        match self {
            Region::Cn => "CNY",
            Region::Hk => "HKD",
            Region::Us => "USD",
        }
    }

    pub fn timezone(self) -> Tz {
        match self {
            Region::Cn => chrono_tz::Asia::Shanghai,
            Region::Hk => chrono_tz::Asia::Hong_Kong,
            Region::Us => chrono_tz::America::New_York,
        }
    }
}

fn split_ticker(ticker: &str) -> Result<(Region, &str), SourceError> {
    let invalid = || SourceError::InvalidTicker(ticker.to_string());
    let (region, symbol) = ticker.split_once(':').ok_or_else(invalid)?;
    let region = match region {
        "CN" => Region::Cn,
        "HK" => Region::Hk,
        "US" => Region::Us,
        _ => return Err(invalid()),
    };
    if symbol.is_empty() {
        return Err(invalid());
    }
    Ok((region, symbol))
}

#[derive(Debug, Deserialize)]
struct KlineResponse {
    error_code: i64,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    column: Vec<String>,
    item: Vec<Vec<serde_json::Value>>,
}

/// Daily klines, tickers carry their region, e.g. `HK:02800`.
pub struct Xueqiu {
    http: Client,
}

impl Xueqiu {
    /// Visits the home page first: the API only answers with its cookies.
    pub fn new() -> Result<Xueqiu, SourceError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()?;
        http.get(HOME_URL).send()?.error_for_status()?;

        Ok(Xueqiu { http })
    }

    fn daily_price(&self, ticker: &str, date: Option<NaiveDate>) -> Result<SourcePrice, SourceError> {
        let (region, symbol) = split_ticker(ticker)?;
        let begin = begin_millis(region, date)?;

        debug!("GET {} symbol={} begin={}", KLINE_URL, symbol, begin);
        let body = self
            .http
            .get(KLINE_URL)
            .query(&[
                ("symbol", symbol.to_string()),
                ("begin", begin.to_string()),
                ("period", "day".to_string()),
                ("type", "before".to_string()),
                ("count", "-1".to_string()),
                ("indicator", "kline".to_string()),
            ])
            .send()?
            .error_for_status()?
            .text()?;

        parse_response(&body, region)
    }
}

/// Now for the latest price, otherwise the last second of `date` on the
/// exchange's clock.
fn begin_millis(region: Region, date: Option<NaiveDate>) -> Result<i64, SourceError> {
    let Some(date) = date else {
        return Ok(Utc::now().timestamp_millis());
    };
    date.and_hms_opt(23, 59, 59)
        .and_then(|end| region.timezone().from_local_datetime(&end).earliest())
        .map(|end| end.timestamp_millis())
        .ok_or_else(|| SourceError::Schema(format!("no end of day for {}", date)))
}

fn parse_response(body: &str, region: Region) -> Result<SourcePrice, SourceError> {
    let response: KlineResponse = serde_json::from_str(body)?;
    if response.error_code != 0 {
        return Err(SourceError::Schema(
            response
                .error_description
                .unwrap_or_else(|| format!("error code {}", response.error_code)),
        ));
    }

    let data = response
        .data
        .ok_or_else(|| SourceError::Schema("no kline data".to_string()))?;
    if data.column != EXPECTED_COLUMNS {
        return Err(SourceError::Schema(format!("unexpected columns {:?}", data.column)));
    }
    let bar = data
        .item
        .first()
        .filter(|bar| bar.len() == EXPECTED_COLUMNS.len())
        .ok_or_else(|| SourceError::Schema("no kline bar".to_string()))?;

    let millis = bar[TIMESTAMP]
        .as_i64()
        .ok_or_else(|| SourceError::Schema(format!("invalid timestamp {}", bar[TIMESTAMP])))?;
    let time = region
        .timezone()
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| SourceError::Schema(format!("invalid timestamp {}", millis)))?;

    Ok(SourcePrice {
        price: quantize(decimal_from_json(&bar[CLOSE], "close")?),
        time,
        quote_currency: region.currency().to_string(),
    })
}

impl PriceSource for Xueqiu {
    fn latest_price(&self, ticker: &str) -> Result<SourcePrice, SourceError> {
        self.daily_price(ticker, None)
    }

    fn historical_price(&self, ticker: &str, date: NaiveDate) -> Result<SourcePrice, SourceError> {
        self.daily_price(ticker, Some(date))
    }
}
