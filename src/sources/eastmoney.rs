use chrono::{NaiveDate, TimeZone};
use chrono_tz::Asia::Shanghai;
use log::debug;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::REFERER;
use serde::Deserialize;

use super::{decimal_from_json, quantize, PriceSource, SourceError, SourcePrice};

const URL: &str = "https://api.fund.eastmoney.com/f10/lsjz";
const CALLBACK: &str = "thecallback";

#[derive(Debug, Deserialize)]
struct LsjzResponse {
    #[serde(rename = "Data")]
    data: LsjzData,
}

#[derive(Debug, Deserialize)]
struct LsjzData {
    #[serde(rename = "LSJZList")]
    navs: Vec<Nav>,
}

#[derive(Debug, Deserialize)]
struct Nav {
    /// Valuation date.
    #[serde(rename = "FSRQ")]
    date: String,
    /// Unit NAV.
    #[serde(rename = "DWJZ")]
    value: serde_json::Value,
}

/// Fund NAV, tickers are fund codes prefixed with `F`.
pub struct Eastmoney {
    http: Client,
    jsonp: Regex,
}

impl Eastmoney {
    pub fn new() -> Result<Eastmoney, SourceError> {
        Ok(Eastmoney {
            http: Client::builder().build()?,
            jsonp: Regex::new(&format!(r"(?s){}\((.*)\)", CALLBACK))?,
        })
    }

    fn daily_price(&self, ticker: &str, date: Option<NaiveDate>) -> Result<SourcePrice, SourceError> {
        let code = fund_code(ticker)?;

        let mut query = vec![
            ("callback", CALLBACK.to_string()),
            ("fundCode", code.to_string()),
            ("pageIndex", "1".to_string()),
            ("pageSize", "1".to_string()),
        ];
        if let Some(date) = date {
            let day = date.format("%Y-%m-%d").to_string();
            query.push(("startDate", day.clone()));
            query.push(("endDate", day));
        }

        debug!("GET {} fundCode={} date={:?}", URL, code, date);
        let body = self
            .http
            .get(URL)
            .query(&query)
            .header(REFERER, format!("http://fundf10.eastmoney.com/jjjz_{}.html", code))
            .send()?
            .error_for_status()?
            .text()?;

        parse_response(&self.jsonp, &body)
    }
}

fn fund_code(ticker: &str) -> Result<&str, SourceError> {
    match ticker.strip_prefix('F') {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(SourceError::InvalidTicker(ticker.to_string())),
    }
}

/// Unwraps the JSONP body and reads the first NAV of the list.
fn parse_response(jsonp: &Regex, body: &str) -> Result<SourcePrice, SourceError> {
    let json = jsonp
        .captures(body)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| SourceError::Schema(format!("no {} wrapper in response", CALLBACK)))?;
    let response: LsjzResponse = serde_json::from_str(json.as_str())?;

    let nav = response
        .data
        .navs
        .first()
        .ok_or_else(|| SourceError::Schema("empty NAV list".to_string()))?;
    let date = NaiveDate::parse_from_str(&nav.date, "%Y-%m-%d")
        .map_err(|_| SourceError::Schema(format!("invalid date {}", nav.date)))?;
    let time = date
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Shanghai.from_local_datetime(&midnight).single())
        .ok_or_else(|| SourceError::Schema(format!("invalid date {}", nav.date)))?;

    Ok(SourcePrice {
        price: quantize(decimal_from_json(&nav.value, "DWJZ")?),
        time,
        quote_currency: "CNY".to_string(),
    })
}

impl PriceSource for Eastmoney {
    fn latest_price(&self, ticker: &str) -> Result<SourcePrice, SourceError> {
        self.daily_price(ticker, None)
    }

    fn historical_price(&self, ticker: &str, date: NaiveDate) -> Result<SourcePrice, SourceError> {
        self.daily_price(ticker, Some(date))
    }
}
