use std::collections::HashMap;

use chrono::{NaiveDate, TimeZone};
use chrono_tz::UTC;
use log::debug;
use reqwest::blocking::Client;
use serde::Deserialize;

use super::{decimal_from_json, quantize, PriceSource, SourceError, SourcePrice};

const URL: &str = "https://api.exchangeratesapi.io/";

#[derive(Debug, Deserialize)]
struct RatesResponse {
    date: String,
    rates: HashMap<String, serde_json::Value>,
}

/// Tickers are a base and a quote currency, e.g. `USDCNY`.
pub struct ExchangeRatesApi {
    http: Client,
}

impl ExchangeRatesApi {
    pub fn new() -> Result<ExchangeRatesApi, SourceError> {
        Ok(ExchangeRatesApi {
            http: Client::builder().build()?,
        })
    }

    fn daily_price(&self, ticker: &str, date: Option<NaiveDate>) -> Result<SourcePrice, SourceError> {
        let (base, quote) = split_pair(ticker)?;
        let day = match date {
            Some(date) => date.format("%Y-%m-%d").to_string(),
            None => "latest".to_string(),
        };

        debug!("GET {}{} base={} symbols={}", URL, day, base, quote);
        let body = self
            .http
            .get(format!("{}{}", URL, day))
            .query(&[("symbols", quote), ("base", base)])
            .send()?
            .error_for_status()?
            .text()?;

        parse_response(&body, quote)
    }
}

fn split_pair(ticker: &str) -> Result<(&str, &str), SourceError> {
    if ticker.len() != 6 || !ticker.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(SourceError::InvalidTicker(ticker.to_string()));
    }
    Ok(ticker.split_at(3))
}

/// The rate is quoted in `quote` per unit of the base currency.
fn parse_response(body: &str, quote: &str) -> Result<SourcePrice, SourceError> {
    let response: RatesResponse = serde_json::from_str(body)?;

    let rate = response
        .rates
        .get(quote)
        .ok_or_else(|| SourceError::Schema(format!("no rate for {}", quote)))?;
    let date = NaiveDate::parse_from_str(&response.date, "%Y-%m-%d")
        .map_err(|_| SourceError::Schema(format!("invalid date {}", response.date)))?;
    let time = date
        .and_hms_opt(0, 0, 0)
        .map(|midnight| UTC.from_utc_datetime(&midnight))
        .ok_or_else(|| SourceError::Schema(format!("invalid date {}", response.date)))?;

    Ok(SourcePrice {
        price: quantize(decimal_from_json(rate, quote)?),
        time,
        quote_currency: quote.to_string(),
    })
}

impl PriceSource for ExchangeRatesApi {
    fn latest_price(&self, ticker: &str) -> Result<SourcePrice, SourceError> {
        self.daily_price(ticker, None)
    }

    fn historical_price(&self, ticker: &str, date: NaiveDate) -> Result<SourcePrice, SourceError> {
        self.daily_price(ticker, Some(date))
    }
}
