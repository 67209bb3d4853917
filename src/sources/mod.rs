use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use enum_dispatch::enum_dispatch;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

pub mod eastmoney;
pub mod exchangeratesapi;
pub mod xueqiu;

pub use eastmoney::Eastmoney;
pub use exchangeratesapi::ExchangeRatesApi;
pub use xueqiu::Xueqiu;

/// Decimal places every fetched price is quantized to.
pub const PRICE_SCALE: u32 = 18;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Pattern(#[from] regex::Error),
    #[error("invalid ticker `{0}'")]
    InvalidTicker(String),
    #[error("unexpected response: {0}")]
    Schema(String),
    #[error("unknown price source `{0}'")]
    UnknownSource(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourcePrice {
    pub price: Decimal,
    /// Trade time in the exchange timezone.
    pub time: DateTime<Tz>,
    pub quote_currency: String,
}

#[enum_dispatch]
pub trait PriceSource {
    fn latest_price(&self, ticker: &str) -> Result<SourcePrice, SourceError>;
    fn historical_price(&self, ticker: &str, date: NaiveDate) -> Result<SourcePrice, SourceError>;
}

#[enum_dispatch(PriceSource)]
pub enum Source {
    Eastmoney,
    ExchangeRatesApi,
    Xueqiu,
}

impl Source {
    /// Builds the adapter registered under `name`.
    pub fn from_name(name: &str) -> Result<Source, SourceError> {
        match name {
            "eastmoney" => Ok(Eastmoney::new()?.into()),
            "exchangeratesapi" => Ok(ExchangeRatesApi::new()?.into()),
            "xueqiu" => Ok(Xueqiu::new()?.into()),
            other => Err(SourceError::UnknownSource(other.to_string())),
        }
    }
}

pub(crate) fn quantize(price: Decimal) -> Decimal {
    let mut price = price.round_dp(PRICE_SCALE);
    price.rescale(PRICE_SCALE);
    price
}

/// Numbers come either as JSON numbers or as strings, depending on the API.
pub(crate) fn decimal_from_json(value: &Value, field: &str) -> Result<Decimal, SourceError> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => return Err(SourceError::Schema(format!("{} is not a number: {}", field, other))),
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| SourceError::Schema(format!("{} is not a number: {}", field, raw)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_quantize() {
        let price = quantize(dec!(1.2345));
        assert_eq!(price, dec!(1.2345));
        assert_eq!(price.to_string(), "1.234500000000000000");
    }

    #[test]
    fn test_decimal_from_json() -> Result<(), SourceError> {
        assert_eq!(decimal_from_json(&json!("1.0710"), "DWJZ")?, dec!(1.071));
        assert_eq!(decimal_from_json(&json!(3.856), "close")?, dec!(3.856));
        assert_eq!(decimal_from_json(&json!(2e-5), "rate")?, dec!(0.00002));
        assert!(decimal_from_json(&json!(null), "close").is_err());
        assert!(decimal_from_json(&json!("--"), "DWJZ").is_err());

        Ok(())
    }

    #[test]
    fn test_unknown_source() {
        let err = Source::from_name("yahoo").err().map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("unknown price source `yahoo'"));
    }
}
