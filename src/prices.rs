use std::collections::hash_map::Entry as MapEntry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::{Datelike, NaiveDate, Weekday};
use log::{debug, info, warn};
use thiserror::Error;

use crate::accounting::ledger::Ledger;
use crate::accounting::{Amount, LedgerError, Price};
use crate::sources::{PriceSource, SourceError};

#[derive(Debug, Error)]
pub enum PriceUpdateError {
    #[error("failed to read prices file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("invalid price job `{0}', expected QUOTE:source/TICKER")]
    InvalidJob(String),
    #[error("malformed price line `{0}'")]
    MalformedLine(String),
    #[error("{ticker} on {date}: {source}")]
    Fetch {
        ticker: String,
        date: NaiveDate,
        source: SourceError,
    },
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Where a commodity's price comes from.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceJob {
    pub quote: String,
    pub source: String,
    pub ticker: String,
}

impl PriceJob {
    /// Parses `QUOTE:source/TICKER`. Tickers may contain colons themselves.
    pub fn parse(raw: &str) -> Result<PriceJob, PriceUpdateError> {
        let invalid = || PriceUpdateError::InvalidJob(raw.to_string());
        let (quote, rest) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let (source, ticker) = rest.split_once('/').ok_or_else(invalid)?;
        if quote.is_empty() || source.is_empty() || ticker.is_empty() {
            return Err(invalid());
        }

        Ok(PriceJob {
            quote: quote.to_string(),
            source: source.to_string(),
            ticker: ticker.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedFetch {
    pub commodity: String,
    pub job: PriceJob,
    pub date: NaiveDate,
}

#[derive(Debug, Default)]
pub struct UpdatePlan {
    pub fetches: Vec<PlannedFetch>,
    /// (commodity, date) pairs the prices file already has.
    pub existing: HashSet<(String, NaiveDate)>,
}

/// Splits `YYYY-MM-DD price SYMBOL NUMBER QUOTE`.
fn parse_line(line: &str) -> Result<(NaiveDate, &str), PriceUpdateError> {
    let malformed = || PriceUpdateError::MalformedLine(line.to_string());
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 || fields[1] != "price" {
        return Err(malformed());
    }
    let date = NaiveDate::parse_from_str(fields[0], "%Y-%m-%d").map_err(|_| malformed())?;
    Ok((date, fields[2]))
}

fn price_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(';'))
}

/// Date of the last line of the prices file.
pub fn last_price_date(content: &str) -> Result<Option<NaiveDate>, PriceUpdateError> {
    price_lines(content)
        .last()
        .map(|line| parse_line(line).map(|(date, _)| date))
        .transpose()
}

/// Dates that already have a price for `symbol`.
pub fn existing_dates(content: &str, symbol: &str) -> Result<HashSet<NaiveDate>, PriceUpdateError> {
    let mut dates = HashSet::new();
    for line in price_lines(content) {
        let (date, line_symbol) = parse_line(line)?;
        if line_symbol == symbol {
            dates.insert(date);
        }
    }
    Ok(dates)
}

/// Monday to Friday dates of `[start, end]`.
pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|date| *date <= end)
        .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

/// Lists the fetches needed to bring the prices file up to `end`. The last
/// date of the file is fetched again, some funds publish their NAV late.
pub fn plan_updates(ledger: &Ledger, prices_path: &Path, end: NaiveDate) -> Result<UpdatePlan, PriceUpdateError> {
    let content = fs::read_to_string(prices_path)?;
    let start = last_price_date(&content)?.unwrap_or(end);
    let days = weekdays(start, end);
    debug!("planning {} weekdays from {} to {}", days.len(), start, end);

    let mut plan = UpdatePlan::default();
    for commodity in ledger.commodities() {
        let Some(raw) = commodity.optional("price") else {
            continue;
        };
        let job = PriceJob::parse(&raw)?;

        let existing = existing_dates(&content, &commodity.currency)?;
        for date in &days {
            if !existing.contains(date) {
                plan.fetches.push(PlannedFetch {
                    commodity: commodity.currency.clone(),
                    job: job.clone(),
                    date: *date,
                });
            }
        }
        plan.existing
            .extend(existing.into_iter().map(|date| (commodity.currency.clone(), date)));
    }

    info!("{} prices to fetch", plan.fetches.len());
    Ok(plan)
}

/// Runs the planned fetches one after the other, opening each named source
/// once through `source_for`. A price dated on a day the file or an earlier
/// fetch already covers, e.g. the previous close returned for a holiday, is
/// dropped.
pub fn fetch_updates<S, F>(plan: &UpdatePlan, mut source_for: F) -> Result<Vec<Price>, PriceUpdateError>
where
    S: PriceSource,
    F: FnMut(&str) -> Result<S, SourceError>,
{
    let mut sources: HashMap<String, S> = HashMap::new();
    let mut seen = plan.existing.clone();
    let mut prices = Vec::new();

    for fetch in &plan.fetches {
        let source = match sources.entry(fetch.job.source.clone()) {
            MapEntry::Occupied(entry) => entry.into_mut(),
            MapEntry::Vacant(entry) => entry.insert(source_for(&fetch.job.source)?),
        };

        let fetched = source
            .historical_price(&fetch.job.ticker, fetch.date)
            .map_err(|source| PriceUpdateError::Fetch {
                ticker: fetch.job.ticker.clone(),
                date: fetch.date,
                source,
            })?;
        if fetched.quote_currency != fetch.job.quote {
            warn!(
                "{} is quoted in {}, recorded as {}",
                fetch.job.ticker, fetched.quote_currency, fetch.job.quote
            );
        }

        let date = fetched.time.date_naive();
        if !seen.insert((fetch.commodity.clone(), date)) {
            debug!("{} already has a price on {}", fetch.commodity, date);
            continue;
        }
        prices.push(Price {
            date,
            currency: fetch.commodity.clone(),
            amount: Amount::new(fetched.price, &fetch.job.quote),
        });
    }

    Ok(prices)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use anyhow::Result;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::accounting::{Commodity, Entry, Meta, MetaValue};
    use crate::sources::SourcePrice;

    const PRICES: &str = "\
2024-03-06 price F110011 1.234000000000000000 CNY
2024-03-06 price USD 7.190000000000000000 CNY

2024-03-07 price USD 7.200000000000000000 CNY
";

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn commodity(currency: &str, price: Option<&str>) -> Entry {
        let mut meta = Meta::new();
        if let Some(price) = price {
            meta.insert("price".to_string(), MetaValue::Text(price.to_string()));
        }
        Entry::Commodity(Commodity {
            date: date(1),
            currency: currency.to_string(),
            meta,
        })
    }

    #[test]
    fn test_parse_job() -> Result<()> {
        assert_eq!(
            PriceJob::parse("HKD:xueqiu/HK:02800")?,
            PriceJob {
                quote: "HKD".to_string(),
                source: "xueqiu".to_string(),
                ticker: "HK:02800".to_string(),
            }
        );
        assert!(PriceJob::parse("CNY/F110011").is_err());
        assert!(PriceJob::parse("CNY:eastmoney/").is_err());

        Ok(())
    }

    #[test]
    fn test_last_price_date() -> Result<()> {
        assert_eq!(last_price_date(PRICES)?, Some(date(7)));
        assert_eq!(last_price_date("\n\n")?, None);
        assert!(last_price_date("garbage\n").is_err());

        Ok(())
    }

    #[test]
    fn test_existing_dates() -> Result<()> {
        let dates = existing_dates(PRICES, "USD")?;
        assert_eq!(dates.len(), 2);
        assert!(dates.contains(&date(6)));
        assert!(dates.contains(&date(7)));
        assert_eq!(existing_dates(PRICES, "HKD")?.len(), 0);

        Ok(())
    }

    #[test]
    fn test_weekdays() {
        // 2024-03-08 is a Friday.
        assert_eq!(weekdays(date(8), date(11)), vec![date(8), date(11)]);
        assert!(weekdays(date(9), date(10)).is_empty());
        assert!(weekdays(date(11), date(8)).is_empty());
    }

    #[test]
    fn test_plan_updates() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "{}", PRICES)?;

        let ledger = Ledger::new(vec![
            commodity("CNY", None),
            commodity("F110011", Some("CNY:eastmoney/F110011")),
            commodity("USD", Some("CNY:exchangeratesapi/USDCNY")),
        ]);
        let plan = plan_updates(&ledger, file.path(), date(11))?;

        let planned: Vec<(&str, NaiveDate)> = plan
            .fetches
            .iter()
            .map(|fetch| (fetch.commodity.as_str(), fetch.date))
            .collect();
        assert_eq!(
            planned,
            vec![
                ("F110011", date(7)),
                ("F110011", date(8)),
                ("F110011", date(11)),
                ("USD", date(8)),
                ("USD", date(11)),
            ]
        );
        assert_eq!(plan.fetches[3].job.ticker, "USDCNY");
        assert!(plan.existing.contains(&("USD".to_string(), date(7))));

        Ok(())
    }

    #[test]
    fn test_plan_rejects_bad_job() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "{}", PRICES)?;

        let ledger = Ledger::new(vec![commodity("GOLD", Some("sge-Au9999"))]);
        let err = plan_updates(&ledger, file.path(), date(11)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid price job `sge-Au9999', expected QUOTE:source/TICKER"
        );

        Ok(())
    }

    /// Answers every request with the close of a fixed trade date.
    #[derive(Clone)]
    struct FixedCloses {
        closes: HashMap<(String, NaiveDate), (NaiveDate, Decimal)>,
        quote_currency: String,
    }

    impl PriceSource for FixedCloses {
        fn latest_price(&self, ticker: &str) -> Result<SourcePrice, SourceError> {
            Err(SourceError::InvalidTicker(ticker.to_string()))
        }

        fn historical_price(&self, ticker: &str, date: NaiveDate) -> Result<SourcePrice, SourceError> {
            let (traded, price) = self
                .closes
                .get(&(ticker.to_string(), date))
                .copied()
                .ok_or_else(|| SourceError::InvalidTicker(ticker.to_string()))?;
            let time = chrono_tz::Asia::Shanghai
                .with_ymd_and_hms(traded.year(), traded.month(), traded.day(), 0, 0, 0)
                .unwrap();
            Ok(SourcePrice {
                price,
                time,
                quote_currency: self.quote_currency.clone(),
            })
        }
    }

    fn planned(commodity: &str, ticker: &str, d: u32) -> PlannedFetch {
        PlannedFetch {
            commodity: commodity.to_string(),
            job: PriceJob {
                quote: "CNY".to_string(),
                source: "fixed".to_string(),
                ticker: ticker.to_string(),
            },
            date: date(d),
        }
    }

    #[test]
    fn test_fetch_keeps_trade_dates_once() -> Result<()> {
        let mut closes = HashMap::new();
        // 2024-03-07 is a holiday, the previous close comes back.
        closes.insert(("F110011".to_string(), date(7)), (date(6), dec!(1.234)));
        closes.insert(("F110011".to_string(), date(8)), (date(8), dec!(1.25)));
        // So is 2024-03-11, answered with Friday's close again.
        closes.insert(("F110011".to_string(), date(11)), (date(8), dec!(1.25)));
        closes.insert(("USDCNY".to_string(), date(11)), (date(8), dec!(7.21)));
        let source = FixedCloses {
            closes,
            quote_currency: "CNY".to_string(),
        };

        let plan = UpdatePlan {
            fetches: vec![
                planned("F110011", "F110011", 7),
                planned("F110011", "F110011", 8),
                planned("F110011", "F110011", 11),
                planned("USD", "USDCNY", 11),
            ],
            existing: [("F110011".to_string(), date(6))].into_iter().collect(),
        };

        let mut opened = Vec::new();
        let prices = fetch_updates(&plan, |name| {
            opened.push(name.to_string());
            Ok(source.clone())
        })?;

        assert_eq!(opened, vec!["fixed".to_string()]);
        let dated: Vec<(NaiveDate, &str)> = prices
            .iter()
            .map(|price| (price.date, price.currency.as_str()))
            .collect();
        assert_eq!(dated, vec![(date(8), "F110011"), (date(8), "USD")]);
        assert_eq!(prices[1].amount, Amount::new(dec!(7.21), "CNY"));

        Ok(())
    }

    #[test]
    fn test_fetch_records_planned_quote() -> Result<()> {
        let mut closes = HashMap::new();
        closes.insert(("US:SPY".to_string(), date(8)), (date(8), dec!(510.5)));
        let source = FixedCloses {
            closes,
            quote_currency: "USD".to_string(),
        };
        let plan = UpdatePlan {
            fetches: vec![planned("SPY", "US:SPY", 8)],
            existing: HashSet::new(),
        };

        let prices = fetch_updates(&plan, |_| Ok(source.clone()))?;
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].amount.currency, "CNY");

        Ok(())
    }

    #[test]
    fn test_fetch_failure_names_the_ticker() {
        let source = FixedCloses {
            closes: HashMap::new(),
            quote_currency: "CNY".to_string(),
        };
        let plan = UpdatePlan {
            fetches: vec![planned("F110011", "F110011", 8)],
            existing: HashSet::new(),
        };

        let err = fetch_updates(&plan, |_| Ok(source.clone())).unwrap_err();
        assert!(err.to_string().starts_with("F110011 on 2024-03-08: "));
    }
}
