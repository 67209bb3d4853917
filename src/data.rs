use std::io::{Read, Write};
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use indexmap::IndexMap;
use log::debug;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Deserialize;
use thiserror::Error;

use crate::accounting::categorizer::{CategorizeError, Categorizer};
use crate::accounting::{MetaValue, Posting, Transaction};
use crate::config::Settings;
use crate::networth::DailyStatus;
use crate::portfolio::{Snapshot, HORIZONS};

/// One report line, columns in insertion order.
pub type Row = IndexMap<String, String>;

pub const NOT_AVAILABLE: &str = "n/a";

/// Rounds half away from zero and always shows `dp` decimals.
pub fn fixed(value: Decimal, dp: u32) -> String {
    let rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.*}", dp as usize, rounded)
}

pub fn percent(value: Decimal, dp: u32) -> String {
    format!("{}%", fixed(value, dp))
}

pub fn or_not_available(value: Option<String>) -> String {
    value.unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

impl From<&DailyStatus> for Row {
    fn from(status: &DailyStatus) -> Self {
        let mut row = Row::new();
        row.insert("date".into(), status.date().to_string());
        row.insert("raw_networth".into(), fixed(status.raw_networth(), 2));
        row.insert("networth".into(), fixed(status.networth(), 2));
        row.insert("sunk".into(), fixed(status.sunk(), 2));
        row.insert("disposable_networth".into(), fixed(status.disposable_networth(), 2));
        row.insert("non_trade_income".into(), fixed(status.non_trade_income(), 2));
        row.insert("non_trade_expenses".into(), fixed(status.non_trade_expenses(), 2));
        row.insert("pnl".into(), or_not_available(status.pnl().map(|pnl| fixed(pnl, 2))));
        row.insert(
            "pnl_rate".into(),
            or_not_available(status.pnl_rate().map(|rate| percent(dec!(100) * rate, 4))),
        );
        row.insert("nav".into(), fixed(status.nav(), 4));
        row.insert("cum_pnl".into(), fixed(status.cum_pnl(), 2));
        row.insert("nav_ytd".into(), fixed(status.nav_ytd(), 4));
        row.insert("cum_pnl_ytd".into(), fixed(status.cum_pnl_ytd(), 2));
        for (class, share) in status.asset_class_shares() {
            row.insert(format!("{}%", class), percent(*share, 2));
        }
        row
    }
}

/// The `flags` column only shows up when some row carries a flag.
pub fn portfolio_rows(snapshot: &Snapshot) -> Vec<Row> {
    let show_flags = snapshot.rows().iter().any(|row| !row.flags().is_empty());

    snapshot
        .rows()
        .iter()
        .map(|holding| {
            let mut row = Row::new();
            row.insert("asset_class".into(), holding.asset_class().clone());
            row.insert("asset_subclass".into(), holding.asset_subclass().clone());
            row.insert("name".into(), holding.name().clone());
            row.insert("symbol".into(), holding.symbol().clone());
            row.insert("quantity".into(), fixed(holding.quantity(), 3));
            row.insert("price".into(), fixed(holding.price(), 4));
            row.insert(
                "price_date".into(),
                holding.price_date().map(|date| date.to_string()).unwrap_or_default(),
            );
            row.insert(
                "market_value".into(),
                holding
                    .market_value()
                    .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
                    .to_string(),
            );
            row.insert("currency".into(), holding.currency().clone());
            row.insert("value".into(), fixed(holding.value(), 2));
            row.insert(
                "pnl%".into(),
                or_not_available(holding.pnl().map(|pnl| percent(pnl, 4))),
            );
            for (days, change) in HORIZONS.iter().zip(holding.changes()) {
                row.insert(
                    format!("{}d%", days),
                    or_not_available(change.map(|change| percent(dec!(100) * change, 2))),
                );
            }
            if show_flags {
                row.insert("flags".into(), holding.flags().join(";"));
            }
            row.insert("share".into(), percent(holding.share(), 2));
            row
        })
        .collect()
}

/// Appends blank rows for every remaining day of the last row's year, so
/// that reports of different lengths line up when pasted side by side.
pub fn pad_to_year_end(rows: &mut Vec<Row>, last_date: NaiveDate) {
    let Some(last) = rows.last() else {
        return;
    };
    let blank: Row = last.keys().map(|key| (key.clone(), String::new())).collect();

    let mut date = last_date;
    while let Some(next) = date.succ_opt() {
        if next.year() != last_date.year() {
            break;
        }
        rows.push(blank.clone());
        date = next;
    }
}

/// Writes `rows` as CSV, header taken from the first row. Transposing turns
/// every column into a line.
pub fn write_csv<W: Write>(rows: &[Row], transpose: bool, writer: W) -> Result<(), csv::Error> {
    let Some(first) = rows.first() else {
        return Ok(());
    };

    let mut table: Vec<Vec<&str>> = Vec::with_capacity(rows.len() + 1);
    table.push(first.keys().map(|key| key.as_str()).collect());
    for row in rows {
        table.push(
            first
                .keys()
                .map(|key| row.get(key).map(|value| value.as_str()).unwrap_or(""))
                .collect(),
        );
    }

    if transpose {
        let width = table[0].len();
        table = (0..width)
            .map(|col| table.iter().map(|line| line[col]).collect())
            .collect();
    }

    let mut csv_writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);
    for line in &table {
        csv_writer.write_record(line)?;
    }
    csv_writer.flush()?;

    Ok(())
}

pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Row>, csv::Error> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        rows.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        );
    }

    Ok(rows)
}

#[derive(Debug, Error)]
pub enum StatementError {
    #[error("{0}")]
    Csv(#[from] csv::Error),
    #[error("invalid date `{0}'")]
    InvalidDate(String),
    #[error("invalid amount `{0}'")]
    InvalidAmount(String),
    #[error("{0}")]
    Categorize(#[from] CategorizeError),
}

/// A line of the credit-card statement export.
#[derive(Debug, Deserialize)]
pub struct StatementRecord {
    #[serde(rename = "卡号末四位")]
    pub last4: String,
    #[serde(rename = "记账日期")]
    pub date: String,
    /// Debit column: spending is positive.
    #[serde(rename = "交易金额")]
    pub amount: String,
    #[serde(rename = "交易描述")]
    pub description: String,
}

fn parse_statement_date(raw: &str) -> Result<NaiveDate, StatementError> {
    ["%Y%m%d", "%Y-%m-%d", "%Y/%m/%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .ok_or_else(|| StatementError::InvalidDate(raw.to_string()))
}

impl StatementRecord {
    pub fn into_transaction(self, account: &str, currency: &str) -> Result<Transaction, StatementError> {
        let date = parse_statement_date(&self.date)?;
        let amount = Decimal::from_str(&self.amount.replace(',', ""))
            .map_err(|_| StatementError::InvalidAmount(self.amount.clone()))?;

        let mut txn = Transaction::new(
            date,
            &self.description,
            vec![Posting::new(account, -amount, currency)],
        );
        txn.meta.insert("card".to_string(), MetaValue::Text(self.last4));

        Ok(txn)
    }
}

/// Reads a statement and balances every line with the categorizer. Lines
/// with a zero amount are skipped.
pub fn import_statement<R: Read>(reader: R, settings: &Settings) -> Result<Vec<Transaction>, StatementError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let categorizer = Categorizer::new(&settings.categorizer);

    let mut transactions = Vec::new();
    for record in csv_reader.deserialize::<StatementRecord>() {
        let txn = record?.into_transaction(&settings.statement.account, &settings.statement.currency)?;
        if txn.postings.iter().all(|posting| posting.units.number.is_zero()) {
            debug!("skipped zero amount {} {}", txn.date, txn.narration);
            continue;
        }
        let txn = categorizer.categorize(txn)?;
        debug!("imported {} {}", txn.date, txn.narration);
        transactions.push(txn);
    }

    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_fixed_decimals() {
        assert_eq!(fixed(dec!(10), 2), "10.00");
        assert_eq!(fixed(dec!(1.005), 2), "1.01");
        assert_eq!(fixed(dec!(-2.345), 2), "-2.35");
        assert_eq!(fixed(dec!(1.1), 4), "1.1000");
        assert_eq!(percent(dec!(10), 4), "10.0000%");
    }

    #[test]
    fn test_csv_round_trip() -> Result<()> {
        let rows = vec![
            row(&[("date", "2024-01-02"), ("pnl", NOT_AVAILABLE), ("nav", "1.0000")]),
            row(&[("date", "2024-01-03"), ("pnl", "10.00"), ("nav", "1.1000")]),
        ];

        let mut out = Vec::new();
        write_csv(&rows, false, &mut out)?;
        assert_eq!(
            String::from_utf8(out.clone())?,
            "date,pnl,nav\n2024-01-02,n/a,1.0000\n2024-01-03,10.00,1.1000\n"
        );
        assert_eq!(read_csv(out.as_slice())?, rows);

        Ok(())
    }

    #[test]
    fn test_csv_quotes_commas() -> Result<()> {
        let rows = vec![row(&[("name", "Fund, A"), ("value", "1")])];

        let mut out = Vec::new();
        write_csv(&rows, false, &mut out)?;
        assert_eq!(read_csv(out.as_slice())?, rows);

        Ok(())
    }

    #[test]
    fn test_csv_transpose() -> Result<()> {
        let rows = vec![
            row(&[("date", "2024-01-02"), ("nav", "1.0000")]),
            row(&[("date", "2024-01-03"), ("nav", "1.1000")]),
        ];

        let mut out = Vec::new();
        write_csv(&rows, true, &mut out)?;
        assert_eq!(
            String::from_utf8(out)?,
            "date,2024-01-02,2024-01-03\nnav,1.0000,1.1000\n"
        );

        Ok(())
    }

    #[test]
    fn test_empty_report_writes_nothing() -> Result<()> {
        let mut out = Vec::new();
        write_csv(&[], false, &mut out)?;
        assert!(out.is_empty());

        Ok(())
    }

    #[test]
    fn test_pad_to_year_end() {
        let mut rows = vec![row(&[("date", "2023-12-28"), ("nav", "1.0")])];
        pad_to_year_end(&mut rows, NaiveDate::from_ymd_opt(2023, 12, 28).unwrap());

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3], row(&[("date", ""), ("nav", "")]));

        let mut rows = vec![row(&[("date", "2023-12-31")])];
        pad_to_year_end(&mut rows, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_portfolio_columns() -> Result<()> {
        use crate::accounting::holdings::InventoryHoldings;
        use crate::accounting::ledger::Ledger;
        use crate::accounting::{Commodity, Entry, Meta, Open};
        use crate::portfolio::SnapshotBuilder;

        let on = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut account_meta = Meta::new();
        account_meta.insert("name".to_string(), MetaValue::Text("Bank".to_string()));
        let mut commodity_meta = Meta::new();
        for (key, value) in [("name", "Renminbi"), ("asset-class", "cash"), ("asset-subclass", "domestic-currency")] {
            commodity_meta.insert(key.to_string(), MetaValue::Text(value.to_string()));
        }
        let ledger = Ledger::new(vec![
            Entry::Open(Open {
                date: on,
                account: "Assets:Bank".to_string(),
                meta: account_meta,
            }),
            Entry::Commodity(Commodity {
                date: on,
                currency: "CNY".to_string(),
                meta: commodity_meta,
            }),
            Entry::Transaction(Transaction::new(
                on,
                "",
                vec![
                    Posting::new("Assets:Bank", dec!(1234.5), "CNY"),
                    Posting::new("Equity:Opening", dec!(-1234.5), "CNY"),
                ],
            )),
        ]);
        let settings = Settings::default();
        let provider = InventoryHoldings::new();
        let snapshot = SnapshotBuilder::new(&ledger, &provider, &settings).build(on)?;

        let rows = portfolio_rows(&snapshot);
        assert_eq!(
            rows[0].keys().map(|key| key.as_str()).collect::<Vec<_>>(),
            vec![
                "asset_class", "asset_subclass", "name", "symbol", "quantity", "price", "price_date",
                "market_value", "currency", "value", "pnl%", "1d%", "2d%", "7d%", "30d%", "share",
            ]
        );
        assert_eq!(rows[0]["quantity"], "1234.500");
        assert_eq!(rows[0]["price"], "1.0000");
        assert_eq!(rows[0]["price_date"], "");
        // Half to even.
        assert_eq!(rows[0]["market_value"], "1234");
        assert_eq!(rows[0]["value"], "1234.50");
        assert_eq!(rows[0]["pnl%"], NOT_AVAILABLE);
        assert_eq!(rows[0]["30d%"], NOT_AVAILABLE);
        assert_eq!(rows[0]["share"], "100.00%");

        Ok(())
    }

    #[test]
    fn test_import_statement() -> Result<()> {
        let statement = "卡号末四位,记账日期,交易金额,交易描述\n\
                         1234,20200601,23.50,滴滴出行\n\
                         1234,2020-06-02,-100.00,信用卡还款\n";

        let transactions = import_statement(statement.as_bytes(), &Settings::default())?;
        assert_eq!(transactions.len(), 2);

        let taxi = &transactions[0];
        assert_eq!(taxi.date, NaiveDate::from_ymd_opt(2020, 6, 1).unwrap());
        assert_eq!(taxi.postings[0].account, "Liabilities:CN:CreditCard:SPDB");
        assert_eq!(taxi.postings[0].units.number, dec!(-23.50));
        assert_eq!(taxi.postings[1].account, "Expenses:Transport:Taxi");
        assert_eq!(taxi.meta.get("card"), Some(&MetaValue::Text("1234".to_string())));

        let repayment = &transactions[1];
        assert_eq!(repayment.postings[0].units.number, dec!(100.00));
        assert_eq!(repayment.postings[1].account, "Assets:CN:Saving:CMB:CNY");

        Ok(())
    }

    #[test]
    fn test_import_skips_zero_amounts() -> Result<()> {
        let statement = "卡号末四位,记账日期,交易金额,交易描述\n\
                         1234,20200601,0.00,银联预授权\n\
                         1234,20200602,23.50,滴滴出行\n";

        let transactions = import_statement(statement.as_bytes(), &Settings::default())?;
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].narration, "滴滴出行");
        assert_eq!(transactions[0].postings.len(), 2);

        Ok(())
    }

    #[test]
    fn test_import_rejects_bad_date() {
        let statement = "卡号末四位,记账日期,交易金额,交易描述\n1234,June 1st,23.50,滴滴出行\n";
        let err = import_statement(statement.as_bytes(), &Settings::default()).unwrap_err();
        assert_eq!(format!("{}", err), "invalid date `June 1st'");
    }
}
