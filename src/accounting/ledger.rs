use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use log::debug;

use super::{Commodity, Entry, LedgerError, Open, Transaction};

/// Entries handed over by the ledger collaborator, sorted by date, with
/// account and commodity declarations indexed for lookup.
#[derive(Default)]
pub struct Ledger {
    entries: Vec<Entry>,
    accounts: HashMap<String, Open>,
    commodities: HashMap<String, Commodity>,
}

impl Ledger {
    pub fn new(mut entries: Vec<Entry>) -> Ledger {
        // Stable, so same-day entries keep their file order.
        entries.sort_by_key(|entry| entry.date());

        let mut accounts = HashMap::new();
        let mut commodities = HashMap::new();
        for entry in &entries {
            match entry {
                Entry::Open(open) => {
                    accounts.insert(open.account.clone(), open.clone());
                }
                Entry::Commodity(commodity) => {
                    commodities.insert(commodity.currency.clone(), commodity.clone());
                }
                _ => {}
            }
        }

        Ledger {
            entries,
            accounts,
            commodities,
        }
    }

    /// Loads the JSON entry export written by the ledger collaborator.
    pub fn load(path: &Path) -> Result<Ledger, LedgerError> {
        let content = fs::read_to_string(path)?;
        let entries: Vec<Entry> = serde_json::from_str(&content)?;
        debug!("loaded {} entries from {}", entries.len(), path.display());

        Ok(Ledger::new(entries))
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Entries dated on or before `date`.
    pub fn entries_to(&self, date: NaiveDate) -> &[Entry] {
        let end = self.entries.partition_point(|entry| entry.date() <= date);
        &self.entries[..end]
    }

    pub fn transactions_on(&self, date: NaiveDate) -> impl Iterator<Item = &Transaction> {
        let start = self.entries.partition_point(|entry| entry.date() < date);
        self.entries[start..]
            .iter()
            .take_while(move |entry| entry.date() == date)
            .filter_map(|entry| match entry {
                Entry::Transaction(txn) => Some(txn),
                _ => None,
            })
    }

    pub fn account(&self, account: &str) -> Result<&Open, LedgerError> {
        self.accounts
            .get(account)
            .ok_or_else(|| LedgerError::UnknownAccount(account.to_string()))
    }

    pub fn commodity(&self, currency: &str) -> Result<&Commodity, LedgerError> {
        self.commodities
            .get(currency)
            .ok_or_else(|| LedgerError::UnknownCommodity(currency.to_string()))
    }

    pub fn commodities(&self) -> impl Iterator<Item = &Commodity> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Commodity(commodity) => Some(commodity),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::accounting::{Amount, Meta, Posting, Price};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 3, d).unwrap()
    }

    fn sample() -> Ledger {
        Ledger::new(vec![
            Entry::Price(Price {
                date: day(3),
                currency: "USD".to_string(),
                amount: Amount::new(dec!(6.3), "CNY"),
            }),
            Entry::Transaction(Transaction::new(
                day(2),
                "salary",
                vec![
                    Posting::new("Assets:Bank", dec!(100), "CNY"),
                    Posting::new("Income:Salary", dec!(-100), "CNY"),
                ],
            )),
            Entry::Open(Open {
                date: day(1),
                account: "Assets:Bank".to_string(),
                meta: Meta::new(),
            }),
            Entry::Transaction(Transaction::new(day(2), "snack", vec![])),
        ])
    }

    #[test]
    fn test_entries_are_sorted() {
        let ledger = sample();
        let dates: Vec<NaiveDate> = ledger.entries().iter().map(|e| e.date()).collect();
        assert_eq!(dates, vec![day(1), day(2), day(2), day(3)]);
    }

    #[test]
    fn test_entries_to_date() {
        let ledger = sample();
        assert_eq!(ledger.entries_to(day(1)).len(), 1);
        assert_eq!(ledger.entries_to(day(2)).len(), 3);
        assert_eq!(ledger.entries_to(day(9)).len(), 4);
    }

    #[test]
    fn test_transactions_on_date() {
        let ledger = sample();
        let narrations: Vec<&str> = ledger
            .transactions_on(day(2))
            .map(|txn| txn.narration.as_str())
            .collect();
        assert_eq!(narrations, vec!["salary", "snack"]);
        assert_eq!(ledger.transactions_on(day(3)).count(), 0);
    }

    #[test]
    fn test_unknown_account() {
        let ledger = sample();
        assert!(ledger.account("Assets:Bank").is_ok());
        assert_eq!(
            format!("{}", ledger.account("Assets:Nowhere").unwrap_err()),
            "account `Assets:Nowhere' is not opened"
        );
    }

    #[test]
    fn test_load_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"[{{"type": "commodity", "date": "2022-01-01", "currency": "CNY", "meta": {{"asset-class": "cash"}}}}]"#
        )?;

        let ledger = Ledger::load(file.path())?;
        assert_eq!(ledger.commodity("CNY")?.required("asset-class")?, "cash");
        assert!(ledger.commodity("USD").is_err());

        Ok(())
    }
}
