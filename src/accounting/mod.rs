use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

pub mod categorizer;
pub mod holdings;
pub mod ledger;


#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read ledger: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode ledger entries: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("account `{0}' is not opened")]
    UnknownAccount(String),
    #[error("commodity `{0}' is not declared")]
    UnknownCommodity(String),
    #[error("{entity} has no `{key}' in meta")]
    MissingMeta { entity: String, key: String },
    #[error("meta `{key}' of {entity} is not a flag: {value}")]
    InvalidFlag { entity: String, key: String, value: String },
    #[error("no exchange rate for {base}/{quote}")]
    MissingRate { base: String, quote: String },
    #[error("holding of {currency} in {account} has no market value")]
    MissingMarketValue { account: String, currency: String },
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Amount {
    pub number: Decimal,
    pub currency: String,
}

impl Amount {
    pub fn new(number: Decimal, currency: &str) -> Amount {
        Amount {
            number,
            currency: currency.to_string(),
        }
    }
}

impl std::ops::Neg for &Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        Amount {
            number: -self.number,
            currency: self.currency.clone(),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.number, self.currency)
    }
}

/// Metadata values as they come out of the ledger export.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Text(String),
    Number(Decimal),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(b) => write!(f, "{}", b),
            MetaValue::Text(s) => write!(f, "{}", s),
            MetaValue::Number(n) => write!(f, "{}", n),
        }
    }
}

pub type Meta = BTreeMap<String, MetaValue>;

/// Reads an integer-like flag. Absent keys are `false`.
fn meta_flag(meta: &Meta, entity: &str, key: &str) -> Result<bool, LedgerError> {
    let invalid = |value: &MetaValue| LedgerError::InvalidFlag {
        entity: entity.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    };

    match meta.get(key) {
        None => Ok(false),
        Some(MetaValue::Bool(b)) => Ok(*b),
        Some(MetaValue::Number(n)) => Ok(!n.trunc().is_zero()),
        Some(value @ MetaValue::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(|n| n != 0)
            .map_err(|_| invalid(value)),
    }
}

fn meta_text(meta: &Meta, entity: &str, key: &str) -> Result<String, LedgerError> {
    match meta.get(key) {
        Some(MetaValue::Text(s)) if !s.is_empty() => Ok(s.clone()),
        Some(MetaValue::Number(n)) => Ok(n.to_string()),
        _ => Err(LedgerError::MissingMeta {
            entity: entity.to_string(),
            key: key.to_string(),
        }),
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Open {
    pub date: NaiveDate,
    pub account: String,
    #[serde(default)]
    pub meta: Meta,
}

impl Open {
    /// Value is spent and cannot be recovered, e.g. prepaid rent.
    pub fn is_sunk(&self) -> Result<bool, LedgerError> {
        meta_flag(&self.meta, &self.account, "sunk")
    }

    /// Value exists but cannot be reallocated, e.g. a mandatory deposit.
    pub fn is_nondisposable(&self) -> Result<bool, LedgerError> {
        meta_flag(&self.meta, &self.account, "nondisposable")
    }

    pub fn name(&self) -> Result<String, LedgerError> {
        meta_text(&self.meta, &self.account, "name")
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Commodity {
    pub date: NaiveDate,
    pub currency: String,
    #[serde(default)]
    pub meta: Meta,
}

impl Commodity {
    pub fn required(&self, key: &str) -> Result<String, LedgerError> {
        meta_text(&self.meta, &self.currency, key)
    }

    pub fn optional(&self, key: &str) -> Option<String> {
        self.required(key).ok()
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Posting {
    pub account: String,
    pub units: Amount,
    /// Per-unit cost.
    #[serde(default)]
    pub cost: Option<Amount>,
    #[serde(default)]
    pub price: Option<Amount>,
}

impl Posting {
    pub fn new(account: &str, number: Decimal, currency: &str) -> Posting {
        Posting {
            account: account.to_string(),
            units: Amount::new(number, currency),
            cost: None,
            price: None,
        }
    }

    pub fn at_cost(mut self, number: Decimal, currency: &str) -> Posting {
        self.cost = Some(Amount::new(number, currency));
        self
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    #[serde(default = "default_flag")]
    pub flag: char,
    #[serde(default)]
    pub payee: Option<String>,
    #[serde(default)]
    pub narration: String,
    pub postings: Vec<Posting>,
    #[serde(default)]
    pub meta: Meta,
}

fn default_flag() -> char {
    '*'
}

impl Transaction {
    pub fn new(date: NaiveDate, narration: &str, postings: Vec<Posting>) -> Transaction {
        Transaction {
            date,
            flag: default_flag(),
            payee: None,
            narration: narration.to_string(),
            postings,
            meta: Meta::new(),
        }
    }

    pub fn touches_currency(&self, currency: &str) -> bool {
        self.postings.iter().any(|p| p.units.currency == currency)
    }
}

/// Renders the transaction in ledger text form.
impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.flag)?;
        if let Some(payee) = &self.payee {
            write!(f, " {:?}", payee)?;
        }
        writeln!(f, " {:?}", self.narration)?;
        for (key, value) in &self.meta {
            writeln!(f, "  {}: {:?}", key, value.to_string())?;
        }
        for posting in &self.postings {
            write!(f, "  {}  {}", posting.account, posting.units)?;
            if let Some(cost) = &posting.cost {
                write!(f, " {{{}}}", cost)?;
            }
            if let Some(price) = &posting.price {
                write!(f, " @ {}", price)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Price {
    pub date: NaiveDate,
    pub currency: String,
    pub amount: Amount,
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} price {} {}", self.date, self.currency, self.amount)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entry {
    Open(Open),
    Commodity(Commodity),
    Transaction(Transaction),
    Price(Price),
}

impl Entry {
    pub fn date(&self) -> NaiveDate {
        match self {
            Entry::Open(open) => open.date,
            Entry::Commodity(commodity) => commodity.date,
            Entry::Transaction(txn) => txn.date,
            Entry::Price(price) => price.date,
        }
    }
}
