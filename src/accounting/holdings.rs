use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::{Entry, LedgerError};

type Pair = (String, String);

/// Date-sorted rate series per (base, quote) pair.
#[derive(Clone, Debug, Default)]
pub struct PriceMap {
    series: HashMap<Pair, Vec<(NaiveDate, Decimal)>>,
}

impl PriceMap {
    /// Builds the map from price directives. One rate per date, the last one
    /// wins. Inverse pairs are derived unless declared explicitly.
    pub fn build(entries: &[Entry]) -> PriceMap {
        let mut explicit: HashMap<Pair, BTreeMap<NaiveDate, Decimal>> = HashMap::new();
        for entry in entries {
            if let Entry::Price(price) = entry {
                explicit
                    .entry((price.currency.clone(), price.amount.currency.clone()))
                    .or_default()
                    .insert(price.date, price.amount.number);
            }
        }

        let mut inverted: HashMap<Pair, BTreeMap<NaiveDate, Decimal>> = HashMap::new();
        for ((base, quote), rates) in &explicit {
            let inverse = (quote.clone(), base.clone());
            if explicit.contains_key(&inverse) {
                continue;
            }
            let inverse_rates = rates
                .iter()
                .filter(|(_, rate)| !rate.is_zero())
                .map(|(date, rate)| (*date, Decimal::ONE / *rate))
                .collect();
            inverted.insert(inverse, inverse_rates);
        }

        let series = explicit
            .into_iter()
            .chain(inverted)
            .map(|(pair, rates)| (pair, rates.into_iter().collect()))
            .collect();

        PriceMap { series }
    }

    pub fn history(&self, base: &str, quote: &str) -> Option<&[(NaiveDate, Decimal)]> {
        self.series
            .get(&(base.to_string(), quote.to_string()))
            .map(|rates| rates.as_slice())
    }

    /// Latest known rate. A currency against itself is always 1, undated.
    pub fn latest(&self, base: &str, quote: &str) -> Option<(Option<NaiveDate>, Decimal)> {
        if base == quote {
            return Some((None, Decimal::ONE));
        }
        self.history(base, quote)
            .and_then(|rates| rates.last())
            .map(|(date, rate)| (Some(*date), *rate))
    }

    /// Most recent rate dated on or before `date`.
    pub fn at(&self, base: &str, quote: &str, date: NaiveDate) -> Option<(Option<NaiveDate>, Decimal)> {
        if base == quote {
            return Some((None, Decimal::ONE));
        }
        let rates = self.history(base, quote)?;
        let end = rates.partition_point(|(d, _)| *d <= date);
        rates[..end].last().map(|(d, rate)| (Some(*d), *rate))
    }

    pub fn rate(&self, base: &str, quote: &str, date: Option<NaiveDate>) -> Result<Decimal, LedgerError> {
        let found = match date {
            Some(date) => self.at(base, quote, date),
            None => self.latest(base, quote),
        };
        found.map(|(_, rate)| rate).ok_or_else(|| LedgerError::MissingRate {
            base: base.to_string(),
            quote: quote.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Holding {
    pub account: String,
    pub currency: String,
    pub number: Decimal,
    pub cost_currency: String,
    /// Per-unit cost, absent for positions held without cost.
    pub cost_number: Option<Decimal>,
    pub book_value: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub price_number: Option<Decimal>,
    pub price_date: Option<NaiveDate>,
}

impl Holding {
    /// Re-expresses every value field in `target` using the latest rate.
    pub fn convert_to(self, target: &str, prices: &PriceMap) -> Result<Holding, LedgerError> {
        if self.cost_currency == target {
            return Ok(self);
        }
        let rate = prices.rate(&self.cost_currency, target, None)?;
        let scale = |value: Option<Decimal>| value.map(|v| v * rate);

        Ok(Holding {
            cost_currency: target.to_string(),
            cost_number: scale(self.cost_number),
            book_value: scale(self.book_value),
            market_value: scale(self.market_value),
            price_number: scale(self.price_number),
            ..self
        })
    }
}

/// Valuation of a set of ledger entries.
pub trait HoldingsProvider {
    /// Holdings of asset and liability accounts, valued in `target_currency`
    /// when one is given, together with the price index of `entries`.
    fn assets_holdings(
        &self,
        entries: &[Entry],
        target_currency: Option<&str>,
    ) -> Result<(Vec<Holding>, PriceMap), LedgerError>;
}

#[derive(Default)]
struct Position {
    number: Decimal,
    book: Decimal,
}

/// Sums postings into one position per (account, currency, cost currency).
/// Reductions of a position held at cost release book value at average cost.
pub struct InventoryHoldings {
    account_roots: Vec<String>,
}

impl Default for InventoryHoldings {
    fn default() -> Self {
        InventoryHoldings {
            account_roots: vec!["Assets:".to_string(), "Liabilities:".to_string()],
        }
    }
}

impl InventoryHoldings {
    pub fn new() -> InventoryHoldings {
        InventoryHoldings::default()
    }

    fn is_tracked(&self, account: &str) -> bool {
        self.account_roots.iter().any(|root| account.starts_with(root.as_str()))
    }

    fn positions(&self, entries: &[Entry]) -> BTreeMap<(String, String, Option<String>), Position> {
        let mut positions: BTreeMap<(String, String, Option<String>), Position> = BTreeMap::new();
        for entry in entries {
            let Entry::Transaction(txn) = entry else {
                continue;
            };
            for posting in txn.postings.iter().filter(|p| self.is_tracked(&p.account)) {
                let key = (
                    posting.account.clone(),
                    posting.units.currency.clone(),
                    posting.cost.as_ref().map(|cost| cost.currency.clone()),
                );
                let position = positions.entry(key).or_default();
                let units = posting.units.number;

                if let Some(cost) = &posting.cost {
                    let reducing = !position.number.is_zero()
                        && position.number.is_sign_negative() != units.is_sign_negative();
                    if reducing {
                        position.book += position.book / position.number * units;
                    } else {
                        position.book += units * cost.number;
                    }
                }
                position.number += units;
                if position.number.is_zero() {
                    position.book = Decimal::ZERO;
                }
            }
        }
        positions
    }
}

impl HoldingsProvider for InventoryHoldings {
    fn assets_holdings(
        &self,
        entries: &[Entry],
        target_currency: Option<&str>,
    ) -> Result<(Vec<Holding>, PriceMap), LedgerError> {
        let prices = PriceMap::build(entries);

        let mut holdings = Vec::new();
        for ((account, currency, cost_currency), position) in self.positions(entries) {
            if position.number.is_zero() {
                continue;
            }

            let holding = match cost_currency {
                Some(cost_currency) => {
                    let (price_date, price_number) = match prices.latest(&currency, &cost_currency) {
                        Some((date, price)) => (date, Some(price)),
                        None => (None, None),
                    };
                    Holding {
                        account,
                        number: position.number,
                        cost_number: Some(position.book / position.number),
                        book_value: Some(position.book),
                        market_value: price_number.map(|price| position.number * price),
                        price_number,
                        price_date,
                        currency,
                        cost_currency,
                    }
                }
                None => Holding {
                    account,
                    number: position.number,
                    cost_currency: currency.clone(),
                    cost_number: None,
                    book_value: Some(position.number),
                    market_value: Some(position.number),
                    price_number: None,
                    price_date: None,
                    currency,
                },
            };

            holdings.push(match target_currency {
                Some(target) => holding.convert_to(target, &prices)?,
                None => holding,
            });
        }

        Ok((holdings, prices))
    }
}
