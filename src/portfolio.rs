use chrono::{Duration, NaiveDate};
use getset::{CopyGetters, Getters};
use indexmap::IndexMap;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::accounting::holdings::HoldingsProvider;
use crate::accounting::ledger::Ledger;
use crate::accounting::LedgerError;
use crate::config::{HoldingPolicy, Settings};

/// Look-back horizons of the price change columns, in days.
pub const HORIZONS: [i64; 4] = [1, 2, 7, 30];

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("asset class `{class}' / subclass `{subclass}' has no risk rank")]
    Unranked { class: String, subclass: String },
    #[error("no price for {0}")]
    MissingPrice(String),
    #[error("total disposable value is zero")]
    ZeroTotal,
}

#[derive(Clone, Debug, PartialEq, Getters, CopyGetters)]
pub struct PortfolioRow {
    #[getset(get = "pub")]
    asset_class: String,
    #[getset(get = "pub")]
    asset_subclass: String,
    #[getset(get = "pub")]
    name: String,
    #[getset(get = "pub")]
    symbol: String,
    #[getset(get_copy = "pub")]
    quantity: Decimal,
    #[getset(get_copy = "pub")]
    price: Decimal,
    /// Absent for cash, which is its own price.
    #[getset(get_copy = "pub")]
    price_date: Option<NaiveDate>,
    /// Currency the holding is priced in.
    #[getset(get = "pub")]
    currency: String,
    /// Market value in the target currency.
    #[getset(get_copy = "pub")]
    value: Decimal,
    /// Percentage, absent when nothing was paid for the position.
    #[getset(get_copy = "pub")]
    pnl: Option<Decimal>,
    /// Fractional price change per entry of [`HORIZONS`].
    #[getset(get = "pub")]
    changes: [Option<Decimal>; 4],
    #[getset(get = "pub")]
    flags: Vec<&'static str>,
    /// Percentage of the total disposable value.
    #[getset(get_copy = "pub")]
    share: Decimal,
}

impl PortfolioRow {
    /// Market value in the holding's own currency.
    pub fn market_value(&self) -> Decimal {
        self.price * self.quantity
    }
}

#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct Snapshot {
    #[getset(get_copy = "pub")]
    date: NaiveDate,
    #[getset(get = "pub")]
    rows: Vec<PortfolioRow>,
    /// Sum of the values of unflagged rows.
    #[getset(get_copy = "pub")]
    total: Decimal,
}

struct Member {
    account_name: String,
    quantity: Decimal,
    book_value: Option<Decimal>,
    market_value: Option<Decimal>,
}

struct Group {
    name: String,
    asset_class: String,
    asset_subclass: String,
    currency: String,
    price: Option<Decimal>,
    price_date: Option<NaiveDate>,
    rate: Decimal,
    changes: [Option<Decimal>; 4],
    flags: Vec<&'static str>,
    members: Vec<Member>,
}

/// `latest / base - 1`, where base is the last price at least `days` old.
fn price_change(history: &[(NaiveDate, Decimal)], as_of: NaiveDate, days: i64) -> Option<Decimal> {
    if history.len() < days as usize {
        return None;
    }
    let (_, latest) = history.last()?;
    let base_date = as_of - Duration::days(days);
    let (_, base) = history.iter().filter(|(date, _)| *date <= base_date).last()?;
    latest.checked_div(*base).map(|ratio| ratio - Decimal::ONE)
}

pub struct SnapshotBuilder<'a, P> {
    ledger: &'a Ledger,
    provider: &'a P,
    settings: &'a Settings,
}

impl<'a, P: HoldingsProvider> SnapshotBuilder<'a, P> {
    pub fn new(ledger: &'a Ledger, provider: &'a P, settings: &'a Settings) -> SnapshotBuilder<'a, P> {
        SnapshotBuilder {
            ledger,
            provider,
            settings,
        }
    }

    fn rank(&self, class: &str, subclass: &str) -> Result<usize, PortfolioError> {
        let ranking = &self.settings.portfolio;
        let class_index = ranking.asset_class_ranking.iter().position(|c| c == class);
        let subclass_index = ranking.asset_subclass_ranking.iter().position(|s| s == subclass);
        match (class_index, subclass_index) {
            (Some(ci), Some(si)) => Ok((1 + ci) * 100 + si),
            _ => Err(PortfolioError::Unranked {
                class: class.to_string(),
                subclass: subclass.to_string(),
            }),
        }
    }

    fn groups(&self, as_of: NaiveDate) -> Result<IndexMap<(String, bool, bool), Group>, PortfolioError> {
        let settings = self.settings;
        let target = settings.target_currency.as_str();
        let (holdings, prices) = self.provider.assets_holdings(self.ledger.entries_to(as_of), None)?;

        let mut groups: IndexMap<(String, bool, bool), Group> = IndexMap::new();
        for holding in holdings {
            if holding.currency == settings.time_currency {
                continue;
            }

            let account = self.ledger.account(&holding.account)?;
            let commodity = self.ledger.commodity(&holding.currency)?;

            let sunk = account.is_sunk()?;
            let nondisposable = account.is_nondisposable()?;
            let mut flags = Vec::new();
            if sunk {
                flags.push("sunk");
            }
            if nondisposable {
                flags.push("nondisposable");
            }
            let excluded = (sunk && settings.portfolio.sunk_holdings == HoldingPolicy::Exclude)
                || (nondisposable && settings.portfolio.nondisposable_holdings == HoldingPolicy::Exclude);
            if excluded {
                warn!("{} is {}, ignored", holding.account, flags.join(" and "));
                continue;
            }

            let name = commodity.required("name")?;
            let asset_class = commodity.required("asset-class")?;
            let asset_subclass = commodity.required("asset-subclass")?;
            let account_name = account.name()?;

            let (price, price_date) = match holding.price_number {
                None if holding.currency == holding.cost_currency => (Some(Decimal::ONE), None),
                price => (price, holding.price_date),
            };
            let rate = prices.rate(&holding.cost_currency, target, None)?;

            let mut member = Member {
                account_name,
                quantity: holding.number,
                book_value: None,
                market_value: None,
            };
            let mut changes = [None; 4];
            if let (Some(history), Some(_)) = (
                prices.history(&holding.currency, &holding.cost_currency),
                holding.cost_number,
            ) {
                member.book_value = holding.book_value;
                member.market_value = holding.market_value;
                for (change, days) in changes.iter_mut().zip(HORIZONS) {
                    *change = price_change(history, as_of, days);
                }
            }

            let key = (holding.currency.clone(), nondisposable, sunk);
            groups
                .entry(key)
                .or_insert_with(|| Group {
                    name,
                    asset_class,
                    asset_subclass,
                    currency: holding.cost_currency.clone(),
                    price,
                    price_date,
                    rate,
                    changes,
                    flags,
                    members: Vec::new(),
                })
                .members
                .push(member);
        }

        Ok(groups)
    }

    pub fn build(&self, as_of: NaiveDate) -> Result<Snapshot, PortfolioError> {
        let groups = self.groups(as_of)?;

        let mut ranked = Vec::with_capacity(groups.len());
        for ((symbol, _, _), group) in groups {
            let mut by_account: IndexMap<&str, Decimal> = IndexMap::new();
            let mut book = Decimal::ZERO;
            let mut market = Decimal::ZERO;
            for member in &group.members {
                *by_account.entry(member.account_name.as_str()).or_default() += member.quantity;
                if let (Some(b), Some(m)) = (member.book_value, member.market_value) {
                    book += b;
                    market += m;
                }
            }
            debug!("{}: {:?}", symbol, by_account);

            let quantity: Decimal = by_account.values().sum();
            let pnl = market
                .checked_div(book)
                .map(|ratio| (ratio - Decimal::ONE) * dec!(100));
            let price = group
                .price
                .ok_or_else(|| PortfolioError::MissingPrice(symbol.clone()))?;

            let rank = self.rank(&group.asset_class, &group.asset_subclass)?;
            ranked.push((
                rank,
                PortfolioRow {
                    asset_class: group.asset_class,
                    asset_subclass: group.asset_subclass,
                    name: group.name,
                    symbol,
                    quantity,
                    price,
                    price_date: group.price_date,
                    currency: group.currency,
                    value: group.rate * price * quantity,
                    pnl,
                    changes: group.changes,
                    flags: group.flags,
                    share: Decimal::ZERO,
                },
            ));
        }

        // Stable, ties keep ledger order.
        ranked.sort_by_key(|(rank, _)| *rank);
        let mut rows: Vec<PortfolioRow> = ranked.into_iter().map(|(_, row)| row).collect();

        let total: Decimal = rows
            .iter()
            .filter(|row| row.flags.is_empty())
            .map(|row| row.value)
            .sum();
        for row in rows.iter_mut() {
            row.share = (dec!(100) * row.value)
                .checked_div(total)
                .ok_or(PortfolioError::ZeroTotal)?;
        }

        info!(
            "As of {}, disposable value={} {}",
            as_of,
            total.round(),
            self.settings.target_currency
        );

        Ok(Snapshot {
            date: as_of,
            rows,
            total,
        })
    }
}
