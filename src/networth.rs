//! Daily P&L is what net worth moved by once cash flows are taken out:
//!
//! ```text
//! pnl  = networth - non_trade_income + non_trade_expenses - prev_networth
//! rate = pnl / prev_disposable_networth
//! nav *= 1 + rate
//! ```

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};
use getset::{CopyGetters, Getters};
use log::{debug, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::accounting::holdings::HoldingsProvider;
use crate::accounting::ledger::Ledger;
use crate::accounting::LedgerError;
use crate::config::{NetworthSettings, Settings};

#[derive(Debug, Error)]
pub enum NetworthError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("disposable net worth is zero on {0}")]
    ZeroDisposable(NaiveDate),
    #[error("P&L of {pnl} on {date}, a weekend")]
    WeekendPnl { date: NaiveDate, pnl: Decimal },
    #[error("asset classes add up to {sum} but disposable net worth is {total} on {date}")]
    AssetClassMismatch {
        date: NaiveDate,
        sum: Decimal,
        total: Decimal,
    },
    #[error("unknown asset class `{class}' on {date}")]
    UnknownAssetClass { date: NaiveDate, class: String },
}

/// Valuation of a single day, in the target currency.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DayAggregates {
    pub date: NaiveDate,
    /// Everything on the books, sunk assets included.
    pub raw_networth: Decimal,
    pub networth: Decimal,
    pub disposable_networth: Decimal,
    pub by_asset_class: BTreeMap<String, Decimal>,
    pub non_trade_income: Decimal,
    pub non_trade_expenses: Decimal,
}

/// State handed from one day to the next.
#[derive(Clone, Debug, PartialEq)]
pub struct Carry {
    pub prev_networth: Option<Decimal>,
    pub prev_disposable_networth: Option<Decimal>,
    pub nav: Decimal,
    pub nav_ytd: Decimal,
    pub cum_pnl: Decimal,
    pub cum_pnl_ytd: Decimal,
}

impl Default for Carry {
    fn default() -> Self {
        Carry {
            prev_networth: None,
            prev_disposable_networth: None,
            nav: dec!(1.0),
            nav_ytd: dec!(1.0),
            cum_pnl: Decimal::ZERO,
            cum_pnl_ytd: Decimal::ZERO,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Getters, CopyGetters)]
pub struct DailyStatus {
    #[getset(get_copy = "pub")]
    date: NaiveDate,
    #[getset(get_copy = "pub")]
    raw_networth: Decimal,
    #[getset(get_copy = "pub")]
    networth: Decimal,
    #[getset(get_copy = "pub")]
    disposable_networth: Decimal,
    #[getset(get_copy = "pub")]
    non_trade_income: Decimal,
    #[getset(get_copy = "pub")]
    non_trade_expenses: Decimal,
    /// Absent on the first day of a series.
    #[getset(get_copy = "pub")]
    pnl: Option<Decimal>,
    /// Fraction of the previous day's disposable net worth.
    #[getset(get_copy = "pub")]
    pnl_rate: Option<Decimal>,
    #[getset(get_copy = "pub")]
    nav: Decimal,
    #[getset(get_copy = "pub")]
    cum_pnl: Decimal,
    #[getset(get_copy = "pub")]
    nav_ytd: Decimal,
    #[getset(get_copy = "pub")]
    cum_pnl_ytd: Decimal,
    /// Percentage of disposable net worth per known asset class.
    #[getset(get = "pub")]
    asset_class_shares: Vec<(String, Decimal)>,
}

impl DailyStatus {
    pub fn sunk(&self) -> Decimal {
        self.raw_networth - self.networth
    }
}

/// Values the ledger as of `date`.
pub fn aggregate_day<P: HoldingsProvider>(
    ledger: &Ledger,
    provider: &P,
    settings: &Settings,
    date: NaiveDate,
) -> Result<DayAggregates, NetworthError> {
    let target = settings.target_currency.as_str();
    // Converted one by one below, the time pseudo-currency has no rate.
    let (holdings, prices) = provider.assets_holdings(ledger.entries_to(date), None)?;

    let mut day = DayAggregates {
        date,
        ..DayAggregates::default()
    };

    for holding in holdings {
        if holding.currency == settings.time_currency {
            continue;
        }
        let holding = holding.convert_to(target, &prices)?;

        let account = ledger.account(&holding.account)?;
        let commodity = ledger.commodity(&holding.currency)?;
        let value = holding.market_value.ok_or_else(|| LedgerError::MissingMarketValue {
            account: holding.account.clone(),
            currency: holding.currency.clone(),
        })?;

        day.raw_networth += value;
        if account.is_sunk()? {
            continue;
        }

        if !account.is_nondisposable()? {
            day.disposable_networth += value;
            *day.by_asset_class
                .entry(commodity.required("asset-class")?)
                .or_default() += value;
        }
        day.networth += value;
    }

    for txn in ledger.transactions_on(date) {
        if txn.touches_currency(&settings.time_currency) {
            continue;
        }

        for posting in &txn.postings {
            let is_expense = settings.accounts.is_non_trade_expense(&posting.account);
            let is_income = settings.accounts.is_non_trade_income(&posting.account);
            if !is_expense && !is_income {
                continue;
            }

            let rate = prices.rate(&posting.units.currency, target, Some(date))?;
            if is_expense {
                day.non_trade_expenses += posting.units.number * rate;
            } else {
                // Income postings are negative.
                day.non_trade_income -= posting.units.number * rate;
            }
        }
    }

    debug!(
        "{}: networth={} disposable={} income={} expenses={}",
        date, day.networth, day.disposable_networth, day.non_trade_income, day.non_trade_expenses
    );

    Ok(day)
}

fn check(settings: &NetworthSettings, err: NetworthError) -> Result<(), NetworthError> {
    if settings.strict_checks {
        Err(err)
    } else {
        warn!("{}", err);
        Ok(())
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Folds one day into the carried state.
pub fn advance(
    settings: &NetworthSettings,
    prior: &Carry,
    today: &DayAggregates,
) -> Result<(Carry, DailyStatus), NetworthError> {
    let date = today.date;
    let mut carry = prior.clone();

    let (pnl, pnl_rate) = match (prior.prev_networth, prior.prev_disposable_networth) {
        (Some(prev_networth), Some(prev_disposable)) => {
            let pnl = today.networth - today.non_trade_income + today.non_trade_expenses
                - prev_networth;
            let rate = pnl
                .checked_div(prev_disposable)
                .ok_or(NetworthError::ZeroDisposable(date))?;
            carry.nav *= Decimal::ONE + rate;
            carry.nav_ytd *= Decimal::ONE + rate;
            carry.cum_pnl += pnl;
            carry.cum_pnl_ytd += pnl;
            (Some(pnl), Some(rate))
        }
        _ => (None, None),
    };

    if let Some(pnl) = pnl {
        if is_weekend(date) && pnl > settings.weekend_pnl_tolerance {
            check(settings, NetworthError::WeekendPnl { date, pnl })?;
        }
    }

    let sum: Decimal = today.by_asset_class.values().sum();
    if (sum - today.disposable_networth).abs() >= Decimal::ONE {
        check(
            settings,
            NetworthError::AssetClassMismatch {
                date,
                sum,
                total: today.disposable_networth,
            },
        )?;
    }

    for class in today.by_asset_class.keys() {
        if !settings.known_asset_classes.contains(class) {
            check(
                settings,
                NetworthError::UnknownAssetClass {
                    date,
                    class: class.clone(),
                },
            )?;
        }
    }

    let mut asset_class_shares = Vec::with_capacity(settings.known_asset_classes.len());
    for class in &settings.known_asset_classes {
        let value = today.by_asset_class.get(class).copied().unwrap_or_default();
        let share = (dec!(100) * value)
            .checked_div(today.disposable_networth)
            .ok_or(NetworthError::ZeroDisposable(date))?;
        asset_class_shares.push((class.clone(), share));
    }

    let status = DailyStatus {
        date,
        raw_networth: today.raw_networth,
        networth: today.networth,
        disposable_networth: today.disposable_networth,
        non_trade_income: today.non_trade_income,
        non_trade_expenses: today.non_trade_expenses,
        pnl,
        pnl_rate,
        nav: carry.nav,
        cum_pnl: carry.cum_pnl,
        nav_ytd: carry.nav_ytd,
        cum_pnl_ytd: carry.cum_pnl_ytd,
        asset_class_shares,
    };

    let year_ends = date.succ_opt().map_or(true, |next| next.year() != date.year());
    if year_ends {
        carry.nav_ytd = dec!(1.0);
        carry.cum_pnl_ytd = Decimal::ZERO;
    }
    carry.prev_networth = Some(today.networth);
    carry.prev_disposable_networth = Some(today.disposable_networth);

    Ok((carry, status))
}

/// Walks `[since, until]` one day at a time.
pub struct SeriesCalculator<'a, P> {
    ledger: &'a Ledger,
    provider: &'a P,
    settings: &'a Settings,
}

impl<'a, P: HoldingsProvider> SeriesCalculator<'a, P> {
    pub fn new(ledger: &'a Ledger, provider: &'a P, settings: &'a Settings) -> SeriesCalculator<'a, P> {
        SeriesCalculator {
            ledger,
            provider,
            settings,
        }
    }

    pub fn aggregates(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<DayAggregates>, NetworthError> {
        since
            .iter_days()
            .take_while(|date| *date <= until)
            .map(|date| aggregate_day(self.ledger, self.provider, self.settings, date))
            .collect()
    }

    pub fn compute(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<DailyStatus>, NetworthError> {
        let aggregates = self.aggregates(since, until)?;

        let mut carry = Carry::default();
        let mut series = Vec::with_capacity(aggregates.len());
        for day in &aggregates {
            let (next, status) = advance(&self.settings.networth, &carry, day)?;
            series.push(status);
            carry = next;
        }

        Ok(series)
    }
}
