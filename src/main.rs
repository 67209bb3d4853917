use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, Local, NaiveDate};
use clap::{Parser, Subcommand};
use log::info;

use ledgerfolio::accounting::holdings::InventoryHoldings;
use ledgerfolio::accounting::ledger::Ledger;
use ledgerfolio::config::Settings;
use ledgerfolio::data::{self, Row};
use ledgerfolio::networth::SeriesCalculator;
use ledgerfolio::portfolio::SnapshotBuilder;
use ledgerfolio::prices;
use ledgerfolio::sources::{PriceSource, Source};

#[derive(Parser, Debug)]
#[command(name = "ledgerfolio", about = "Net worth, portfolio and price tooling for a double-entry ledger.")]
struct Cli {
    /// JSON export of the ledger entries
    #[arg(long, global = true, env = "LEDGERFOLIO_LEDGER")]
    ledger: Option<PathBuf>,

    /// JSON settings file, defaults apply when absent
    #[arg(long, global = true, env = "LEDGERFOLIO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Daily net worth, P&L and NAV as CSV
    Networth {
        /// First day, defaults to January 1st of this year
        #[arg(short, long)]
        since: Option<NaiveDate>,
        /// Last day, defaults to today
        #[arg(long)]
        until: Option<NaiveDate>,
        /// Append empty rows up to the end of the year
        #[arg(long, overrides_with = "no_padding")]
        padding: bool,
        #[arg(long, overrides_with = "padding")]
        no_padding: bool,
        /// One line per column
        #[arg(long, overrides_with = "no_transpose")]
        transpose: bool,
        #[arg(long, overrides_with = "transpose")]
        no_transpose: bool,
    },
    /// Holdings snapshot as CSV
    Portfolio {
        /// Snapshot date, defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Categorize a credit-card statement into ledger transactions
    Import {
        /// Statement CSV
        statement: PathBuf,
    },
    /// Fetch a single price
    Price {
        /// eastmoney, exchangeratesapi or xueqiu
        source: String,
        ticker: String,
        /// Historical price date, latest when absent
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Fetch the prices missing from the prices file
    UpdatePrices {
        /// Prices file the new lines are meant for
        #[arg(long)]
        prices: PathBuf,
        /// Last day to fetch, defaults to yesterday
        #[arg(long)]
        until: Option<NaiveDate>,
    },
}

fn load_ledger(path: Option<&Path>) -> Result<Ledger> {
    let path = path.context("No ledger given, use --ledger or LEDGERFOLIO_LEDGER")?;
    Ledger::load(path).with_context(|| format!("Loading ledger {}", path.display()))
}

fn networth(
    ledger: &Ledger,
    settings: &Settings,
    since: NaiveDate,
    until: NaiveDate,
    padding: bool,
    transpose: bool,
) -> Result<()> {
    let provider = InventoryHoldings::new();
    let series = SeriesCalculator::new(ledger, &provider, settings).compute(since, until)?;

    let mut rows: Vec<Row> = series.iter().map(Row::from).collect();
    if padding {
        if let Some(last) = series.last() {
            data::pad_to_year_end(&mut rows, last.date());
        }
    }
    data::write_csv(&rows, transpose, io::stdout().lock())?;

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::load_optional(cli.config.as_deref())?;
    let today = Local::now().date_naive();

    match cli.command {
        Command::Networth {
            since,
            until,
            padding,
            no_padding,
            transpose,
            no_transpose,
        } => {
            let ledger = load_ledger(cli.ledger.as_deref())?;
            let since = match since {
                Some(since) => since,
                None => NaiveDate::from_ymd_opt(today.year(), 1, 1).context("Invalid start of year")?,
            };
            networth(
                &ledger,
                &settings,
                since,
                until.unwrap_or(today),
                padding && !no_padding,
                transpose && !no_transpose,
            )?;
        }
        Command::Portfolio { date } => {
            let ledger = load_ledger(cli.ledger.as_deref())?;
            let provider = InventoryHoldings::new();
            let snapshot = SnapshotBuilder::new(&ledger, &provider, &settings).build(date.unwrap_or(today))?;
            data::write_csv(&data::portfolio_rows(&snapshot), false, io::stdout().lock())?;
        }
        Command::Import { statement } => {
            let file = File::open(&statement).with_context(|| format!("Opening statement {}", statement.display()))?;
            let transactions = data::import_statement(file, &settings)
                .with_context(|| format!("Importing statement {}", statement.display()))?;
            info!("{} transactions imported", transactions.len());
            for txn in &transactions {
                println!("{}", txn);
            }
        }
        Command::Price { source, ticker, date } => {
            let source = Source::from_name(&source)?;
            let price = match date {
                Some(date) => source.historical_price(&ticker, date)?,
                None => source.latest_price(&ticker)?,
            };
            info!("{} traded at {}", ticker, price.time);
            println!(
                "{} price {} {} {}",
                price.time.date_naive(),
                ticker,
                price.price,
                price.quote_currency
            );
        }
        Command::UpdatePrices { prices: path, until } => {
            let ledger = load_ledger(cli.ledger.as_deref())?;
            let until = until.unwrap_or(today - Duration::days(1));
            let plan = prices::plan_updates(&ledger, &path, until)
                .with_context(|| format!("Planning price updates for {}", path.display()))?;
            for price in prices::fetch_updates(&plan, Source::from_name)? {
                println!("{}", price);
            }
        }
    }

    Ok(())
}
