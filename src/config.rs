//! Settings shared by every command.
//!
//! Settings are read from an optional JSON file. Every field has a default,
//! so a file only needs to list what differs, e.g.
//!
//! ```json
//! { "target_currency": "USD", "networth": { "strict_checks": false } }
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::accounting::categorizer::CategoryRule;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Currency every report is valued in.
    pub target_currency: String,
    /// Pseudo-currency used to track time, never valued.
    pub time_currency: String,
    pub accounts: AccountPrefixes,
    pub networth: NetworthSettings,
    pub portfolio: PortfolioSettings,
    pub categorizer: CategorizerSettings,
    pub statement: StatementSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            target_currency: "CNY".to_string(),
            time_currency: "DAY".to_string(),
            accounts: AccountPrefixes::default(),
            networth: NetworthSettings::default(),
            portfolio: PortfolioSettings::default(),
            categorizer: CategorizerSettings::default(),
            statement: StatementSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Reading settings file: {}", path.display()))?;
        let settings = serde_json::from_str(&raw)
            .with_context(|| format!("Parsing settings JSON in {}", path.display()))?;
        Ok(settings)
    }

    /// Defaults when no path is given.
    pub fn load_optional(path: Option<&Path>) -> Result<Settings> {
        match path {
            Some(path) => Settings::load(path),
            None => Ok(Settings::default()),
        }
    }
}

/// Account namespaces that separate cash flows from investment results.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AccountPrefixes {
    pub expenses: String,
    pub expenses_trade: String,
    pub prepayments: String,
    pub income: String,
    pub income_trade: String,
}

impl Default for AccountPrefixes {
    fn default() -> Self {
        AccountPrefixes {
            expenses: "Expenses:".to_string(),
            expenses_trade: "Expenses:Trade:".to_string(),
            prepayments: "Assets:PrePayments".to_string(),
            income: "Income:".to_string(),
            income_trade: "Income:Trade:".to_string(),
        }
    }
}

impl AccountPrefixes {
    pub fn is_non_trade_expense(&self, account: &str) -> bool {
        (account.starts_with(&self.expenses) && !account.starts_with(&self.expenses_trade))
            || account.starts_with(&self.prepayments)
    }

    pub fn is_non_trade_income(&self, account: &str) -> bool {
        account.starts_with(&self.income) && !account.starts_with(&self.income_trade)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NetworthSettings {
    /// Closed set of `asset-class` tags, in report column order.
    pub known_asset_classes: Vec<String>,
    pub weekend_pnl_tolerance: Decimal,
    /// Fail on consistency check violations instead of logging them.
    pub strict_checks: bool,
}

impl Default for NetworthSettings {
    fn default() -> Self {
        NetworthSettings {
            known_asset_classes: ["equity", "alternative", "fixed-income", "cash"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            weekend_pnl_tolerance: dec!(0.01),
            strict_checks: true,
        }
    }
}

/// What the portfolio snapshot does with a flagged holding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldingPolicy {
    /// Leave it out, with a warning.
    #[default]
    Exclude,
    /// Keep it in its own row and show the flag.
    Mark,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PortfolioSettings {
    /// Asset classes from least to most risky.
    pub asset_class_ranking: Vec<String>,
    /// Asset subclasses from least to most risky.
    pub asset_subclass_ranking: Vec<String>,
    pub sunk_holdings: HoldingPolicy,
    pub nondisposable_holdings: HoldingPolicy,
}

impl Default for PortfolioSettings {
    fn default() -> Self {
        let to_strings =
            |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        PortfolioSettings {
            asset_class_ranking: to_strings(&["cash", "fixed-income", "fund", "equity", "alternative"]),
            asset_subclass_ranking: to_strings(&[
                "domestic-currency",
                "foreign-currency",
                "bond-fund",
                "convertible-bond",
                "index-fund",
                "balanced-fund",
                "equity-fund",
                "cn-equity",
                "hk-equity",
                "us-equity",
                "precious-metal",
                "crypto",
            ]),
            sunk_holdings: HoldingPolicy::Exclude,
            nondisposable_holdings: HoldingPolicy::Exclude,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CategorizerSettings {
    /// Evaluated in order, first match wins.
    pub rules: Vec<CategoryRule>,
    pub default_category: String,
    pub repayment_keyword: String,
    pub repayment_account: String,
    pub cashback_keyword: String,
    pub review_suffix: String,
}

impl Default for CategorizerSettings {
    fn default() -> Self {
        let rule = |keywords: &[&str], category: &str| CategoryRule {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            category: category.to_string(),
        };
        CategorizerSettings {
            rules: vec![
                rule(&["滴滴", "嘀嘀", "天津舒行科技", "CAB"], "Transport:Taxi"),
                rule(&["药房", "医院", "医药", "DRUG"], "Health:Drugs"),
                rule(&["交通卡", "地铁", "摩拜"], "Transport:Public"),
                rule(&["铁路", "上铁"], "Leisure:Train"),
                rule(&["联合网络", "中国移动"], "Comm:PhonePlan"),
                rule(&["宽带", "VPS", "Hosting"], "Comm:Internet"),
                rule(&["顺丰"], "Comm:Express"),
                rule(&["全家", "便利", "果品", "果业", "生鲜", "水果"], "Food:FruitSnacks"),
                rule(
                    &["餐厅", "包子铺", "名吃", "小吃", "餐饮", "面馆", "盒马", "豆浆"],
                    "Food:Meals",
                ),
                rule(&["优衣库"], "Clothes:Clothes"),
                rule(&["发型", "美发"], "Health:HairCutting"),
                rule(&["AVIATION", "航空"], "Leisure:Aviation"),
                rule(&["日上"], "Leisure:Souvenir"),
                rule(&["Smart2Pay B.V."], "Leisure:Gaming"),
                rule(&["京东", "宜家"], "Home:Groceries"),
                rule(&["电力公司"], "Home:Utilities"),
                rule(&["Spotify"], "Leisure:Media"),
            ],
            default_category: "TODO".to_string(),
            repayment_keyword: "还款".to_string(),
            repayment_account: "Assets:CN:Saving:CMB:CNY".to_string(),
            cashback_keyword: "返现".to_string(),
            review_suffix: " TODO".to_string(),
        }
    }
}

/// The credit-card statement the importer reads.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StatementSettings {
    pub account: String,
    pub currency: String,
}

impl Default for StatementSettings {
    fn default() -> Self {
        StatementSettings {
            account: "Liabilities:CN:CreditCard:SPDB".to_string(),
            currency: "CNY".to_string(),
        }
    }
}
