use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use super::{Posting, Transaction};
use crate::config::CategorizerSettings;

#[derive(Debug, PartialEq, Error)]
pub enum CategorizeError {
    #[error("expected exactly one posting, found {count} in `{narration}'")]
    PostingCount { count: usize, narration: String },
}

/// Narrations containing any of `keywords` belong to `category`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CategoryRule {
    pub keywords: Vec<String>,
    pub category: String,
}

/// Balances single-posting statement transactions.
pub struct Categorizer<'s> {
    settings: &'s CategorizerSettings,
}

impl<'s> Categorizer<'s> {
    pub fn new(settings: &'s CategorizerSettings) -> Categorizer<'s> {
        Categorizer { settings }
    }

    /// First rule with a keyword found in `narration`, in table order.
    pub fn category(&self, narration: &str) -> &str {
        self.settings
            .rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|kw| narration.contains(kw.as_str())))
            .map(|rule| rule.category.as_str())
            .unwrap_or(self.settings.default_category.as_str())
    }

    /// Appends the offsetting posting. Spending (negative units) goes to an
    /// expense category; money coming back is either a repayment into the
    /// savings account or an income to review.
    pub fn categorize(&self, mut txn: Transaction) -> Result<Transaction, CategorizeError> {
        if txn.postings.len() != 1 {
            return Err(CategorizeError::PostingCount {
                count: txn.postings.len(),
                narration: txn.narration,
            });
        }

        let posting = &txn.postings[0];
        let number = posting.units.number;

        let account = if number < Decimal::ZERO {
            format!("Expenses:{}", self.category(&txn.narration))
        } else if number > Decimal::ZERO {
            if txn.narration.contains(self.settings.repayment_keyword.as_str()) {
                self.settings.repayment_account.clone()
            } else {
                if !txn.narration.contains(self.settings.cashback_keyword.as_str()) {
                    txn.narration.push_str(&self.settings.review_suffix);
                }
                posting.account.replace("Liabilities", "Income")
            }
        } else {
            warn!("zero amount, left as is: {}", txn.narration);
            return Ok(txn);
        };

        debug!("{} -> {}", txn.narration, account);
        let offset = Posting {
            account,
            units: -&posting.units,
            ..posting.clone()
        };
        txn.postings.push(offset);

        Ok(txn)
    }
}
