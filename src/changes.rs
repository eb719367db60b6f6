use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::schema::{CategoryMap, FinancialDocument};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Money moved into (positive) or out of (negative) savings and each category.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Split {
    pub save: f64,
    pub categories: CategoryMap,
}

impl Split {
    pub fn new<I, S>(save: f64, categories: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            save,
            categories: categories
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }

    pub fn to_save(amount: f64) -> Self {
        Self {
            save: amount,
            categories: CategoryMap::new(),
        }
    }

    pub fn total(&self) -> f64 {
        self.save + self.categories.values().sum::<f64>()
    }

    pub fn category(&self, name: &str) -> f64 {
        self.categories.get(name).copied().unwrap_or(0.0)
    }

    /// Fails with the expected total when the split does not add up to `expected`.
    pub fn ensure_total(&self, expected: f64, tolerance: f64) -> Result<()> {
        let actual = self.total();
        if (actual - expected).abs() > tolerance {
            return Err(LedgerError::InvalidSplit {
                expected,
                actual,
                month: None,
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_categories_exist(&self, document: &FinancialDocument) -> Result<()> {
        for name in self.categories.keys() {
            document.category(name)?;
        }
        Ok(())
    }

    /// Adds `save` to planned savings and the category parts to the bonus overlays.
    pub(crate) fn add_to_bonus(&self, document: &mut FinancialDocument, months: Range<usize>) {
        for month in months {
            let record = document.record_mut(month);
            record.savings += self.save;
            for (name, delta) in &self.categories {
                *record.bonus.entry(name.clone()).or_insert(0.0) += delta;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeScope {
    #[schemars(description = "Only the start month.")]
    Month,
    #[schemars(description = "The start month and every later month.")]
    Future,
    #[schemars(
        description = "The start month and every later month; a delete removes the obligation entirely."
    )]
    Forever,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChangeIntent {
    SetAmount { amount: f64 },
    Delete,
}

/// A not-yet-committed edit to one fixed obligation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PendingChange {
    pub obligation_id: u64,
    pub start_month: usize,
    pub scope: ChangeScope,
    pub intent: ChangeIntent,
    #[serde(default)]
    pub split: Split,
}

impl PendingChange {
    fn new_amount(&self) -> f64 {
        match self.intent {
            ChangeIntent::SetAmount { amount } => amount,
            ChangeIntent::Delete => 0.0,
        }
    }

    /// Months that receive the split.
    pub fn split_range(&self, horizon: usize) -> Range<usize> {
        match self.scope {
            ChangeScope::Month => self.start_month..(self.start_month + 1).min(horizon),
            ChangeScope::Future | ChangeScope::Forever => self.start_month..horizon,
        }
    }

    /// Amount freed (positive) or newly required (negative) at the start month.
    pub fn freed_amount(&self, document: &FinancialDocument) -> Result<f64> {
        let current = document
            .obligation(self.obligation_id)?
            .amount(self.start_month);
        Ok(current - self.new_amount())
    }

    /// Checks that the split redistributes exactly the freed or required amount in every month
    /// it is added to. A `Forever` delete also drops the months before the start, which receive
    /// nothing, so those must carry no amount.
    pub fn check_split(&self, document: &FinancialDocument, config: &LedgerConfig) -> Result<()> {
        let obligation = document.obligation(self.obligation_id)?;
        let horizon = document.horizon;
        let actual = self.split.total();

        if matches!((self.scope, &self.intent), (ChangeScope::Forever, ChangeIntent::Delete)) {
            let unfunded = (0..self.start_month.min(horizon))
                .find(|&month| obligation.amount(month).abs() > config.balance_tolerance);
            if let Some(month) = unfunded {
                return Err(LedgerError::InvalidSplit {
                    expected: obligation.amount(month),
                    actual: 0.0,
                    month: Some(month),
                });
            }
        }

        let new_amount = self.new_amount();
        for month in self.split_range(horizon) {
            let expected = obligation.amount(month) - new_amount;
            if (actual - expected).abs() > config.balance_tolerance {
                debug!(
                    "Split of {:.2} for obligation {} misses month {} by {:.2}",
                    actual,
                    self.obligation_id,
                    month,
                    actual - expected
                );
                return Err(LedgerError::InvalidSplit {
                    expected,
                    actual,
                    month: Some(month),
                });
            }
        }
        Ok(())
    }
}

pub struct ChangeApplicator<'a> {
    config: &'a LedgerConfig,
    enforce_split_totals: bool,
}

impl<'a> ChangeApplicator<'a> {
    pub fn new(config: &'a LedgerConfig) -> Self {
        Self {
            config,
            enforce_split_totals: false,
        }
    }

    /// Rejects any change whose split does not redistribute exactly the freed or required
    /// amount, so balanced months stay balanced.
    pub fn strict(config: &'a LedgerConfig) -> Self {
        Self {
            config,
            enforce_split_totals: true,
        }
    }

    /// Applies the changes to a copy of `document`; the input is left untouched.
    pub fn apply(
        &self,
        document: &FinancialDocument,
        changes: &[PendingChange],
        forward_from: Option<usize>,
    ) -> Result<FinancialDocument> {
        let mut doc = document.clone();

        if let Some(from) = forward_from {
            doc.check_month(from)?;
            carry_savings_forward(&mut doc, from);
        }

        for change in changes {
            self.apply_single_change(&mut doc, change)?;
        }

        let pruned = doc.prune_obligations();
        info!(
            "Applied {} pending change(s); pruned {} obligation(s)",
            changes.len(),
            pruned
        );

        Ok(doc)
    }

    fn apply_single_change(&self, doc: &mut FinancialDocument, change: &PendingChange) -> Result<()> {
        doc.check_month(change.start_month)?;
        change.split.ensure_categories_exist(doc)?;

        let new_amount = change.new_amount();
        if new_amount < 0.0 {
            return Err(LedgerError::NegativeAmount {
                field: "obligation amount".to_string(),
                value: new_amount,
            });
        }

        let horizon = doc.horizon;
        let start = change.start_month;
        let id = change.obligation_id;
        if self.enforce_split_totals {
            change.check_split(doc, self.config)?;
        } else {
            doc.obligation(id)?;
        }

        debug!(
            "Obligation {} from month {}: {:?} with split {:?} (scope {:?})",
            id, start, change.intent, change.split, change.scope
        );

        match (change.scope, &change.intent) {
            (ChangeScope::Forever, ChangeIntent::Delete) => {
                doc.obligations.retain(|o| o.id != id);
            }
            (ChangeScope::Month, _) => {
                doc.obligation_mut(id)?.amounts.set(start, new_amount);
            }
            (ChangeScope::Future, _) | (ChangeScope::Forever, ChangeIntent::SetAmount { .. }) => {
                doc.obligation_mut(id)?
                    .amounts
                    .set_range(start..horizon, new_amount);
            }
        }

        change.split.add_to_bonus(doc, change.split_range(horizon));
        Ok(())
    }
}

/// Copies the savings plan of `from` to every later month. Bonus overlays follow only while the
/// plan saves less than the default.
fn carry_savings_forward(doc: &mut FinancialDocument, from: usize) {
    let source = doc.record(from);
    let propagate_bonus = source.savings < source.default_savings;

    for month in (from + 1)..doc.horizon {
        let record = doc.record_mut(month);
        record.savings = source.savings;
        if propagate_bonus {
            record.bonus = source.bonus.clone();
        } else {
            record.bonus.clear();
        }
    }
}

pub fn apply_pending_changes(
    document: &FinancialDocument,
    changes: &[PendingChange],
    forward_from: Option<usize>,
    config: &LedgerConfig,
) -> Result<FinancialDocument> {
    ChangeApplicator::new(config).apply(document, changes, forward_from)
}
