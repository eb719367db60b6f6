use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::schema::FinancialDocument;
use crate::validator::{Allocation, BudgetValidator};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RebalanceStrategy {
    #[schemars(description = "Keep every category budget and solve for savings.")]
    AdjustSavings,

    #[schemars(description = "Keep savings and the other categories and solve for one category.")]
    AdjustCategory { category: String },

    #[schemars(
        description = "Share available funds (minus existing overlays) equally between savings and every category, then fold each category's overlays into its budget."
    )]
    EqualSplit,

    #[schemars(description = "Caller-chosen totals; they must already balance.")]
    Manual {
        save: f64,
        categories: std::collections::BTreeMap<String, f64>,
    },
}

pub struct RebalanceResolver<'a> {
    config: &'a LedgerConfig,
}

impl<'a> RebalanceResolver<'a> {
    pub fn new(config: &'a LedgerConfig) -> Self {
        Self { config }
    }

    /// Rebalances exactly the months in `targets`. The list is taken as given and never
    /// re-derived while the loop runs.
    pub fn resolve(
        &self,
        document: &FinancialDocument,
        targets: &[usize],
        strategy: &RebalanceStrategy,
    ) -> Result<FinancialDocument> {
        let mut doc = document.clone();

        if let RebalanceStrategy::AdjustCategory { category } = strategy {
            doc.category(category)?;
        }

        for &month in targets {
            doc.check_month(month)?;
            self.rebalance_month(&mut doc, month, strategy)?;
        }

        info!(
            "Rebalanced {} month(s) using {:?}",
            targets.len(),
            strategy
        );
        Ok(doc)
    }

    fn rebalance_month(
        &self,
        doc: &mut FinancialDocument,
        month: usize,
        strategy: &RebalanceStrategy,
    ) -> Result<()> {
        let available = doc.available(month);
        let names: Vec<String> = doc.category_names().cloned().collect();

        match strategy {
            RebalanceStrategy::Manual { save, categories } => {
                let allocation = Allocation {
                    save: *save,
                    categories: categories.clone(),
                };
                for name in allocation.categories.keys() {
                    doc.category(name)?;
                }
                let outcome = BudgetValidator::new(doc, self.config).validate(month, &allocation);
                if !outcome.valid {
                    return Err(LedgerError::InvalidSplit {
                        expected: available,
                        actual: allocation.total(),
                        month: Some(month),
                    });
                }

                let record = doc.record(month);
                doc.record_mut(month).savings = save - record.savings_extra;
                for name in &names {
                    let base = allocation.category(name) - record.overlay_for(name);
                    doc.category_mut(name)?.budget.set(month, base);
                }
            }
            RebalanceStrategy::AdjustSavings => {
                doc.record_mut(month).clear_overlays();
                let categories: f64 = names
                    .iter()
                    .map(|name| doc.category_total(name, month))
                    .sum();
                doc.record_mut(month).savings = available - categories;
            }
            RebalanceStrategy::AdjustCategory { category } => {
                doc.record_mut(month).clear_overlays();
                let others: f64 = names
                    .iter()
                    .filter(|name| *name != category)
                    .map(|name| doc.category_total(name, month))
                    .sum();
                let save = doc.record(month).savings;
                doc.category_mut(category)?
                    .budget
                    .set(month, available - save - others);
            }
            RebalanceStrategy::EqualSplit => {
                let record = doc.record(month);
                let overlay_total: f64 = names.iter().map(|name| record.overlay_for(name)).sum();
                let share = (available - overlay_total) / (names.len() + 1) as f64;

                doc.record_mut(month).clear_overlays();
                doc.record_mut(month).savings = share;
                for name in &names {
                    doc.category_mut(name)?
                        .budget
                        .set(month, share + record.overlay_for(name));
                }
            }
        }

        debug!(
            "Month {} rebalanced: {}",
            month,
            BudgetValidator::new(doc, self.config)
                .validate_current(month)
                .message
        );
        Ok(())
    }
}

pub fn force_rebalance(
    document: &FinancialDocument,
    targets: &[usize],
    strategy: &RebalanceStrategy,
    config: &LedgerConfig,
) -> Result<FinancialDocument> {
    RebalanceResolver::new(config).resolve(document, targets, strategy)
}
