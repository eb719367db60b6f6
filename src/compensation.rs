//! Transaction recording with overspend compensation.
//!
//! A transaction that pushes a category past its budget needs a funding source. The chosen
//! source and the compensated amount are stored on the transaction, and reversal (edit or
//! delete) replays that metadata backwards so it stays exact even if budgets moved since.

use crate::error::{LedgerError, Result};
use crate::schema::{Compensation, CompensationSource, FinancialDocument, Transaction};
use chrono::{DateTime, Utc};
use log::{debug, info};

/// Command describing a transaction to record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub category: String,
    pub month: usize,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// Stateless operations over a [`FinancialDocument`]'s category transactions.
pub struct CompensationEngine;

impl CompensationEngine {
    /// Part of `amount` that would exceed the category's budget for `month`.
    pub fn overspend_for(
        document: &FinancialDocument,
        category: &str,
        month: usize,
        amount: f64,
    ) -> Result<f64> {
        document.check_month(month)?;
        let spent = document.category(category)?.spent.get(month);
        let total = document.category_total(category, month);
        let excess = (spent + amount - total).max(0.0);
        Ok(excess.min(amount.max(0.0)))
    }

    /// Records a transaction, applying `source` when it overspends. Returns the new document and
    /// the id given to the transaction.
    pub fn record_transaction(
        document: &FinancialDocument,
        transaction: NewTransaction,
        source: Option<CompensationSource>,
    ) -> Result<(FinancialDocument, u64)> {
        let mut doc = document.clone();
        let id = doc.next_transaction_id;
        doc.next_transaction_id += 1;
        Self::record_into(&mut doc, id, &transaction, source)?;
        Ok((doc, id))
    }

    /// Undoes a transaction's effects and removes it.
    pub fn delete_transaction(
        document: &FinancialDocument,
        category: &str,
        month: usize,
        id: u64,
    ) -> Result<FinancialDocument> {
        let mut doc = document.clone();
        let removed = Self::reverse_into(&mut doc, category, month, id)?;
        info!(
            "Deleted transaction {} ({:.2}) from '{}' in month {}",
            id, removed.amount, category, month
        );
        Ok(doc)
    }

    /// Replaces a transaction's amount, keeping its id and timestamp. The new amount is checked
    /// for overspend again and needs `source` if it exceeds the budget.
    pub fn edit_transaction(
        document: &FinancialDocument,
        category: &str,
        month: usize,
        id: u64,
        new_amount: f64,
        source: Option<CompensationSource>,
    ) -> Result<FinancialDocument> {
        let mut doc = document.clone();
        let previous = Self::reverse_into(&mut doc, category, month, id)?;
        let replacement = NewTransaction {
            category: category.to_string(),
            month,
            amount: new_amount,
            timestamp: previous.timestamp,
        };
        Self::record_into(&mut doc, id, &replacement, source)?;
        Ok(doc)
    }

    fn record_into(
        doc: &mut FinancialDocument,
        id: u64,
        transaction: &NewTransaction,
        source: Option<CompensationSource>,
    ) -> Result<()> {
        let NewTransaction {
            category,
            month,
            amount,
            timestamp,
        } = transaction;
        let month = *month;

        if *amount < 0.0 {
            return Err(LedgerError::NegativeAmount {
                field: "transaction amount".to_string(),
                value: *amount,
            });
        }

        let overspend = Self::overspend_for(doc, category, month, *amount)?;
        let compensation = if overspend > 0.0 {
            let source = source.ok_or(LedgerError::CompensationRequired { overspend })?;
            Self::fund(doc, category, month, &source, overspend)?;
            Some(Compensation {
                source,
                amount: overspend,
            })
        } else {
            None
        };

        let spent = doc.category_mut(category)?.spent.get_mut(month);
        *spent += amount;
        if let Some(Compensation {
            source: CompensationSource::PreviousSavings,
            amount: covered,
        }) = &compensation
        {
            *spent -= covered;
        }

        debug!(
            "Recorded transaction {} of {:.2} in '{}' for month {} (compensation: {:?})",
            id, amount, category, month, compensation
        );

        doc.transactions
            .entry(category.clone())
            .or_default()
            .entry(month)
            .or_default()
            .push(Transaction {
                id,
                amount: *amount,
                timestamp: *timestamp,
                compensation,
            });
        Ok(())
    }

    fn fund(
        doc: &mut FinancialDocument,
        category: &str,
        month: usize,
        source: &CompensationSource,
        overspend: f64,
    ) -> Result<()> {
        match source {
            CompensationSource::OtherCategory { category: other } => {
                if other == category {
                    return Err(LedgerError::InvalidCompensationSource(format!(
                        "'{}' cannot compensate its own overspend",
                        category
                    )));
                }
                let other_left =
                    doc.category_total(other, month) - doc.category(other)?.spent.get(month);
                if other_left < overspend {
                    return Err(LedgerError::InvalidCompensationSource(format!(
                        "'{}' has only {:.2} left, {:.2} needed",
                        other, other_left, overspend
                    )));
                }
                doc.category_mut(category)?.budget.add(month, overspend);
                doc.category_mut(other)?.budget.add(month, -overspend);
            }
            CompensationSource::PlannedSavings => {
                doc.category_mut(category)?.budget.add(month, overspend);
                doc.record_mut(month).savings -= overspend;
            }
            CompensationSource::PreviousSavings => {
                doc.record_mut(month).prev_debit += overspend;
            }
        }
        Ok(())
    }

    fn reverse_into(
        doc: &mut FinancialDocument,
        category: &str,
        month: usize,
        id: u64,
    ) -> Result<Transaction> {
        doc.check_month(month)?;
        doc.category(category)?;

        let missing = || LedgerError::UnknownTransaction {
            category: category.to_string(),
            month,
            id,
        };
        let by_month = doc.transactions.get_mut(category).ok_or_else(missing)?;
        let list = by_month.get_mut(&month).ok_or_else(missing)?;
        let position = list.iter().position(|t| t.id == id).ok_or_else(missing)?;
        let transaction = list.remove(position);
        if list.is_empty() {
            by_month.remove(&month);
            if by_month.is_empty() {
                doc.transactions.remove(category);
            }
        }

        let mut spent_delta = -transaction.amount;
        if let Some(compensation) = &transaction.compensation {
            let covered = compensation.amount;
            match &compensation.source {
                CompensationSource::OtherCategory { category: other } => {
                    doc.category_mut(category)?.budget.add(month, -covered);
                    doc.category_mut(other)?.budget.add(month, covered);
                }
                CompensationSource::PlannedSavings => {
                    doc.category_mut(category)?.budget.add(month, -covered);
                    doc.record_mut(month).savings += covered;
                }
                CompensationSource::PreviousSavings => {
                    spent_delta += covered;
                    doc.record_mut(month).prev_debit -= covered;
                }
            }
        }
        doc.category_mut(category)?.spent.add(month, spent_delta);

        Ok(transaction)
    }
}
