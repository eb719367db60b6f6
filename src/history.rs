//! Per-kind undo history for the reversible adjustments.
//!
//! Each entry pairs the adjustment that was applied with a snapshot of exactly the slice of the
//! document it could touch. Undo restores that slice; nothing else in the document moves.

use crate::adjustments::{Adjustment, AdjustmentKind, ChangeSignature};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::schema::{FinancialDocument, FixedObligation, IncomeSplitRecord, MonthRecord};
use log::{debug, info};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentSnapshot {
    pub adjustment: Adjustment,
    pub signature: ChangeSignature,
    // `None` marks a month that had never been written.
    records: BTreeMap<usize, Option<MonthRecord>>,
    budgets: BTreeMap<String, BTreeMap<usize, Option<f64>>>,
    income_splits: BTreeMap<usize, Option<Vec<IncomeSplitRecord>>>,
    obligations: Option<(Vec<FixedObligation>, u64)>,
}

impl AdjustmentSnapshot {
    pub fn capture(document: &FinancialDocument, adjustment: &Adjustment) -> Self {
        let months = adjustment.signature().months;

        let records = months
            .iter()
            .map(|&m| (m, document.records.get_ref(m).cloned()))
            .collect();

        let budgets = document
            .categories
            .iter()
            .map(|(name, category)| {
                let slice = months
                    .iter()
                    .map(|&m| (m, category.budget.get_ref(m).copied()))
                    .collect();
                (name.clone(), slice)
            })
            .collect();

        let income_splits = months
            .iter()
            .map(|&m| (m, document.income_splits.get(&m).cloned()))
            .collect();

        let obligations = adjustment
            .touches_obligations()
            .then(|| (document.obligations.clone(), document.next_obligation_id));

        Self {
            adjustment: adjustment.clone(),
            signature: adjustment.signature(),
            records,
            budgets,
            income_splits,
            obligations,
        }
    }

    pub fn kind(&self) -> AdjustmentKind {
        self.adjustment.kind()
    }

    /// Writes the captured slice back over `document`.
    pub fn restore(&self, document: &FinancialDocument) -> FinancialDocument {
        let mut doc = document.clone();

        for (&month, record) in &self.records {
            doc.records.restore(month, record.clone());
        }

        for (name, slice) in &self.budgets {
            if let Some(category) = doc.categories.get_mut(name) {
                for (&month, value) in slice {
                    category.budget.restore(month, *value);
                }
            }
        }

        for (&month, splits) in &self.income_splits {
            match splits {
                Some(list) => {
                    doc.income_splits.insert(month, list.clone());
                }
                None => {
                    doc.income_splits.remove(&month);
                }
            }
        }

        if let Some((obligations, next_id)) = &self.obligations {
            doc.obligations = obligations.clone();
            doc.next_obligation_id = *next_id;
        }

        doc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoDecision {
    /// No matching snapshot; apply the change normally.
    NotAvailable,
    /// The same change was applied last time; offer the user an undo instead.
    OfferUndo,
    /// The same change was applied but other unsaved edits happened since, so restore the
    /// snapshot straight away.
    RestoreImmediately,
}

#[derive(Debug, Clone)]
pub struct AdjustmentHistory {
    depth: usize,
    entries: BTreeMap<AdjustmentKind, VecDeque<AdjustmentSnapshot>>,
}

impl Default for AdjustmentHistory {
    fn default() -> Self {
        Self::new(LedgerConfig::default().history_depth)
    }
}

impl AdjustmentHistory {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            entries: BTreeMap::new(),
        }
    }

    /// Applies `adjustment` and remembers how to reverse it. Nothing is recorded when the
    /// adjustment is rejected.
    pub fn apply(
        &mut self,
        adjustment: Adjustment,
        document: &FinancialDocument,
        config: &LedgerConfig,
    ) -> Result<FinancialDocument> {
        let next = adjustment.apply(document, config)?;
        let snapshot = AdjustmentSnapshot::capture(document, &adjustment);
        self.push(snapshot);
        Ok(next)
    }

    pub fn push(&mut self, snapshot: AdjustmentSnapshot) {
        let stack = self.entries.entry(snapshot.kind()).or_default();
        stack.push_back(snapshot);
        while stack.len() > self.depth {
            if let Some(dropped) = stack.pop_front() {
                debug!("Dropped oldest {} snapshot", dropped.kind());
            }
        }
    }

    pub fn latest(&self, kind: AdjustmentKind) -> Option<&AdjustmentSnapshot> {
        self.entries.get(&kind).and_then(|stack| stack.back())
    }

    pub fn decide(&self, adjustment: &Adjustment, unsaved_changes: bool) -> UndoDecision {
        match self.latest(adjustment.kind()) {
            Some(snapshot) if snapshot.signature.matches(&adjustment.signature()) => {
                if unsaved_changes {
                    UndoDecision::RestoreImmediately
                } else {
                    UndoDecision::OfferUndo
                }
            }
            _ => UndoDecision::NotAvailable,
        }
    }

    pub fn undo(&mut self, kind: AdjustmentKind, document: &FinancialDocument) -> Result<FinancialDocument> {
        let snapshot = self
            .entries
            .get_mut(&kind)
            .and_then(|stack| stack.pop_back())
            .ok_or_else(|| LedgerError::NothingToUndo(kind.to_string()))?;

        info!(
            "Undoing {} for month(s) {:?}",
            kind, snapshot.signature.months
        );
        Ok(snapshot.restore(document))
    }

    pub fn len(&self, kind: AdjustmentKind) -> usize {
        self.entries.get(&kind).map(VecDeque::len).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
