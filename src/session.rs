//! Editing session over one user's document.
//!
//! [`LedgerSession`] owns the current [`FinancialDocument`], runs every mutation through the
//! engines in call order, tracks whether anything is unsaved and refuses to persist a document
//! whose months are not all balanced.

use crate::adjustments::{Adjustment, AdjustmentKind};
use crate::calendar::MonthCalendar;
use crate::changes::{ChangeApplicator, PendingChange};
use crate::compensation::{CompensationEngine, NewTransaction};
use crate::config::LedgerConfig;
use crate::error::Result;
use crate::history::{AdjustmentHistory, UndoDecision};
use crate::ledger::{LedgerCalculator, MonthlyResult};
use crate::rebalance::{RebalanceResolver, RebalanceStrategy};
use crate::rollover;
use crate::sanitize::{sanitize_document, Coercion};
use crate::schema::{CompensationSource, FinancialDocument, Revision};
use crate::store::DocumentStore;
use crate::validator::{BudgetValidator, ValidationReport};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

/// What happened when an adjustment was submitted through [`LedgerSession::submit_adjustment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentOutcome {
    Applied,
    /// The same change was just applied; nothing was done and the caller may offer undo.
    UndoOffered,
    /// The same change was applied before further unsaved edits, so it was reverted.
    Restored,
}

#[derive(Debug, Clone)]
pub struct LedgerSession {
    user_id: String,
    document: FinancialDocument,
    history: AdjustmentHistory,
    config: LedgerConfig,
    unsaved: bool,
}

impl LedgerSession {
    pub fn new(user_id: impl Into<String>, document: FinancialDocument, config: LedgerConfig) -> Self {
        Self {
            user_id: user_id.into(),
            document,
            history: AdjustmentHistory::new(config.history_depth),
            config,
            unsaved: false,
        }
    }

    /// Loads the stored document for `user_id`, or starts an empty one when nothing is stored.
    /// Returns the session and any coercions the sanitizer had to make.
    pub async fn load(
        store: &dyn DocumentStore,
        user_id: &str,
        config: LedgerConfig,
    ) -> Result<(Self, Vec<Coercion>)> {
        config.validate()?;
        let (document, coercions) = Self::fetch(store, user_id, &config).await?;
        Ok((Self::new(user_id, document, config), coercions))
    }

    async fn fetch(
        store: &dyn DocumentStore,
        user_id: &str,
        config: &LedgerConfig,
    ) -> Result<(FinancialDocument, Vec<Coercion>)> {
        match store.load(user_id).await? {
            Some(stored) => {
                let sanitized = sanitize_document(&stored.body);
                let mut document = sanitized.document;
                document.revision = Some(stored.revision);
                debug!(
                    "Loaded document for {} at {:?}",
                    user_id, document.revision
                );
                Ok((document, sanitized.coercions))
            }
            None => {
                info!("No stored document for {}; starting a new one", user_id);
                let categories: Vec<String> = Vec::new();
                Ok((FinancialDocument::new(config.horizon, categories), Vec::new()))
            }
        }
    }

    pub fn document(&self) -> &FinancialDocument {
        &self.document
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn history(&self) -> &AdjustmentHistory {
        &self.history
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    pub fn revision(&self) -> Option<&Revision> {
        self.document.revision.as_ref()
    }

    fn commit(&mut self, next: FinancialDocument) {
        self.document = next;
        self.unsaved = true;
    }

    pub fn results(&self, calendar: &MonthCalendar, now: DateTime<Utc>) -> Vec<MonthlyResult> {
        LedgerCalculator::new(&self.document, calendar, &self.config).compute(now)
    }

    pub fn validate(&self, calendar: &MonthCalendar) -> ValidationReport {
        BudgetValidator::new(&self.document, &self.config)
            .with_calendar(calendar)
            .validate_all()
    }

    /// Applies pending obligation edits. Every split must redistribute exactly the freed or
    /// required amount.
    pub fn apply_changes(&mut self, changes: &[PendingChange], forward_from: Option<usize>) -> Result<()> {
        let next = ChangeApplicator::strict(&self.config).apply(&self.document, changes, forward_from)?;
        self.commit(next);
        Ok(())
    }

    pub fn rebalance(&mut self, targets: &[usize], strategy: &RebalanceStrategy) -> Result<()> {
        let next = RebalanceResolver::new(&self.config).resolve(&self.document, targets, strategy)?;
        self.commit(next);
        Ok(())
    }

    pub fn record_transaction(
        &mut self,
        transaction: NewTransaction,
        source: Option<CompensationSource>,
    ) -> Result<u64> {
        let (next, id) = CompensationEngine::record_transaction(&self.document, transaction, source)?;
        self.commit(next);
        Ok(id)
    }

    pub fn edit_transaction(
        &mut self,
        category: &str,
        month: usize,
        id: u64,
        new_amount: f64,
        source: Option<CompensationSource>,
    ) -> Result<()> {
        let next = CompensationEngine::edit_transaction(&self.document, category, month, id, new_amount, source)?;
        self.commit(next);
        Ok(())
    }

    pub fn delete_transaction(&mut self, category: &str, month: usize, id: u64) -> Result<()> {
        let next = CompensationEngine::delete_transaction(&self.document, category, month, id)?;
        self.commit(next);
        Ok(())
    }

    pub fn undo_decision(&self, adjustment: &Adjustment) -> UndoDecision {
        self.history.decide(adjustment, self.unsaved)
    }

    /// Applies `adjustment` and records it for undo, regardless of history.
    pub fn apply_adjustment(&mut self, adjustment: Adjustment) -> Result<()> {
        let next = self.history.apply(adjustment, &self.document, &self.config)?;
        self.commit(next);
        Ok(())
    }

    /// Applies `adjustment` unless it repeats the latest change of its kind, in which case the
    /// undo decision is honoured instead.
    pub fn submit_adjustment(&mut self, adjustment: Adjustment) -> Result<AdjustmentOutcome> {
        match self.undo_decision(&adjustment) {
            UndoDecision::NotAvailable => {
                self.apply_adjustment(adjustment)?;
                Ok(AdjustmentOutcome::Applied)
            }
            UndoDecision::OfferUndo => Ok(AdjustmentOutcome::UndoOffered),
            UndoDecision::RestoreImmediately => {
                self.undo(adjustment.kind())?;
                Ok(AdjustmentOutcome::Restored)
            }
        }
    }

    pub fn undo(&mut self, kind: AdjustmentKind) -> Result<()> {
        let next = self.history.undo(kind, &self.document)?;
        self.commit(next);
        Ok(())
    }

    pub fn absorb_rollover(&mut self, month: usize, calendar: &MonthCalendar, now: DateTime<Utc>) -> Result<()> {
        let results = self.results(calendar, now);
        let next = rollover::absorb_rollover(&self.document, month, &results)?;
        self.commit(next);
        Ok(())
    }

    /// Absorbs every open rollover when automatic rollover is on. Returns the absorbed months.
    pub fn auto_absorb(&mut self, calendar: &MonthCalendar, now: DateTime<Utc>) -> Result<Vec<usize>> {
        let results = self.results(calendar, now);
        let (next, months) = rollover::auto_absorb(&self.document, &results)?;
        if !months.is_empty() {
            self.commit(next);
        }
        Ok(months)
    }

    /// Persists the document against the revision it was loaded at. Unbalanced months block the
    /// save; a stale revision surfaces as a store conflict and leaves the session untouched.
    pub async fn save(&mut self, store: &dyn DocumentStore) -> Result<Revision> {
        BudgetValidator::new(&self.document, &self.config)
            .validate_all()
            .ensure_balanced()?;

        let base = self.document.revision.clone();
        let revision = match store.save(&self.user_id, &self.document, base.as_ref()).await {
            Ok(revision) => revision,
            Err(e) => {
                warn!("Save for {} failed: {}", self.user_id, e);
                return Err(e.into());
            }
        };

        info!("Saved document for {} at {}", self.user_id, revision);
        self.document.revision = Some(revision.clone());
        self.unsaved = false;
        Ok(revision)
    }

    /// Replaces local state with the stored document, dropping unsaved edits and undo history.
    pub async fn reload(&mut self, store: &dyn DocumentStore) -> Result<Vec<Coercion>> {
        let (document, coercions) = Self::fetch(store, &self.user_id, &self.config).await?;
        if self.unsaved {
            warn!("Discarding unsaved changes for {} on reload", self.user_id);
        }
        self.document = document;
        self.history.clear();
        self.unsaved = false;
        Ok(coercions)
    }

    /// Saves over whatever is stored, adopting the current stored revision as the base.
    pub async fn force_save(&mut self, store: &dyn DocumentStore) -> Result<Revision> {
        let current = store.load(&self.user_id).await?.map(|stored| stored.revision);
        warn!(
            "Force saving for {} over {:?} (local base {:?})",
            self.user_id, current, self.document.revision
        );
        self.document.revision = current;
        self.save(store).await
    }
}
