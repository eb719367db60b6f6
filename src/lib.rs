//! # Monthly Ledger
//!
//! A library for planning personal finances month by month across a fixed horizon (60 months
//! by default) while keeping every month's budget balanced.
//!
//! ## Core Concepts
//!
//! - **Available funds**: income plus extra income minus the month's fixed obligations
//! - **Balanced month**: planned savings plus every category's total budget equals available
//!   funds, within a 0.5 tolerance
//! - **Previous savings**: the carry from one month to the next, reduced when categories
//!   overspend beyond what planned savings can absorb
//! - **Rollover**: last month's unspent category budget, which can be moved into savings during
//!   the first days of a month
//! - **Sparse timelines**: every per-month value is stored only for the months that have one
//!
//! Every engine takes a document and returns a new one; the input is never modified.
//!
//! ## Example
//!
//! ```rust,ignore
//! use monthly_ledger::*;
//! use chrono::Utc;
//!
//! let config = LedgerConfig::default();
//! let calendar = MonthCalendar::starting(2025, 1, 1, config.horizon)?;
//!
//! let mut doc = FinancialDocument::new(config.horizon, ["Groceries", "Transport"]);
//! for month in doc.months() {
//!     doc.record_mut(month).income = 3_000.0;
//!     doc.record_mut(month).savings = 1_000.0;
//!     doc.category_mut("Groceries")?.budget.set(month, 1_200.0);
//!     doc.category_mut("Transport")?.budget.set(month, 800.0);
//! }
//!
//! validate_all(&doc, &calendar, &config).ensure_balanced()?;
//! let results = compute_monthly_results(&doc, &calendar, Utc::now(), &config);
//! println!("{}: total savings {:.2}", results[0].label, results[0].total_savings);
//! ```

pub mod adjustments;
pub mod calendar;
pub mod changes;
pub mod compensation;
pub mod config;
pub mod error;
pub mod history;
pub mod ledger;
pub mod rebalance;
pub mod rollover;
pub mod sanitize;
pub mod schema;
pub mod session;
pub mod store;
pub mod timeline;
pub mod validator;

pub use adjustments::{Adjustment, AdjustmentKind, ChangeSignature};
pub use calendar::{last_day_of_month, MonthCalendar, MonthItem};
pub use changes::{apply_pending_changes, ChangeApplicator, ChangeIntent, ChangeScope, PendingChange, Split};
pub use compensation::{CompensationEngine, NewTransaction};
pub use config::{LedgerConfig, DEFAULT_HORIZON, MAX_HORIZON};
pub use error::{LedgerError, Result};
pub use history::{AdjustmentHistory, AdjustmentSnapshot, UndoDecision};
pub use ledger::{compute_monthly_results, CategoryResult, LedgerCalculator, MonthlyResult};
pub use rebalance::{force_rebalance, RebalanceResolver, RebalanceStrategy};
pub use rollover::{absorb_rollover, auto_absorb};
pub use sanitize::{sanitize_document, Coercion, Sanitized};
pub use schema::*;
pub use session::{AdjustmentOutcome, LedgerSession};
pub use store::{DocumentStore, InMemoryStore, StoreError, StoredDocument};
pub use timeline::Timeline;
pub use validator::{
    validate_all, validate_month, Allocation, BudgetIssue, BudgetValidator, IssueFocus,
    ValidationOutcome, ValidationReport,
};
