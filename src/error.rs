use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Budget is unbalanced for month {month} ({label}): {message}")]
    Unbalanced {
        month: usize,
        label: String,
        deficit: f64,
        message: String,
    },

    #[error(
        "Split does not add up{}: expected a total of {expected:.2}, got {actual:.2}",
        month_suffix(.month)
    )]
    InvalidSplit {
        expected: f64,
        actual: f64,
        month: Option<usize>,
    },

    #[error("Negative amount not allowed for {field}: {value}")]
    NegativeAmount { field: String, value: f64 },

    #[error("Month index {month} is outside the {horizon}-month horizon")]
    MonthOutOfRange { month: usize, horizon: usize },

    #[error("Unknown fixed obligation: {0}")]
    UnknownObligation(u64),

    #[error("Unknown spending category: {0}")]
    UnknownCategory(String),

    #[error("Unknown transaction {id} in category '{category}' for month {month}")]
    UnknownTransaction {
        category: String,
        month: usize,
        id: u64,
    },

    #[error("Transaction overspends the budget by {overspend:.2}; a funding source is required")]
    CompensationRequired { overspend: f64 },

    #[error("Invalid compensation source: {0}")]
    InvalidCompensationSource(String),

    #[error("Rollover is not available for month {0}")]
    RolloverUnavailable(usize),

    #[error("Nothing to undo for {0}")]
    NothingToUndo(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

fn month_suffix(month: &Option<usize>) -> String {
    month.map(|m| format!(" for month {}", m)).unwrap_or_default()
}
