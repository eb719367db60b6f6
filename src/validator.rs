use crate::calendar::MonthCalendar;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::schema::{CategoryMap, FinancialDocument};
use log::debug;
use serde::{Deserialize, Serialize};

/// How a month's available funds are split between savings and the spending categories.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Allocation {
    pub save: f64,
    pub categories: CategoryMap,
}

impl Allocation {
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

    /// The allocation currently stored for `month`, overlays included.
    pub fn current(document: &FinancialDocument, month: usize) -> Self {
        let record = document.record(month);
        Self {
            save: record.planned_savings_total(),
            categories: document
                .category_names()
                .map(|name| (name.clone(), document.category_total(name, month)))
                .collect(),
        }
    }

    pub fn category(&self, name: &str) -> f64 {
        self.categories.get(name).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.save + self.categories.values().sum::<f64>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    /// Allocated minus available: positive when over-allocated, negative when funds are left over.
    pub deficit: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetIssue {
    pub month: usize,
    pub label: String,
    pub available: f64,
    pub allocation: Allocation,
    pub deficit: f64,
    pub message: String,
}

/// Component totals of the first unbalanced month, for the caller to focus on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueFocus {
    pub month: usize,
    pub available: f64,
    pub save: f64,
    pub categories: CategoryMap,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<BudgetIssue>,
    pub focus: Option<IssueFocus>,
}

impl ValidationReport {
    pub fn is_balanced(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn failing_months(&self) -> Vec<usize> {
        self.issues.iter().map(|issue| issue.month).collect()
    }

    /// Saving is blocked while any month is unbalanced.
    pub fn ensure_balanced(&self) -> Result<()> {
        match self.issues.first() {
            None => Ok(()),
            Some(issue) => Err(LedgerError::Unbalanced {
                month: issue.month,
                label: issue.label.clone(),
                deficit: issue.deficit,
                message: issue.message.clone(),
            }),
        }
    }
}

pub struct BudgetValidator<'a> {
    document: &'a FinancialDocument,
    calendar: Option<&'a MonthCalendar>,
    config: &'a LedgerConfig,
}

impl<'a> BudgetValidator<'a> {
    pub fn new(document: &'a FinancialDocument, config: &'a LedgerConfig) -> Self {
        Self {
            document,
            calendar: None,
            config,
        }
    }

    pub fn with_calendar(mut self, calendar: &'a MonthCalendar) -> Self {
        self.calendar = Some(calendar);
        self
    }

    fn label(&self, month: usize) -> String {
        match self.calendar {
            Some(calendar) => calendar.label(month),
            None => format!("Month {}", month + 1),
        }
    }

    pub fn validate(&self, month: usize, allocation: &Allocation) -> ValidationOutcome {
        let available = self.document.available(month);
        let deficit = allocation.total() - available;
        let valid = deficit.abs() <= self.config.balance_tolerance;

        let message = if valid {
            format!("{}: budget is balanced.", self.label(month))
        } else if deficit > 0.0 {
            format!(
                "{}: allocations exceed available funds by {:.2}.",
                self.label(month),
                deficit
            )
        } else {
            format!(
                "{}: {:.2} of available funds is unallocated.",
                self.label(month),
                -deficit
            )
        };

        ValidationOutcome {
            valid,
            deficit,
            message,
        }
    }

    pub fn validate_current(&self, month: usize) -> ValidationOutcome {
        self.validate(month, &Allocation::current(self.document, month))
    }

    pub fn validate_all(&self) -> ValidationReport {
        let mut issues = Vec::new();

        for month in self.document.months() {
            let allocation = Allocation::current(self.document, month);
            let outcome = self.validate(month, &allocation);
            if !outcome.valid {
                issues.push(BudgetIssue {
                    month,
                    label: self.label(month),
                    available: self.document.available(month),
                    allocation,
                    deficit: outcome.deficit,
                    message: outcome.message,
                });
            }
        }

        let focus = issues.first().map(|issue| IssueFocus {
            month: issue.month,
            available: issue.available,
            save: issue.allocation.save,
            categories: issue.allocation.categories.clone(),
        });

        debug!(
            "Budget validation found {} unbalanced month(s) out of {}",
            issues.len(),
            self.document.horizon
        );

        ValidationReport { issues, focus }
    }
}

pub fn validate_month(
    document: &FinancialDocument,
    month: usize,
    allocation: &Allocation,
    config: &LedgerConfig,
) -> ValidationOutcome {
    BudgetValidator::new(document, config).validate(month, allocation)
}

pub fn validate_all(
    document: &FinancialDocument,
    calendar: &MonthCalendar,
    config: &LedgerConfig,
) -> ValidationReport {
    BudgetValidator::new(document, config)
        .with_calendar(calendar)
        .validate_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FixedObligation;
    use crate::timeline::Timeline;

    fn document() -> FinancialDocument {
        let mut doc = FinancialDocument::new(3, ["a", "b"]);
        for month in 0..3 {
            let record = doc.record_mut(month);
            record.income = 10_000.0;
            record.savings = 2_000.0;
            doc.category_mut("a").unwrap().budget.set(month, 3_000.0);
            doc.category_mut("b").unwrap().budget.set(month, 3_000.0);
        }
        doc.obligations.push(FixedObligation {
            id: 1,
            name: "Rent".to_string(),
            amounts: Timeline::filled(0..3, 2_000.0),
            paid: Timeline::new(),
        });
        doc
    }

    #[test]
    fn test_balanced_month() {
        let doc = document();
        let config = LedgerConfig::default();
        let allocation = Allocation::new(2_000.0, [("a", 3_000.0), ("b", 3_000.0)]);
        let outcome = validate_month(&doc, 0, &allocation, &config);
        assert!(outcome.valid);
        assert_eq!(outcome.deficit, 0.0);
    }

    #[test]
    fn test_tolerance_boundary() {
        let doc = document();
        let config = LedgerConfig::default();
        let within = Allocation::new(2_000.5, [("a", 3_000.0), ("b", 3_000.0)]);
        assert!(validate_month(&doc, 0, &within, &config).valid);
        let outside = Allocation::new(2_000.6, [("a", 3_000.0), ("b", 3_000.0)]);
        assert!(!validate_month(&doc, 0, &outside, &config).valid);
    }

    #[test]
    fn test_direction_in_message() {
        let doc = document();
        let config = LedgerConfig::default();
        let over = Allocation::new(2_500.0, [("a", 3_000.0), ("b", 3_000.0)]);
        let outcome = validate_month(&doc, 1, &over, &config);
        assert_eq!(outcome.deficit, 500.0);
        assert!(outcome.message.contains("Month 2"));
        assert!(outcome.message.contains("exceed"));

        let under = Allocation::new(1_000.0, [("a", 3_000.0), ("b", 3_000.0)]);
        let outcome = validate_month(&doc, 1, &under, &config);
        assert_eq!(outcome.deficit, -1_000.0);
        assert!(outcome.message.contains("unallocated"));
    }

    #[test]
    fn test_report_focus_carries_month_index() {
        let mut doc = document();
        doc.record_mut(2).income = 9_000.0;
        doc.record_mut(1).bonus.insert("a".to_string(), 100.0);
        let calendar = MonthCalendar::starting(2025, 1, 1, 3).unwrap();

        let report = validate_all(&doc, &calendar, &LedgerConfig::default());
        assert_eq!(report.failing_months(), vec![1, 2]);
        let focus = report.focus.clone().unwrap();
        assert_eq!(focus.month, 1);
        assert_eq!(focus.categories["a"], 3_100.0);
        assert_eq!(focus.available, 8_000.0);
        assert!(matches!(
            report.ensure_balanced(),
            Err(LedgerError::Unbalanced { month: 1, .. })
        ));
    }

    #[test]
    fn test_extra_income_counts_as_available() {
        let mut doc = document();
        let record = doc.record_mut(0);
        record.extra_income = 600.0;
        record.savings_extra = 200.0;
        record.extra.insert("b".to_string(), 400.0);
        let report = BudgetValidator::new(&doc, &LedgerConfig::default()).validate_all();
        assert!(report.is_balanced());
        assert!(report.ensure_balanced().is_ok());
    }
}
