use crate::changes::Split;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::rebalance::{RebalanceResolver, RebalanceStrategy};
use crate::schema::{FinancialDocument, FixedObligation, IncomeSplitRecord};
use crate::timeline::Timeline;
use crate::validator::Allocation;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    SalaryChange,
    BudgetChange,
    ExtraIncomeSplit,
    NewExpense,
}

impl std::fmt::Display for AdjustmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AdjustmentKind::SalaryChange => "salary change",
            AdjustmentKind::BudgetChange => "budget change",
            AdjustmentKind::ExtraIncomeSplit => "extra income split",
            AdjustmentKind::NewExpense => "new expense",
        };
        f.write_str(name)
    }
}

/// Which months a value change touches and the values it applies there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSignature {
    pub months: Vec<usize>,
    pub values: Vec<f64>,
}

impl ChangeSignature {
    fn new(months: &[usize], values: Vec<f64>) -> Self {
        let mut months = months.to_vec();
        months.sort_unstable();
        months.dedup();
        Self { months, values }
    }

    pub fn matches(&self, other: &ChangeSignature) -> bool {
        self.months == other.months
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| (a - b).abs() < 0.005)
    }
}

/// The four reversible mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Adjustment {
    /// New salary for each listed month. The income difference goes to savings unless `split`
    /// says otherwise, in which case every month must see the same difference.
    SalaryChange {
        months: Vec<usize>,
        salary: f64,
        split: Option<Split>,
    },

    /// New totals (overlays included) for savings and every category.
    BudgetChange {
        months: Vec<usize>,
        allocation: Allocation,
    },

    /// Divides one-off extra income between savings and the categories.
    ExtraIncomeSplit {
        month: usize,
        amount: f64,
        split: Split,
    },

    /// Adds a fixed obligation paid for by reducing savings and category budgets.
    NewExpense {
        name: String,
        amount: f64,
        months: Vec<usize>,
        funding: Split,
    },
}

impl Adjustment {
    pub fn kind(&self) -> AdjustmentKind {
        match self {
            Adjustment::SalaryChange { .. } => AdjustmentKind::SalaryChange,
            Adjustment::BudgetChange { .. } => AdjustmentKind::BudgetChange,
            Adjustment::ExtraIncomeSplit { .. } => AdjustmentKind::ExtraIncomeSplit,
            Adjustment::NewExpense { .. } => AdjustmentKind::NewExpense,
        }
    }

    /// Distinct months touched, in ascending order.
    pub fn months(&self) -> Vec<usize> {
        let mut months = match self {
            Adjustment::SalaryChange { months, .. }
            | Adjustment::BudgetChange { months, .. }
            | Adjustment::NewExpense { months, .. } => months.clone(),
            Adjustment::ExtraIncomeSplit { month, .. } => vec![*month],
        };
        months.sort_unstable();
        months.dedup();
        months
    }

    pub fn signature(&self) -> ChangeSignature {
        let values = match self {
            Adjustment::SalaryChange { salary, .. } => vec![*salary],
            Adjustment::BudgetChange { allocation, .. } => std::iter::once(allocation.save)
                .chain(allocation.categories.values().copied())
                .collect(),
            Adjustment::ExtraIncomeSplit { amount, split, .. } => [*amount, split.save]
                .into_iter()
                .chain(split.categories.values().copied())
                .collect(),
            Adjustment::NewExpense { amount, .. } => vec![*amount],
        };
        ChangeSignature::new(&self.months(), values)
    }

    /// Obligations are only captured for kinds that change the obligation list.
    pub fn touches_obligations(&self) -> bool {
        matches!(self, Adjustment::NewExpense { .. })
    }

    pub fn apply(&self, document: &FinancialDocument, config: &LedgerConfig) -> Result<FinancialDocument> {
        let months = self.months();
        if months.is_empty() {
            return Err(LedgerError::InvalidConfig(format!(
                "{} must name at least one month",
                self.kind()
            )));
        }
        for &month in &months {
            document.check_month(month)?;
        }

        let doc = match self {
            Adjustment::SalaryChange { salary, split, .. } => {
                change_salary(document, &months, *salary, split.as_ref(), config)?
            }
            Adjustment::BudgetChange { allocation, .. } => {
                let strategy = RebalanceStrategy::Manual {
                    save: allocation.save,
                    categories: allocation.categories.clone(),
                };
                RebalanceResolver::new(config).resolve(document, &months, &strategy)?
            }
            Adjustment::ExtraIncomeSplit {
                month,
                amount,
                split,
            } => split_extra_income(document, *month, *amount, split, config)?,
            Adjustment::NewExpense {
                name,
                amount,
                funding,
                ..
            } => add_expense(document, name, *amount, &months, funding, config)?,
        };

        info!("Applied {} to month(s) {:?}", self.kind(), months);
        Ok(doc)
    }
}

fn ensure_non_negative(field: &str, value: f64) -> Result<()> {
    if value < 0.0 {
        return Err(LedgerError::NegativeAmount {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

fn change_salary(
    document: &FinancialDocument,
    months: &[usize],
    salary: f64,
    split: Option<&Split>,
    config: &LedgerConfig,
) -> Result<FinancialDocument> {
    ensure_non_negative("salary", salary)?;
    let mut doc = document.clone();

    if let Some(split) = split {
        split.ensure_categories_exist(&doc)?;
    }

    for &month in months {
        let delta = salary - doc.record(month).income;
        if let Some(split) = split {
            split.ensure_total(delta, config.balance_tolerance)?;
            for (name, value) in &split.categories {
                doc.category_mut(name)?.budget.add(month, *value);
            }
        }

        let record = doc.record_mut(month);
        record.income = salary;
        record.base_salary = Some(salary);
        record.savings += split.map(|s| s.save).unwrap_or(delta);
    }

    Ok(doc)
}

fn split_extra_income(
    document: &FinancialDocument,
    month: usize,
    amount: f64,
    split: &Split,
    config: &LedgerConfig,
) -> Result<FinancialDocument> {
    ensure_non_negative("extra income", amount)?;
    ensure_non_negative("saved part", split.save)?;
    for (name, value) in &split.categories {
        ensure_non_negative(name, *value)?;
    }
    split.ensure_total(amount, config.balance_tolerance)?;
    split.ensure_categories_exist(document)?;

    let mut doc = document.clone();
    let record = doc.record_mut(month);
    record.extra_income += amount;
    record.savings_extra += split.save;
    for (name, value) in &split.categories {
        *record.extra.entry(name.clone()).or_insert(0.0) += value;
    }

    doc.income_splits
        .entry(month)
        .or_default()
        .push(IncomeSplitRecord {
            amount,
            save: split.save,
            categories: split.categories.clone(),
        });
    Ok(doc)
}

fn add_expense(
    document: &FinancialDocument,
    name: &str,
    amount: f64,
    months: &[usize],
    funding: &Split,
    config: &LedgerConfig,
) -> Result<FinancialDocument> {
    ensure_non_negative("expense amount", amount)?;
    funding.ensure_total(amount, config.balance_tolerance)?;
    funding.ensure_categories_exist(document)?;

    let mut doc = document.clone();
    let id = doc.next_obligation_id;
    doc.next_obligation_id += 1;

    let mut amounts = Timeline::new();
    for &month in months {
        amounts.set(month, amount);
        doc.record_mut(month).savings -= funding.save;
        for (category, value) in &funding.categories {
            doc.category_mut(category)?.budget.add(month, -value);
        }
    }

    doc.obligations.push(FixedObligation {
        id,
        name: name.to_string(),
        amounts,
        paid: Timeline::new(),
    });
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::BudgetValidator;

    fn balanced_document() -> FinancialDocument {
        let mut doc = FinancialDocument::new(4, ["a", "b"]);
        for month in 0..4 {
            let record = doc.record_mut(month);
            record.income = 4_000.0;
            record.savings = 1_000.0;
            doc.category_mut("a").unwrap().budget.set(month, 1_500.0);
            doc.category_mut("b").unwrap().budget.set(month, 1_500.0);
        }
        doc
    }

    fn is_balanced(doc: &FinancialDocument) -> bool {
        BudgetValidator::new(doc, &LedgerConfig::default())
            .validate_all()
            .is_balanced()
    }

    #[test]
    fn test_salary_change_defaults_difference_to_savings() {
        let doc = balanced_document();
        let adjustment = Adjustment::SalaryChange {
            months: vec![1, 2],
            salary: 4_600.0,
            split: None,
        };
        let next = adjustment.apply(&doc, &LedgerConfig::default()).unwrap();
        assert_eq!(next.record(1).income, 4_600.0);
        assert_eq!(next.record(1).base_salary, Some(4_600.0));
        assert_eq!(next.record(2).savings, 1_600.0);
        assert_eq!(next.record(3).savings, 1_000.0);
        assert!(is_balanced(&next));
    }

    #[test]
    fn test_salary_split_must_match_difference() {
        let doc = balanced_document();
        let adjustment = Adjustment::SalaryChange {
            months: vec![0],
            salary: 3_500.0,
            split: Some(Split::new(-300.0, [("a", -100.0)])),
        };
        match adjustment.apply(&doc, &LedgerConfig::default()) {
            Err(LedgerError::InvalidSplit { expected, .. }) => assert_eq!(expected, -500.0),
            other => panic!("expected InvalidSplit, got {:?}", other),
        }

        let adjustment = Adjustment::SalaryChange {
            months: vec![0],
            salary: 3_500.0,
            split: Some(Split::new(-300.0, [("a", -200.0)])),
        };
        let next = adjustment.apply(&doc, &LedgerConfig::default()).unwrap();
        assert_eq!(next.category("a").unwrap().budget.get(0), 1_300.0);
        assert!(is_balanced(&next));
    }

    #[test]
    fn test_extra_income_split_logs_record() {
        let doc = balanced_document();
        let adjustment = Adjustment::ExtraIncomeSplit {
            month: 2,
            amount: 900.0,
            split: Split::new(500.0, [("a", 300.0), ("b", 100.0)]),
        };
        let next = adjustment.apply(&doc, &LedgerConfig::default()).unwrap();
        let record = next.record(2);
        assert_eq!(record.extra_income, 900.0);
        assert_eq!(record.savings_extra, 500.0);
        assert_eq!(record.extra_for("a"), 300.0);
        assert_eq!(next.income_splits[&2].len(), 1);
        assert!(is_balanced(&next));
    }

    #[test]
    fn test_extra_income_split_rejects_wrong_total_and_negatives() {
        let doc = balanced_document();
        let short = Adjustment::ExtraIncomeSplit {
            month: 0,
            amount: 900.0,
            split: Split::to_save(800.0),
        };
        assert!(matches!(
            short.apply(&doc, &LedgerConfig::default()),
            Err(LedgerError::InvalidSplit { expected, .. }) if expected == 900.0
        ));

        let negative = Adjustment::ExtraIncomeSplit {
            month: 0,
            amount: 100.0,
            split: Split::new(200.0, [("a", -100.0)]),
        };
        assert!(matches!(
            negative.apply(&doc, &LedgerConfig::default()),
            Err(LedgerError::NegativeAmount { .. })
        ));
    }

    #[test]
    fn test_new_expense_funded_by_split() {
        let doc = balanced_document();
        let adjustment = Adjustment::NewExpense {
            name: "Insurance".to_string(),
            amount: 200.0,
            months: vec![1, 2, 3],
            funding: Split::new(150.0, [("b", 50.0)]),
        };
        let next = adjustment.apply(&doc, &LedgerConfig::default()).unwrap();
        assert_eq!(next.obligations.len(), 1);
        assert_eq!(next.obligations[0].amount(0), 0.0);
        assert_eq!(next.obligations[0].amount(2), 200.0);
        assert_eq!(next.record(2).savings, 850.0);
        assert_eq!(next.category("b").unwrap().budget.get(3), 1_450.0);
        assert_eq!(next.next_obligation_id, 2);
        assert!(is_balanced(&next));
    }

    #[test]
    fn test_repeated_months_are_applied_once() {
        let doc = balanced_document();
        let expense = Adjustment::NewExpense {
            name: "Parking".to_string(),
            amount: 50.0,
            months: vec![1, 1],
            funding: Split::to_save(50.0),
        };
        let next = expense.apply(&doc, &LedgerConfig::default()).unwrap();
        assert_eq!(next.record(1).savings, 950.0);
        assert!(is_balanced(&next));

        let raise = Adjustment::SalaryChange {
            months: vec![2, 0, 2],
            salary: 4_200.0,
            split: Some(Split::new(100.0, [("a", 100.0)])),
        };
        assert_eq!(raise.months(), vec![0, 2]);
        let next = raise.apply(&doc, &LedgerConfig::default()).unwrap();
        assert_eq!(next.category("a").unwrap().budget.get(2), 1_600.0);
        assert!(is_balanced(&next));
    }

    #[test]
    fn test_budget_change_must_balance() {
        let doc = balanced_document();
        let ok = Adjustment::BudgetChange {
            months: vec![0, 3],
            allocation: Allocation::new(2_000.0, [("a", 1_000.0), ("b", 1_000.0)]),
        };
        let next = ok.apply(&doc, &LedgerConfig::default()).unwrap();
        assert_eq!(next.record(3).savings, 2_000.0);
        assert!(is_balanced(&next));

        let bad = Adjustment::BudgetChange {
            months: vec![0],
            allocation: Allocation::new(2_500.0, [("a", 1_000.0), ("b", 1_000.0)]),
        };
        assert!(bad.apply(&doc, &LedgerConfig::default()).is_err());
    }

    #[test]
    fn test_signature_ignores_month_order() {
        let first = Adjustment::SalaryChange {
            months: vec![2, 1],
            salary: 5_000.0,
            split: None,
        };
        let second = Adjustment::SalaryChange {
            months: vec![1, 2],
            salary: 5_000.001,
            split: None,
        };
        assert!(first.signature().matches(&second.signature()));

        let other = Adjustment::SalaryChange {
            months: vec![1, 2, 3],
            salary: 5_000.0,
            split: None,
        };
        assert!(!first.signature().matches(&other.signature()));
    }
}
