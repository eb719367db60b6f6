use crate::config::DEFAULT_HORIZON;
use crate::error::{LedgerError, Result};
use crate::timeline::Timeline;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Amounts keyed by spending category name.
pub type CategoryMap = BTreeMap<String, f64>;

/// Transactions keyed by category name, then month index.
pub type TransactionBook = BTreeMap<String, BTreeMap<usize, Vec<Transaction>>>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MonthRecord {
    #[schemars(description = "Regular income for the month.")]
    pub income: f64,

    #[schemars(description = "Base salary override recorded by the last salary change, if any.")]
    pub base_salary: Option<f64>,

    #[schemars(
        description = "Stored previous-savings value. Null means the carry is derived from the prior month."
    )]
    pub prev: Option<f64>,

    #[schemars(
        description = "When true the stored previous-savings value is authoritative, even if it differs from the calculated carry."
    )]
    pub prev_manual: bool,

    #[schemars(description = "Planned savings for the month.")]
    pub savings: f64,

    #[schemars(description = "The planned savings the user normally aims for.")]
    pub default_savings: f64,

    #[schemars(description = "One-off additions to savings (income splits, absorbed rollovers).")]
    pub savings_extra: f64,

    #[schemars(description = "One-off extra income received this month.")]
    pub extra_income: f64,

    #[schemars(description = "Per-category budget additions coming from redistributed obligation changes.")]
    pub bonus: CategoryMap,

    #[schemars(description = "Per-category budget additions coming from one-off extra income.")]
    pub extra: CategoryMap,

    #[schemars(description = "Previous savings already spent to cover overspend on individual transactions.")]
    pub prev_debit: f64,

    #[schemars(description = "Whether last month's leftovers were already moved into savings.")]
    pub rollover_absorbed: bool,
}

impl MonthRecord {
    pub fn bonus_for(&self, category: &str) -> f64 {
        self.bonus.get(category).copied().unwrap_or(0.0)
    }

    pub fn extra_for(&self, category: &str) -> f64 {
        self.extra.get(category).copied().unwrap_or(0.0)
    }

    /// Everything layered on top of a category's base budget.
    pub fn overlay_for(&self, category: &str) -> f64 {
        self.bonus_for(category) + self.extra_for(category)
    }

    pub fn planned_savings_total(&self) -> f64 {
        self.savings + self.savings_extra
    }

    pub fn clear_overlays(&mut self) {
        self.bonus.clear();
        self.extra.clear();
        self.savings_extra = 0.0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FixedObligation {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub amounts: Timeline<f64>,
    #[serde(default)]
    pub paid: Timeline<bool>,
}

impl FixedObligation {
    pub fn amount(&self, month: usize) -> f64 {
        self.amounts.get(month)
    }

    pub fn is_paid(&self, month: usize) -> bool {
        self.paid.get(month)
    }

    /// An obligation with nothing left to pay inside the horizon counts as deleted.
    pub fn is_deleted(&self, horizon: usize) -> bool {
        self.amounts.is_all_zero(horizon)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CategoryBudget {
    pub budget: Timeline<f64>,
    pub spent: Timeline<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompensationSource {
    #[schemars(description = "Move budget over from another spending category.")]
    OtherCategory { category: String },

    #[schemars(description = "Reduce this month's planned savings.")]
    PlannedSavings,

    #[schemars(description = "Draw from savings carried over from earlier months.")]
    PreviousSavings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Compensation {
    pub source: CompensationSource,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transaction {
    pub id: u64,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub compensation: Option<Compensation>,
}

/// How one piece of extra income was divided up.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct IncomeSplitRecord {
    pub amount: f64,
    pub save: f64,
    pub categories: CategoryMap,
}

/// Opaque revision token handed out by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Revision(pub String);

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn default_horizon() -> usize {
    DEFAULT_HORIZON
}

fn default_next_id() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FinancialDocument {
    #[serde(default = "default_horizon")]
    #[schemars(description = "Number of months covered by the plan.")]
    pub horizon: usize,

    #[serde(default)]
    pub records: Timeline<MonthRecord>,

    #[serde(default)]
    pub obligations: Vec<FixedObligation>,

    #[serde(default)]
    #[schemars(description = "Variable spending categories keyed by name.")]
    pub categories: BTreeMap<String, CategoryBudget>,

    #[serde(default)]
    pub transactions: TransactionBook,

    #[serde(default)]
    pub income_splits: BTreeMap<usize, Vec<IncomeSplitRecord>>,

    #[serde(default)]
    pub auto_rollover: bool,

    #[serde(default = "default_next_id")]
    pub next_transaction_id: u64,

    #[serde(default = "default_next_id")]
    pub next_obligation_id: u64,

    #[serde(default)]
    pub revision: Option<Revision>,
}

impl Default for FinancialDocument {
    fn default() -> Self {
        Self::new(DEFAULT_HORIZON, Vec::<String>::new())
    }
}

impl FinancialDocument {
    pub fn new<I, S>(horizon: usize, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            horizon,
            records: Timeline::new(),
            obligations: Vec::new(),
            categories: categories
                .into_iter()
                .map(|name| (name.into(), CategoryBudget::default()))
                .collect(),
            transactions: BTreeMap::new(),
            income_splits: BTreeMap::new(),
            auto_rollover: false,
            next_transaction_id: 1,
            next_obligation_id: 1,
            revision: None,
        }
    }

    pub fn months(&self) -> Range<usize> {
        0..self.horizon
    }

    pub fn check_month(&self, month: usize) -> Result<()> {
        if month >= self.horizon {
            return Err(LedgerError::MonthOutOfRange {
                month,
                horizon: self.horizon,
            });
        }
        Ok(())
    }

    pub fn record(&self, month: usize) -> MonthRecord {
        self.records.get(month)
    }

    pub fn record_mut(&mut self, month: usize) -> &mut MonthRecord {
        self.records.get_mut(month)
    }

    pub fn category_names(&self) -> impl Iterator<Item = &String> {
        self.categories.keys()
    }

    pub fn category(&self, name: &str) -> Result<&CategoryBudget> {
        self.categories
            .get(name)
            .ok_or_else(|| LedgerError::UnknownCategory(name.to_string()))
    }

    pub fn category_mut(&mut self, name: &str) -> Result<&mut CategoryBudget> {
        self.categories
            .get_mut(name)
            .ok_or_else(|| LedgerError::UnknownCategory(name.to_string()))
    }

    /// Base budget plus bonus and extra overlays.
    pub fn category_total(&self, name: &str, month: usize) -> f64 {
        let base = self
            .categories
            .get(name)
            .map(|c| c.budget.get(month))
            .unwrap_or(0.0);
        let record = self.records.get_ref(month);
        base + record.map(|r| r.overlay_for(name)).unwrap_or(0.0)
    }

    pub fn fixed_total(&self, month: usize) -> f64 {
        self.obligations.iter().map(|o| o.amount(month)).sum()
    }

    pub fn fixed_paid(&self, month: usize) -> f64 {
        self.obligations
            .iter()
            .filter(|o| o.is_paid(month))
            .map(|o| o.amount(month))
            .sum()
    }

    /// Income plus extra income minus everything owed to fixed obligations.
    pub fn available(&self, month: usize) -> f64 {
        let record = self.record(month);
        record.income + record.extra_income - self.fixed_total(month)
    }

    pub fn obligation(&self, id: u64) -> Result<&FixedObligation> {
        self.obligations
            .iter()
            .find(|o| o.id == id)
            .ok_or(LedgerError::UnknownObligation(id))
    }

    pub fn obligation_mut(&mut self, id: u64) -> Result<&mut FixedObligation> {
        self.obligations
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(LedgerError::UnknownObligation(id))
    }

    /// Drops obligations whose amounts are zero across the whole horizon.
    pub fn prune_obligations(&mut self) -> usize {
        let horizon = self.horizon;
        let before = self.obligations.len();
        self.obligations.retain(|o| !o.is_deleted(horizon));
        before - self.obligations.len()
    }

    pub fn transactions_for(&self, category: &str, month: usize) -> &[Transaction] {
        self.transactions
            .get(category)
            .and_then(|by_month| by_month.get(&month))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(FinancialDocument)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> FinancialDocument {
        let mut doc = FinancialDocument::new(12, ["groceries", "leisure"]);
        doc.record_mut(0).income = 10_000.0;
        doc.record_mut(0).extra_income = 500.0;
        doc.record_mut(0).bonus.insert("groceries".to_string(), 40.0);
        doc.obligations.push(FixedObligation {
            id: 1,
            name: "Rent".to_string(),
            amounts: Timeline::filled(0..12, 2_000.0),
            paid: Timeline::filled(0..1, true),
        });
        doc.category_mut("groceries").unwrap().budget.set(0, 1_000.0);
        doc
    }

    #[test]
    fn test_available_funds() {
        let doc = sample_document();
        assert_eq!(doc.available(0), 8_500.0);
        assert_eq!(doc.fixed_paid(0), 2_000.0);
        assert_eq!(doc.fixed_paid(1), 0.0);
        assert_eq!(doc.category_total("groceries", 0), 1_040.0);
    }

    #[test]
    fn test_prune_removes_all_zero_obligations() {
        let mut doc = sample_document();
        doc.obligations.push(FixedObligation {
            id: 2,
            name: "Gym".to_string(),
            amounts: Timeline::filled(0..12, 0.0),
            paid: Timeline::new(),
        });
        assert_eq!(doc.prune_obligations(), 1);
        assert!(doc.obligation(2).is_err());
        assert!(doc.obligation(1).is_ok());
    }

    #[test]
    fn test_unknown_category() {
        let doc = sample_document();
        assert!(matches!(
            doc.category("travel"),
            Err(LedgerError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = FinancialDocument::schema_as_json().unwrap();
        assert!(schema_json.contains("records"));
        assert!(schema_json.contains("obligations"));
        assert!(schema_json.contains("prev_manual"));
    }

    #[test]
    fn test_serialization() {
        let doc = sample_document();
        let json = doc.to_json().unwrap();
        let back = FinancialDocument::from_json(&json).unwrap();
        assert_eq!(back, doc);
    }
}
