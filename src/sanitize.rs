//! Turns an untrusted stored document into a well-typed [`FinancialDocument`].
//!
//! Nothing here fails: malformed fields fall back to safe defaults and every fallback is
//! reported as a [`Coercion`]. Both the current sparse format (index-keyed objects) and the
//! older dense format (one array slot per month) are accepted for time series.

use crate::config::{DEFAULT_HORIZON, MAX_HORIZON};
use crate::schema::{
    CategoryBudget, Compensation, CompensationSource, FinancialDocument, FixedObligation,
    IncomeSplitRecord, MonthRecord, Transaction,
};
use crate::timeline::Timeline;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Coercion {
    pub path: String,
    pub problem: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub document: FinancialDocument,
    pub coercions: Vec<Coercion>,
}

pub fn sanitize_document(raw: &Value) -> Sanitized {
    let mut sanitizer = Sanitizer::default();
    let document = sanitizer.document(raw);
    if !sanitizer.coercions.is_empty() {
        warn!(
            "Stored document needed {} coercion(s) on load",
            sanitizer.coercions.len()
        );
    }
    Sanitized {
        document,
        coercions: sanitizer.coercions,
    }
}

#[derive(Default)]
struct Sanitizer {
    coercions: Vec<Coercion>,
}

impl Sanitizer {
    fn note(&mut self, path: &str, problem: impl Into<String>) {
        let problem = problem.into();
        debug!("Coerced {}: {}", path, problem);
        self.coercions.push(Coercion {
            path: path.to_string(),
            problem,
        });
    }

    fn document(&mut self, raw: &Value) -> FinancialDocument {
        let Some(root) = raw.as_object() else {
            self.note("$", "document is not an object; starting empty");
            return FinancialDocument::default();
        };

        let horizon = match root.get("horizon") {
            None => DEFAULT_HORIZON,
            Some(value) => match value.as_u64() {
                Some(h) if h > MAX_HORIZON as u64 => {
                    self.note("horizon", format!("horizon {} clamped to {}", h, MAX_HORIZON));
                    MAX_HORIZON
                }
                Some(h) if h > 0 => h as usize,
                _ => {
                    self.note("horizon", format!("invalid horizon {}; using {}", value, DEFAULT_HORIZON));
                    DEFAULT_HORIZON
                }
            },
        };

        let mut doc = FinancialDocument::new(horizon, Vec::<String>::new());
        doc.records = self.records(root.get("records"), horizon);
        doc.categories = self.categories(root.get("categories"), horizon);
        doc.obligations = self.obligations(root.get("obligations"), horizon);
        doc.transactions = self.transactions(root.get("transactions"), &doc.categories, horizon);
        doc.income_splits = self.income_splits(root.get("income_splits"), horizon);
        doc.auto_rollover = self.boolean("auto_rollover", root.get("auto_rollover"));

        let max_obligation = doc.obligations.iter().map(|o| o.id).max().unwrap_or(0);
        doc.next_obligation_id = self
            .counter("next_obligation_id", root.get("next_obligation_id"))
            .max(max_obligation + 1);

        let max_transaction = doc
            .transactions
            .values()
            .flat_map(|by_month| by_month.values())
            .flatten()
            .map(|t| t.id)
            .max()
            .unwrap_or(0);
        doc.next_transaction_id = self
            .counter("next_transaction_id", root.get("next_transaction_id"))
            .max(max_transaction + 1);

        doc
    }

    fn number(&mut self, path: &str, value: Option<&Value>) -> f64 {
        match value {
            None | Some(Value::Null) => 0.0,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() => v,
                _ => {
                    self.note(path, "non-finite number replaced by 0");
                    0.0
                }
            },
            Some(Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    self.note(path, format!("numeric string '{}' converted", s));
                    v
                }
                _ => {
                    self.note(path, format!("'{}' is not a number; using 0", s));
                    0.0
                }
            },
            Some(other) => {
                self.note(path, format!("expected a number, found {}; using 0", other));
                0.0
            }
        }
    }

    fn optional_number(&mut self, path: &str, value: Option<&Value>) -> Option<f64> {
        match value {
            None | Some(Value::Null) => None,
            some => Some(self.number(path, some)),
        }
    }

    fn boolean(&mut self, path: &str, value: Option<&Value>) -> bool {
        match value {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => {
                self.note(path, format!("number {} read as a flag", n));
                n.as_f64().map(|v| v != 0.0).unwrap_or(false)
            }
            Some(other) => {
                self.note(path, format!("expected a flag, found {}; using false", other));
                false
            }
        }
    }

    fn counter(&mut self, path: &str, value: Option<&Value>) -> u64 {
        match value {
            None | Some(Value::Null) => 1,
            Some(v) => v.as_u64().unwrap_or_else(|| {
                self.note(path, format!("invalid counter {}; recomputed", v));
                1
            }),
        }
    }

    fn number_map(&mut self, path: &str, value: Option<&Value>) -> BTreeMap<String, f64> {
        match value {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let amount = self.number(&format!("{}.{}", path, k), Some(v));
                    (k.clone(), amount)
                })
                .collect(),
            Some(other) => {
                self.note(path, format!("expected an object, found {}; dropped", other));
                BTreeMap::new()
            }
        }
    }

    /// Collects `(month, value)` pairs from either a dense array or an index-keyed object.
    fn slots<'v>(&mut self, path: &str, value: Option<&'v Value>, horizon: usize) -> Vec<(usize, &'v Value)> {
        let mut slots = Vec::new();
        match value {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for (month, item) in items.iter().enumerate() {
                    slots.push((month, item));
                }
            }
            Some(Value::Object(map)) => {
                for (key, item) in map {
                    match key.parse::<usize>() {
                        Ok(month) => slots.push((month, item)),
                        Err(_) => self.note(path, format!("non-numeric month key '{}' dropped", key)),
                    }
                }
            }
            Some(other) => {
                self.note(path, format!("expected a series, found {}; dropped", other));
            }
        }

        let before = slots.len();
        slots.retain(|(month, _)| *month < horizon);
        if slots.len() < before {
            self.note(
                path,
                format!("{} month(s) beyond the {}-month horizon dropped", before - slots.len(), horizon),
            );
        }
        slots
    }

    fn number_series(&mut self, path: &str, value: Option<&Value>, horizon: usize) -> Timeline<f64> {
        let mut timeline = Timeline::new();
        for (month, item) in self.slots(path, value, horizon) {
            if item.is_null() {
                continue;
            }
            let amount = self.number(&format!("{}[{}]", path, month), Some(item));
            timeline.set(month, amount);
        }
        timeline
    }

    fn flag_series(&mut self, path: &str, value: Option<&Value>, horizon: usize) -> Timeline<bool> {
        let mut timeline = Timeline::new();
        for (month, item) in self.slots(path, value, horizon) {
            let flag = self.boolean(&format!("{}[{}]", path, month), Some(item));
            if flag {
                timeline.set(month, true);
            }
        }
        timeline
    }

    fn records(&mut self, value: Option<&Value>, horizon: usize) -> Timeline<MonthRecord> {
        let mut records = Timeline::new();
        for (month, item) in self.slots("records", value, horizon) {
            let path = format!("records[{}]", month);
            let Some(fields) = item.as_object() else {
                if !item.is_null() {
                    self.note(&path, "record is not an object; using defaults");
                }
                continue;
            };
            records.set(month, self.record(&path, fields));
        }
        records
    }

    fn record(&mut self, path: &str, fields: &Map<String, Value>) -> MonthRecord {
        let field = |name: &str| format!("{}.{}", path, name);
        MonthRecord {
            income: self.number(&field("income"), fields.get("income")),
            base_salary: self.optional_number(&field("base_salary"), fields.get("base_salary")),
            prev: self.optional_number(&field("prev"), fields.get("prev")),
            prev_manual: self.boolean(&field("prev_manual"), fields.get("prev_manual")),
            savings: self.number(&field("savings"), fields.get("savings")),
            default_savings: self.number(&field("default_savings"), fields.get("default_savings")),
            savings_extra: self.number(&field("savings_extra"), fields.get("savings_extra")),
            extra_income: self.number(&field("extra_income"), fields.get("extra_income")),
            bonus: self.number_map(&field("bonus"), fields.get("bonus")),
            extra: self.number_map(&field("extra"), fields.get("extra")),
            prev_debit: self.number(&field("prev_debit"), fields.get("prev_debit")),
            rollover_absorbed: self.boolean(&field("rollover_absorbed"), fields.get("rollover_absorbed")),
        }
    }

    fn categories(&mut self, value: Option<&Value>, horizon: usize) -> BTreeMap<String, CategoryBudget> {
        let mut categories = BTreeMap::new();
        match value {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (name, item) in map {
                    let path = format!("categories.{}", name);
                    let budget = self.number_series(&format!("{}.budget", path), item.get("budget"), horizon);
                    let spent = self.number_series(&format!("{}.spent", path), item.get("spent"), horizon);
                    categories.insert(name.clone(), CategoryBudget { budget, spent });
                }
            }
            Some(other) => self.note("categories", format!("expected an object, found {}; dropped", other)),
        }
        categories
    }

    fn obligations(&mut self, value: Option<&Value>, horizon: usize) -> Vec<FixedObligation> {
        let Some(items) = value.and_then(Value::as_array) else {
            if value.is_some_and(|v| !v.is_null()) {
                self.note("obligations", "expected a list; dropped");
            }
            return Vec::new();
        };

        let mut obligations: Vec<FixedObligation> = Vec::new();
        let mut missing_ids = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let path = format!("obligations[{}]", i);
            let name = match item.get("name").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => {
                    self.note(&path, "missing name");
                    format!("Obligation {}", i + 1)
                }
            };
            let amounts = self.number_series(&format!("{}.amounts", path), item.get("amounts"), horizon);
            let paid = self.flag_series(&format!("{}.paid", path), item.get("paid"), horizon);

            let id = item.get("id").and_then(Value::as_u64);
            let duplicate = id.is_some_and(|id| obligations.iter().any(|o| o.id == id));
            if id.is_none() || duplicate {
                self.note(&path, "missing or duplicate id; reassigned");
                missing_ids.push(obligations.len());
            }

            let obligation = FixedObligation {
                id: id.unwrap_or(0),
                name,
                amounts,
                paid,
            };
            if obligation.is_deleted(horizon) {
                self.note(&path, "all amounts are zero; pruned");
                missing_ids.retain(|&idx| idx != obligations.len());
                continue;
            }
            obligations.push(obligation);
        }

        let mut next = obligations.iter().map(|o| o.id).max().unwrap_or(0) + 1;
        for idx in missing_ids {
            obligations[idx].id = next;
            next += 1;
        }
        obligations
    }

    fn transactions(
        &mut self,
        value: Option<&Value>,
        categories: &BTreeMap<String, CategoryBudget>,
        horizon: usize,
    ) -> crate::schema::TransactionBook {
        let mut book = crate::schema::TransactionBook::new();
        let Some(map) = value.and_then(Value::as_object) else {
            return book;
        };

        for (category, by_month) in map {
            if !categories.contains_key(category) {
                self.note(
                    &format!("transactions.{}", category),
                    "transactions for an unknown category dropped",
                );
                continue;
            }
            let path = format!("transactions.{}", category);
            for (month, list) in self.slots(&path, Some(by_month), horizon) {
                let Some(items) = list.as_array() else {
                    continue;
                };
                for (i, item) in items.iter().enumerate() {
                    match serde_json::from_value::<Transaction>(item.clone()) {
                        Ok(mut transaction) => {
                            let orphaned = matches!(
                                &transaction.compensation,
                                Some(Compensation {
                                    source: CompensationSource::OtherCategory { category: other },
                                    ..
                                }) if !categories.contains_key(other)
                            );
                            if orphaned {
                                self.note(
                                    &format!("{}[{}][{}].compensation", path, month, i),
                                    "funding category no longer exists; compensation dropped",
                                );
                                transaction.compensation = None;
                            }
                            book.entry(category.clone())
                                .or_default()
                                .entry(month)
                                .or_default()
                                .push(transaction);
                        }
                        Err(e) => self.note(
                            &format!("{}[{}][{}]", path, month, i),
                            format!("unreadable transaction dropped: {}", e),
                        ),
                    }
                }
            }
        }
        book
    }

    fn income_splits(&mut self, value: Option<&Value>, horizon: usize) -> BTreeMap<usize, Vec<IncomeSplitRecord>> {
        let mut splits = BTreeMap::new();
        for (month, list) in self.slots("income_splits", value, horizon) {
            let Some(items) = list.as_array() else {
                continue;
            };
            for (i, item) in items.iter().enumerate() {
                match serde_json::from_value::<IncomeSplitRecord>(item.clone()) {
                    Ok(record) => splits.entry(month).or_insert_with(Vec::new).push(record),
                    Err(e) => self.note(
                        &format!("income_splits[{}][{}]", month, i),
                        format!("unreadable split dropped: {}", e),
                    ),
                }
            }
        }
        splits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_document_round_trips_without_coercions() {
        let mut doc = FinancialDocument::new(6, ["a", "b"]);
        doc.record_mut(0).income = 1_000.0;
        doc.record_mut(2).prev = Some(50.0);
        doc.category_mut("a").unwrap().budget.set(1, 300.0);
        doc.obligations.push(FixedObligation {
            id: 4,
            name: "Rent".to_string(),
            amounts: Timeline::filled(0..6, 500.0),
            paid: Timeline::filled(0..2, true),
        });
        doc.next_obligation_id = 5;

        let value = serde_json::to_value(&doc).unwrap();
        let sanitized = sanitize_document(&value);
        assert!(sanitized.coercions.is_empty(), "{:?}", sanitized.coercions);
        assert_eq!(sanitized.document, doc);
    }

    #[test]
    fn test_legacy_dense_arrays_are_accepted() {
        let raw = json!({
            "horizon": 3,
            "records": [{ "income": 100 }, { "income": "200" }, null],
            "categories": { "a": { "budget": [10, 20, 30], "spent": [1, null, 3] } },
            "obligations": [{ "id": 1, "name": "Gym", "amounts": [5, 5, 5], "paid": [1, 0, true] }]
        });
        let sanitized = sanitize_document(&raw);
        let doc = &sanitized.document;
        assert_eq!(doc.record(1).income, 200.0);
        assert_eq!(doc.category("a").unwrap().budget.get(2), 30.0);
        assert_eq!(doc.category("a").unwrap().spent.get(1), 0.0);
        assert!(doc.obligations[0].is_paid(0));
        assert!(!doc.obligations[0].is_paid(1));
        assert!(sanitized.coercions.iter().any(|c| c.path == "records[1].income"));
    }

    #[test]
    fn test_bad_fields_fall_back_to_defaults() {
        let raw = json!({
            "horizon": -4,
            "records": { "0": { "savings": "lots", "prev_manual": "yes" }, "999": { "income": 1 } },
            "obligations": [
                { "name": "Zeroed", "amounts": [0, 0] },
                { "amounts": { "0": 40 } },
                { "id": 3, "name": "Dup", "amounts": [1] },
                { "id": 3, "name": "Dup again", "amounts": [2] }
            ],
            "transactions": { "ghost": { "0": [] } },
            "next_obligation_id": 1
        });
        let sanitized = sanitize_document(&raw);
        let doc = &sanitized.document;
        assert_eq!(doc.horizon, DEFAULT_HORIZON);
        assert_eq!(doc.record(0).savings, 0.0);
        assert!(!doc.record(0).prev_manual);
        assert!(doc.records.get_ref(999).is_none());
        assert_eq!(doc.obligations.len(), 3);
        let mut ids: Vec<u64> = doc.obligations.iter().map(|o| o.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        assert!(doc.next_obligation_id > *ids.iter().max().unwrap());
        assert!(doc.transactions.is_empty());
        assert!(sanitized.coercions.len() >= 6);
    }

    #[test]
    fn test_not_an_object() {
        let sanitized = sanitize_document(&json!([1, 2, 3]));
        assert_eq!(sanitized.document, FinancialDocument::default());
        assert_eq!(sanitized.coercions.len(), 1);
    }

    #[test]
    fn test_oversized_horizon_is_clamped() {
        let sanitized = sanitize_document(&json!({ "horizon": 1_000_000_000_000u64 }));
        assert_eq!(sanitized.document.horizon, MAX_HORIZON);
        assert_eq!(sanitized.coercions.len(), 1);
        assert_eq!(sanitized.coercions[0].path, "horizon");

        let sanitized = sanitize_document(&json!({ "horizon": MAX_HORIZON }));
        assert_eq!(sanitized.document.horizon, MAX_HORIZON);
        assert!(sanitized.coercions.is_empty());
    }

    #[test]
    fn test_compensation_from_missing_category_is_dropped() {
        let raw = json!({
            "horizon": 2,
            "categories": { "food": { "budget": [500, 500] } },
            "transactions": {
                "food": {
                    "0": [
                        {
                            "id": 1,
                            "amount": 80,
                            "timestamp": "2025-01-05T10:00:00Z",
                            "compensation": {
                                "source": { "kind": "other_category", "category": "travel" },
                                "amount": 30
                            }
                        },
                        {
                            "id": 2,
                            "amount": 20,
                            "timestamp": "2025-01-06T10:00:00Z",
                            "compensation": { "source": { "kind": "planned_savings" }, "amount": 20 }
                        }
                    ]
                }
            }
        });
        let sanitized = sanitize_document(&raw);
        let transactions = sanitized.document.transactions_for("food", 0);
        assert_eq!(transactions.len(), 2);
        assert!(transactions[0].compensation.is_none());
        assert!(transactions[1].compensation.is_some());
        assert_eq!(sanitized.coercions.len(), 1);
        assert_eq!(
            sanitized.coercions[0].path,
            "transactions.food[0][0].compensation"
        );
        assert_eq!(sanitized.document.next_transaction_id, 3);
    }
}
