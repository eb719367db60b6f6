//! Derives the per-month savings, overspend and rollover view from a stored document.
//!
//! The calculation walks the horizon in order with a running savings carry seeded from month 0's
//! stored previous savings. Overspend is first absorbed by the month's planned savings, then by
//! the carried previous savings; anything beyond that marks the month as critical. A second pass
//! looks back one month to find leftover category budget that may be rolled into savings.

use crate::calendar::MonthCalendar;
use crate::config::LedgerConfig;
use crate::schema::{CategoryMap, FinancialDocument};
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    /// Base budget plus bonus and extra overlays.
    pub budget: f64,
    pub spent: f64,
    /// `budget - spent`; negative when the category is overspent.
    pub remaining: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyResult {
    pub month: usize,
    pub label: String,
    /// Previous savings as reported for this month.
    pub previous_savings: f64,
    /// Planned savings after overspend. Negative only in the critical branch.
    pub actual_savings: f64,
    /// Running savings handed to the next month.
    pub total_savings: f64,
    pub balance: f64,
    pub fixed_total: f64,
    pub fixed_paid: f64,
    pub categories: BTreeMap<String, CategoryResult>,
    pub overspend: f64,
    /// Part of the overspend paid out of previous savings.
    pub drawn_from_previous: f64,
    pub warnings: Vec<String>,
    pub critical: bool,
    pub rollover_eligible: bool,
    /// Positive leftovers from the previous month, per category.
    pub rollover_amounts: CategoryMap,
    pub rollover_days_remaining: i64,
}

impl MonthlyResult {
    pub fn warning_text(&self) -> String {
        self.warnings.join(" ")
    }

    pub fn rollover_total(&self) -> f64 {
        self.rollover_amounts.values().sum()
    }

    pub fn rollover_window_open(&self) -> bool {
        self.rollover_eligible && self.rollover_days_remaining > 0
    }
}

pub struct LedgerCalculator<'a> {
    document: &'a FinancialDocument,
    calendar: &'a MonthCalendar,
    config: &'a LedgerConfig,
}

impl<'a> LedgerCalculator<'a> {
    pub fn new(
        document: &'a FinancialDocument,
        calendar: &'a MonthCalendar,
        config: &'a LedgerConfig,
    ) -> Self {
        Self {
            document,
            calendar,
            config,
        }
    }

    pub fn compute(&self, now: DateTime<Utc>) -> Vec<MonthlyResult> {
        debug!(
            "Computing ledger for {} months across {} categories and {} fixed obligations",
            self.document.horizon,
            self.document.categories.len(),
            self.document.obligations.len()
        );

        let mut results = self.first_pass();
        self.apply_rollover(&mut results, now);
        results
    }

    fn first_pass(&self) -> Vec<MonthlyResult> {
        let doc = self.document;
        let mut results = Vec::with_capacity(doc.horizon);
        let mut carried = doc.record(0).prev.unwrap_or(0.0);

        for month in doc.months() {
            let record = doc.record(month);
            let calculated_carry = carried;

            let mut working_prev = if record.prev_manual {
                record.prev.unwrap_or(calculated_carry)
            } else {
                calculated_carry
            };
            working_prev -= record.prev_debit;

            let fixed_total = doc.fixed_total(month);
            let fixed_paid = doc.fixed_paid(month);

            let mut categories = BTreeMap::new();
            let mut overspend = 0.0;
            let mut total_spent = 0.0;
            for (name, category) in &doc.categories {
                let budget = category.budget.get(month) + record.overlay_for(name);
                let spent = category.spent.get(month);
                overspend += (spent - budget).max(0.0);
                total_spent += spent;
                categories.insert(
                    name.clone(),
                    CategoryResult {
                        budget,
                        spent,
                        remaining: budget - spent,
                    },
                );
            }

            let planned = record.planned_savings_total();
            let mut actual_savings = planned - overspend;
            let mut warnings = Vec::new();
            let mut critical = false;
            let mut drawn_from_previous = 0.0;

            if overspend > 0.0 {
                if overspend > planned {
                    let shortfall = overspend - planned;
                    if working_prev >= shortfall {
                        actual_savings = 0.0;
                        working_prev -= shortfall;
                        drawn_from_previous = shortfall;
                        warnings.push(format!(
                            "Overspent by {:.2}; {:.2} drawn from previous savings.",
                            overspend, shortfall
                        ));
                    } else {
                        let residual = shortfall - working_prev;
                        drawn_from_previous = working_prev.max(0.0);
                        critical = true;
                        working_prev = 0.0;
                        actual_savings = -residual;
                        warnings.push(format!(
                            "Critical: overspent by {:.2}, exceeding planned and previous savings; {:.2} is uncovered.",
                            overspend, residual
                        ));
                    }
                } else {
                    warnings.push(format!(
                        "Overspent by {:.2}; planned savings reduced to {:.2}.",
                        overspend, actual_savings
                    ));
                }
            }

            let previous_savings = if month == 0 {
                record.prev.unwrap_or(0.0) - record.prev_debit
            } else if record.prev_manual {
                let stored = record.prev.unwrap_or(calculated_carry);
                if (stored - calculated_carry).abs() > self.config.carry_mismatch_tolerance {
                    warnings.push(format!(
                        "Manual previous savings {:.2} differs from the calculated carry {:.2}.",
                        stored, calculated_carry
                    ));
                }
                stored - record.prev_debit
            } else {
                working_prev
            };

            let balance = record.income + record.extra_income + previous_savings
                - total_spent
                - fixed_paid;

            let total_savings = working_prev + actual_savings;
            if total_savings < 0.0 && !critical {
                critical = true;
                warnings.push(format!(
                    "Critical: total savings are negative ({:.2}).",
                    total_savings
                ));
            }

            if critical {
                warn!(
                    "Month {} ({}) is critical: overspend {:.2}, total savings {:.2}",
                    month,
                    self.calendar.label(month),
                    overspend,
                    total_savings
                );
            }

            carried = total_savings;

            results.push(MonthlyResult {
                month,
                label: self.calendar.label(month),
                previous_savings,
                actual_savings,
                total_savings,
                balance,
                fixed_total,
                fixed_paid,
                categories,
                overspend,
                drawn_from_previous,
                warnings,
                critical,
                rollover_eligible: false,
                rollover_amounts: CategoryMap::new(),
                rollover_days_remaining: 0,
            });
        }

        results
    }

    fn apply_rollover(&self, results: &mut [MonthlyResult], now: DateTime<Utc>) {
        for month in 1..results.len() {
            let amounts: CategoryMap = results[month - 1]
                .categories
                .iter()
                .filter(|(_, c)| c.remaining > 0.0)
                .map(|(name, c)| (name.clone(), c.remaining))
                .collect();

            let Some(item) = self.calendar.get(month) else {
                results[month].rollover_amounts = amounts;
                continue;
            };

            let start = item.start_instant();
            let started = now >= start;
            let absorbed = self.document.record(month).rollover_absorbed;
            let deadline = start + Duration::days(self.config.rollover_window_days);

            let result = &mut results[month];
            result.rollover_eligible = started && !absorbed && !amounts.is_empty();
            result.rollover_days_remaining = days_until(now, deadline);
            result.rollover_amounts = amounts;
        }
    }
}

/// Whole days left until `deadline`, rounded up, never negative.
fn days_until(now: DateTime<Utc>, deadline: DateTime<Utc>) -> i64 {
    let ms = (deadline - now).num_milliseconds();
    if ms <= 0 {
        0
    } else {
        (ms + DAY_MS - 1) / DAY_MS
    }
}

pub fn compute_monthly_results(
    document: &FinancialDocument,
    calendar: &MonthCalendar,
    now: DateTime<Utc>,
    config: &LedgerConfig,
) -> Vec<MonthlyResult> {
    LedgerCalculator::new(document, calendar, config).compute(now)
}
