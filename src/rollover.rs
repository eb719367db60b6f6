use crate::error::{LedgerError, Result};
use crate::ledger::MonthlyResult;
use crate::schema::FinancialDocument;
use log::info;

/// Moves last month's leftover category budget into this month's savings.
///
/// The leftover is booked as extra income that goes straight to savings, so the month's
/// budget stays balanced. `results` must come from the ledger calculator for `document`.
pub fn absorb_rollover(
    document: &FinancialDocument,
    month: usize,
    results: &[MonthlyResult],
) -> Result<FinancialDocument> {
    document.check_month(month)?;
    let result = results
        .get(month)
        .filter(|r| r.rollover_window_open())
        .ok_or(LedgerError::RolloverUnavailable(month))?;

    let amount = result.rollover_total();
    let mut doc = document.clone();
    let record = doc.record_mut(month);
    record.extra_income += amount;
    record.savings_extra += amount;
    record.rollover_absorbed = true;

    info!(
        "Rolled {:.2} of leftovers into savings for month {} ({})",
        amount, month, result.label
    );
    Ok(doc)
}

/// Absorbs every open rollover when the document has automatic rollover enabled. Returns the
/// new document and the months that were absorbed.
pub fn auto_absorb(
    document: &FinancialDocument,
    results: &[MonthlyResult],
) -> Result<(FinancialDocument, Vec<usize>)> {
    if !document.auto_rollover {
        return Ok((document.clone(), Vec::new()));
    }

    let mut doc = document.clone();
    let mut absorbed = Vec::new();
    for result in results.iter().filter(|r| r.rollover_window_open()) {
        doc = absorb_rollover(&doc, result.month, results)?;
        absorbed.push(result.month);
    }
    Ok((doc, absorbed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::MonthCalendar;
    use crate::config::LedgerConfig;
    use crate::ledger::compute_monthly_results;
    use crate::validator::BudgetValidator;
    use chrono::Duration;

    fn setup() -> (FinancialDocument, MonthCalendar) {
        let mut doc = FinancialDocument::new(3, ["food"]);
        for month in 0..3 {
            doc.record_mut(month).income = 1_000.0;
            doc.record_mut(month).savings = 400.0;
            doc.category_mut("food").unwrap().budget.set(month, 600.0);
        }
        doc.category_mut("food").unwrap().spent.set(0, 450.0);
        (doc, MonthCalendar::starting(2025, 1, 1, 3).unwrap())
    }

    #[test]
    fn test_absorb_moves_leftover_into_savings() {
        let (doc, calendar) = setup();
        let config = LedgerConfig::default();
        let now = calendar.get(1).unwrap().start_instant() + Duration::days(1);
        let results = compute_monthly_results(&doc, &calendar, now, &config);

        let next = absorb_rollover(&doc, 1, &results).unwrap();
        let record = next.record(1);
        assert_eq!(record.savings_extra, 150.0);
        assert_eq!(record.extra_income, 150.0);
        assert!(record.rollover_absorbed);
        assert!(BudgetValidator::new(&next, &config).validate_all().is_balanced());

        let again = compute_monthly_results(&next, &calendar, now, &config);
        assert!(!again[1].rollover_eligible);
        assert!(absorb_rollover(&next, 1, &again).is_err());
    }

    #[test]
    fn test_closed_window_rejected() {
        let (doc, calendar) = setup();
        let config = LedgerConfig::default();
        let now = calendar.get(1).unwrap().start_instant() + Duration::days(6);
        let results = compute_monthly_results(&doc, &calendar, now, &config);
        assert!(matches!(
            absorb_rollover(&doc, 1, &results),
            Err(LedgerError::RolloverUnavailable(1))
        ));
    }

    #[test]
    fn test_auto_absorb_respects_flag() {
        let (mut doc, calendar) = setup();
        let config = LedgerConfig::default();
        let now = calendar.get(1).unwrap().start_instant() + Duration::hours(3);
        let results = compute_monthly_results(&doc, &calendar, now, &config);

        let (unchanged, months) = auto_absorb(&doc, &results).unwrap();
        assert!(months.is_empty());
        assert_eq!(unchanged, doc);

        doc.auto_rollover = true;
        let (next, months) = auto_absorb(&doc, &results).unwrap();
        assert_eq!(months, vec![1]);
        assert!(next.record(1).rollover_absorbed);
    }
}
