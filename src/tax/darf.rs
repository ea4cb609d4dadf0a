//! DARF obligation resolution
//!
//! Translates a monthly bucket slice into an actionable payment obligation:
//! due date (last business day of the month following the competency month,
//! rolled backward over weekends), payability under the R$ 10,00 minimum,
//! and the pending/paid status preserved from external writes.

use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::positions::{CompetencyMonth, TradeBucket};
use crate::tax::monthly::MonthlyResult;
use crate::tax::{PaymentStatus, TaxRules};

/// Obligation lifecycle. `Waived` corresponds to a payable amount under the
/// minimum: the figure is reported for transparency but no payment is
/// required, and the pending/paid machine never engages. `Pending` and
/// `Paid` flip only through external status writes; a recomputation that
/// changes the underlying figures is the only way back out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObligationState {
    Waived,
    Pending,
    Paid,
}

/// One DARF for a competency month and bucket.
#[derive(Debug, Clone, Serialize)]
pub struct DarfObligation {
    pub month: CompetencyMonth,
    pub bucket: TradeBucket,
    pub darf_code: &'static str,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    /// `amount >= minimum_darf`; when false the obligation is waived.
    pub required: bool,
    pub state: ObligationState,
    pub withholding_incomplete: bool,
}

/// DARF due date: last business day of the month following the competency
/// month. Saturdays and Sundays roll backward to Friday; national holidays
/// are out of scope.
pub fn due_date(month: CompetencyMonth) -> NaiveDate {
    let mut date = month.next().last_day();
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date = date.pred_opt().expect("date has a predecessor");
    }
    date
}

/// Resolve one bucket slice into an obligation. Months with no tax movement
/// at all (nothing due, nothing payable) produce no obligation.
pub fn resolve(result: &MonthlyResult, bucket: TradeBucket, rules: &TaxRules) -> Option<DarfObligation> {
    let slice = result.bucket(bucket);
    if slice.tax_due.is_zero() && slice.tax_payable.is_zero() {
        return None;
    }

    let required = slice.tax_payable >= rules.minimum_darf;
    let state = if !required {
        ObligationState::Waived
    } else {
        match slice.payment_status {
            PaymentStatus::Pending => ObligationState::Pending,
            PaymentStatus::Paid => ObligationState::Paid,
        }
    };

    Some(DarfObligation {
        month: result.month,
        bucket,
        darf_code: bucket.darf_code(),
        amount: slice.tax_payable,
        due_date: due_date(result.month),
        required,
        state,
        withholding_incomplete: slice.withholding_incomplete,
    })
}

/// Resolve every obligation across the computed months, in calendar order.
pub fn resolve_all(results: &[MonthlyResult], rules: &TaxRules) -> Vec<DarfObligation> {
    results
        .iter()
        .flat_map(|result| {
            TradeBucket::ALL
                .iter()
                .filter_map(|bucket| resolve(result, *bucket, rules))
                .collect::<Vec<_>>()
        })
        .collect()
}
