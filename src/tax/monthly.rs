//! Monthly aggregation of closed positions
//!
//! Folds the chronologically ordered position stream into one record per
//! competency month, with both buckets' figures in the same record. Months
//! are a reporting grain over the running loss balances: the balance carried
//! out of a month is exactly the balance carried into the next, and months
//! with no activity still chain it through untouched.
//!
//! Within a month, gains and losses of a bucket net against each other
//! first; the monthly net gain is then compensated against the carried-in
//! balance. This is the grain at which the monthly apuração nets results.

use itertools::Itertools;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::positions::{ClosedPosition, CompetencyMonth, TradeBucket};
use crate::tax::{PaymentStatus, TaxRules};

/// One bucket's slice of a monthly result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketMonth {
    pub sales_volume: Decimal,
    pub cost_basis: Decimal,
    pub net_gain: Decimal,
    pub loss_carried_in: Decimal,
    /// Carried-in loss consumed by this month's net gain.
    pub compensated: Decimal,
    pub loss_carried_out: Decimal,
    pub taxable_profit: Decimal,
    /// Swing-trade monthly sales exemption. Affects tax only; loss
    /// accounting proceeds normally in an exempt month.
    pub exempt: bool,
    pub tax_due: Decimal,
    pub tax_withheld: Decimal,
    pub tax_payable: Decimal,
    /// At least one position this month carried no withholding data; the
    /// missing values were treated as zero and the month deserves review.
    pub withholding_incomplete: bool,
    pub payment_status: PaymentStatus,
}

impl BucketMonth {
    fn quiet(balance: Decimal, exempt: bool) -> Self {
        Self {
            sales_volume: Decimal::ZERO,
            cost_basis: Decimal::ZERO,
            net_gain: Decimal::ZERO,
            loss_carried_in: balance,
            compensated: Decimal::ZERO,
            loss_carried_out: balance,
            taxable_profit: Decimal::ZERO,
            exempt,
            tax_due: Decimal::ZERO,
            tax_withheld: Decimal::ZERO,
            tax_payable: Decimal::ZERO,
            withholding_incomplete: false,
            payment_status: PaymentStatus::Pending,
        }
    }
}

/// One record per competency month; both buckets live in the same record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyResult {
    pub month: CompetencyMonth,
    pub swing: BucketMonth,
    pub day_trade: BucketMonth,
}

impl MonthlyResult {
    pub fn bucket(&self, bucket: TradeBucket) -> &BucketMonth {
        match bucket {
            TradeBucket::Swing => &self.swing,
            TradeBucket::DayTrade => &self.day_trade,
        }
    }

    pub fn bucket_mut(&mut self, bucket: TradeBucket) -> &mut BucketMonth {
        match bucket {
            TradeBucket::Swing => &mut self.swing,
            TradeBucket::DayTrade => &mut self.day_trade,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct MonthTotals {
    sales: Decimal,
    cost: Decimal,
    net: Decimal,
    withheld: Decimal,
    withholding_incomplete: bool,
}

/// Fold sorted, validated positions into monthly results covering the
/// continuous month range from the first to the last closing. Pure and
/// deterministic; payment statuses come out as `Pending` and are merged by
/// the engine afterwards.
pub fn aggregate(positions: &[ClosedPosition], rules: &TaxRules) -> Vec<MonthlyResult> {
    let (Some(first), Some(last)) = (positions.first(), positions.last()) else {
        return Vec::new();
    };
    let (first, last) = (first.competency_month(), last.competency_month());

    let mut results = Vec::new();
    let mut totals_by_bucket: [BTreeMap<CompetencyMonth, MonthTotals>; 2] =
        [BTreeMap::new(), BTreeMap::new()];

    for (idx, bucket) in TradeBucket::ALL.iter().enumerate() {
        let groups = positions
            .iter()
            .filter(|p| p.bucket() == *bucket)
            .chunk_by(|p| p.competency_month());
        for (month, group) in &groups {
            let totals = totals_by_bucket[idx].entry(month).or_default();
            for position in group {
                totals.sales += position.sell_value;
                totals.cost += position.buy_value;
                totals.net += position.result;
                match position.tax_withheld {
                    Some(withheld) => totals.withheld += withheld,
                    None => totals.withholding_incomplete = true,
                }
            }
        }
    }

    let [swing_totals, day_totals] = totals_by_bucket;
    let mut swing_balance = Decimal::ZERO;
    let mut day_balance = Decimal::ZERO;
    let mut month = first;
    loop {
        let swing = match swing_totals.get(&month) {
            Some(totals) => close_month(TradeBucket::Swing, totals, swing_balance, rules),
            None => BucketMonth::quiet(swing_balance, true),
        };
        swing_balance = swing.loss_carried_out;

        let day_trade = match day_totals.get(&month) {
            Some(totals) => close_month(TradeBucket::DayTrade, totals, day_balance, rules),
            None => BucketMonth::quiet(day_balance, false),
        };
        day_balance = day_trade.loss_carried_out;

        results.push(MonthlyResult {
            month,
            swing,
            day_trade,
        });

        if month == last {
            break;
        }
        month = month.next();
    }

    results
}

fn close_month(
    bucket: TradeBucket,
    totals: &MonthTotals,
    carried_in: Decimal,
    rules: &TaxRules,
) -> BucketMonth {
    let (compensated, carried_out) = if totals.net > Decimal::ZERO {
        let compensated = carried_in.min(totals.net);
        (compensated, carried_in - compensated)
    } else {
        (Decimal::ZERO, carried_in + totals.net.abs())
    };

    let taxable_profit = (totals.net - compensated).max(Decimal::ZERO);
    let exempt =
        bucket == TradeBucket::Swing && totals.sales <= rules.swing_exemption_ceiling;
    let tax_due = if exempt {
        Decimal::ZERO
    } else {
        (taxable_profit * rules.rate(bucket)).round_dp(2)
    };
    let tax_payable = (tax_due - totals.withheld).max(Decimal::ZERO).round_dp(2);

    BucketMonth {
        sales_volume: totals.sales,
        cost_basis: totals.cost,
        net_gain: totals.net,
        loss_carried_in: carried_in,
        compensated,
        loss_carried_out: carried_out,
        taxable_profit,
        exempt,
        tax_due,
        tax_withheld: totals.withheld,
        tax_payable,
        withholding_incomplete: totals.withholding_incomplete,
        payment_status: PaymentStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn position(
        month: u32,
        day: u32,
        result: Decimal,
        sell_value: Decimal,
        day_trade: bool,
        withheld: Option<Decimal>,
    ) -> ClosedPosition {
        let closed = NaiveDate::from_ymd_opt(2025, month, day)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        ClosedPosition {
            ticker: "TEST3".to_string(),
            quantity: 100,
            opened_at: closed - chrono::Duration::days(if day_trade { 0 } else { 3 }),
            closed_at: closed,
            buy_value: sell_value - result,
            sell_value,
            result,
            fees_total: Decimal::ZERO,
            is_day_trade: day_trade,
            tax_withheld: withheld,
        }
    }

    fn rules() -> TaxRules {
        TaxRules::default()
    }

    #[test]
    fn test_empty_stream_yields_no_months() {
        assert!(aggregate(&[], &rules()).is_empty());
    }

    #[test]
    fn test_loss_then_compensated_gain_across_months() {
        // Jan: -5000. Feb: +3000 on sales of 25000 (non-exempt).
        let positions = vec![
            position(1, 10, dec!(-5000), dec!(20000), false, Some(dec!(0))),
            position(2, 10, dec!(3000), dec!(25000), false, Some(dec!(0))),
        ];
        let results = aggregate(&positions, &rules());
        assert_eq!(results.len(), 2);

        let jan = &results[0].swing;
        assert_eq!(jan.net_gain, dec!(-5000));
        assert_eq!(jan.loss_carried_out, dec!(5000));
        assert_eq!(jan.tax_due, Decimal::ZERO);

        let feb = &results[1].swing;
        assert_eq!(feb.loss_carried_in, dec!(5000));
        assert_eq!(feb.compensated, dec!(3000));
        assert_eq!(feb.taxable_profit, Decimal::ZERO);
        assert_eq!(feb.tax_due, Decimal::ZERO);
        assert_eq!(feb.loss_carried_out, dec!(2000));
    }

    #[test]
    fn test_exempt_month_still_consumes_loss() {
        // Same as above but Feb sales of 15000: exempt, yet the 3000 gain
        // still draws the balance down to 2000.
        let positions = vec![
            position(1, 10, dec!(-5000), dec!(20000), false, Some(dec!(0))),
            position(2, 10, dec!(3000), dec!(15000), false, Some(dec!(0))),
        ];
        let results = aggregate(&positions, &rules());
        let feb = &results[1].swing;
        assert!(feb.exempt);
        assert_eq!(feb.tax_due, Decimal::ZERO);
        assert_eq!(feb.loss_carried_out, dec!(2000));
    }

    #[test]
    fn test_exemption_boundary_is_inclusive() {
        let at_limit = vec![position(1, 10, dec!(3000), dec!(20000.00), false, None)];
        let results = aggregate(&at_limit, &rules());
        assert!(results[0].swing.exempt);
        assert_eq!(results[0].swing.tax_due, Decimal::ZERO);

        let over_limit = vec![position(1, 10, dec!(3000), dec!(20000.01), false, None)];
        let results = aggregate(&over_limit, &rules());
        assert!(!results[0].swing.exempt);
        assert_eq!(results[0].swing.tax_due, dec!(450.00));
    }

    #[test]
    fn test_day_trade_has_no_exemption_and_credits_irrf() {
        // Mar: +1000 day trade, 10 withheld at source, 20% rate.
        let positions = vec![position(3, 12, dec!(1000), dec!(5000), true, Some(dec!(10)))];
        let results = aggregate(&positions, &rules());
        let mar = &results[0].day_trade;
        assert!(!mar.exempt);
        assert_eq!(mar.tax_due, dec!(200.00));
        assert_eq!(mar.tax_withheld, dec!(10));
        assert_eq!(mar.tax_payable, dec!(190.00));
    }

    #[test]
    fn test_quiet_month_chains_balance_through() {
        // Jan loss, nothing in Feb, Mar gain: Feb must exist and carry 5000.
        let positions = vec![
            position(1, 10, dec!(-5000), dec!(20000), false, None),
            position(3, 10, dec!(2000), dec!(30000), false, None),
        ];
        let results = aggregate(&positions, &rules());
        assert_eq!(results.len(), 3);
        let feb = &results[1].swing;
        assert_eq!(feb.loss_carried_in, dec!(5000));
        assert_eq!(feb.loss_carried_out, dec!(5000));
        assert_eq!(results[2].swing.compensated, dec!(2000));
    }

    #[test]
    fn test_balance_chain_invariant() {
        let positions = vec![
            position(1, 5, dec!(-1000), dec!(10000), false, None),
            position(1, 20, dec!(300), dec!(30000), false, None),
            position(2, 5, dec!(500), dec!(25000), false, None),
            position(2, 10, dec!(-200), dec!(8000), true, None),
            position(4, 10, dec!(900), dec!(40000), true, None),
        ];
        let results = aggregate(&positions, &rules());
        for pair in results.windows(2) {
            for bucket in TradeBucket::ALL {
                assert_eq!(
                    pair[0].bucket(bucket).loss_carried_out,
                    pair[1].bucket(bucket).loss_carried_in
                );
            }
        }
    }

    #[test]
    fn test_conservation_of_net_gain() {
        let positions = vec![
            position(1, 5, dec!(-1000), dec!(10000), false, None),
            position(1, 20, dec!(300), dec!(30000), false, None),
            position(3, 5, dec!(700), dec!(25000), false, None),
        ];
        let results = aggregate(&positions, &rules());
        let monthly_sum: Decimal = results.iter().map(|r| r.swing.net_gain).sum();
        let position_sum: Decimal = positions.iter().map(|p| p.result).sum();
        assert_eq!(monthly_sum, position_sum);
    }

    #[test]
    fn test_mixed_month_nets_before_compensating() {
        // Carried-in 50; month has +100 and -100. The monthly net of zero
        // leaves the balance at 50 untouched.
        let positions = vec![
            position(1, 10, dec!(-50), dec!(1000), false, None),
            position(2, 5, dec!(100), dec!(25000), false, None),
            position(2, 20, dec!(-100), dec!(1000), false, None),
        ];
        let results = aggregate(&positions, &rules());
        let feb = &results[1].swing;
        assert_eq!(feb.net_gain, Decimal::ZERO);
        assert_eq!(feb.compensated, Decimal::ZERO);
        assert_eq!(feb.loss_carried_out, dec!(50));
    }

    #[test]
    fn test_missing_withholding_flags_month() {
        let positions = vec![
            position(1, 5, dec!(500), dec!(25000), true, None),
            position(1, 6, dec!(500), dec!(25000), true, Some(dec!(5))),
        ];
        let results = aggregate(&positions, &rules());
        let jan = &results[0].day_trade;
        assert!(jan.withholding_incomplete);
        assert_eq!(jan.tax_withheld, dec!(5));
    }
}
