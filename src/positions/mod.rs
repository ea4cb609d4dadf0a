//! Closed trade positions and the two-bucket tax classification
//!
//! A [`ClosedPosition`] is one fully matched buy+sell cycle as produced by
//! the external matching/import subsystem. The engine treats the collection
//! of closed positions as an immutable, read-only snapshot; any correction
//! upstream requires a full recomputation downstream.

pub mod store;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, Result};

/// Tax bucket a closed position belongs to. Membership is decided when the
/// position closes and never changes retroactively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TradeBucket {
    /// Held across more than one trading day; 15% rate, monthly sales
    /// exemption up to R$ 20.000,00.
    Swing,
    /// Opened and closed within the same trading day; 20% rate, no
    /// exemption.
    DayTrade,
}

impl TradeBucket {
    pub const ALL: [TradeBucket; 2] = [TradeBucket::Swing, TradeBucket::DayTrade];

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeBucket::Swing => "swing",
            TradeBucket::DayTrade => "day-trade",
        }
    }

    /// Capital-gains rate applied to the taxable monthly profit.
    pub fn rate(&self) -> Decimal {
        match self {
            TradeBucket::Swing => Decimal::new(15, 2),
            TradeBucket::DayTrade => Decimal::new(20, 2),
        }
    }

    /// DARF revenue code for individuals' renda variável operations.
    pub fn darf_code(&self) -> &'static str {
        "6015"
    }
}

impl fmt::Display for TradeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TradeBucket {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "swing" | "swing-trade" => Ok(TradeBucket::Swing),
            "day" | "daytrade" | "day-trade" => Ok(TradeBucket::DayTrade),
            other => Err(anyhow::anyhow!("unknown trade bucket: {other}")),
        }
    }
}

/// Calendar month a closing date falls into; the aggregation key for all
/// monthly figures. Ordered by calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompetencyMonth {
    pub year: i32,
    pub month: u32,
}

impl CompetencyMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }

    /// Last calendar day of this month.
    pub fn last_day(&self) -> NaiveDate {
        let first_of_next = NaiveDate::from_ymd_opt(self.next().year, self.next().month, 1)
            .expect("first of month is always valid");
        first_of_next.pred_opt().expect("month has a predecessor day")
    }
}

impl fmt::Display for CompetencyMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for CompetencyMonth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || EngineError::BadMonth(s.to_string());
        let (y, m) = s.split_once('-').ok_or_else(bad)?;
        let year: i32 = y.parse().map_err(|_| bad())?;
        let month: u32 = m.parse().map_err(|_| bad())?;
        if !(1..=12).contains(&month) {
            return Err(bad().into());
        }
        Ok(Self { year, month })
    }
}

impl Serialize for CompetencyMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One fully matched buy+sell (or sell+buy, for shorts) cycle for a ticker.
///
/// `buy_value` and `sell_value` are total cash amounts, not unit prices.
/// `fees_total` is already netted into `result` and is never re-subtracted.
/// `tax_withheld` is the IRRF retained at source; `None` means the source
/// data carried no withholding information, which is treated as zero but
/// flags the month for review.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedPosition {
    pub ticker: String,
    pub quantity: u32,
    pub opened_at: NaiveDateTime,
    pub closed_at: NaiveDateTime,
    pub buy_value: Decimal,
    pub sell_value: Decimal,
    pub result: Decimal,
    pub fees_total: Decimal,
    pub is_day_trade: bool,
    pub tax_withheld: Option<Decimal>,
}

impl ClosedPosition {
    pub fn bucket(&self) -> TradeBucket {
        if self.is_day_trade {
            TradeBucket::DayTrade
        } else {
            TradeBucket::Swing
        }
    }

    pub fn competency_month(&self) -> CompetencyMonth {
        CompetencyMonth::of(self.closed_at.date())
    }

    /// Boundary validation. Inconsistent positions are rejected before they
    /// enter aggregation; they are never silently corrected.
    pub fn validate(&self) -> Result<()> {
        if self.quantity == 0 {
            return Err(self.invalid("quantity must be positive"));
        }
        if self.closed_at < self.opened_at {
            return Err(self.invalid("closed before it was opened"));
        }
        if self.buy_value < Decimal::ZERO || self.sell_value < Decimal::ZERO {
            return Err(self.invalid("buy_value and sell_value are total cash amounts, not signed"));
        }
        if self.fees_total < Decimal::ZERO {
            return Err(self.invalid("fees_total cannot be negative"));
        }
        if let Some(withheld) = self.tax_withheld {
            if withheld < Decimal::ZERO {
                return Err(self.invalid("tax_withheld cannot be negative"));
            }
        }
        let expected = self.sell_value - self.buy_value - self.fees_total;
        if self.result != expected {
            return Err(self.invalid(&format!(
                "result {} does not match sell_value - buy_value - fees_total = {}",
                self.result, expected
            )));
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> anyhow::Error {
        EngineError::InvalidPosition {
            ticker: self.ticker.clone(),
            closed_at: self.closed_at.date().to_string(),
            reason: reason.to_string(),
        }
        .into()
    }
}

/// Stable sort by closing timestamp. Ties keep the original input order so
/// the running loss balance never depends on an unstable sort.
pub fn sort_chronologically(positions: &mut [ClosedPosition]) {
    positions.sort_by_key(|p| p.closed_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_position() -> ClosedPosition {
        ClosedPosition {
            ticker: "PETR4".to_string(),
            quantity: 100,
            opened_at: NaiveDate::from_ymd_opt(2025, 1, 10)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            closed_at: NaiveDate::from_ymd_opt(2025, 2, 10)
                .unwrap()
                .and_hms_opt(15, 30, 0)
                .unwrap(),
            buy_value: dec!(2500.00),
            sell_value: dec!(3000.00),
            result: dec!(500.00),
            fees_total: dec!(0),
            is_day_trade: false,
            tax_withheld: Some(dec!(0.15)),
        }
    }

    #[test]
    fn test_bucket_rates() {
        assert_eq!(TradeBucket::Swing.rate(), dec!(0.15));
        assert_eq!(TradeBucket::DayTrade.rate(), dec!(0.20));
    }

    #[test]
    fn test_bucket_round_trips_through_str() {
        for bucket in TradeBucket::ALL {
            assert_eq!(bucket.as_str().parse::<TradeBucket>().unwrap(), bucket);
        }
        assert_eq!("day".parse::<TradeBucket>().unwrap(), TradeBucket::DayTrade);
        assert!("options".parse::<TradeBucket>().is_err());
    }

    #[test]
    fn test_competency_month_parse_and_display() {
        let month: CompetencyMonth = "2025-02".parse().unwrap();
        assert_eq!(month, CompetencyMonth::new(2025, 2));
        assert_eq!(month.to_string(), "2025-02");
        assert_eq!(month.next(), CompetencyMonth::new(2025, 3));
        assert_eq!(
            CompetencyMonth::new(2024, 12).next(),
            CompetencyMonth::new(2025, 1)
        );
        assert!("2025-13".parse::<CompetencyMonth>().is_err());
        assert!("fevereiro".parse::<CompetencyMonth>().is_err());
    }

    #[test]
    fn test_competency_month_last_day() {
        assert_eq!(
            CompetencyMonth::new(2024, 2).last_day(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(
            CompetencyMonth::new(2025, 12).last_day(),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()
        );
    }

    #[test]
    fn test_valid_position_passes() {
        base_position().validate().unwrap();
    }

    #[test]
    fn test_result_mismatch_rejected() {
        let mut pos = base_position();
        pos.result = dec!(600.00);
        let err = pos.validate().unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_fees_are_part_of_expected_result() {
        let mut pos = base_position();
        pos.fees_total = dec!(12.50);
        pos.result = dec!(487.50);
        pos.validate().unwrap();
    }

    #[test]
    fn test_closed_before_opened_rejected() {
        let mut pos = base_position();
        pos.closed_at = pos.opened_at - chrono::Duration::days(1);
        assert!(pos.validate().is_err());
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut pos = base_position();
        pos.quantity = 0;
        assert!(pos.validate().is_err());
    }

    #[test]
    fn test_sort_is_stable_on_closed_at_ties() {
        let mut a = base_position();
        a.ticker = "AAAA3".to_string();
        let mut b = base_position();
        b.ticker = "BBBB3".to_string();
        // Same closing instant; insertion order must survive the sort.
        let mut positions = vec![a, b];
        sort_chronologically(&mut positions);
        assert_eq!(positions[0].ticker, "AAAA3");
        assert_eq!(positions[1].ticker, "BBBB3");
    }
}
