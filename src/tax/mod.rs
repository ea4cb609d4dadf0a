// Tax module - two-bucket capital-gains engine (loss carryforward,
// monthly apuração, DARF obligations)

pub mod compensation;
pub mod darf;
pub mod loss_tracker;
pub mod monthly;

use anyhow::Context;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::db;
use crate::error::{EngineError, Result};
use crate::positions::{sort_chronologically, ClosedPosition, CompetencyMonth, TradeBucket};

pub use compensation::{compensate, explain, Compensation, CompensationBreakdown};
pub use darf::{resolve_all, DarfObligation, ObligationState};
pub use loss_tracker::LossTracker;
pub use monthly::{BucketMonth, MonthlyResult};

/// Tax parameters. Defaults are the statutory values; an optional TOML
/// config can override them for what-if runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaxRules {
    pub swing_rate: Decimal,
    pub day_trade_rate: Decimal,
    /// Monthly swing-trade sales volume at or under which tax is exempt.
    pub swing_exemption_ceiling: Decimal,
    /// DARFs under this amount are reported but not payable.
    pub minimum_darf: Decimal,
}

impl Default for TaxRules {
    fn default() -> Self {
        Self {
            swing_rate: TradeBucket::Swing.rate(),
            day_trade_rate: TradeBucket::DayTrade.rate(),
            swing_exemption_ceiling: Decimal::from(20_000),
            minimum_darf: Decimal::from(10),
        }
    }
}

impl TaxRules {
    pub fn rate(&self, bucket: TradeBucket) -> Decimal {
        match bucket {
            TradeBucket::Swing => self.swing_rate,
            TradeBucket::DayTrade => self.day_trade_rate,
        }
    }

    /// Load rules from a TOML file if it exists, otherwise the statutory
    /// defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {:?}", path))?;
        let rules: TaxRules =
            toml::from_str(&text).with_context(|| format!("invalid config at {:?}", path))?;
        debug!("Loaded tax rules from {:?}", path);
        Ok(rules)
    }
}

/// Externally mutable payment status for one `(month, bucket)` key. The one
/// piece of state that survives recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(anyhow::anyhow!("unknown payment status: {other}")),
        }
    }
}

/// Full recomputation over an immutable snapshot of closed positions.
///
/// Validates every position, sorts chronologically, aggregates both buckets,
/// merges persisted payment statuses by `(month, bucket)` key, and records
/// the per-bucket position counts for the monotonicity guard. A history that
/// shrank since the last run is rejected unless `force` is set.
pub fn compute_monthly_results(
    conn: &Connection,
    positions: &[ClosedPosition],
    rules: &TaxRules,
    force: bool,
) -> Result<Vec<MonthlyResult>> {
    for position in positions {
        position.validate()?;
    }

    let mut sorted = positions.to_vec();
    sort_chronologically(&mut sorted);

    for bucket in TradeBucket::ALL {
        let submitted = sorted.iter().filter(|p| p.bucket() == bucket).count();
        if let Some(seen) = db::positions_seen(conn, bucket)? {
            if submitted < seen && !force {
                return Err(EngineError::NonMonotonicHistory {
                    bucket: bucket.as_str().to_string(),
                    submitted,
                    previously_seen: seen,
                }
                .into());
            }
        }
    }

    let mut results = monthly::aggregate(&sorted, rules);

    let statuses = db::load_payment_statuses(conn)?;
    for result in &mut results {
        for bucket in TradeBucket::ALL {
            if let Some(status) = statuses.get(&(result.month, bucket)) {
                result.bucket_mut(bucket).payment_status = *status;
            }
        }
    }

    for bucket in TradeBucket::ALL {
        let count = sorted.iter().filter(|p| p.bucket() == bucket).count();
        db::record_computation(conn, bucket, count)?;
    }

    info!(
        "Computed {} monthly results from {} closed positions",
        results.len(),
        sorted.len()
    );
    Ok(results)
}

/// Persist a payment status write; it is merged into the next computation.
pub fn set_payment_status(
    conn: &Connection,
    month: CompetencyMonth,
    bucket: TradeBucket,
    status: PaymentStatus,
) -> Result<()> {
    db::upsert_payment_status(conn, month, bucket, status)?;
    info!("Payment status for {month}/{bucket} set to {status}");
    Ok(())
}
