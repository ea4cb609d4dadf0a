//! Loss compensation for individual positions
//!
//! Answers, for one profitable position, how much carried-forward loss was
//! available to it and how much it consumed. "Available" already discounts
//! consumption by profitable positions that closed earlier: the figures come
//! from one linear scan of the bucket history, not from re-deriving the same
//! prefix per position, so two positions can never spend the same loss.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::positions::ClosedPosition;
use crate::tax::loss_tracker::LossTracker;

/// Compensation outcome for one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Compensation {
    pub available_loss: Decimal,
    pub consumed: Decimal,
    pub taxable_profit: Decimal,
}

impl Compensation {
    fn none() -> Self {
        Self {
            available_loss: Decimal::ZERO,
            consumed: Decimal::ZERO,
            taxable_profit: Decimal::ZERO,
        }
    }
}

/// One prior loss-generating position backing the available balance, in the
/// order it would be exhausted (oldest first).
#[derive(Debug, Clone, Serialize)]
pub struct PriorLossEntry {
    pub ticker: String,
    pub closed_at: NaiveDateTime,
    pub original_loss: Decimal,
    /// Portion already consumed by gains that closed before the target.
    pub consumed_by_earlier: Decimal,
    /// Portion still available to the target position.
    pub remaining: Decimal,
    /// Portion the target position draws from this entry.
    pub drawn: Decimal,
}

/// Audit view of a compensation: the outcome plus the loss entries that
/// funded it.
#[derive(Debug, Clone, Serialize)]
pub struct CompensationBreakdown {
    pub ticker: String,
    pub closed_at: NaiveDateTime,
    pub result: Decimal,
    #[serde(flatten)]
    pub compensation: Compensation,
    pub prior_losses: Vec<PriorLossEntry>,
}

/// Compute the compensation for `history[target]`. `history` must be sorted
/// by `closed_at`; positions in other buckets are ignored. Non-profitable
/// targets yield the degenerate all-zero outcome.
pub fn compensate(history: &[ClosedPosition], target: usize) -> Compensation {
    let position = &history[target];
    if position.result <= Decimal::ZERO {
        return Compensation::none();
    }

    let bucket = position.bucket();
    let mut tracker = LossTracker::new();
    for prior in history[..target].iter().filter(|p| p.bucket() == bucket) {
        tracker.absorb(prior.result);
    }

    let available_loss = tracker.balance();
    let consumed = position.result.min(available_loss);
    Compensation {
        available_loss,
        consumed,
        taxable_profit: position.result - consumed,
    }
}

/// Like [`compensate`], but also enumerates the prior loss entries in FIFO
/// exhaustion order, for audit/didactic display.
pub fn explain(history: &[ClosedPosition], target: usize) -> CompensationBreakdown {
    let position = &history[target];
    let bucket = position.bucket();

    // Replay the prefix keeping per-entry remainders. Earlier gains drain
    // entries oldest-first, which matches the aggregate running balance.
    let mut entries: Vec<PriorLossEntry> = Vec::new();
    for prior in history[..target].iter().filter(|p| p.bucket() == bucket) {
        if prior.result < Decimal::ZERO {
            entries.push(PriorLossEntry {
                ticker: prior.ticker.clone(),
                closed_at: prior.closed_at,
                original_loss: prior.result.abs(),
                consumed_by_earlier: Decimal::ZERO,
                remaining: prior.result.abs(),
                drawn: Decimal::ZERO,
            });
        } else if prior.result > Decimal::ZERO {
            let mut gain = prior.result;
            for entry in entries.iter_mut() {
                if gain.is_zero() {
                    break;
                }
                let taken = entry.remaining.min(gain);
                entry.remaining -= taken;
                entry.consumed_by_earlier += taken;
                gain -= taken;
            }
        }
    }

    let available_loss: Decimal = entries.iter().map(|e| e.remaining).sum();
    let compensation = if position.result > Decimal::ZERO {
        let consumed = position.result.min(available_loss);
        Compensation {
            available_loss,
            consumed,
            taxable_profit: position.result - consumed,
        }
    } else {
        Compensation::none()
    };

    // Mark what the target itself would draw, oldest entries first.
    let mut to_draw = compensation.consumed;
    for entry in entries.iter_mut() {
        if to_draw.is_zero() {
            break;
        }
        entry.drawn = entry.remaining.min(to_draw);
        to_draw -= entry.drawn;
    }
    entries.retain(|e| e.remaining > Decimal::ZERO);

    CompensationBreakdown {
        ticker: position.ticker.clone(),
        closed_at: position.closed_at,
        result: position.result,
        compensation,
        prior_losses: entries,
    }
}
