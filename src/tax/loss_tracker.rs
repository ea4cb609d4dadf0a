//! Accumulated-loss tracking
//!
//! One running balance per bucket, fed in ascending `closed_at` order.
//! Realized losses grow the balance; realized gains consume it. Every other
//! compensation figure in this crate is derived from this single forward
//! scan, so the balance can never be double-spent across positions.

use rust_decimal::Decimal;

use crate::positions::ClosedPosition;

/// Running loss balance for one trade bucket.
#[derive(Debug, Clone, Default)]
pub struct LossTracker {
    balance: Decimal,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loss available for compensation at this point in the scan.
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Feed one realized result into the balance, returning how much prior
    /// loss it consumed. Losses return zero; a zero result is a no-op.
    pub fn absorb(&mut self, result: Decimal) -> Decimal {
        if result < Decimal::ZERO {
            self.balance += result.abs();
            Decimal::ZERO
        } else {
            let consumed = self.balance.min(result);
            self.balance -= consumed;
            consumed
        }
    }
}

/// Loss balance immediately before `history[cutoff]`, considering only
/// positions in the cutoff's bucket. `history` must be sorted by `closed_at`
/// (stable on ties).
pub fn balance_before(history: &[ClosedPosition], cutoff: usize) -> Decimal {
    let bucket = history[cutoff].bucket();
    let mut tracker = LossTracker::new();
    for position in history[..cutoff].iter().filter(|p| p.bucket() == bucket) {
        tracker.absorb(position.result);
    }
    tracker.balance()
}

/// Loss balance after `history[cutoff]` has itself been absorbed. Reported
/// when the cutoff position is a loss ("balance including this operation").
pub fn balance_after(history: &[ClosedPosition], cutoff: usize) -> Decimal {
    let mut tracker = LossTracker::new();
    let bucket = history[cutoff].bucket();
    for position in history[..=cutoff].iter().filter(|p| p.bucket() == bucket) {
        tracker.absorb(position.result);
    }
    tracker.balance()
}
