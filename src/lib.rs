//! Apurador - monthly capital-gains tax engine for B3 closed positions
//!
//! Given an immutable snapshot of fully closed trade positions, this library
//! computes per-month, per-bucket (swing / day-trade) realized results, loss
//! carryforward compensation, tax due and payable, and DARF obligations,
//! preserving externally written payment statuses across recomputations.

pub mod cli;
pub mod db;
pub mod error;
pub mod positions;
pub mod reports;
pub mod tax;
pub mod utils;
