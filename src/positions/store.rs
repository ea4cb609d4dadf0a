//! CSV-backed closed-position store
//!
//! The engine treats the position store as an external, read-only
//! collaborator: it yields an ordered snapshot of fully closed positions and
//! nothing else. All field-shape normalization happens here, at the
//! boundary; the engine never branches on source formats.

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::{sort_chronologically, ClosedPosition};

/// Raw CSV row before normalization. Timestamps and the optional withholding
/// column arrive as text and are normalized into [`ClosedPosition`] here.
#[derive(Debug, Deserialize)]
struct RawRecord {
    ticker: String,
    quantity: u32,
    opened_at: String,
    closed_at: String,
    buy_value: Decimal,
    sell_value: Decimal,
    result: Decimal,
    #[serde(default)]
    fees_total: Option<Decimal>,
    is_day_trade: String,
    #[serde(default)]
    tax_withheld: Option<String>,
}

/// Load and validate all closed positions from a CSV file, sorted by closing
/// timestamp. Cheap enough to call on every recomputation.
pub fn load_positions<P: AsRef<Path>>(path: P) -> Result<Vec<ClosedPosition>> {
    let path = path.as_ref();
    info!("Loading closed positions from {:?}", path);

    let mut reader = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open positions file {:?}", path))?;

    let mut positions = Vec::new();
    for (idx, record) in reader.deserialize::<RawRecord>().enumerate() {
        let line = idx + 2; // header is line 1
        let raw = record.with_context(|| format!("malformed record at line {line}"))?;
        let position = normalize(raw).with_context(|| format!("bad position at line {line}"))?;
        position.validate()?;
        positions.push(position);
    }

    sort_chronologically(&mut positions);
    debug!("Loaded {} closed positions", positions.len());
    Ok(positions)
}

fn normalize(raw: RawRecord) -> Result<ClosedPosition> {
    let tax_withheld = match raw.tax_withheld.as_deref() {
        None | Some("") => None,
        Some(s) => Some(parse_decimal(s).context("invalid tax_withheld")?),
    };

    Ok(ClosedPosition {
        opened_at: parse_timestamp(&raw.opened_at).context("invalid opened_at")?,
        closed_at: parse_timestamp(&raw.closed_at).context("invalid closed_at")?,
        is_day_trade: parse_bool(&raw.is_day_trade)?,
        ticker: raw.ticker,
        quantity: raw.quantity,
        buy_value: raw.buy_value,
        sell_value: raw.sell_value,
        result: raw.result,
        fees_total: raw.fees_total.unwrap_or(Decimal::ZERO),
        tax_withheld,
    })
}

/// Accept `YYYY-MM-DD HH:MM:SS`, ISO-8601 with `T`, or a bare date (taken as
/// midnight, which preserves within-day ordering for swing trades).
fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(ts);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid timestamp: {s}"));
    }
    Err(anyhow!("invalid timestamp: {s}"))
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "sim" => Ok(true),
        "false" | "0" | "no" | "nao" | "não" => Ok(false),
        other => Err(anyhow!("invalid is_day_trade value: {other}")),
    }
}

/// Accept both `1234.56` and the Brazilian `1.234,56` shape.
fn parse_decimal(s: &str) -> Result<Decimal> {
    if let Ok(d) = Decimal::from_str(s) {
        return Ok(d);
    }
    let normalized = s.replace('.', "").replace(',', ".");
    Decimal::from_str(&normalized).map_err(|_| anyhow!("invalid decimal: {s}"))
}
