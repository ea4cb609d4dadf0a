// Database module - SQLite persistence for payment statuses and the
// recompute guard

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use crate::positions::{CompetencyMonth, TradeBucket};
use crate::tax::PaymentStatus;

/// Get the default database path (~/.apurador/data.db)
pub fn get_default_db_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let app_dir = PathBuf::from(home).join(".apurador");

    std::fs::create_dir_all(&app_dir).context("Failed to create .apurador directory")?;

    Ok(app_dir.join("data.db"))
}

/// Default path of the optional tax-rules config (~/.apurador/config.toml)
pub fn get_default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".apurador").join("config.toml"))
}

/// Open database connection, creating the schema on first use
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = db_path.unwrap_or(get_default_db_path()?);
    let conn = Connection::open(&path).context(format!("Failed to open database at {:?}", path))?;
    apply_schema(&conn)?;
    Ok(conn)
}

/// Apply the schema (idempotent). Split out so tests can run against an
/// in-memory connection.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    let schema_sql = include_str!("schema.sql");
    conn.execute_batch(schema_sql)
        .context("Failed to execute schema")?;
    Ok(())
}

/// Initialize the database at its default (or given) location
pub fn init_database(db_path: Option<PathBuf>) -> Result<()> {
    let path = db_path.unwrap_or(get_default_db_path()?);
    info!("Initializing database at: {:?}", path);
    open_db(Some(path))?;
    Ok(())
}

/// Record or overwrite the payment status for one (month, bucket) key.
/// Last writer wins; a stored status is never silently dropped.
pub fn upsert_payment_status(
    conn: &Connection,
    month: CompetencyMonth,
    bucket: TradeBucket,
    status: PaymentStatus,
) -> Result<()> {
    conn.execute(
        "INSERT INTO payment_status (month, bucket, status)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (month, bucket)
         DO UPDATE SET status = ?3, updated_at = datetime('now')",
        params![month.to_string(), bucket.as_str(), status.as_str()],
    )?;
    Ok(())
}

/// All persisted payment statuses, keyed by (month, bucket).
pub fn load_payment_statuses(
    conn: &Connection,
) -> Result<HashMap<(CompetencyMonth, TradeBucket), PaymentStatus>> {
    let mut stmt = conn.prepare("SELECT month, bucket, status FROM payment_status")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut statuses = HashMap::new();
    for (month_str, bucket_str, status_str) in rows {
        let month = CompetencyMonth::from_str(&month_str)
            .with_context(|| format!("corrupt month key in payment_status: {month_str}"))?;
        let bucket = TradeBucket::from_str(&bucket_str)
            .with_context(|| format!("corrupt bucket key in payment_status: {bucket_str}"))?;
        let status = PaymentStatus::from_str(&status_str)
            .with_context(|| format!("corrupt status in payment_status: {status_str}"))?;
        statuses.insert((month, bucket), status);
    }
    Ok(statuses)
}

/// Persisted statuses in calendar order, for display.
pub fn list_payment_statuses(
    conn: &Connection,
) -> Result<Vec<(CompetencyMonth, TradeBucket, PaymentStatus)>> {
    let statuses = load_payment_statuses(conn)?;
    let mut listed: Vec<_> = statuses
        .into_iter()
        .map(|((month, bucket), status)| (month, bucket, status))
        .collect();
    listed.sort_by_key(|(month, bucket, _)| (*month, bucket.as_str()));
    Ok(listed)
}

/// Same-bucket position count recorded by the last successful computation,
/// if any. Used to reject silently shrinking histories.
pub fn positions_seen(conn: &Connection, bucket: TradeBucket) -> Result<Option<usize>> {
    let mut stmt =
        conn.prepare("SELECT positions_seen FROM computation_log WHERE bucket = ?1")?;
    let seen: Option<i64> = stmt
        .query_row([bucket.as_str()], |row| row.get(0))
        .optional()?;
    Ok(seen.map(|n| n as usize))
}

/// Record the position count of a successful computation.
pub fn record_computation(conn: &Connection, bucket: TradeBucket, count: usize) -> Result<()> {
    conn.execute(
        "INSERT INTO computation_log (bucket, positions_seen)
         VALUES (?1, ?2)
         ON CONFLICT (bucket)
         DO UPDATE SET positions_seen = ?2, computed_at = datetime('now')",
        params![bucket.as_str(), count as i64],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = mem_conn();
        apply_schema(&conn).unwrap();
    }

    #[test]
    fn test_upsert_is_last_writer_wins() {
        let conn = mem_conn();
        let month = CompetencyMonth::new(2025, 2);

        upsert_payment_status(&conn, month, TradeBucket::Swing, PaymentStatus::Paid).unwrap();
        upsert_payment_status(&conn, month, TradeBucket::Swing, PaymentStatus::Pending).unwrap();

        let statuses = load_payment_statuses(&conn).unwrap();
        assert_eq!(
            statuses.get(&(month, TradeBucket::Swing)),
            Some(&PaymentStatus::Pending)
        );
    }

    #[test]
    fn test_statuses_keyed_independently_per_bucket() {
        let conn = mem_conn();
        let month = CompetencyMonth::new(2025, 3);

        upsert_payment_status(&conn, month, TradeBucket::Swing, PaymentStatus::Paid).unwrap();

        let statuses = load_payment_statuses(&conn).unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(!statuses.contains_key(&(month, TradeBucket::DayTrade)));
    }

    #[test]
    fn test_list_is_calendar_ordered() {
        let conn = mem_conn();
        upsert_payment_status(
            &conn,
            CompetencyMonth::new(2025, 3),
            TradeBucket::Swing,
            PaymentStatus::Paid,
        )
        .unwrap();
        upsert_payment_status(
            &conn,
            CompetencyMonth::new(2024, 12),
            TradeBucket::DayTrade,
            PaymentStatus::Pending,
        )
        .unwrap();

        let listed = list_payment_statuses(&conn).unwrap();
        assert_eq!(listed[0].0, CompetencyMonth::new(2024, 12));
        assert_eq!(listed[1].0, CompetencyMonth::new(2025, 3));
    }

    #[test]
    fn test_computation_log_round_trip() {
        let conn = mem_conn();
        assert_eq!(positions_seen(&conn, TradeBucket::Swing).unwrap(), None);

        record_computation(&conn, TradeBucket::Swing, 5).unwrap();
        assert_eq!(positions_seen(&conn, TradeBucket::Swing).unwrap(), Some(5));

        record_computation(&conn, TradeBucket::Swing, 7).unwrap();
        assert_eq!(positions_seen(&conn, TradeBucket::Swing).unwrap(), Some(7));
        assert_eq!(positions_seen(&conn, TradeBucket::DayTrade).unwrap(), None);
    }

    #[test]
    fn test_invalid_status_rejected_by_check_constraint() {
        let conn = mem_conn();
        let result = conn.execute(
            "INSERT INTO payment_status (month, bucket, status) VALUES ('2025-01', 'swing', 'maybe')",
            [],
        );
        assert!(result.is_err());
    }
}
