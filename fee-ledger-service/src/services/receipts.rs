//! Receipt numbers: `RCP` + school-local date + per-day sequence.

use crate::services::error::FeeError;
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::NaiveDate;
use sqlx::PgConnection;
use tracing::{debug, instrument};

pub const RECEIPT_PREFIX: &str = "RCP";

/// `RCP202610190001`. Sequences past 9999 widen instead of wrapping.
pub fn format_receipt_number(date: NaiveDate, sequence: u32) -> String {
    format!("{}{}{:04}", RECEIPT_PREFIX, date.format("%Y%m%d"), sequence)
}

/// Issues receipt numbers from the per-day counter table.
///
/// The increment runs on the caller's collection transaction, after the
/// payment has been validated and allocated. The counter row stays locked
/// until that transaction ends, and a rollback hands the number back.
pub struct ReceiptSequencer;

impl ReceiptSequencer {
    #[instrument(skip(conn))]
    pub async fn next(conn: &mut PgConnection, date: NaiveDate) -> Result<String, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["next_receipt_number"])
            .start_timer();

        let sequence: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO receipt_counters (counter_date, last_value)
            VALUES ($1, 1)
            ON CONFLICT (counter_date)
            DO UPDATE SET last_value = receipt_counters.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(date)
        .fetch_one(&mut *conn)
        .await
        .map_err(FeeError::storage("next_receipt_number"))?;

        timer.observe_duration();

        let receipt_number = format_receipt_number(date, sequence.unsigned_abs());
        debug!(receipt_number = %receipt_number, "Receipt number issued");

        Ok(receipt_number)
    }
}
