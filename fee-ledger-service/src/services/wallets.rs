//! Staff wallet ledger: cash custody per collecting staff member.

use crate::models::{
    LedgerReference, LedgerTransactionType, StaffDailyCollection, StaffLedgerEntry, StaffWallet,
    TopCollector, WalletOverview, WalletStatistics, Withdrawal,
};
use crate::services::collections::CollectionRepository;
use crate::services::error::{validate_amount, FeeError};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument, warn};
use uuid::Uuid;

const WALLET_COLUMNS: &str = "staff_id, current_balance, total_collected, total_withdrawn, \
     last_collection_utc, last_withdrawal_utc, created_utc, updated_utc";

const ENTRY_COLUMNS: &str = "id, entry_seq, staff_id, transaction_type, amount, balance_after, \
     reference_id, reference_type, performed_by, description, transaction_date";

/// Row-level access to `staff_wallets` and `staff_ledger`.
pub struct WalletRepository;

impl WalletRepository {
    /// Create the wallet on first use and add to it in one statement.
    pub async fn credit(
        conn: &mut PgConnection,
        staff_id: Uuid,
        amount: Decimal,
    ) -> Result<StaffWallet, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["credit_wallet"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO staff_wallets (staff_id, current_balance, total_collected, last_collection_utc)
            VALUES ($1, $2, $2, NOW())
            ON CONFLICT (staff_id) DO UPDATE
            SET current_balance = staff_wallets.current_balance + EXCLUDED.current_balance,
                total_collected = staff_wallets.total_collected + EXCLUDED.total_collected,
                last_collection_utc = NOW(),
                updated_utc = NOW()
            RETURNING {}
            "#,
            WALLET_COLUMNS
        );

        let wallet = sqlx::query_as::<_, StaffWallet>(&sql)
            .bind(staff_id)
            .bind(amount)
            .fetch_one(&mut *conn)
            .await
            .map_err(FeeError::storage("credit_wallet"))?;

        timer.observe_duration();

        Ok(wallet)
    }

    pub async fn lock(
        conn: &mut PgConnection,
        staff_id: Uuid,
    ) -> Result<Option<StaffWallet>, FeeError> {
        let sql = format!(
            "SELECT {} FROM staff_wallets WHERE staff_id = $1 FOR UPDATE",
            WALLET_COLUMNS
        );

        sqlx::query_as::<_, StaffWallet>(&sql)
            .bind(staff_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(FeeError::storage("lock_wallet"))
    }

    pub async fn get(
        conn: &mut PgConnection,
        staff_id: Uuid,
    ) -> Result<Option<StaffWallet>, FeeError> {
        let sql = format!("SELECT {} FROM staff_wallets WHERE staff_id = $1", WALLET_COLUMNS);

        sqlx::query_as::<_, StaffWallet>(&sql)
            .bind(staff_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(FeeError::storage("get_wallet"))
    }

    /// Relative decrement. Returns `None` if the balance would go negative.
    pub async fn debit(
        conn: &mut PgConnection,
        staff_id: Uuid,
        amount: Decimal,
    ) -> Result<Option<StaffWallet>, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["debit_wallet"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE staff_wallets
            SET current_balance = current_balance - $2,
                total_withdrawn = total_withdrawn + $2,
                last_withdrawal_utc = NOW(),
                updated_utc = NOW()
            WHERE staff_id = $1 AND current_balance >= $2
            RETURNING {}
            "#,
            WALLET_COLUMNS
        );

        let wallet = sqlx::query_as::<_, StaffWallet>(&sql)
            .bind(staff_id)
            .bind(amount)
            .fetch_optional(&mut *conn)
            .await
            .map_err(FeeError::storage("debit_wallet"))?;

        timer.observe_duration();

        Ok(wallet)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn append_entry(
        conn: &mut PgConnection,
        staff_id: Uuid,
        transaction_type: LedgerTransactionType,
        amount: Decimal,
        balance_after: Decimal,
        reference: LedgerReference,
        performed_by: Option<Uuid>,
        description: Option<&str>,
    ) -> Result<StaffLedgerEntry, FeeError> {
        let sql = format!(
            r#"
            INSERT INTO staff_ledger (id, staff_id, transaction_type, amount, balance_after,
                reference_id, reference_type, performed_by, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        );

        sqlx::query_as::<_, StaffLedgerEntry>(&sql)
            .bind(Uuid::new_v4())
            .bind(staff_id)
            .bind(transaction_type.as_str())
            .bind(transaction_type.signed(amount))
            .bind(balance_after)
            .bind(reference.id())
            .bind(reference.kind())
            .bind(performed_by)
            .bind(description)
            .fetch_one(&mut *conn)
            .await
            .map_err(FeeError::storage("append_ledger_entry"))
    }

    /// Newest first.
    pub async fn entries(
        conn: &mut PgConnection,
        staff_id: Uuid,
        limit: i64,
    ) -> Result<Vec<StaffLedgerEntry>, FeeError> {
        let sql = format!(
            r#"
            SELECT {} FROM staff_ledger
            WHERE staff_id = $1
            ORDER BY entry_seq DESC
            LIMIT $2
            "#,
            ENTRY_COLUMNS
        );

        sqlx::query_as::<_, StaffLedgerEntry>(&sql)
            .bind(staff_id)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await
            .map_err(FeeError::storage("ledger_entries"))
    }
}

/// Row-level access to `staff_daily_collections`.
pub struct DailyCollectionRepository;

impl DailyCollectionRepository {
    /// Count a new collection as pending verification.
    pub async fn record_collection(
        conn: &mut PgConnection,
        staff_id: Uuid,
        collection_date: NaiveDate,
        amount: Decimal,
    ) -> Result<StaffDailyCollection, FeeError> {
        sqlx::query_as::<_, StaffDailyCollection>(
            r#"
            INSERT INTO staff_daily_collections (staff_id, collection_date, collection_count,
                total_amount, pending_verification)
            VALUES ($1, $2, 1, $3, $3)
            ON CONFLICT (staff_id, collection_date) DO UPDATE
            SET collection_count = staff_daily_collections.collection_count + 1,
                total_amount = staff_daily_collections.total_amount + EXCLUDED.total_amount,
                pending_verification = staff_daily_collections.pending_verification + EXCLUDED.pending_verification
            RETURNING staff_id, collection_date, collection_count, total_amount,
                      pending_verification, pending_transfer, transferred
            "#,
        )
        .bind(staff_id)
        .bind(collection_date)
        .bind(amount)
        .fetch_one(&mut *conn)
        .await
        .map_err(FeeError::storage("record_daily_collection"))
    }

    /// Move a verified amount from pending verification to pending transfer.
    pub async fn mark_verified(
        conn: &mut PgConnection,
        staff_id: Uuid,
        collection_date: NaiveDate,
        amount: Decimal,
    ) -> Result<bool, FeeError> {
        let result = sqlx::query(
            r#"
            UPDATE staff_daily_collections
            SET pending_verification = pending_verification - $3,
                pending_transfer = pending_transfer + $3
            WHERE staff_id = $1 AND collection_date = $2 AND pending_verification >= $3
            "#,
        )
        .bind(staff_id)
        .bind(collection_date)
        .bind(amount)
        .execute(&mut *conn)
        .await
        .map_err(FeeError::storage("verify_daily_collection"))?;

        Ok(result.rows_affected() == 1)
    }

    /// Everything verified for this staff member has been handed over.
    pub async fn transfer_all(conn: &mut PgConnection, staff_id: Uuid) -> Result<u64, FeeError> {
        let result = sqlx::query(
            r#"
            UPDATE staff_daily_collections
            SET transferred = transferred + pending_transfer,
                pending_transfer = 0
            WHERE staff_id = $1 AND pending_transfer > 0
            "#,
        )
        .bind(staff_id)
        .execute(&mut *conn)
        .await
        .map_err(FeeError::storage("transfer_daily_collections"))?;

        Ok(result.rows_affected())
    }

    /// `(pending_verification, pending_transfer)` across all days, optionally
    /// for one staff member.
    pub async fn pending_totals(
        conn: &mut PgConnection,
        staff_id: Option<Uuid>,
    ) -> Result<(Decimal, Decimal), FeeError> {
        sqlx::query_as::<_, (Decimal, Decimal)>(
            r#"
            SELECT COALESCE(SUM(pending_verification), 0),
                   COALESCE(SUM(pending_transfer), 0)
            FROM staff_daily_collections
            WHERE $1::uuid IS NULL OR staff_id = $1
            "#,
        )
        .bind(staff_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(FeeError::storage("pending_totals"))
    }

    pub async fn for_staff(
        conn: &mut PgConnection,
        staff_id: Uuid,
        collection_date: NaiveDate,
    ) -> Result<Option<StaffDailyCollection>, FeeError> {
        sqlx::query_as::<_, StaffDailyCollection>(
            r#"
            SELECT staff_id, collection_date, collection_count, total_amount,
                   pending_verification, pending_transfer, transferred
            FROM staff_daily_collections
            WHERE staff_id = $1 AND collection_date = $2
            "#,
        )
        .bind(staff_id)
        .bind(collection_date)
        .fetch_optional(&mut *conn)
        .await
        .map_err(FeeError::storage("get_daily_collection"))
    }
}

/// Wallet mutations. Every function runs on the caller's transaction.
pub struct StaffWalletLedger;

impl StaffWalletLedger {
    /// Credit a collection to the collector and append its ledger entry.
    #[instrument(skip(conn), fields(staff_id = %staff_id, amount = %amount))]
    pub async fn add_collection(
        conn: &mut PgConnection,
        staff_id: Uuid,
        amount: Decimal,
        collection_id: Uuid,
        receipt_number: &str,
    ) -> Result<StaffLedgerEntry, FeeError> {
        if amount <= Decimal::ZERO {
            return Err(FeeError::validation("amount", "must be greater than zero"));
        }

        let wallet = WalletRepository::credit(conn, staff_id, amount).await?;
        let description = format!("Fee collection {}", receipt_number);

        WalletRepository::append_entry(
            conn,
            staff_id,
            LedgerTransactionType::Collection,
            amount,
            wallet.current_balance,
            LedgerReference::FeeCollection(collection_id),
            Some(staff_id),
            Some(&description),
        )
        .await
    }

    /// Withdraw part of a wallet. The wallet row is locked before the
    /// balance check.
    #[instrument(skip(conn, reason), fields(staff_id = %staff_id, amount = %amount))]
    pub async fn process_withdrawal(
        conn: &mut PgConnection,
        staff_id: Uuid,
        amount: Decimal,
        admin_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Withdrawal, FeeError> {
        validate_amount(amount)?;

        let wallet = WalletRepository::lock(conn, staff_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Staff wallet"))?;

        if amount > wallet.current_balance {
            warn!(
                staff_id = %staff_id,
                available = %wallet.current_balance,
                requested = %amount,
                "Withdrawal exceeds wallet balance"
            );
            return Err(FeeError::InsufficientBalance {
                available: wallet.current_balance,
                requested: amount,
            });
        }

        Self::debit_locked(conn, &wallet, amount, admin_id, reason.unwrap_or("Withdrawal")).await
    }

    /// Withdraw the full balance. Verified collections of the staff member
    /// become withdrawn and their daily aggregates move to transferred.
    #[instrument(skip(conn), fields(staff_id = %staff_id))]
    pub async fn clear_balance(
        conn: &mut PgConnection,
        staff_id: Uuid,
        admin_id: Uuid,
    ) -> Result<Withdrawal, FeeError> {
        let wallet = WalletRepository::lock(conn, staff_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Staff wallet"))?;

        if wallet.current_balance <= Decimal::ZERO {
            return Err(FeeError::validation("balance", "wallet balance is already zero"));
        }

        let amount = wallet.current_balance;
        let mut withdrawal =
            Self::debit_locked(conn, &wallet, amount, admin_id, "Full balance clear").await?;

        withdrawal.collections_withdrawn =
            CollectionRepository::mark_withdrawn_for_staff(conn, staff_id).await?;
        DailyCollectionRepository::transfer_all(conn, staff_id).await?;

        Ok(withdrawal)
    }

    async fn debit_locked(
        conn: &mut PgConnection,
        wallet: &StaffWallet,
        amount: Decimal,
        admin_id: Uuid,
        description: &str,
    ) -> Result<Withdrawal, FeeError> {
        let staff_id = wallet.staff_id;
        let updated = WalletRepository::debit(conn, staff_id, amount)
            .await?
            .ok_or(FeeError::InsufficientBalance {
                available: wallet.current_balance,
                requested: amount,
            })?;

        let withdrawal_id = Uuid::new_v4();
        let entry = WalletRepository::append_entry(
            conn,
            staff_id,
            LedgerTransactionType::Withdrawal,
            amount,
            updated.current_balance,
            LedgerReference::Withdrawal(withdrawal_id),
            Some(admin_id),
            Some(description),
        )
        .await?;

        info!(
            staff_id = %staff_id,
            withdrawal_id = %withdrawal_id,
            amount = %amount,
            balance_after = %updated.current_balance,
            admin_id = %admin_id,
            "Wallet withdrawal recorded"
        );

        Ok(Withdrawal {
            withdrawal_id,
            staff_id,
            amount,
            balance_after: updated.current_balance,
            entry,
            collections_withdrawn: 0,
        })
    }
}

/// Read side of the wallet ledger.
#[derive(Clone)]
pub struct WalletService {
    pool: PgPool,
}

impl WalletService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self), fields(staff_id = %staff_id))]
    pub async fn get_wallet(
        &self,
        staff_id: Uuid,
        recent_entries: i64,
    ) -> Result<WalletOverview, FeeError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        let wallet = WalletRepository::get(&mut conn, staff_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Staff wallet"))?;
        let (pending_verification, pending_transfer) =
            DailyCollectionRepository::pending_totals(&mut conn, Some(staff_id)).await?;
        let recent_entries = WalletRepository::entries(&mut conn, staff_id, recent_entries).await?;

        Ok(WalletOverview {
            wallet,
            pending_verification,
            pending_transfer,
            recent_entries,
        })
    }

    pub async fn ledger_entries(
        &self,
        staff_id: Uuid,
        limit: i64,
    ) -> Result<Vec<StaffLedgerEntry>, FeeError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        WalletRepository::entries(&mut conn, staff_id, limit).await
    }

    #[instrument(skip(self))]
    pub async fn statistics(
        &self,
        today: NaiveDate,
        top_n: i64,
    ) -> Result<WalletStatistics, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["wallet_statistics"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        let (wallet_count, total_balance, total_collected, total_withdrawn) =
            sqlx::query_as::<_, (i64, Decimal, Decimal, Decimal)>(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(current_balance), 0),
                       COALESCE(SUM(total_collected), 0),
                       COALESCE(SUM(total_withdrawn), 0)
                FROM staff_wallets
                "#,
            )
            .fetch_one(&mut *conn)
            .await
            .map_err(FeeError::storage("wallet_totals"))?;

        let (pending_verification, pending_transfer) =
            DailyCollectionRepository::pending_totals(&mut conn, None).await?;

        let (today_collection_count, today_collection_amount) =
            sqlx::query_as::<_, (i64, Decimal)>(
                r#"
                SELECT COALESCE(SUM(collection_count), 0)::bigint,
                       COALESCE(SUM(total_amount), 0)
                FROM staff_daily_collections
                WHERE collection_date = $1
                "#,
            )
            .bind(today)
            .fetch_one(&mut *conn)
            .await
            .map_err(FeeError::storage("today_totals"))?;

        let top_collectors = sqlx::query_as::<_, TopCollector>(
            r#"
            SELECT w.staff_id, w.total_collected, w.current_balance,
                   COALESCE(SUM(d.collection_count), 0)::bigint AS collection_count
            FROM staff_wallets w
            LEFT JOIN staff_daily_collections d ON d.staff_id = w.staff_id
            GROUP BY w.staff_id, w.total_collected, w.current_balance
            ORDER BY w.total_collected DESC, w.staff_id
            LIMIT $1
            "#,
        )
        .bind(top_n)
        .fetch_all(&mut *conn)
        .await
        .map_err(FeeError::storage("top_collectors"))?;

        timer.observe_duration();

        Ok(WalletStatistics {
            wallet_count,
            total_balance,
            total_collected,
            total_withdrawn,
            pending_verification,
            pending_transfer,
            today_collection_count,
            today_collection_amount,
            top_collectors,
        })
    }
}
