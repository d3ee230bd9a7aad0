//! PostgreSQL implementation of the persistence layer.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::PowerStore;
use super::models::{
    BalanceSnapshotRow, BoostingSnapshotRow, PowerInputRow, SNAPSHOT_COLUMNS, SnapshotRow,
    balance_snapshot_from_row, boosting_snapshot_from_row, power_input_from_row,
    snapshot_from_row,
};
use crate::config::EngineConfig;
use crate::domain::rank_diff::PreviousRoundRanks;
use crate::domain::snapshot::{
    BalanceSnapshot, BoostingSnapshot, InstantBalance, PowerInput, ProjectRecord, Snapshot,
    SnapshotReceipt,
};
use crate::domain::{ProjectId, SnapshotId, UserId};
use crate::error::EngineError;

/// PostgreSQL-backed [`PowerStore`] using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool sized from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PersistenceError`] if the database is
    /// unreachable.
    pub async fn connect(config: &EngineConfig) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Applies the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PersistenceError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), EngineError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PowerStore for PostgresStore {
    async fn current_round(&self) -> Result<Option<i64>, EngineError> {
        let round = sqlx::query_scalar::<_, i64>("SELECT round FROM power_round WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(round)
    }

    async fn compare_and_set_round(
        &self,
        expected: Option<i64>,
        new: i64,
    ) -> Result<bool, EngineError> {
        let result = match expected {
            None => {
                sqlx::query(
                    "INSERT INTO power_round (id, round) VALUES (1, $1) \
                     ON CONFLICT (id) DO NOTHING",
                )
                .bind(new)
                .execute(&self.pool)
                .await?
            }
            Some(current) => {
                sqlx::query(
                    "UPDATE power_round SET round = $2 \
                     WHERE id = 1 AND round = $1 AND $2 > round",
                )
                .bind(current)
                .bind(new)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn create_snapshot(
        &self,
        round_number: i64,
        time: DateTime<Utc>,
        eligible_only: bool,
    ) -> Result<SnapshotReceipt, EngineError> {
        let mut tx = self.pool.begin().await?;

        let insert_snapshot = format!(
            "INSERT INTO power_snapshot (time, round_number) VALUES ($1, $2) \
             RETURNING {SNAPSHOT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SnapshotRow>(&insert_snapshot)
            .bind(time)
            .bind(round_number)
            .fetch_one(&mut *tx)
            .await?;
        let snapshot = snapshot_from_row(row);

        let boosting = sqlx::query(
            "INSERT INTO power_boosting_snapshot (snapshot_id, user_id, project_id, percentage) \
             SELECT $1, b.user_id, b.project_id, b.percentage \
             FROM power_boosting b \
             JOIN project p ON p.id = b.project_id \
             WHERE b.percentage > 0 AND (NOT $2::BOOLEAN OR (p.verified AND p.listed))",
        )
        .bind(snapshot.id.get())
        .bind(eligible_only)
        .execute(&mut *tx)
        .await?;

        let balances = sqlx::query(
            "INSERT INTO power_balance_snapshot (snapshot_id, user_id) \
             SELECT DISTINCT snapshot_id, user_id FROM power_boosting_snapshot \
             WHERE snapshot_id = $1",
        )
        .bind(snapshot.id.get())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SnapshotReceipt {
            snapshot,
            boosting_rows: boosting.rows_affected(),
            balance_rows: balances.rows_affected(),
        })
    }

    async fn snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>, EngineError> {
        let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM power_snapshot WHERE id = $1");
        let row = sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(snapshot_from_row))
    }

    async fn recent_snapshots(&self, limit: u32) -> Result<Vec<Snapshot>, EngineError> {
        let sql =
            format!("SELECT {SNAPSHOT_COLUMNS} FROM power_snapshot ORDER BY id DESC LIMIT $1");
        let rows = sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(snapshot_from_row).collect())
    }

    async fn latest_snapshot(
        &self,
        round_number: Option<i64>,
        synced_only: bool,
    ) -> Result<Option<Snapshot>, EngineError> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM power_snapshot \
             WHERE ($1::BIGINT IS NULL OR round_number = $1) \
             AND (NOT $2::BOOLEAN OR synced) \
             ORDER BY id DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(round_number)
            .bind(synced_only)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(snapshot_from_row))
    }

    async fn boosting_snapshots(
        &self,
        id: SnapshotId,
    ) -> Result<Vec<BoostingSnapshot>, EngineError> {
        let rows = sqlx::query_as::<_, BoostingSnapshotRow>(
            "SELECT id, snapshot_id, user_id, project_id, percentage \
             FROM power_boosting_snapshot WHERE snapshot_id = $1 ORDER BY id",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(boosting_snapshot_from_row).collect())
    }

    async fn balance_snapshots(
        &self,
        id: SnapshotId,
    ) -> Result<Vec<BalanceSnapshot>, EngineError> {
        let rows = sqlx::query_as::<_, BalanceSnapshotRow>(
            "SELECT id, snapshot_id, user_id, balance \
             FROM power_balance_snapshot WHERE snapshot_id = $1 ORDER BY id",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(balance_snapshot_from_row).collect())
    }

    async fn fetch_cursor(&self) -> Result<i64, EngineError> {
        let cursor = sqlx::query_scalar::<_, i64>(
            "SELECT max_fetched_updated_at_ms FROM instant_power_fetch_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(cursor.unwrap_or(0))
    }

    async fn compare_and_set_fetch_cursor(
        &self,
        expected: i64,
        new: i64,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(
            "UPDATE instant_power_fetch_state SET max_fetched_updated_at_ms = $2 \
             WHERE id = 1 AND max_fetched_updated_at_ms = $1 AND $2 >= $1",
        )
        .bind(expected)
        .bind(new)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn resolve_addresses(
        &self,
        addresses: &[String],
    ) -> Result<HashMap<String, UserId>, EngineError> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }
        let lowered: Vec<String> = addresses.iter().map(|a| a.to_lowercase()).collect();
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT lower(wallet_address), id FROM app_user \
             WHERE lower(wallet_address) = ANY($1)",
        )
        .bind(lowered)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(address, id)| (address, UserId::new(id)))
            .collect())
    }

    async fn upsert_instant_balance(&self, balance: InstantBalance) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO instant_power_balance (user_id, balance, source_updated_at_ms) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE \
             SET balance = EXCLUDED.balance, \
                 source_updated_at_ms = EXCLUDED.source_updated_at_ms \
             WHERE instant_power_balance.source_updated_at_ms <= EXCLUDED.source_updated_at_ms",
        )
        .bind(balance.user_id.get())
        .bind(balance.balance)
        .bind(balance.source_updated_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fill_null_balances(
        &self,
        user_id: UserId,
        balance: f64,
    ) -> Result<u64, EngineError> {
        let result = sqlx::query(
            "UPDATE power_balance_snapshot SET balance = $2 \
             WHERE user_id = $1 AND balance IS NULL",
        )
        .bind(user_id.get())
        .bind(balance)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn carry_forward_balances(
        &self,
        snapshot_id: SnapshotId,
        as_of_ms: i64,
    ) -> Result<u64, EngineError> {
        let result = sqlx::query(
            "UPDATE power_balance_snapshot b SET balance = ib.balance \
             FROM instant_power_balance ib \
             WHERE b.snapshot_id = $1 AND b.balance IS NULL \
             AND ib.user_id = b.user_id AND ib.source_updated_at_ms <= $2",
        )
        .bind(snapshot_id.get())
        .bind(as_of_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_complete_snapshots_synced(&self) -> Result<Vec<SnapshotId>, EngineError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "UPDATE power_snapshot s SET synced = TRUE \
             WHERE NOT s.synced AND NOT EXISTS ( \
                 SELECT 1 FROM power_balance_snapshot b \
                 WHERE b.snapshot_id = s.id AND b.balance IS NULL \
             ) \
             RETURNING s.id",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut ids: Vec<SnapshotId> = ids.into_iter().map(SnapshotId::new).collect();
        ids.sort();
        Ok(ids)
    }

    async fn unsynced_snapshots(&self) -> Result<Vec<Snapshot>, EngineError> {
        let sql =
            format!("SELECT {SNAPSHOT_COLUMNS} FROM power_snapshot WHERE NOT synced ORDER BY id");
        let rows = sqlx::query_as::<_, SnapshotRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(snapshot_from_row).collect())
    }

    async fn record_sync_attempt(&self, id: SnapshotId) -> Result<u32, EngineError> {
        let attempts = sqlx::query_scalar::<_, i32>(
            "UPDATE power_snapshot SET sync_attempts = sync_attempts + 1 \
             WHERE id = $1 RETURNING sync_attempts",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(EngineError::SnapshotNotFound(id))?;
        Ok(u32::try_from(attempts).unwrap_or(0))
    }

    async fn force_mark_synced(&self, id: SnapshotId) -> Result<bool, EngineError> {
        let result =
            sqlx::query("UPDATE power_snapshot SET synced = TRUE WHERE id = $1 AND NOT synced")
                .bind(id.get())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM power_snapshot WHERE id = $1)")
                .bind(id.get())
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Ok(false)
        } else {
            Err(EngineError::SnapshotNotFound(id))
        }
    }

    async fn snapshot_power_inputs(
        &self,
        id: SnapshotId,
    ) -> Result<Vec<PowerInput>, EngineError> {
        let rows = sqlx::query_as::<_, PowerInputRow>(
            "SELECT bs.project_id, bs.percentage, bal.balance \
             FROM power_boosting_snapshot bs \
             LEFT JOIN power_balance_snapshot bal \
               ON bal.snapshot_id = bs.snapshot_id AND bal.user_id = bs.user_id \
             WHERE bs.snapshot_id = $1",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(power_input_from_row).collect())
    }

    async fn instant_power_inputs(&self) -> Result<Vec<PowerInput>, EngineError> {
        let rows = sqlx::query_as::<_, PowerInputRow>(
            "SELECT b.project_id, b.percentage, ib.balance \
             FROM power_boosting b \
             LEFT JOIN instant_power_balance ib ON ib.user_id = b.user_id \
             WHERE b.percentage > 0",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(power_input_from_row).collect())
    }

    async fn projects(&self) -> Result<Vec<ProjectRecord>, EngineError> {
        let rows = sqlx::query_as::<_, (i64, bool)>(
            "SELECT id, verified AND listed FROM project ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, eligible)| ProjectRecord {
                id: ProjectId::new(id),
                eligible,
            })
            .collect())
    }

    async fn replace_previous_round_ranks(
        &self,
        round_number: i64,
        ranks: &[(ProjectId, u32)],
    ) -> Result<(), EngineError> {
        let project_ids: Vec<i64> = ranks.iter().map(|(id, _)| id.get()).collect();
        let rank_values: Vec<i32> = ranks
            .iter()
            .map(|&(_, rank)| i32::try_from(rank).unwrap_or(i32::MAX))
            .collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM previous_round_rank")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO previous_round_rank (project_id, round_number, rank) \
             SELECT t.project_id, $1, t.rank \
             FROM UNNEST($2::BIGINT[], $3::INTEGER[]) AS t(project_id, rank)",
        )
        .bind(round_number)
        .bind(project_ids)
        .bind(rank_values)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn previous_round_ranks(&self) -> Result<Option<PreviousRoundRanks>, EngineError> {
        let rows = sqlx::query_as::<_, (i64, i64, i32)>(
            "SELECT project_id, round_number, rank FROM previous_round_rank ORDER BY project_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let Some(&(_, round_number, _)) = rows.first() else {
            return Ok(None);
        };
        Ok(Some(PreviousRoundRanks {
            round_number,
            ranks: rows
                .into_iter()
                .map(|(project_id, _, rank)| {
                    (ProjectId::new(project_id), u32::try_from(rank).unwrap_or(0))
                })
                .collect(),
        }))
    }
}
