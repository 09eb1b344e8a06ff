use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgExecutor, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Account, AccountId, AccountPatch, Amount, LedgerError, NewAccount, UpdateCapability};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::ledger_store::{ensure_distinct, LedgerStore, TransferReceipt};

const CREATE_ACCOUNT_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS account (
        id serial PRIMARY KEY,
        first_name varchar(50) NOT NULL,
        last_name varchar(50) NOT NULL,
        uuid char(36) NOT NULL UNIQUE,
        balance decimal(19,4) NOT NULL DEFAULT 0,
        created_at timestamptz NOT NULL
    )
"#;

const CREATED_AT_TYPE: &str = r#"
    SELECT data_type::text FROM information_schema.columns
    WHERE table_schema = current_schema()
      AND table_name = 'account'
      AND column_name = 'created_at'
"#;

// Tables created by the earlier service store a naive UTC timestamp.
const UPGRADE_CREATED_AT: &str = r#"
    ALTER TABLE account
    ALTER COLUMN created_at TYPE timestamptz USING created_at AT TIME ZONE 'UTC'
"#;

// SQLSTATE codes Postgres uses for serialization failures and deadlocks.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if matches!(
                db_err.code().as_deref(),
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
            ) {
                return LedgerError::Conflict(db_err.message().to_string());
            }
        }
        LedgerError::Storage(err.to_string())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: i32,
    first_name: String,
    last_name: String,
    uuid: String,
    balance: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let uuid = Uuid::parse_str(row.uuid.trim()).map_err(|e| {
            LedgerError::Storage(format!("account {} has a malformed uuid: {e}", row.id))
        })?;
        Ok(Account {
            id: AccountId(row.id),
            first_name: row.first_name,
            last_name: row.last_name,
            uuid,
            balance: row.balance,
            created_at: row.created_at,
        })
    }
}

/// Ledger store backed by a single Postgres `account` table.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds the connection pool described by `config`.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL environment variable is required")?;

        let pool = PgPoolOptions::new()
            .max_connections(config.database_pool_size)
            .acquire_timeout(Duration::from_secs(config.database_acquire_timeout_secs))
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    /// Creates the `account` table if it does not exist yet, and upgrades a
    /// `created_at timestamp` column left by older deployments to
    /// `timestamptz`.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_ACCOUNT_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create account table")?;

        let created_at_type: Option<String> = sqlx::query_scalar(CREATED_AT_TYPE)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to inspect account table")?;
        if created_at_type.as_deref() == Some("timestamp without time zone") {
            sqlx::query(UPGRADE_CREATED_AT)
                .execute(&self.pool)
                .await
                .context("Failed to upgrade account.created_at to timestamptz")?;
            info!("account.created_at upgraded to timestamptz");
        }

        info!("account table ready");
        Ok(())
    }

    async fn fetch_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT id, first_name, last_name, uuid, balance, created_at FROM account WHERE id = $1 FOR UPDATE",
        )
        .bind(id.0)
        .fetch_optional(&mut **tx)
        .await?;

        row.ok_or(LedgerError::NotFound(id))?.try_into()
    }

    async fn shift_balance<'e, E>(
        executor: E,
        id: AccountId,
        delta: Decimal,
    ) -> Result<Account, LedgerError>
    where
        E: PgExecutor<'e>,
    {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            UPDATE account SET balance = balance + $1
            WHERE id = $2
            RETURNING id, first_name, last_name, uuid, balance, created_at
            "#,
        )
        .bind(delta)
        .bind(id.0)
        .fetch_optional(executor)
        .await?;

        row.ok_or(LedgerError::NotFound(id))?.try_into()
    }

    async fn apply_transfer(
        tx: &mut Transaction<'_, Postgres>,
        source: AccountId,
        destination: AccountId,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        // Lock both rows in ascending id order so that opposite transfers
        // between the same pair cannot deadlock.
        let mut lock_order = [source, destination];
        lock_order.sort();
        for id in lock_order {
            Self::fetch_for_update(tx, id).await?;
        }

        let destination = Self::shift_balance(&mut **tx, destination, amount.value()).await?;
        let source = Self::shift_balance(&mut **tx, source, -amount.value()).await?;

        Ok(TransferReceipt {
            source,
            destination,
            amount,
        })
    }

    async fn apply_patch(
        tx: &mut Transaction<'_, Postgres>,
        id: AccountId,
        patch: &AccountPatch,
        capability: UpdateCapability,
    ) -> Result<Account, LedgerError> {
        let current = Self::fetch_for_update(tx, id).await?;
        let merged = current.apply_update(patch, capability)?;

        sqlx::query(
            "UPDATE account SET first_name = $1, last_name = $2, balance = $3 WHERE id = $4",
        )
        .bind(&merged.first_name)
        .bind(&merged.last_name)
        .bind(merged.balance)
        .bind(id.0)
        .execute(&mut **tx)
        .await?;

        Ok(merged)
    }
}

async fn finish<T>(
    tx: Transaction<'_, Postgres>,
    result: Result<T, LedgerError>,
) -> Result<T, LedgerError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Failed to roll back transaction: {}", rollback_err);
            }
            Err(e)
        }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, account), fields(uuid = %account.uuid))]
    async fn create_account(&self, account: NewAccount) -> Result<Account, LedgerError> {
        let row: AccountRow = sqlx::query_as(
            r#"
            INSERT INTO account (first_name, last_name, uuid, balance, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, first_name, last_name, uuid, balance, created_at
            "#,
        )
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(account.uuid.to_string())
        .bind(account.balance)
        .bind(account.created_at)
        .fetch_one(&self.pool)
        .await?;

        let account: Account = row.try_into()?;
        debug!(id = %account.id, "added new account");
        Ok(account)
    }

    async fn get_account_by_id(&self, id: AccountId) -> Result<Account, LedgerError> {
        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT id, first_name, last_name, uuid, balance, created_at FROM account WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(LedgerError::NotFound(id))?.try_into()
    }

    async fn get_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            "SELECT id, first_name, last_name, uuid, balance, created_at FROM account ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Account::try_from).collect()
    }

    #[instrument(skip(self, account), fields(id = %account.id))]
    async fn update_account(&self, account: &Account) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE account SET first_name = $1, last_name = $2, balance = $3 WHERE id = $4",
        )
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(account.balance)
        .bind(account.id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(account.id));
        }
        debug!(rows = result.rows_affected(), "rows updated");
        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn patch_account(
        &self,
        id: AccountId,
        patch: AccountPatch,
        capability: UpdateCapability,
    ) -> Result<Account, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let result = Self::apply_patch(&mut tx, id, &patch, capability).await;
        finish(tx, result).await
    }

    #[instrument(skip(self))]
    async fn delete_account(&self, id: AccountId) -> Result<(), LedgerError> {
        let result = sqlx::query("DELETE FROM account WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        debug!(rows = result.rows_affected(), "rows deleted");
        Ok(())
    }

    #[instrument(skip(self, account), fields(id = %account.id))]
    async fn increase_balance(
        &self,
        account: &Account,
        amount: Amount,
    ) -> Result<Account, LedgerError> {
        Self::shift_balance(&self.pool, account.id, amount.value()).await
    }

    #[instrument(skip(self, account), fields(id = %account.id))]
    async fn decrease_balance(
        &self,
        account: &Account,
        amount: Amount,
    ) -> Result<Account, LedgerError> {
        Self::shift_balance(&self.pool, account.id, -amount.value()).await
    }

    #[instrument(skip(self, source, destination), fields(source = %source.id, destination = %destination.id))]
    async fn transfer_money(
        &self,
        source: &Account,
        destination: &Account,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        ensure_distinct(source.id, destination.id)?;

        let mut tx = self.pool.begin().await?;
        let result = Self::apply_transfer(&mut tx, source.id, destination.id, amount).await;
        finish(tx, result).await
    }
}
