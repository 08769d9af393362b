//! PostgreSQL ledger store.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    BalanceCheckpoint, BankAccount, CheckpointBalances, CheckpointFilter, DailyMovement,
    ImportBatch, ImportBatchStatus, LedgerTransaction, NewBankAccount, NewCheckpoint,
    NewImportBatch, NewTransaction, SortOrder, TransactionChanges, TransactionFilter,
    TransferConflict,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{LedgerStore, LedgerTx};

fn query_failed(what: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", what, e))
}

/// Connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[instrument(skip(database_url), fields(service = "reconciliation-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, AppError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin transaction", e))?;
        Ok(Box::new(PgTx { tx }))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, account), fields(tenant_id = %account.tenant_id))]
    async fn create_account(&self, account: &NewBankAccount) -> Result<BankAccount, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let created = sqlx::query_as::<_, BankAccount>(
            r#"
            INSERT INTO bank_accounts (account_id, tenant_id, name, currency)
            VALUES ($1, $2, $3, $4)
            RETURNING account_id, tenant_id, name, currency, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account.tenant_id)
        .bind(&account.name)
        .bind(&account.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_failed("create account", e))?;

        timer.observe_duration();
        info!(account_id = %created.account_id, "Bank account created");

        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<BankAccount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let account = sqlx::query_as::<_, BankAccount>(
            r#"
            SELECT account_id, tenant_id, name, currency, created_utc, updated_utc
            FROM bank_accounts
            WHERE tenant_id = $1 AND account_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get account", e))?;

        timer.observe_duration();
        Ok(account)
    }

    #[instrument(skip(self))]
    async fn list_accounts(&self, tenant_id: Uuid) -> Result<Vec<BankAccount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_accounts"])
            .start_timer();

        let accounts = sqlx::query_as::<_, BankAccount>(
            r#"
            SELECT account_id, tenant_id, name, currency, created_utc, updated_utc
            FROM bank_accounts
            WHERE tenant_id = $1
            ORDER BY name, account_id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list accounts", e))?;

        timer.observe_duration();
        Ok(accounts)
    }

    #[instrument(skip(self))]
    async fn get_checkpoint(
        &self,
        tenant_id: Uuid,
        checkpoint_id: Uuid,
    ) -> Result<Option<BalanceCheckpoint>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_checkpoint"])
            .start_timer();

        let checkpoint = sqlx::query_as::<_, BalanceCheckpoint>(
            r#"
            SELECT checkpoint_id, tenant_id, account_id, checkpoint_date, declared_balance,
                   calculated_balance, adjustment_amount, is_reconciled, import_batch_id, notes,
                   created_utc, updated_utc
            FROM balance_checkpoints
            WHERE tenant_id = $1 AND checkpoint_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(checkpoint_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get checkpoint", e))?;

        timer.observe_duration();
        Ok(checkpoint)
    }

    #[instrument(skip(self, filter))]
    async fn list_checkpoints(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        filter: &CheckpointFilter,
    ) -> Result<Vec<BalanceCheckpoint>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_checkpoints"])
            .start_timer();

        let (cursor_op, order) = match filter.order {
            SortOrder::Asc => (">", "ASC"),
            SortOrder::Desc => ("<", "DESC"),
        };
        let sql = format!(
            r#"
            SELECT checkpoint_id, tenant_id, account_id, checkpoint_date, declared_balance,
                   calculated_balance, adjustment_amount, is_reconciled, import_batch_id, notes,
                   created_utc, updated_utc
            FROM balance_checkpoints
            WHERE tenant_id = $1 AND account_id = $2
              AND ($3 OR NOT is_reconciled)
              AND ($4::date IS NULL OR checkpoint_date {cursor_op} $4)
            ORDER BY checkpoint_date {order}
            LIMIT $5
            "#
        );

        let checkpoints = sqlx::query_as::<_, BalanceCheckpoint>(&sql)
            .bind(tenant_id)
            .bind(account_id)
            .bind(filter.include_reconciled)
            .bind(filter.after_date)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("list checkpoints", e))?;

        timer.observe_duration();
        Ok(checkpoints)
    }

    #[instrument(skip(self))]
    async fn get_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<LedgerTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_transaction"])
            .start_timer();

        let txn = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT transaction_id, tenant_id, account_id, import_batch_id, transaction_date,
                   description, amount, direction, is_balance_adjustment, checkpoint_id,
                   transfer_match_id, created_utc, updated_utc
            FROM ledger_transactions
            WHERE tenant_id = $1 AND transaction_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get transaction", e))?;

        timer.observe_duration();
        Ok(txn)
    }

    #[instrument(skip(self, filter))]
    async fn list_transactions(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_transactions"])
            .start_timer();

        let transactions = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT transaction_id, tenant_id, account_id, import_batch_id, transaction_date,
                   description, amount, direction, is_balance_adjustment, checkpoint_id,
                   transfer_match_id, created_utc, updated_utc
            FROM ledger_transactions
            WHERE tenant_id = $1 AND account_id = $2
              AND ($3::date IS NULL OR transaction_date >= $3)
              AND ($4::date IS NULL OR transaction_date <= $4)
              AND ($5 OR NOT is_balance_adjustment)
            ORDER BY transaction_date, is_balance_adjustment, created_utc, transaction_id
            LIMIT $6
            "#,
        )
        .bind(tenant_id)
        .bind(account_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.include_adjustments)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list transactions", e))?;

        timer.observe_duration();
        Ok(transactions)
    }

    #[instrument(skip(self))]
    async fn get_import_batch(
        &self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Option<ImportBatch>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_import_batch"])
            .start_timer();

        let batch = sqlx::query_as::<_, ImportBatch>(
            r#"
            SELECT batch_id, tenant_id, account_id, source_name, status, transaction_count,
                   deleted_count, created_utc, rolled_back_utc
            FROM import_batches
            WHERE tenant_id = $1 AND batch_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get import batch", e))?;

        timer.observe_duration();
        Ok(batch)
    }
}

/// A database transaction. Dropped without commit, sqlx rolls it back.
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgTx {
    #[instrument(skip(self))]
    async fn lock_account(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<BankAccount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_account"])
            .start_timer();

        let account = sqlx::query_as::<_, BankAccount>(
            r#"
            SELECT account_id, tenant_id, name, currency, created_utc, updated_utc
            FROM bank_accounts
            WHERE tenant_id = $1 AND account_id = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| query_failed("lock account", e))?;

        timer.observe_duration();
        Ok(account)
    }

    async fn account_checkpoints(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<BalanceCheckpoint>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["account_checkpoints"])
            .start_timer();

        let checkpoints = sqlx::query_as::<_, BalanceCheckpoint>(
            r#"
            SELECT checkpoint_id, tenant_id, account_id, checkpoint_date, declared_balance,
                   calculated_balance, adjustment_amount, is_reconciled, import_batch_id, notes,
                   created_utc, updated_utc
            FROM balance_checkpoints
            WHERE tenant_id = $1 AND account_id = $2
            ORDER BY checkpoint_date ASC
            "#,
        )
        .bind(tenant_id)
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| query_failed("load account checkpoints", e))?;

        timer.observe_duration();
        Ok(checkpoints)
    }

    async fn find_checkpoint(
        &mut self,
        tenant_id: Uuid,
        checkpoint_id: Uuid,
    ) -> Result<Option<BalanceCheckpoint>, AppError> {
        sqlx::query_as::<_, BalanceCheckpoint>(
            r#"
            SELECT checkpoint_id, tenant_id, account_id, checkpoint_date, declared_balance,
                   calculated_balance, adjustment_amount, is_reconciled, import_batch_id, notes,
                   created_utc, updated_utc
            FROM balance_checkpoints
            WHERE tenant_id = $1 AND checkpoint_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(checkpoint_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| query_failed("find checkpoint", e))
    }

    async fn find_checkpoint_by_date(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
        checkpoint_date: NaiveDate,
    ) -> Result<Option<BalanceCheckpoint>, AppError> {
        sqlx::query_as::<_, BalanceCheckpoint>(
            r#"
            SELECT checkpoint_id, tenant_id, account_id, checkpoint_date, declared_balance,
                   calculated_balance, adjustment_amount, is_reconciled, import_batch_id, notes,
                   created_utc, updated_utc
            FROM balance_checkpoints
            WHERE tenant_id = $1 AND account_id = $2 AND checkpoint_date = $3
            "#,
        )
        .bind(tenant_id)
        .bind(account_id)
        .bind(checkpoint_date)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| query_failed("find checkpoint by date", e))
    }

    #[instrument(skip(self, checkpoint), fields(account_id = %checkpoint.account_id, checkpoint_date = %checkpoint.checkpoint_date))]
    async fn insert_checkpoint(
        &mut self,
        checkpoint: &NewCheckpoint,
    ) -> Result<BalanceCheckpoint, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_checkpoint"])
            .start_timer();

        let created = sqlx::query_as::<_, BalanceCheckpoint>(
            r#"
            INSERT INTO balance_checkpoints (checkpoint_id, tenant_id, account_id, checkpoint_date,
                                             declared_balance, import_batch_id, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING checkpoint_id, tenant_id, account_id, checkpoint_date, declared_balance,
                      calculated_balance, adjustment_amount, is_reconciled, import_batch_id, notes,
                      created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(checkpoint.tenant_id)
        .bind(checkpoint.account_id)
        .bind(checkpoint.checkpoint_date)
        .bind(checkpoint.declared_balance)
        .bind(checkpoint.import_batch_id)
        .bind(&checkpoint.notes)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::ConcurrentWrite(anyhow::anyhow!(
                    "A checkpoint for {} was written concurrently",
                    checkpoint.checkpoint_date
                ))
            }
            _ => query_failed("insert checkpoint", e),
        })?;

        timer.observe_duration();
        Ok(created)
    }

    async fn update_checkpoint_declaration(
        &mut self,
        checkpoint_id: Uuid,
        declared_balance: Decimal,
        notes: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE balance_checkpoints
            SET declared_balance = $2, notes = $3, updated_utc = NOW()
            WHERE checkpoint_id = $1
            "#,
        )
        .bind(checkpoint_id)
        .bind(declared_balance)
        .bind(notes)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| query_failed("update checkpoint", e))?;
        Ok(())
    }

    async fn store_checkpoint_balances(
        &mut self,
        checkpoint_id: Uuid,
        balances: &CheckpointBalances,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["store_checkpoint_balances"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE balance_checkpoints
            SET calculated_balance = $2, adjustment_amount = $3, is_reconciled = $4,
                updated_utc = NOW()
            WHERE checkpoint_id = $1
            "#,
        )
        .bind(checkpoint_id)
        .bind(balances.calculated_balance)
        .bind(balances.adjustment_amount)
        .bind(balances.is_reconciled)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| query_failed("store checkpoint balances", e))?;

        timer.observe_duration();
        Ok(())
    }

    async fn delete_checkpoint(&mut self, checkpoint_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM balance_checkpoints WHERE checkpoint_id = $1")
            .bind(checkpoint_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| query_failed("delete checkpoint", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Checkpoint {} not found",
                checkpoint_id
            )));
        }
        Ok(())
    }

    async fn batch_checkpoints(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Vec<BalanceCheckpoint>, AppError> {
        sqlx::query_as::<_, BalanceCheckpoint>(
            r#"
            SELECT checkpoint_id, tenant_id, account_id, checkpoint_date, declared_balance,
                   calculated_balance, adjustment_amount, is_reconciled, import_batch_id, notes,
                   created_utc, updated_utc
            FROM balance_checkpoints
            WHERE tenant_id = $1 AND import_batch_id = $2
            ORDER BY checkpoint_date ASC
            "#,
        )
        .bind(tenant_id)
        .bind(batch_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| query_failed("load batch checkpoints", e))
    }

    #[instrument(skip(self))]
    async fn daily_movements(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
        end_exclusive: NaiveDate,
    ) -> Result<Vec<DailyMovement>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["daily_movements"])
            .start_timer();

        let movements = sqlx::query_as::<_, DailyMovement>(
            r#"
            SELECT transaction_date AS day,
                   SUM(CASE WHEN direction = 'credit' THEN amount ELSE -amount END) AS net
            FROM ledger_transactions
            WHERE tenant_id = $1 AND account_id = $2
              AND NOT is_balance_adjustment
              AND transaction_date < $3
            GROUP BY transaction_date
            ORDER BY transaction_date ASC
            "#,
        )
        .bind(tenant_id)
        .bind(account_id)
        .bind(end_exclusive)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| query_failed("sum daily movements", e))?;

        timer.observe_duration();
        Ok(movements)
    }

    async fn adjustment_transactions(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT transaction_id, tenant_id, account_id, import_batch_id, transaction_date,
                   description, amount, direction, is_balance_adjustment, checkpoint_id,
                   transfer_match_id, created_utc, updated_utc
            FROM ledger_transactions
            WHERE tenant_id = $1 AND account_id = $2 AND is_balance_adjustment
            "#,
        )
        .bind(tenant_id)
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| query_failed("load adjustment transactions", e))
    }

    #[instrument(skip(self, transactions), fields(count = transactions.len()))]
    async fn insert_transactions(
        &mut self,
        transactions: &[NewTransaction],
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_transactions"])
            .start_timer();

        let mut inserted = Vec::with_capacity(transactions.len());
        for txn in transactions {
            let row = sqlx::query_as::<_, LedgerTransaction>(
                r#"
                INSERT INTO ledger_transactions (transaction_id, tenant_id, account_id, import_batch_id,
                                                 transaction_date, description, amount, direction,
                                                 is_balance_adjustment, checkpoint_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING transaction_id, tenant_id, account_id, import_batch_id, transaction_date,
                          description, amount, direction, is_balance_adjustment, checkpoint_id,
                          transfer_match_id, created_utc, updated_utc
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(txn.tenant_id)
            .bind(txn.account_id)
            .bind(txn.import_batch_id)
            .bind(txn.transaction_date)
            .bind(&txn.description)
            .bind(txn.amount)
            .bind(txn.direction.as_str())
            .bind(txn.is_balance_adjustment())
            .bind(txn.checkpoint_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::ConcurrentWrite(anyhow::anyhow!(
                        "Checkpoint adjustment was written concurrently"
                    ))
                }
                _ => query_failed("insert transaction", e),
            })?;
            inserted.push(row);
        }

        timer.observe_duration();
        Ok(inserted)
    }

    async fn find_transaction(
        &mut self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<LedgerTransaction>, AppError> {
        sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT transaction_id, tenant_id, account_id, import_batch_id, transaction_date,
                   description, amount, direction, is_balance_adjustment, checkpoint_id,
                   transfer_match_id, created_utc, updated_utc
            FROM ledger_transactions
            WHERE tenant_id = $1 AND transaction_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(transaction_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| query_failed("find transaction", e))
    }

    async fn update_transaction(
        &mut self,
        transaction_id: Uuid,
        changes: &TransactionChanges,
    ) -> Result<LedgerTransaction, AppError> {
        sqlx::query_as::<_, LedgerTransaction>(
            r#"
            UPDATE ledger_transactions
            SET transaction_date = COALESCE($2, transaction_date),
                description = COALESCE($3, description),
                amount = COALESCE($4, amount),
                direction = COALESCE($5, direction),
                updated_utc = NOW()
            WHERE transaction_id = $1
            RETURNING transaction_id, tenant_id, account_id, import_batch_id, transaction_date,
                      description, amount, direction, is_balance_adjustment, checkpoint_id,
                      transfer_match_id, created_utc, updated_utc
            "#,
        )
        .bind(transaction_id)
        .bind(changes.transaction_date)
        .bind(changes.description.as_deref())
        .bind(changes.amount)
        .bind(changes.direction.map(|d| d.as_str()))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| query_failed("update transaction", e))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Transaction {} not found", transaction_id))
        })
    }

    async fn delete_transaction(&mut self, transaction_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM ledger_transactions WHERE transaction_id = $1")
            .bind(transaction_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| query_failed("delete transaction", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Transaction {} not found",
                transaction_id
            )));
        }
        Ok(())
    }

    async fn set_transfer_match(
        &mut self,
        transaction_ids: &[Uuid],
        transfer_match_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE ledger_transactions
            SET transfer_match_id = $2, updated_utc = NOW()
            WHERE transaction_id = ANY($1)
            "#,
        )
        .bind(transaction_ids.to_vec())
        .bind(transfer_match_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| query_failed("set transfer match", e))?;
        Ok(())
    }

    async fn transfer_pair(
        &mut self,
        tenant_id: Uuid,
        transfer_match_id: Uuid,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT transaction_id, tenant_id, account_id, import_batch_id, transaction_date,
                   description, amount, direction, is_balance_adjustment, checkpoint_id,
                   transfer_match_id, created_utc, updated_utc
            FROM ledger_transactions
            WHERE tenant_id = $1 AND transfer_match_id = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(transfer_match_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| query_failed("load transfer pair", e))
    }

    #[instrument(skip(self, batch), fields(account_id = %batch.account_id))]
    async fn insert_import_batch(
        &mut self,
        batch: &NewImportBatch,
    ) -> Result<ImportBatch, AppError> {
        sqlx::query_as::<_, ImportBatch>(
            r#"
            INSERT INTO import_batches (batch_id, tenant_id, account_id, source_name, status,
                                        transaction_count)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING batch_id, tenant_id, account_id, source_name, status, transaction_count,
                      deleted_count, created_utc, rolled_back_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(batch.tenant_id)
        .bind(batch.account_id)
        .bind(&batch.source_name)
        .bind(ImportBatchStatus::Committed.as_str())
        .bind(batch.transaction_count)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| query_failed("create import batch", e))
    }

    async fn find_import_batch(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Option<ImportBatch>, AppError> {
        sqlx::query_as::<_, ImportBatch>(
            r#"
            SELECT batch_id, tenant_id, account_id, source_name, status, transaction_count,
                   deleted_count, created_utc, rolled_back_utc
            FROM import_batches
            WHERE tenant_id = $1 AND batch_id = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(batch_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| query_failed("find import batch", e))
    }

    async fn cross_batch_transfer_matches(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Vec<TransferConflict>, AppError> {
        sqlx::query_as::<_, TransferConflict>(
            r#"
            SELECT t.transaction_id,
                   p.transaction_id AS partner_transaction_id,
                   p.import_batch_id AS partner_batch_id
            FROM ledger_transactions t
            JOIN ledger_transactions p
              ON p.tenant_id = t.tenant_id
             AND p.transfer_match_id = t.transfer_match_id
             AND p.transaction_id <> t.transaction_id
            WHERE t.tenant_id = $1
              AND t.import_batch_id = $2
              AND t.transfer_match_id IS NOT NULL
              AND p.import_batch_id IS DISTINCT FROM $2
            ORDER BY t.transaction_id
            "#,
        )
        .bind(tenant_id)
        .bind(batch_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| query_failed("check cross-batch transfer matches", e))
    }

    #[instrument(skip(self))]
    async fn delete_batch_transactions(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
        limit: i64,
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_batch_transactions"])
            .start_timer();

        let result = sqlx::query(
            r#"
            DELETE FROM ledger_transactions
            WHERE transaction_id IN (
                SELECT transaction_id
                FROM ledger_transactions
                WHERE tenant_id = $1 AND import_batch_id = $2 AND NOT is_balance_adjustment
                LIMIT $3
            )
            "#,
        )
        .bind(tenant_id)
        .bind(batch_id)
        .bind(limit)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| query_failed("delete batch transactions", e))?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    async fn mark_batch_rolled_back(
        &mut self,
        batch_id: Uuid,
        deleted_count: i32,
    ) -> Result<ImportBatch, AppError> {
        sqlx::query_as::<_, ImportBatch>(
            r#"
            UPDATE import_batches
            SET status = $2, deleted_count = $3, rolled_back_utc = NOW()
            WHERE batch_id = $1
            RETURNING batch_id, tenant_id, account_id, source_name, status, transaction_count,
                      deleted_count, created_utc, rolled_back_utc
            "#,
        )
        .bind(batch_id)
        .bind(ImportBatchStatus::RolledBack.as_str())
        .bind(deleted_count)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| query_failed("mark batch rolled back", e))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Import batch {} not found", batch_id)))
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let PgTx { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| query_failed("commit transaction", e))
    }
}
