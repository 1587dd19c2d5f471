use crate::domain::{self, AccountRepository, AccountRepositoryError, AccountUpdate, NewAccount};
use futures::{Stream, TryStreamExt};
use sqlx::{prelude::FromRow, PgPool, QueryBuilder};
use std::iter::once;
use time::OffsetDateTime;
use tracing::{debug, instrument};

/// SQLSTATE raised when a statement is cancelled, e.g. by `statement_timeout`.
const QUERY_CANCELED: &str = "57014";

/// Postgres account repository. Writes run in their own transaction, so a call dropped before
/// commit leaves no trace; statements are bounded by the server side `statement_timeout` of the
/// pool's connections.
#[derive(Debug, Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AccountRepository for PgAccountRepository {
    #[instrument(skip(self))]
    async fn create_account(
        &self,
        account: NewAccount,
    ) -> Result<domain::Account, AccountRepositoryError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let account = QueryBuilder::new("INSERT INTO account (first_name, last_name) ")
            .push_values(once(account), |mut q, account| {
                q.push_bind(account.first_name)
                    .push_bind(account.last_name);
            })
            .push(" RETURNING *")
            .build_query_as::<Account>()
            .fetch_one(&mut *tx)
            .await
            .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;

        debug!(id = account.id, "inserted account");
        Ok(account.into())
    }

    #[instrument(skip(self))]
    async fn delete_account(&self, id: i64) -> Result<domain::Account, AccountRepositoryError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let account = QueryBuilder::new("DELETE FROM account WHERE id = ")
            .push_bind(id)
            .push(" RETURNING *")
            .build_query_as::<Account>()
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_error)?
            .ok_or(AccountRepositoryError::NotFound(id))?;

        tx.commit().await.map_err(storage_error)?;

        debug!(id, "deleted account");
        Ok(account.into())
    }

    #[instrument(skip(self))]
    async fn update_account(
        &self,
        id: i64,
        update: AccountUpdate,
    ) -> Result<domain::Account, AccountRepositoryError> {
        let AccountUpdate {
            first_name,
            last_name,
            balance,
        } = update;

        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let account = QueryBuilder::new("UPDATE account SET first_name = ")
            .push_bind(first_name)
            .push(", last_name = ")
            .push_bind(last_name)
            .push(", balance = ")
            .push_bind(balance)
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" RETURNING *")
            .build_query_as::<Account>()
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_error)?
            .ok_or(AccountRepositoryError::NotFound(id))?;

        tx.commit().await.map_err(storage_error)?;

        debug!(id, "updated account");
        Ok(account.into())
    }

    #[instrument(skip(self))]
    async fn account_by_id(&self, id: i64) -> Result<domain::Account, AccountRepositoryError> {
        let account = QueryBuilder::new("SELECT * FROM account WHERE id = ")
            .push_bind(id)
            .build_query_as::<Account>()
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?
            .ok_or(AccountRepositoryError::NotFound(id))?;
        Ok(account.into())
    }

    #[instrument(skip(self))]
    async fn accounts(
        &self,
    ) -> Result<
        impl Stream<Item = Result<domain::Account, AccountRepositoryError>> + Send,
        AccountRepositoryError,
    > {
        let accounts = sqlx::query_as::<_, Account>("SELECT * FROM account ORDER BY id")
            .fetch(&self.pool)
            .map_ok(domain::Account::from)
            .map_err(storage_error);
        Ok(accounts)
    }
}

/// Tell cancelled statements and rejected data (SQLSTATE classes 22 and 23) apart from
/// connectivity and other storage failures.
fn storage_error(error: sqlx::Error) -> AccountRepositoryError {
    if matches!(error, sqlx::Error::PoolTimedOut) {
        return AccountRepositoryError::Timeout;
    }

    let Some((code, message)) = error.as_database_error().and_then(|db_error| {
        db_error
            .code()
            .map(|code| (code.into_owned(), db_error.message().to_string()))
    }) else {
        return AccountRepositoryError::persistence(error);
    };

    match code.as_str() {
        QUERY_CANCELED => AccountRepositoryError::Timeout,
        code if code.starts_with("22") || code.starts_with("23") => {
            AccountRepositoryError::Invalid(message)
        }
        _ => AccountRepositoryError::persistence(error),
    }
}

#[derive(Debug, FromRow)]
struct Account {
    id: i64,
    first_name: String,
    last_name: String,
    number: i64,
    balance: i64,
    created_at: OffsetDateTime,
}

impl From<Account> for domain::Account {
    fn from(
        Account {
            id,
            first_name,
            last_name,
            number,
            balance,
            created_at,
        }: Account,
    ) -> Self {
        domain::Account {
            id,
            first_name,
            last_name,
            number,
            balance,
            created_at,
        }
    }
}
