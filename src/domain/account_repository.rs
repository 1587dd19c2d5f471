use crate::domain::{Account, AccountUpdate, NewAccount};
use error_ext::BoxError;
use futures::Stream;
use std::error::Error as StdError;
use thiserror::Error;

/// Durable storage for accounts.
#[trait_variant::make(Send)]
pub trait AccountRepository
where
    Self: Clone + Send + Sync + 'static,
{
    /// Insert a new account; the stored record with its assigned ID is returned.
    async fn create_account(&self, account: NewAccount) -> Result<Account, AccountRepositoryError>;

    /// Delete the account with the given ID and return it.
    async fn delete_account(&self, id: i64) -> Result<Account, AccountRepositoryError>;

    /// Update names and balance of the account with the given ID.
    async fn update_account(
        &self,
        id: i64,
        update: AccountUpdate,
    ) -> Result<Account, AccountRepositoryError>;

    async fn account_by_id(&self, id: i64) -> Result<Account, AccountRepositoryError>;

    /// All accounts ordered by ID.
    async fn accounts(
        &self,
    ) -> Result<
        impl Stream<Item = Result<Account, AccountRepositoryError>> + Send,
        AccountRepositoryError,
    >;
}

#[derive(Debug, Error)]
pub enum AccountRepositoryError {
    #[error("account with ID {0} not found")]
    NotFound(i64),

    /// Storage rejected the data, e.g. a value too long for its column.
    #[error("invalid account data: {0}")]
    Invalid(String),

    /// Storage aborted the operation because it exceeded its deadline.
    #[error("account storage timed out")]
    Timeout,

    #[error("cannot access account storage")]
    Persistence(#[source] BoxError),
}

impl AccountRepositoryError {
    pub fn persistence<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Persistence(Box::new(error))
    }
}
