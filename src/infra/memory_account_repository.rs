use crate::domain::{Account, AccountRepository, AccountRepositoryError, AccountUpdate, NewAccount};
use futures::{stream, Stream};
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};
use time::OffsetDateTime;

/// Length limit of the `VARCHAR(50)` name columns.
const MAX_NAME_LEN: usize = 50;

/// A simple in-memory account repository, mirroring ID assignment and name limits of the Postgres
/// schema.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountRepository {
    state: Arc<RwLock<State>>,
}

#[derive(Debug, Default)]
struct State {
    accounts: BTreeMap<i64, Account>,
    last_id: i64,
    last_number: i64,
}

impl AccountRepository for InMemoryAccountRepository {
    async fn create_account(&self, account: NewAccount) -> Result<Account, AccountRepositoryError> {
        check_name(&account.first_name)?;
        check_name(&account.last_name)?;

        let mut state = self.state.write().unwrap();
        state.last_id += 1;
        state.last_number += 1;

        let account = Account {
            id: state.last_id,
            first_name: account.first_name,
            last_name: account.last_name,
            number: state.last_number,
            balance: 0,
            created_at: OffsetDateTime::now_utc(),
        };
        state.accounts.insert(account.id, account.clone());

        Ok(account)
    }

    async fn delete_account(&self, id: i64) -> Result<Account, AccountRepositoryError> {
        self.state
            .write()
            .unwrap()
            .accounts
            .remove(&id)
            .ok_or(AccountRepositoryError::NotFound(id))
    }

    async fn update_account(
        &self,
        id: i64,
        update: AccountUpdate,
    ) -> Result<Account, AccountRepositoryError> {
        check_name(&update.first_name)?;
        check_name(&update.last_name)?;

        let mut state = self.state.write().unwrap();
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(AccountRepositoryError::NotFound(id))?;

        account.first_name = update.first_name;
        account.last_name = update.last_name;
        account.balance = update.balance;

        Ok(account.clone())
    }

    async fn account_by_id(&self, id: i64) -> Result<Account, AccountRepositoryError> {
        self.state
            .read()
            .unwrap()
            .accounts
            .get(&id)
            .cloned()
            .ok_or(AccountRepositoryError::NotFound(id))
    }

    async fn accounts(
        &self,
    ) -> Result<impl Stream<Item = Result<Account, AccountRepositoryError>> + Send, AccountRepositoryError>
    {
        let accounts = self
            .state
            .read()
            .unwrap()
            .accounts
            .values()
            .cloned()
            .collect::<Vec<_>>();
        Ok(stream::iter(accounts.into_iter().map(Ok::<_, AccountRepositoryError>)))
    }
}

fn check_name(name: &str) -> Result<(), AccountRepositoryError> {
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AccountRepositoryError::Invalid(format!(
            "value too long for type character varying({MAX_NAME_LEN})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_create_assigns_identity() -> Result<(), AccountRepositoryError> {
        let repository = InMemoryAccountRepository::default();

        let ann = repository
            .create_account(NewAccount::new("Ann", "Lee"))
            .await?;
        let bob = repository
            .create_account(NewAccount::new("Bob", "Ray"))
            .await?;

        assert_ne!(ann.id, bob.id);
        assert_ne!(ann.number, bob.number);
        assert_eq!(ann.balance, 0);
        assert_ne!(ann.created_at, OffsetDateTime::UNIX_EPOCH);

        let account = repository.account_by_id(ann.id).await?;
        assert_eq!(account, ann);

        Ok(())
    }

    #[tokio::test]
    async fn test_accounts_returns_all() -> Result<(), AccountRepositoryError> {
        let repository = InMemoryAccountRepository::default();
        for n in 0..5 {
            repository
                .create_account(NewAccount::new(format!("first-{n}"), "last"))
                .await?;
        }

        let accounts = repository.accounts().await?.try_collect::<Vec<_>>().await?;
        assert_eq!(accounts.len(), 5);
        assert!(accounts.windows(2).all(|w| w[0].id < w[1].id));

        Ok(())
    }

    #[tokio::test]
    async fn test_update_and_delete() -> Result<(), AccountRepositoryError> {
        let repository = InMemoryAccountRepository::default();
        let account = repository
            .create_account(NewAccount::new("Ann", "Lee"))
            .await?;

        let update = AccountUpdate {
            first_name: "Ann".to_string(),
            last_name: "Smith".to_string(),
            balance: 42,
        };
        let updated = repository.update_account(account.id, update).await?;
        assert_eq!(updated.last_name, "Smith");
        assert_eq!(updated.balance, 42);
        assert_eq!(updated.created_at, account.created_at);

        let deleted = repository.delete_account(account.id).await?;
        assert_eq!(deleted, updated);

        let update = AccountUpdate {
            first_name: "A".repeat(51),
            last_name: "Smith".to_string(),
            balance: 0,
        };
        let result = repository.update_account(account.id, update).await;
        assert_matches!(result, Err(AccountRepositoryError::Invalid(_)));

        let result = repository.delete_account(account.id).await;
        assert_matches!(result, Err(AccountRepositoryError::NotFound(id)) if id == account.id);

        Ok(())
    }
}
