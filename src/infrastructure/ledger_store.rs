use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{Account, AccountId, AccountPatch, Amount, LedgerError, NewAccount, UpdateCapability};

/// Both sides of a committed transfer, as stored after the commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferReceipt {
    pub source: Account,
    pub destination: Account,
    pub amount: Amount,
}

/// Persistence of ledger accounts.
///
/// Every method is a single atomic transition against the backing store.
/// Balance mutations apply their delta to the stored balance inside that
/// transition, so the balance carried by the `&Account` argument is never
/// written back. Implementations do not retry; conflicts surface as
/// [`LedgerError::Conflict`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    async fn create_account(&self, account: NewAccount) -> Result<Account, LedgerError>;

    async fn get_account_by_id(&self, id: AccountId) -> Result<Account, LedgerError>;

    /// All accounts in ascending id order; empty when there are none.
    async fn get_accounts(&self) -> Result<Vec<Account>, LedgerError>;

    /// Overwrites names and balance of the row with `account.id`.
    async fn update_account(&self, account: &Account) -> Result<(), LedgerError>;

    /// Locks the row, merges `patch` and writes the result in one transaction.
    async fn patch_account(
        &self,
        id: AccountId,
        patch: AccountPatch,
        capability: UpdateCapability,
    ) -> Result<Account, LedgerError>;

    /// Idempotent: deleting a missing id succeeds.
    async fn delete_account(&self, id: AccountId) -> Result<(), LedgerError>;

    /// Debit: adds `amount` to the account's balance.
    async fn increase_balance(&self, account: &Account, amount: Amount)
        -> Result<Account, LedgerError>;

    /// Credit: subtracts `amount` from the account's balance.
    async fn decrease_balance(&self, account: &Account, amount: Amount)
        -> Result<Account, LedgerError>;

    /// Increases `destination` and decreases `source` by `amount`, both or
    /// neither.
    async fn transfer_money(
        &self,
        source: &Account,
        destination: &Account,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError>;
}

pub(crate) fn ensure_distinct(source: AccountId, destination: AccountId) -> Result<(), LedgerError> {
    if source == destination {
        return Err(LedgerError::validation(format!(
            "cannot transfer from account {source} to itself"
        )));
    }
    Ok(())
}
