use std::collections::BTreeMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::domain::money::shift_balance;
use crate::domain::{Account, AccountId, AccountPatch, Amount, LedgerError, NewAccount, UpdateCapability};
use crate::infrastructure::ledger_store::{ensure_distinct, LedgerStore, TransferReceipt};

#[derive(Debug, Default)]
struct Table {
    next_id: i32,
    rows: BTreeMap<AccountId, Account>,
}

impl Table {
    fn row(&self, id: AccountId) -> Result<&Account, LedgerError> {
        self.rows.get(&id).ok_or(LedgerError::NotFound(id))
    }

    fn shifted(&self, id: AccountId, delta: Decimal) -> Result<Account, LedgerError> {
        let mut row = self.row(id)?.clone();
        row.balance = shift_balance(row.balance, delta)?;
        Ok(row)
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Every operation runs under a single acquisition
/// of the table lock; writers stage their rows before publishing them, so a
/// failed operation leaves the table untouched.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    table: RwLock<Table>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account, LedgerError> {
        let mut table = self.table.write().await;
        let next_id = table
            .next_id
            .checked_add(1)
            .ok_or_else(|| LedgerError::Storage("account id sequence exhausted".to_string()))?;
        table.next_id = next_id;

        let account = account.into_account(AccountId(next_id));
        table.rows.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account_by_id(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.table.read().await.row(id).cloned()
    }

    async fn get_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.table.read().await.rows.values().cloned().collect())
    }

    async fn update_account(&self, account: &Account) -> Result<(), LedgerError> {
        let mut table = self.table.write().await;
        let row = table
            .rows
            .get_mut(&account.id)
            .ok_or(LedgerError::NotFound(account.id))?;
        row.first_name = account.first_name.clone();
        row.last_name = account.last_name.clone();
        row.balance = account.balance;
        Ok(())
    }

    async fn patch_account(
        &self,
        id: AccountId,
        patch: AccountPatch,
        capability: UpdateCapability,
    ) -> Result<Account, LedgerError> {
        let mut table = self.table.write().await;
        let merged = table.row(id)?.apply_update(&patch, capability)?;
        table.rows.insert(id, merged.clone());
        Ok(merged)
    }

    async fn delete_account(&self, id: AccountId) -> Result<(), LedgerError> {
        self.table.write().await.rows.remove(&id);
        Ok(())
    }

    async fn increase_balance(
        &self,
        account: &Account,
        amount: Amount,
    ) -> Result<Account, LedgerError> {
        let mut table = self.table.write().await;
        let row = table.shifted(account.id, amount.value())?;
        table.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn decrease_balance(
        &self,
        account: &Account,
        amount: Amount,
    ) -> Result<Account, LedgerError> {
        let mut table = self.table.write().await;
        let row = table.shifted(account.id, -amount.value())?;
        table.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn transfer_money(
        &self,
        source: &Account,
        destination: &Account,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        ensure_distinct(source.id, destination.id)?;

        let mut table = self.table.write().await;
        let destination = table.shifted(destination.id, amount.value())?;
        let source = table.shifted(source.id, -amount.value())?;

        table.rows.insert(destination.id, destination.clone());
        table.rows.insert(source.id, source.clone());

        Ok(TransferReceipt {
            source,
            destination,
            amount,
        })
    }
}
