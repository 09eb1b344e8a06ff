use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::domain::{
    Account, AccountId, AccountPatch, Amount, BalanceChangeRequest, CreateAccountRequest,
    DeleteAccountRequest, LedgerError, NewAccount, TransferRequest, UpdateCapability,
};
use crate::infrastructure::LedgerStore;

#[derive(Debug, Default)]
struct ServiceMetrics {
    commands_processed: AtomicU64,
    commands_failed: AtomicU64,
    conflicts_retried: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceMetricsSnapshot {
    pub commands_processed: u64,
    pub commands_failed: u64,
    pub conflicts_retried: u64,
}

/// Request-level entry point to the ledger.
///
/// Resolves and validates what callers send, then delegates each mutation to
/// the [`LedgerStore`] as one atomic call. Mutations that hit a conflict are
/// retried up to `conflict_retries` more times; the store itself never
/// retries.
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    conflict_retries: u32,
    metrics: ServiceMetrics,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, conflict_retries: u32) -> Self {
        Self {
            store,
            conflict_retries,
            metrics: ServiceMetrics::default(),
        }
    }

    #[instrument(skip(self, request))]
    pub async fn create_account(
        &self,
        request: CreateAccountRequest,
    ) -> Result<Account, LedgerError> {
        let result = async {
            request.validate()?;
            let account = self
                .store
                .create_account(NewAccount::new(request.first_name, request.last_name))
                .await?;
            info!(id = %account.id, uuid = %account.uuid, "account created");
            Ok::<_, LedgerError>(account)
        }
        .await;
        self.record("create_account", result)
    }

    pub async fn get_account(&self, id: &str) -> Result<Account, LedgerError> {
        self.store.get_account_by_id(id.parse()?).await
    }

    pub async fn get_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        self.store.get_accounts().await
    }

    /// Applies a public patch; balance changes are refused.
    #[instrument(skip(self, patch))]
    pub async fn update_account(
        &self,
        id: &str,
        patch: AccountPatch,
    ) -> Result<String, LedgerError> {
        let result = async {
            let id: AccountId = id.parse()?;
            self.with_conflict_retry(|| {
                self.store
                    .patch_account(id, patch.clone(), UpdateCapability::Standard)
            })
            .await?;
            Ok::<_, LedgerError>(format!("updated acc with id = {id}"))
        }
        .await;
        self.record("update_account", result)
    }

    /// Trusted path that may rewrite the balance directly. Not routed over
    /// HTTP.
    #[instrument(skip(self, patch))]
    pub async fn override_account(
        &self,
        id: AccountId,
        patch: AccountPatch,
    ) -> Result<Account, LedgerError> {
        let result = self
            .with_conflict_retry(|| {
                self.store
                    .patch_account(id, patch.clone(), UpdateCapability::BalanceOverride)
            })
            .await;
        let account = self.record("override_account", result)?;
        warn!(id = %id, balance = %account.balance, "balance overridden outside debit/credit");
        Ok(account)
    }

    #[instrument(skip(self))]
    pub async fn delete_account(
        &self,
        request: DeleteAccountRequest,
    ) -> Result<String, LedgerError> {
        let result = self
            .with_conflict_retry(|| self.store.delete_account(request.id))
            .await
            .map(|()| format!("removed acc with id = {}", request.id));
        self.record("delete_account", result)
    }

    /// Debit: increases the balance.
    #[instrument(skip(self, request))]
    pub async fn debit(
        &self,
        id: &str,
        request: BalanceChangeRequest,
    ) -> Result<String, LedgerError> {
        let result = async {
            let account = self.get_account(id).await?;
            let amount = Amount::new(request.amount)?;

            let updated = self
                .with_conflict_retry(|| self.store.increase_balance(&account, amount))
                .await?;
            info!(id = %updated.id, amount = %amount, balance = %updated.balance, "balance increased");

            Ok::<_, LedgerError>(format!(
                "${:.2} debited to {}'s account with id={}",
                amount.value(),
                account.first_name,
                account.id
            ))
        }
        .await;
        self.record("debit", result)
    }

    /// Credit: decreases the balance.
    #[instrument(skip(self, request))]
    pub async fn credit(
        &self,
        id: &str,
        request: BalanceChangeRequest,
    ) -> Result<String, LedgerError> {
        let result = async {
            let account = self.get_account(id).await?;
            let amount = Amount::new(request.amount)?;

            let updated = self
                .with_conflict_retry(|| self.store.decrease_balance(&account, amount))
                .await?;
            info!(id = %updated.id, amount = %amount, balance = %updated.balance, "balance decreased");

            Ok::<_, LedgerError>(format!(
                "${:.2} credited from {}'s account with id={}",
                amount.value(),
                account.first_name,
                account.id
            ))
        }
        .await;
        self.record("credit", result)
    }

    #[instrument(skip(self, request))]
    pub async fn transfer(
        &self,
        source_id: &str,
        request: TransferRequest,
    ) -> Result<String, LedgerError> {
        let result = async {
            let source = self.get_account(source_id).await?;
            let recipient_id = request.recipient_id.resolve()?;
            let recipient = self.store.get_account_by_id(recipient_id).await?;
            let amount = Amount::new(request.amount)?;

            let receipt = self
                .with_conflict_retry(|| self.store.transfer_money(&source, &recipient, amount))
                .await?;
            info!(
                source = %receipt.source.id,
                destination = %receipt.destination.id,
                amount = %amount,
                "transfer committed"
            );

            Ok::<_, LedgerError>(format!(
                "${:.2} transferred from {}'s account with id={} to {}'s account id={}",
                amount.value(),
                source.first_name,
                source.id,
                recipient.first_name,
                recipient.id
            ))
        }
        .await;
        self.record("transfer", result)
    }

    pub fn metrics(&self) -> ServiceMetricsSnapshot {
        ServiceMetricsSnapshot {
            commands_processed: self.metrics.commands_processed.load(Ordering::Relaxed),
            commands_failed: self.metrics.commands_failed.load(Ordering::Relaxed),
            conflicts_retried: self.metrics.conflicts_retried.load(Ordering::Relaxed),
        }
    }

    async fn with_conflict_retry<T, F, Fut>(&self, mut attempt: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_conflict() && retries < self.conflict_retries => {
                    retries += 1;
                    self.metrics.conflicts_retried.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Retrying after conflict ({}/{}): {}",
                        retries, self.conflict_retries, e
                    );
                }
                result => return result,
            }
        }
    }

    fn record<T>(&self, operation: &str, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
        match &result {
            Ok(_) => {
                self.metrics.commands_processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.metrics.commands_failed.fetch_add(1, Ordering::Relaxed);
                match e {
                    LedgerError::Storage(_) | LedgerError::Conflict(_) => {
                        error!("{} failed: {}", operation, e)
                    }
                    LedgerError::NotFound(_) | LedgerError::Validation(_) => {
                        warn!("{} rejected: {}", operation, e)
                    }
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecipientId;
    use crate::infrastructure::ledger_store::{MockLedgerStore, TransferReceipt};
    use crate::infrastructure::InMemoryLedgerStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn service() -> LedgerService {
        LedgerService::new(Arc::new(InMemoryLedgerStore::new()), 3)
    }

    fn sample(id: i32, first: &str) -> Account {
        NewAccount::new(first, "Test").into_account(AccountId(id))
    }

    async fn create(service: &LedgerService, first: &str, last: &str) -> Account {
        service
            .create_account(CreateAccountRequest {
                first_name: first.to_string(),
                last_name: last.to_string(),
            })
            .await
            .unwrap()
    }

    fn change(amount: Decimal) -> BalanceChangeRequest {
        BalanceChangeRequest { amount }
    }

    #[tokio::test]
    async fn alice_and_bob_scenario() {
        let service = service();

        let alice = create(&service, "Alice", "Lee").await;
        assert_eq!(alice.balance, Decimal::ZERO);
        assert!(!alice.uuid.is_nil());
        let alice_id = alice.id.to_string();

        service.debit(&alice_id, change(dec!(50))).await.unwrap();
        assert_eq!(
            service.get_account(&alice_id).await.unwrap().balance,
            dec!(50)
        );

        service.credit(&alice_id, change(dec!(20))).await.unwrap();
        assert_eq!(
            service.get_account(&alice_id).await.unwrap().balance,
            dec!(30)
        );

        let bob = create(&service, "Bob", "Ray").await;
        assert_eq!(bob.balance, Decimal::ZERO);

        let message = service
            .transfer(
                &alice_id,
                TransferRequest {
                    recipient_id: RecipientId::Text(bob.id.to_string()),
                    amount: dec!(10),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            message,
            format!(
                "$10.00 transferred from Alice's account with id={} to Bob's account id={}",
                alice.id, bob.id
            )
        );

        let bob = service.get_account(&bob.id.to_string()).await.unwrap();
        let alice = service.get_account(&alice_id).await.unwrap();
        assert_eq!(bob.balance, dec!(10));
        assert_eq!(alice.balance, dec!(20));
        assert_eq!(service.metrics().commands_processed, 5);
    }

    #[tokio::test]
    async fn confirmation_messages_follow_legacy_wording() {
        let service = service();
        let a = create(&service, "Ann", "Ko").await;
        let id = a.id.to_string();

        assert_eq!(
            service.debit(&id, change(dec!(12.5))).await.unwrap(),
            format!("$12.50 debited to Ann's account with id={id}")
        );
        assert_eq!(
            service.credit(&id, change(dec!(2))).await.unwrap(),
            format!("$2.00 credited from Ann's account with id={id}")
        );
        assert_eq!(
            service
                .update_account(&id, AccountPatch::default())
                .await
                .unwrap(),
            format!("updated acc with id = {id}")
        );
        assert_eq!(
            service
                .delete_account(DeleteAccountRequest { id: a.id })
                .await
                .unwrap(),
            format!("removed acc with id = {id}")
        );
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_the_store() {
        let service = service();
        let a = create(&service, "Ann", "Ko").await;
        let id = a.id.to_string();

        assert!(matches!(
            service.debit("not-a-number", change(dec!(1))).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            service.debit(&id, change(dec!(-1))).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            service.credit(&id, change(Decimal::ZERO)).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            service
                .create_account(CreateAccountRequest {
                    first_name: String::new(),
                    last_name: "Ko".into(),
                })
                .await,
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(
            service.get_account(&id).await.unwrap().balance,
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn early_rejections_count_as_failed_commands() {
        let service = service();

        assert!(service.debit("abc", change(dec!(1))).await.is_err());
        assert!(service.debit("99", change(dec!(1))).await.is_err());
        assert!(service
            .update_account("x", AccountPatch::default())
            .await
            .is_err());
        assert!(service
            .transfer(
                "1",
                TransferRequest {
                    recipient_id: RecipientId::Number(2),
                    amount: dec!(1),
                },
            )
            .await
            .is_err());

        let metrics = service.metrics();
        assert_eq!(metrics.commands_failed, 4);
        assert_eq!(metrics.commands_processed, 0);
    }

    #[tokio::test]
    async fn transfer_to_missing_recipient_is_not_found() {
        let service = service();
        let a = create(&service, "Ann", "Ko").await;
        service
            .debit(&a.id.to_string(), change(dec!(5)))
            .await
            .unwrap();

        let err = service
            .transfer(
                &a.id.to_string(),
                TransferRequest {
                    recipient_id: RecipientId::Number(404),
                    amount: dec!(1),
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err, LedgerError::NotFound(AccountId(404)));
        assert_eq!(
            service.get_account(&a.id.to_string()).await.unwrap().balance,
            dec!(5)
        );
    }

    #[tokio::test]
    async fn public_update_cannot_move_money() {
        let service = service();
        let a = create(&service, "Ann", "Ko").await;

        let err = service
            .update_account(
                &a.id.to_string(),
                AccountPatch {
                    balance: Some(dec!(1000000)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let overridden = service
            .override_account(
                a.id,
                AccountPatch {
                    balance: Some(dec!(42)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(overridden.balance, dec!(42));
    }

    #[tokio::test]
    async fn conflicts_are_retried_within_budget() {
        let account = sample(1, "Ann");
        let mut store = MockLedgerStore::new();
        let lookup = account.clone();
        store
            .expect_get_account_by_id()
            .returning(move |_| Ok(lookup.clone()));

        let mut calls = 0;
        let updated = account.clone();
        store
            .expect_increase_balance()
            .times(3)
            .returning(move |_, _| {
                calls += 1;
                if calls < 3 {
                    Err(LedgerError::Conflict("deadlock detected".into()))
                } else {
                    Ok(updated.clone())
                }
            });

        let service = LedgerService::new(Arc::new(store), 2);
        service.debit("1", change(dec!(5))).await.unwrap();

        let metrics = service.metrics();
        assert_eq!(metrics.conflicts_retried, 2);
        assert_eq!(metrics.commands_processed, 1);
        assert_eq!(metrics.commands_failed, 0);
    }

    #[tokio::test]
    async fn exhausted_retry_budget_surfaces_conflict() {
        let source = sample(1, "Ann");
        let destination = sample(2, "Bob");
        let mut store = MockLedgerStore::new();
        let (s, d) = (source.clone(), destination.clone());
        store
            .expect_get_account_by_id()
            .returning(move |id| if id == s.id { Ok(s.clone()) } else { Ok(d.clone()) });
        store
            .expect_transfer_money()
            .times(2)
            .returning(|_, _, _| Err(LedgerError::Conflict("could not serialize access".into())));

        let service = LedgerService::new(Arc::new(store), 1);
        let err = service
            .transfer(
                "1",
                TransferRequest {
                    recipient_id: RecipientId::Text("2".into()),
                    amount: dec!(3),
                },
            )
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(service.metrics().commands_failed, 1);
    }

    #[tokio::test]
    async fn storage_errors_are_not_retried() {
        let account = sample(1, "Ann");
        let mut store = MockLedgerStore::new();
        let lookup = account.clone();
        store
            .expect_get_account_by_id()
            .returning(move |_| Ok(lookup.clone()));
        store
            .expect_decrease_balance()
            .times(1)
            .returning(|_, _| Err(LedgerError::Storage("connection reset".into())));

        let service = LedgerService::new(Arc::new(store), 5);
        let err = service.credit("1", change(dec!(1))).await.unwrap_err();

        assert_eq!(err, LedgerError::Storage("connection reset".into()));
        assert_eq!(service.metrics().conflicts_retried, 0);
    }

    #[tokio::test]
    async fn transfer_reports_store_receipt() {
        let source = sample(1, "Ann");
        let destination = sample(2, "Bob");
        let mut store = MockLedgerStore::new();
        let (s, d) = (source.clone(), destination.clone());
        store
            .expect_get_account_by_id()
            .returning(move |id| if id == s.id { Ok(s.clone()) } else { Ok(d.clone()) });
        let (s, d) = (source.clone(), destination.clone());
        store
            .expect_transfer_money()
            .withf(|source, destination, amount| {
                source.id == AccountId(1)
                    && destination.id == AccountId(2)
                    && amount.value() == dec!(7.25)
            })
            .times(1)
            .returning(move |_, _, amount| {
                Ok(TransferReceipt {
                    source: s.clone(),
                    destination: d.clone(),
                    amount,
                })
            });

        let service = LedgerService::new(Arc::new(store), 0);
        let message = service
            .transfer(
                "1",
                TransferRequest {
                    recipient_id: RecipientId::Number(2),
                    amount: dec!(7.25),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            message,
            "$7.25 transferred from Ann's account with id=1 to Bob's account id=2"
        );
    }
}
