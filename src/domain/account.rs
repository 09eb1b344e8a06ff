use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::money::{shift_balance, AccountId, MAX_SCALE};
use crate::domain::LedgerError;

/// Upper bound on holder names, matching the `varchar(50)` columns.
pub const NAME_MAX_LEN: usize = 50;

/// A persisted ledger account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub first_name: String,
    pub last_name: String,
    pub uuid: Uuid,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// An account that has not been persisted yet and so has no id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub first_name: String,
    pub last_name: String,
    pub uuid: Uuid,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl NewAccount {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        NewAccount {
            first_name: first_name.into(),
            last_name: last_name.into(),
            uuid: Uuid::new_v4(),
            balance: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    pub fn into_account(self, id: AccountId) -> Account {
        Account {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            uuid: self.uuid,
            balance: self.balance,
            created_at: self.created_at,
        }
    }
}

/// Partial update of an account. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountPatch {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub balance: Option<Decimal>,
}

/// Whether a patch may rewrite the balance directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCapability {
    /// Balance changes are refused; money only moves through debit, credit
    /// and transfer.
    Standard,
    /// Trusted internal callers only. Never wired to a public route.
    BalanceOverride,
}

impl Account {
    /// Merges `patch` into a copy of this account.
    ///
    /// A name is replaced only when the patch carries a non-empty value that
    /// differs from the current one. A differing balance is applied only
    /// with [`UpdateCapability::BalanceOverride`].
    pub fn apply_update(
        &self,
        patch: &AccountPatch,
        capability: UpdateCapability,
    ) -> Result<Account, LedgerError> {
        let mut updated = self.clone();

        if let Some(first_name) = replacement(&self.first_name, patch.first_name.as_deref()) {
            validate_name("first_name", first_name)?;
            updated.first_name = first_name.to_string();
        }
        if let Some(last_name) = replacement(&self.last_name, patch.last_name.as_deref()) {
            validate_name("last_name", last_name)?;
            updated.last_name = last_name.to_string();
        }

        if let Some(balance) = patch.balance {
            if balance != self.balance {
                match capability {
                    UpdateCapability::Standard => {
                        return Err(LedgerError::validation(
                            "balance can only change through debit, credit or transfer",
                        ));
                    }
                    UpdateCapability::BalanceOverride => {
                        if balance.normalize().scale() > MAX_SCALE {
                            return Err(LedgerError::validation(format!(
                                "balance {balance} has more than {MAX_SCALE} decimal places"
                            )));
                        }
                        updated.balance = shift_balance(Decimal::ZERO, balance)?;
                    }
                }
            }
        }

        Ok(updated)
    }
}

fn replacement<'a>(current: &str, proposed: Option<&'a str>) -> Option<&'a str> {
    proposed.filter(|value| !value.is_empty() && *value != current)
}

fn validate_name(field: &str, value: &str) -> Result<(), LedgerError> {
    if value.chars().count() > NAME_MAX_LEN {
        return Err(LedgerError::validation(format!(
            "{field} must be at most {NAME_MAX_LEN} characters"
        )));
    }
    Ok(())
}
