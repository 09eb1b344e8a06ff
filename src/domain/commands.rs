use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::{AccountId, LedgerError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, max = 50))]
    pub first_name: String,
    #[validate(length(min = 1, max = 50))]
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAccountRequest {
    pub id: AccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChangeRequest {
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(alias = "id")]
    pub recipient_id: RecipientId,
    pub amount: Decimal,
}

/// Recipient reference as sent by clients: either a JSON string or number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecipientId {
    Number(i64),
    Text(String),
}

impl RecipientId {
    pub fn resolve(&self) -> Result<AccountId, LedgerError> {
        match self {
            RecipientId::Number(n) => i32::try_from(*n)
                .map(AccountId)
                .map_err(|_| LedgerError::validation(format!("invalid account id {n}"))),
            RecipientId::Text(s) => s.parse(),
        }
    }
}
