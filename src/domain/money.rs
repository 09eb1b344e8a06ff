use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::domain::LedgerError;

/// Exclusive bound on the magnitude of any balance, matching the
/// `decimal(19,4)` column.
pub const BALANCE_LIMIT: Decimal = dec!(1000000000000000);

/// Fractional digits kept by the persisted balance column.
pub const MAX_SCALE: u32 = 4;

/// Store-assigned account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i32>()
            .map(AccountId)
            .map_err(|_| LedgerError::validation(format!("invalid account id {s:?}")))
    }
}

/// A strictly positive amount of the ledger's single currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        if value <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "amount must be positive, got {value}"
            )));
        }
        if value.normalize().scale() > MAX_SCALE {
            return Err(LedgerError::validation(format!(
                "amount {value} has more than {MAX_SCALE} decimal places"
            )));
        }
        if value >= BALANCE_LIMIT {
            return Err(LedgerError::validation(format!(
                "amount {value} exceeds the ledger limit"
            )));
        }
        Ok(Amount(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Adds `delta` to `balance`, failing when the result leaves the range the
/// balance column can hold.
pub fn shift_balance(balance: Decimal, delta: Decimal) -> Result<Decimal, LedgerError> {
    let next = balance
        .checked_add(delta)
        .ok_or_else(|| LedgerError::Storage("numeric field overflow".to_string()))?;
    if next.abs() >= BALANCE_LIMIT {
        return Err(LedgerError::Storage(format!(
            "numeric field overflow: balance {next} out of range"
        )));
    }
    Ok(next)
}
