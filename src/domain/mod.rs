pub mod account;
pub mod commands;
pub mod error;
pub mod money;

pub use account::*;
pub use commands::*;
pub use error::LedgerError;
pub use money::{AccountId, Amount};
