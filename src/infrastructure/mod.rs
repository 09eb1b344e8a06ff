pub mod config;
pub mod in_memory;
pub mod ledger_store;
pub mod logging;
pub mod postgres;

pub use config::{AppConfig, LoggingConfig};
pub use in_memory::InMemoryLedgerStore;
pub use ledger_store::{LedgerStore, TransferReceipt};
pub use postgres::PostgresLedgerStore;
