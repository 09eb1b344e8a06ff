pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod web;

// Re-export commonly used types
pub use application::LedgerService;
pub use domain::{Account, AccountId, Amount, LedgerError};
pub use infrastructure::{AppConfig, InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};
pub use web::create_router;
